//! Feathered blending of per-face perturbations into the full-resolution
//! result image.
//!
//! Each face's perturbation is added to the pristine original crop, then
//! cross-faded against the pristine original (never a previously-blended
//! running buffer) through a Gaussian-feathered rectangular mask. Blending
//! every face against the same pristine original, rather than against
//! whatever `result` already holds, is what keeps "pixels at mask=0 are
//! bitwise identical to the original" exact even when two faces' padded
//! boxes overlap.

use cloak_common::BoundingBox;
use cloak_core::numeric::gaussian_blur_2d;
use ndarray::{Array2, Array3, ArrayView3};

/// Blend `perturbation` (sized to `bbox`) for one face into `result`,
/// in place. `result` must already hold a copy of `original` (or the
/// output of compositing earlier faces); `original` is always the pristine
/// decoded image, never `result` itself.
pub fn composite_face(
    original: &Array3<f32>,
    result: &mut Array3<f32>,
    bbox: BoundingBox,
    perturbation: &ArrayView3<f32>,
) {
    let (img_h, img_w, _) = original.dim();
    let bbox_h = bbox.height() as usize;
    let bbox_w = bbox.width() as usize;
    if bbox_h == 0 || bbox_w == 0 {
        return;
    }

    let feather = 5usize.max(bbox_h.min(bbox_w) / 8);
    let sigma = feather as f32 / 2.0;
    let radius = ((sigma * 3.0).ceil() as i64).max(1) as usize;
    let pad = radius + 1;

    let wx0 = (bbox.x1 as usize).saturating_sub(pad);
    let wy0 = (bbox.y1 as usize).saturating_sub(pad);
    let wx1 = ((bbox.x2 as usize) + pad).min(img_w);
    let wy1 = ((bbox.y2 as usize) + pad).min(img_h);
    let win_h = wy1.saturating_sub(wy0);
    let win_w = wx1.saturating_sub(wx0);
    if win_h == 0 || win_w == 0 {
        return;
    }

    let mut mask = Array2::<f32>::zeros((win_h, win_w));
    for y in bbox.y1 as usize..bbox.y2 as usize {
        for x in bbox.x1 as usize..bbox.x2 as usize {
            mask[[y - wy0, x - wx0]] = 1.0;
        }
    }
    let mask = gaussian_blur_2d(&mask.view(), sigma);

    for y in wy0..wy1 {
        for x in wx0..wx1 {
            let m = mask[[y - wy0, x - wx0]];
            if m <= 0.0 {
                continue;
            }
            let inside_bbox = y >= bbox.y1 as usize
                && y < bbox.y2 as usize
                && x >= bbox.x1 as usize
                && x < bbox.x2 as usize;

            for c in 0..3 {
                let orig_v = original[[y, x, c]];
                let perturbed_v = if inside_bbox {
                    (orig_v + perturbation[[y - bbox.y1 as usize, x - bbox.x1 as usize, c]])
                        .clamp(0.0, 1.0)
                } else {
                    orig_v
                };
                result[[y, x, c]] = orig_v * (1.0 - m) + perturbed_v * m;
            }
        }
    }
}

/// Composite every face's perturbation into a fresh copy of `original`.
/// `faces` pairs each eligible face's bbox with its (already-computed)
/// perturbation tensor.
#[must_use]
pub fn composite_all(
    original: &Array3<f32>,
    faces: &[(BoundingBox, Array3<f32>)],
) -> Array3<f32> {
    let mut result = original.clone();
    for (bbox, perturbation) in faces {
        composite_face(original, &mut result, *bbox, &perturbation.view());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixels_outside_feather_window_are_bitwise_original() {
        let original = Array3::<f32>::from_elem((100, 100, 3), 0.3);
        let bbox = BoundingBox { x1: 10, y1: 10, x2: 40, y2: 40 };
        let pert = Array3::<f32>::from_elem((30, 30, 3), 0.2);
        let result = composite_all(&original, &[(bbox, pert)]);

        assert_eq!(result[[99, 99, 0]], original[[99, 99, 0]]);
        assert_eq!(result[[0, 0, 0]], original[[0, 0, 0]]);
    }

    #[test]
    fn interior_pixel_approaches_additive_perturbation() {
        let original = Array3::<f32>::from_elem((200, 200, 3), 0.3);
        let bbox = BoundingBox { x1: 20, y1: 20, x2: 180, y2: 180 };
        let pert = Array3::<f32>::from_elem((160, 160, 3), 0.1);
        let result = composite_all(&original, &[(bbox, pert)]);

        let center = result[[100, 100, 0]];
        assert!((center - 0.4).abs() < 0.01);
    }

    #[test]
    fn result_stays_within_unit_interval() {
        let original = Array3::<f32>::from_elem((60, 60, 3), 0.95);
        let bbox = BoundingBox { x1: 5, y1: 5, x2: 55, y2: 55 };
        let pert = Array3::<f32>::from_elem((50, 50, 3), 0.5);
        let result = composite_all(&original, &[(bbox, pert)]);
        for v in result.iter() {
            assert!(*v >= 0.0 && *v <= 1.0);
        }
    }

    #[test]
    fn two_overlapping_faces_both_preserve_far_pixels() {
        let original = Array3::<f32>::from_elem((300, 300, 3), 0.5);
        let bbox_a = BoundingBox { x1: 10, y1: 10, x2: 110, y2: 110 };
        let bbox_b = BoundingBox { x1: 90, y1: 90, x2: 190, y2: 190 };
        let pert_a = Array3::<f32>::from_elem((100, 100, 3), 0.3);
        let pert_b = Array3::<f32>::from_elem((100, 100, 3), -0.3);
        let result = composite_all(&original, &[(bbox_a, pert_a), (bbox_b, pert_b)]);

        assert_eq!(result[[299, 299, 0]], original[[299, 299, 0]]);
        assert_eq!(result[[0, 0, 0]], original[[0, 0, 0]]);
    }
}
