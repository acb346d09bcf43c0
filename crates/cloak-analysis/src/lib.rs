//! Renders the "AI FEATURE ANALYSIS" diagnostic overlay: an inferno heatmap
//! of where the cloaked pixels diverge from the original, laid under a Sobel
//! edge sketch of the cloaked face, with per-face disruption labels, a faint
//! scanline texture, and a status header. Purely diagnostic — failure here
//! is reported to the caller as [`AnalysisError`] but never aborts cloaking
//! itself (spec's analysis-is-best-effort policy).

mod colormap;
mod font;

use ab_glyph::{FontRef, PxScale};
use cloak_common::{BoundingBox, FaceDetection};
use cloak_core::numeric::{luminance, sobel_magnitude};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use ndarray::{Array2, Array3};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("original and cloaked images have mismatched dimensions")]
    DimensionMismatch,

    #[error("failed to encode analysis image: {0}")]
    Encode(#[from] cloak_common::ImageIoError),
}

const DIFF_AMPLIFY: f32 = 50.0;
const EDGE_WEIGHT: [f32; 3] = [0.05, 0.80, 0.35];
const EDGE_OPACITY: f32 = 0.7;
const HEATMAP_OPACITY: f32 = 0.5;
const JPEG_QUALITY: u8 = 90;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 148]);
const GLOW_COLOR: Rgb<u8> = Rgb([0, 180, 100]);
const HEADER_COLOR: Rgb<u8> = Rgb([0, 255, 148]);
const DIM_GRAY: Rgb<u8> = Rgb([180, 180, 180]);

/// Render the diagnostic overlay. `faces` and `distances` must be
/// index-aligned (one distance per detected face, 0.0 for untracked ones).
/// `font_cache_dir` is where the label font is fetched/cached from, mirroring
/// the model cache directory convention.
pub fn render_analysis(
    original: &Array3<f32>,
    cloaked: &Array3<f32>,
    faces: &[FaceDetection],
    distances: &[f32],
    font_cache_dir: &Path,
) -> Result<Vec<u8>, AnalysisError> {
    if original.dim() != cloaked.dim() {
        return Err(AnalysisError::DimensionMismatch);
    }
    let (height, width, _) = original.dim();

    let diff_heat = diff_heatmap(original, cloaked);
    let cloaked_gray = luminance(&cloaked.view());
    let edges = normalized_edges(&cloaked_gray);

    let mut canvas = Array3::<f32>::zeros((height, width, 3));
    for y in 0..height {
        for x in 0..width {
            let e = edges[[y, x]];
            for c in 0..3 {
                let edge_component = e * EDGE_WEIGHT[c] * EDGE_OPACITY;
                let heat_component = diff_heat[[y, x, c]] * HEATMAP_OPACITY;
                canvas[[y, x, c]] = (edge_component + heat_component).clamp(0.0, 1.0);
            }
        }
    }

    let mut img = cloak_core::f32_hwc_to_rgb_u8(&canvas.view());

    for face in faces {
        draw_box_with_glow(&mut img, face.bbox);
    }

    let font_bytes = font::font_bytes(font_cache_dir);
    let font = font_bytes.and_then(|b| FontRef::try_from_slice(b).ok());
    draw_face_labels(&mut img, faces, distances, font.as_ref());

    apply_scanlines(&mut img);
    draw_header(&mut img, distances, font.as_ref());

    let bytes = cloak_core::image_io::encode_image(
        &img,
        cloak_common::OutputFormat::Jpeg,
        JPEG_QUALITY,
    )?;
    Ok(bytes)
}

/// Mean-across-channels absolute difference, amplified and inferno-mapped.
fn diff_heatmap(original: &Array3<f32>, cloaked: &Array3<f32>) -> Array3<f32> {
    let (height, width, _) = original.dim();
    let mut heat = Array3::<f32>::zeros((height, width, 3));
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0f32;
            for c in 0..3 {
                acc += (cloaked[[y, x, c]] - original[[y, x, c]]).abs();
            }
            let mean_diff = (acc / 3.0 * DIFF_AMPLIFY).clamp(0.0, 1.0);
            let [r, g, b] = colormap::inferno(mean_diff);
            heat[[y, x, 0]] = r as f32 / 255.0;
            heat[[y, x, 1]] = g as f32 / 255.0;
            heat[[y, x, 2]] = b as f32 / 255.0;
        }
    }
    heat
}

fn normalized_edges(gray: &Array2<f32>) -> Array2<f32> {
    let edges = sobel_magnitude(&gray.view());
    let max_e = edges.iter().copied().fold(0.0f32, f32::max);
    if max_e > 0.0 {
        edges.mapv(|v| v / max_e)
    } else {
        edges
    }
}

fn draw_box_with_glow(img: &mut RgbImage, bbox: BoundingBox) {
    let rect = Rect::at(bbox.x1 as i32, bbox.y1 as i32)
        .of_size(bbox.width().max(1), bbox.height().max(1));
    for t in 0..2 {
        if let Some(r) = inflate_rect(rect, t) {
            draw_hollow_rect_mut(img, r, BOX_COLOR);
        }
    }
    if let Some(r) = inflate_rect(rect, 2) {
        draw_hollow_rect_mut(img, r, GLOW_COLOR);
    }
}

fn inflate_rect(rect: Rect, by: i32) -> Option<Rect> {
    let w = rect.width() as i32 + 2 * by;
    let h = rect.height() as i32 + 2 * by;
    if w <= 0 || h <= 0 {
        return None;
    }
    Some(Rect::at(rect.left() - by, rect.top() - by).of_size(w as u32, h as u32))
}

fn face_label(dist: f32) -> (&'static str, Rgb<u8>) {
    if dist >= 0.40 {
        ("DISRUPTED", Rgb([0, 255, 100]))
    } else if dist >= 0.20 {
        ("PARTIAL", Rgb([255, 200, 0]))
    } else if dist > 0.0 {
        ("WEAK", Rgb([255, 80, 80]))
    } else {
        ("N/A", DIM_GRAY)
    }
}

fn font_scale_for(width: u32) -> f32 {
    (width as f32 / 1200.0).max(0.4)
}

fn px_scale(font_scale: f32) -> PxScale {
    PxScale::from(32.0 * font_scale)
}

fn apply_scanlines(img: &mut RgbImage) {
    let (width, height) = img.dimensions();
    for y in (0..height).step_by(3) {
        for x in 0..width {
            let px = img.get_pixel_mut(x, y);
            for c in 0..3 {
                px.0[c] = (px.0[c] as f32 * 0.8) as u8;
            }
        }
    }
}

fn status_line(avg_dist: f32) -> (&'static str, Rgb<u8>) {
    if avg_dist >= 0.30 {
        ("IDENTITY DISRUPTED", Rgb([0, 255, 100]))
    } else if avg_dist >= 0.15 {
        ("PARTIALLY DISRUPTED", Rgb([255, 200, 0]))
    } else if avg_dist > 0.0 {
        ("PERTURBATION APPLIED", Rgb([255, 120, 50]))
    } else {
        ("PERTURBATION DETECTED", Rgb([255, 120, 50]))
    }
}

fn draw_header(img: &mut RgbImage, distances: &[f32], font: Option<&FontRef<'_>>) {
    let avg_dist = cloak_common::CloakMetadata::average_positive_distance(distances);
    let scale = font_scale_for(img.width());
    let y_txt = (28.0 * scale + 10.0) as i32;

    let Some(font) = font else {
        tracing::debug!("label font unavailable, skipping overlay text");
        return;
    };

    draw_text_mut(img, HEADER_COLOR, 12, y_txt, px_scale(scale), font, "AI FEATURE ANALYSIS");

    let (status, status_color) = status_line(avg_dist);
    draw_text_mut(
        img,
        status_color,
        12,
        y_txt + (22.0 * scale) as i32,
        px_scale(scale * 0.7),
        font,
        status,
    );

    if avg_dist > 0.0 {
        let pct = (avg_dist * 100.0).round() as i32;
        let line = format!("Embedding Shift: {pct}%");
        draw_text_mut(
            img,
            DIM_GRAY,
            12,
            y_txt + (42.0 * scale) as i32,
            px_scale(scale * 0.55),
            font,
            &line,
        );
    }
}

/// Draw per-face labels; called after the header font resolution so the
/// same resolved font (or graceful skip) applies uniformly.
pub fn draw_face_labels(
    img: &mut RgbImage,
    faces: &[FaceDetection],
    distances: &[f32],
    font: Option<&FontRef<'_>>,
) {
    let Some(font) = font else { return };
    let scale = font_scale_for(img.width());
    for (i, face) in faces.iter().enumerate() {
        let dist = distances.get(i).copied().unwrap_or(0.0);
        let (label, color) = face_label(dist);
        let pct = (dist * 100.0).round() as i32;
        let text = if dist > 0.0 {
            format!("{label} {pct}%")
        } else {
            label.to_string()
        };
        let x = face.bbox.x1 as i32;
        let y = (face.bbox.y1 as i32 - 8).max(15);
        draw_text_mut(img, color, x, y, px_scale(scale * 0.65), font, &text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloak_common::DetectorTier;

    fn flat(height: usize, width: usize, v: f32) -> Array3<f32> {
        Array3::<f32>::from_elem((height, width, 3), v)
    }

    #[test]
    fn identical_images_produce_zero_diff_heatmap() {
        let original = flat(20, 20, 0.5);
        let heat = diff_heatmap(&original, &original);
        let black = colormap::inferno(0.0);
        for c in 0..3 {
            assert_eq!(heat[[10, 10, c]], black[c] as f32 / 255.0);
        }
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let original = flat(10, 10, 0.2);
        let cloaked = flat(10, 12, 0.2);
        let faces: Vec<FaceDetection> = vec![];
        let dir = tempfile::tempdir().unwrap();
        let result = render_analysis(&original, &cloaked, &faces, &[], dir.path());
        assert!(matches!(result, Err(AnalysisError::DimensionMismatch)));
    }

    #[test]
    fn render_produces_nonempty_jpeg_even_without_network_font() {
        let original = flat(64, 64, 0.4);
        let mut cloaked = original.clone();
        cloaked[[30, 30, 0]] = 0.9;
        let faces = vec![FaceDetection {
            bbox: BoundingBox { x1: 10, y1: 10, x2: 50, y2: 50 },
            confidence: Some(0.9),
            tier: DetectorTier::Dnn,
        }];
        let dir = tempfile::tempdir().unwrap();
        let bytes = render_analysis(&original, &cloaked, &faces, &[0.35], dir.path()).unwrap();
        assert!(!bytes.is_empty());
        // JPEG magic bytes.
        assert_eq!(&bytes[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn face_label_thresholds_match_spec() {
        assert_eq!(face_label(0.5).0, "DISRUPTED");
        assert_eq!(face_label(0.25).0, "PARTIAL");
        assert_eq!(face_label(0.05).0, "WEAK");
        assert_eq!(face_label(0.0).0, "N/A");
    }

    #[test]
    fn status_line_thresholds_match_spec() {
        assert_eq!(status_line(0.5).0, "IDENTITY DISRUPTED");
        assert_eq!(status_line(0.2).0, "PARTIALLY DISRUPTED");
        assert_eq!(status_line(0.05).0, "PERTURBATION APPLIED");
        assert_eq!(status_line(0.0).0, "PERTURBATION DETECTED");
    }
}
