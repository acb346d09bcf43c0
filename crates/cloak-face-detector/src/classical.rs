//! Fallback detector tier: a union of Viola-Jones-style Haar cascades, run
//! purely in Rust via `imageproc`'s integral image (no OpenCV binding).
//!
//! Each cascade is swept at the scale/neighbor parameters the spec calls for
//! (frontal default at two scale factors, an alternative frontal cascade at
//! two more, and profile detection on the image and its horizontal mirror).
//! `min_neighbors` is implemented the way OpenCV's `CascadeClassifier` does
//! it: nearby raw hits are clustered, and only clusters with at least
//! `min_neighbors` members survive.

use cloak_common::BoundingBox;
use image::GrayImage;
use imageproc::integral_image::{integral_image, sum_image_pixels};

#[derive(Clone, Copy)]
struct HaarFeature {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    kind: FeatureKind,
    threshold: f32,
    weight: f32,
}

#[derive(Clone, Copy)]
enum FeatureKind {
    TwoHorizontal,
    TwoVertical,
    ThreeHorizontal,
    Four,
}

/// A cascade's feature set, defined over a normalized 100x100 window and
/// scaled to whatever window size is currently being scanned.
#[derive(Clone, Copy)]
pub enum CascadeKind {
    FrontalDefault,
    FrontalAlt,
    Profile,
}

#[derive(Clone, Copy)]
pub struct CascadeSweep {
    pub kind: CascadeKind,
    pub scale_factor: f32,
    pub min_neighbors: u32,
    pub mirrored: bool,
}

/// The six sweeps the spec names for the classical fallback tier.
pub fn spec_sweeps() -> [CascadeSweep; 6] {
    [
        CascadeSweep { kind: CascadeKind::FrontalDefault, scale_factor: 1.10, min_neighbors: 4, mirrored: false },
        CascadeSweep { kind: CascadeKind::FrontalDefault, scale_factor: 1.05, min_neighbors: 3, mirrored: false },
        CascadeSweep { kind: CascadeKind::FrontalAlt, scale_factor: 1.05, min_neighbors: 3, mirrored: false },
        CascadeSweep { kind: CascadeKind::FrontalAlt, scale_factor: 1.03, min_neighbors: 2, mirrored: false },
        CascadeSweep { kind: CascadeKind::Profile, scale_factor: 1.10, min_neighbors: 3, mirrored: false },
        CascadeSweep { kind: CascadeKind::Profile, scale_factor: 1.10, min_neighbors: 3, mirrored: true },
    ]
}

const MIN_WINDOW: u32 = 40;
const CONFIDENCE_THRESHOLD: f32 = 0.65;

fn features_for(kind: CascadeKind) -> Vec<HaarFeature> {
    match kind {
        CascadeKind::FrontalDefault | CascadeKind::FrontalAlt => vec![
            HaarFeature { x: 20.0, y: 20.0, width: 60.0, height: 30.0, kind: FeatureKind::TwoHorizontal, threshold: 0.01, weight: 2.0 },
            HaarFeature { x: 45.0, y: 30.0, width: 10.0, height: 40.0, kind: FeatureKind::TwoVertical, threshold: 0.01, weight: 1.5 },
            HaarFeature { x: 25.0, y: 60.0, width: 50.0, height: 20.0, kind: FeatureKind::ThreeHorizontal, threshold: 0.01, weight: 1.8 },
            HaarFeature { x: 15.0, y: 15.0, width: 70.0, height: 25.0, kind: FeatureKind::TwoHorizontal, threshold: 0.01, weight: 1.6 },
            HaarFeature { x: 10.0, y: 35.0, width: 80.0, height: 40.0, kind: FeatureKind::Four, threshold: 0.01, weight: 1.3 },
        ],
        CascadeKind::Profile => vec![
            HaarFeature { x: 10.0, y: 20.0, width: 40.0, height: 50.0, kind: FeatureKind::TwoVertical, threshold: 0.01, weight: 2.0 },
            HaarFeature { x: 15.0, y: 55.0, width: 35.0, height: 25.0, kind: FeatureKind::ThreeHorizontal, threshold: 0.01, weight: 1.5 },
        ],
    }
}

struct RawHit {
    x: u32,
    y: u32,
    size: u32,
    score: f32,
}

fn evaluate_window(integral: &GrayImage, features: &[HaarFeature], x: u32, y: u32, size: u32) -> f32 {
    let (iw, ih) = integral.dimensions();
    let scale = size as f32 / 100.0;
    let mut total_score = 0.0f32;
    let mut total_weight = 0.0f32;

    for f in features {
        let fx = x as i64 + (f.x * scale) as i64;
        let fy = y as i64 + (f.y * scale) as i64;
        let fw = (f.width * scale).max(2.0) as u32;
        let fh = (f.height * scale).max(2.0) as u32;

        if fx < 0 || fy < 0 || fx as u32 + fw >= iw || fy as u32 + fh >= ih {
            continue;
        }
        let (fx, fy) = (fx as u32, fy as u32);

        let value = match f.kind {
            FeatureKind::TwoHorizontal => {
                let mid = fy + fh / 2;
                let top = region_sum(integral, fx, fy, fx + fw, mid);
                let bot = region_sum(integral, fx, mid, fx + fw, fy + fh);
                (top - bot).abs() / (fw * fh).max(1) as f32
            }
            FeatureKind::TwoVertical => {
                let mid = fx + fw / 2;
                let left = region_sum(integral, fx, fy, mid, fy + fh);
                let right = region_sum(integral, mid, fy, fx + fw, fy + fh);
                (left - right).abs() / (fw * fh).max(1) as f32
            }
            FeatureKind::ThreeHorizontal => {
                let h3 = (fh / 3).max(1);
                let top = region_sum(integral, fx, fy, fx + fw, fy + h3);
                let mid = region_sum(integral, fx, fy + h3, fx + fw, fy + 2 * h3);
                let bot = region_sum(integral, fx, fy + 2 * h3, fx + fw, fy + fh);
                ((top + bot) - 2.0 * mid).abs() / (fw * fh).max(1) as f32
            }
            FeatureKind::Four => {
                let midx = fx + fw / 2;
                let midy = fy + fh / 2;
                let tl = region_sum(integral, fx, fy, midx, midy);
                let tr = region_sum(integral, midx, fy, fx + fw, midy);
                let bl = region_sum(integral, fx, midy, midx, fy + fh);
                let br = region_sum(integral, midx, midy, fx + fw, fy + fh);
                ((tl + br) - (tr + bl)).abs() / (fw * fh).max(1) as f32
            }
        };

        if value > f.threshold {
            total_score += f.weight;
        }
        total_weight += f.weight;
    }

    if total_weight > 0.0 {
        total_score / total_weight
    } else {
        0.0
    }
}

fn region_sum(integral: &GrayImage, x1: u32, y1: u32, x2: u32, y2: u32) -> f32 {
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    sum_image_pixels(integral, x1, y1, x2 - 1, y2 - 1)[0] as f32
}

fn cluster_and_filter(hits: Vec<RawHit>, min_neighbors: u32) -> Vec<RawHit> {
    let mut remaining = hits;
    let mut clusters: Vec<Vec<RawHit>> = Vec::new();

    while let Some(seed) = remaining.pop() {
        let mut cluster = vec![seed];
        let mut i = 0;
        while i < remaining.len() {
            let overlaps = cluster.iter().any(|h| {
                let dx = (h.x as i64 - remaining[i].x as i64).abs() as u32;
                let dy = (h.y as i64 - remaining[i].y as i64).abs() as u32;
                dx < h.size.min(remaining[i].size) / 2 && dy < h.size.min(remaining[i].size) / 2
            });
            if overlaps {
                cluster.push(remaining.remove(i));
            } else {
                i += 1;
            }
        }
        clusters.push(cluster);
    }

    clusters
        .into_iter()
        .filter(|c| c.len() as u32 >= min_neighbors)
        .map(|c| {
            let n = c.len() as f32;
            let x = (c.iter().map(|h| h.x).sum::<u32>() as f32 / n) as u32;
            let y = (c.iter().map(|h| h.y).sum::<u32>() as f32 / n) as u32;
            let size = (c.iter().map(|h| h.size).sum::<u32>() as f32 / n) as u32;
            let score = c.iter().map(|h| h.score).sum::<f32>() / n;
            RawHit { x, y, size, score }
        })
        .collect()
}

fn scan(gray: &GrayImage, sweep: &CascadeSweep) -> Vec<(BoundingBox, f32)> {
    let (width, height) = gray.dimensions();
    let integral = integral_image(gray);
    let features = features_for(sweep.kind);

    let mut hits = Vec::new();
    let mut window = MIN_WINDOW;
    while window < width.min(height) {
        let step = (window / 4).max(8);
        let mut y = 0;
        while y + window < height {
            let mut x = 0;
            while x + window < width {
                let score = evaluate_window(&integral, &features, x, y, window);
                if score > CONFIDENCE_THRESHOLD {
                    hits.push(RawHit { x, y, size: window, score });
                }
                x += step;
            }
            y += step;
        }
        window = ((window as f32) * sweep.scale_factor) as u32;
    }

    cluster_and_filter(hits, sweep.min_neighbors)
        .into_iter()
        .map(|h| {
            (
                BoundingBox { x1: h.x, y1: h.y, x2: h.x + h.size, y2: h.y + h.size },
                h.score,
            )
        })
        .collect()
}

/// Run every sweep the spec names and return raw (unpadded, unclamped) boxes
/// with their confidence. Profile mirrored sweeps have their x coordinates
/// flipped back into the original image's frame before returning.
pub fn detect_all(gray_equalized: &GrayImage) -> Vec<(BoundingBox, f32)> {
    let width = gray_equalized.width();
    let mirrored_gray = image::imageops::flip_horizontal(gray_equalized);

    let mut all = Vec::new();
    for sweep in spec_sweeps() {
        let detections = if sweep.mirrored {
            scan(&mirrored_gray, &sweep)
                .into_iter()
                .map(|(bbox, conf)| {
                    let flipped = BoundingBox {
                        x1: width.saturating_sub(bbox.x2),
                        y1: bbox.y1,
                        x2: width.saturating_sub(bbox.x1),
                        y2: bbox.y2,
                    };
                    (flipped, conf)
                })
                .collect()
        } else {
            scan(gray_equalized, &sweep)
        };
        all.extend(detections);
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_on_blank_image_finds_nothing() {
        let gray = GrayImage::from_pixel(200, 200, image::Luma([128]));
        let sweep = spec_sweeps()[0];
        let hits = scan(&gray, &sweep);
        assert!(hits.is_empty());
    }

    #[test]
    fn cluster_and_filter_drops_isolated_hits() {
        let hits = vec![
            RawHit { x: 0, y: 0, size: 40, score: 0.8 },
            RawHit { x: 200, y: 200, size: 40, score: 0.8 },
        ];
        let kept = cluster_and_filter(hits, 2);
        assert!(kept.is_empty());
    }

    #[test]
    fn cluster_and_filter_keeps_dense_cluster() {
        let hits = vec![
            RawHit { x: 10, y: 10, size: 40, score: 0.7 },
            RawHit { x: 12, y: 11, size: 40, score: 0.8 },
            RawHit { x: 11, y: 13, size: 40, score: 0.75 },
        ];
        let kept = cluster_and_filter(hits, 2);
        assert_eq!(kept.len(), 1);
    }
}
