//! Two-tier face detector: a DNN single-shot detector as primary, a
//! multi-cascade classical detector as fallback.

pub mod classical;
pub mod dnn;
mod error;

pub use error::DetectorError;

use cloak_common::{BoundingBox, DetectorTier, FaceDetection};
use image::{GrayImage, RgbImage};

const PAD_FRACTION: f32 = 0.25;
const NMS_IOU_THRESHOLD: f32 = 0.35;
const DNN_PRIMARY_THRESHOLD: f32 = 0.5;
const DNN_RETRY_THRESHOLD: f32 = 0.3;

/// Sum type over the two detector tiers, per the redesign away from runtime
/// dynamic dispatch: a `Detector` either borrows a DNN session or carries no
/// state at all (the classical tier needs none beyond the image itself).
pub enum Detector<'a> {
    Dnn(&'a dnn::DnnDetector),
    Classical,
}

impl<'a> Detector<'a> {
    /// Select the DNN tier when a session is available, the classical tier
    /// otherwise. Mirrors `ModelRegistry::detector()`'s `Option` contract:
    /// the caller never needs to branch on model availability itself.
    #[must_use]
    pub fn new(primary: Option<&'a dnn::DnnDetector>) -> Self {
        match primary {
            Some(detector) => Detector::Dnn(detector),
            None => Detector::Classical,
        }
    }

    /// Run the full two-tier strategy and return aggregated, padded, NMS'd
    /// detections: the DNN tier (with its low-confidence retry) when
    /// present, falling back to the classical cascade union when the DNN
    /// tier was never constructed, errored, or found nothing.
    #[must_use]
    pub fn detect_with_fallback(&self, image: &RgbImage) -> Vec<FaceDetection> {
        if let Detector::Dnn(detector) = self {
            if let Some(faces) = Self::run_dnn(detector, image) {
                if !faces.is_empty() {
                    return faces;
                }
            }
        }
        Self::run_classical(image)
    }

    fn run_dnn(detector: &dnn::DnnDetector, image: &RgbImage) -> Option<Vec<FaceDetection>> {
        let (width, height) = image.dimensions();
        let mut raw = detector.detect(image, DNN_PRIMARY_THRESHOLD).ok()?;
        if raw.is_empty() {
            raw = detector.detect(image, DNN_RETRY_THRESHOLD).ok()?;
        }
        Some(aggregate(
            raw.into_iter().map(|d| (d.bbox, d.confidence)),
            DetectorTier::Dnn,
            width,
            height,
        ))
    }

    fn run_classical(image: &RgbImage) -> Vec<FaceDetection> {
        let (width, height) = image.dimensions();
        let gray = equalize_histogram(&image::imageops::grayscale(image));
        let raw = classical::detect_all(&gray);
        aggregate(raw, DetectorTier::Classical, width, height)
    }
}

fn aggregate(
    raw: impl IntoIterator<Item = (BoundingBox, f32)>,
    tier: DetectorTier,
    width: u32,
    height: u32,
) -> Vec<FaceDetection> {
    let padded: Vec<FaceDetection> = raw
        .into_iter()
        .map(|(bbox, confidence)| FaceDetection {
            bbox: bbox.padded_and_clamped(PAD_FRACTION, width, height),
            confidence: Some(confidence),
            tier,
        })
        .collect();

    non_maximum_suppression(padded)
}

/// NMS at IoU >= 0.35, keeping larger-area boxes first (per spec 4.2's
/// aggregation step — priority is area, not confidence).
fn non_maximum_suppression(mut detections: Vec<FaceDetection>) -> Vec<FaceDetection> {
    detections.sort_by(|a, b| b.bbox.area().cmp(&a.bbox.area()));

    let mut kept: Vec<FaceDetection> = Vec::new();
    'outer: for candidate in detections {
        for existing in &kept {
            if existing.bbox.iou(&candidate.bbox) >= NMS_IOU_THRESHOLD {
                continue 'outer;
            }
        }
        kept.push(candidate);
    }
    kept
}

/// Simple global histogram equalization over an 8-bit grayscale image.
fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    let mut hist = [0u32; 256];
    for p in gray.pixels() {
        hist[p.0[0] as usize] += 1;
    }

    let total = gray.width() as u64 * gray.height() as u64;
    if total == 0 {
        return gray.clone();
    }

    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (i, count) in hist.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);

    let mut lut = [0u8; 256];
    for i in 0..256 {
        let numerator = cdf[i].saturating_sub(cdf_min) as f64;
        let denominator = (total as u32).saturating_sub(cdf_min).max(1) as f64;
        lut[i] = ((numerator / denominator) * 255.0).round() as u8;
    }

    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_drops_high_iou_boxes_keeping_larger_area() {
        let big = FaceDetection {
            bbox: BoundingBox { x1: 0, y1: 0, x2: 100, y2: 100 },
            confidence: Some(0.5),
            tier: DetectorTier::Dnn,
        };
        let small_overlap = FaceDetection {
            bbox: BoundingBox { x1: 5, y1: 5, x2: 95, y2: 95 },
            confidence: Some(0.99),
            tier: DetectorTier::Dnn,
        };
        let kept = non_maximum_suppression(vec![small_overlap, big.clone()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bbox, big.bbox);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let a = FaceDetection {
            bbox: BoundingBox { x1: 0, y1: 0, x2: 50, y2: 50 },
            confidence: Some(0.9),
            tier: DetectorTier::Dnn,
        };
        let b = FaceDetection {
            bbox: BoundingBox { x1: 200, y1: 200, x2: 250, y2: 250 },
            confidence: Some(0.9),
            tier: DetectorTier::Dnn,
        };
        let kept = non_maximum_suppression(vec![a, b]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn equalize_histogram_is_identity_on_uniform_image() {
        let gray = GrayImage::from_pixel(10, 10, image::Luma([100]));
        let eq = equalize_histogram(&gray);
        assert_eq!(eq.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn detector_without_a_dnn_session_runs_the_classical_tier() {
        let detector = Detector::new(None);
        assert!(matches!(detector, Detector::Classical));
        let blank = image::RgbImage::from_pixel(200, 200, image::Rgb([128, 128, 128]));
        // A featureless image should not trip any cascade sweep.
        assert!(detector.detect_with_fallback(&blank).is_empty());
    }
}
