//! Shared types and error taxonomy for the face-cloaking pipeline.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while decoding or encoding an image in memory.
#[derive(Debug, Error)]
pub enum ImageIoError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode image: {0}")]
    Encode(String),

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
}

impl From<image::ImageError> for ImageIoError {
    fn from(err: image::ImageError) -> Self {
        ImageIoError::Decode(err.to_string())
    }
}

/// Axis-aligned face box in pixel space, already 25%-padded and clamped to
/// the image bounds. `x1 < x2 <= width`, `y1 < y2 <= height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    #[must_use]
    #[inline]
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    #[must_use]
    #[inline]
    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    #[must_use]
    #[inline]
    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// Eligible for cloaking only if both sides are at least 10 pixels.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.width() >= 10 && self.height() >= 10
    }

    /// Intersection-over-union with another box.
    #[must_use]
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let inter = u64::from(x2 - x1) * u64::from(y2 - y1);
        let union = self.area() + other.area() - inter;
        if union == 0 {
            0.0
        } else {
            inter as f32 / union as f32
        }
    }

    /// Pad by `frac` on every side (e.g. 0.25 for the spec's 25% padding),
    /// then clamp to `[0, width) x [0, height)`.
    #[must_use]
    pub fn padded_and_clamped(&self, frac: f32, width: u32, height: u32) -> BoundingBox {
        let w = self.width() as f32;
        let h = self.height() as f32;
        let pad_x = w * frac;
        let pad_y = h * frac;

        let x1 = (self.x1 as f32 - pad_x).max(0.0).round() as u32;
        let y1 = (self.y1 as f32 - pad_y).max(0.0).round() as u32;
        let x2 = ((self.x2 as f32 + pad_x).round() as u32).min(width);
        let y2 = ((self.y2 as f32 + pad_y).round() as u32).min(height);

        BoundingBox { x1, y1, x2, y2 }
    }
}

/// Which detector tier actually produced a detection. Not part of
/// `CloakMetadata`; useful for logging and for asserting scenario S5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorTier {
    Dnn,
    Classical,
}

/// A single detected face, prior to cloaking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub confidence: Option<f32>,
    pub tier: DetectorTier,
}

/// Closed set of cloaking strengths, mapping to SPSA hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Subtle,
    Standard,
    Maximum,
}

/// Concrete `(epsilon, steps, samples_per_step)` for a `Strength`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrengthPreset {
    pub epsilon: f32,
    pub steps: u32,
    pub samples_per_step: u32,
}

impl Strength {
    #[must_use]
    pub fn preset(self) -> StrengthPreset {
        match self {
            Strength::Subtle => StrengthPreset {
                epsilon: 6.0 / 255.0,
                steps: 40,
                samples_per_step: 4,
            },
            Strength::Standard => StrengthPreset {
                epsilon: 12.0 / 255.0,
                steps: 60,
                samples_per_step: 6,
            },
            Strength::Maximum => StrengthPreset {
                epsilon: 24.0 / 255.0,
                steps: 100,
                samples_per_step: 8,
            },
        }
    }
}

impl std::fmt::Display for Strength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strength::Subtle => "subtle",
            Strength::Standard => "standard",
            Strength::Maximum => "maximum",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Strength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subtle" => Ok(Strength::Subtle),
            "standard" => Ok(Strength::Standard),
            "maximum" => Ok(Strength::Maximum),
            other => Err(format!("unknown strength: {other}")),
        }
    }
}

/// Output image container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
}

/// Diagnostic metadata returned alongside the cloaked image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloakMetadata {
    pub faces_detected: usize,
    pub faces_cloaked: usize,
    pub strength: Strength,
    pub epsilon: f32,
    pub pgd_steps: u32,
    pub width: u32,
    pub height: u32,
    pub model_guided: bool,
    pub embedding_distances: Vec<f32>,
    pub avg_embedding_distance: f32,
    pub processing_time_seconds: f64,
}

impl CloakMetadata {
    /// Mean of strictly-positive entries of `embedding_distances`, or 0 when
    /// that set is empty (testable property #8).
    #[must_use]
    pub fn average_positive_distance(distances: &[f32]) -> f32 {
        let positive: Vec<f32> = distances.iter().copied().filter(|d| *d > 0.0).collect();
        if positive.is_empty() {
            0.0
        } else {
            positive.iter().sum::<f32>() / positive.len() as f32
        }
    }
}

/// Orchestrator input. The core never reads configuration from the
/// environment; callers build this struct directly.
#[derive(Debug, Clone)]
pub struct CloakConfig {
    pub strength: Strength,
    pub output_format: OutputFormat,
    pub output_quality: u8,
    pub model_dir: std::path::PathBuf,
    /// Seeds every random draw in the perturbation engine for reproducible
    /// tests; `None` uses nondeterministic entropy in production.
    pub seed: Option<u64>,
}

impl Default for CloakConfig {
    fn default() -> Self {
        CloakConfig {
            strength: Strength::Standard,
            output_format: OutputFormat::Jpeg,
            output_quality: 95,
            model_dir: std::path::PathBuf::from("models"),
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_box_clamps_to_image_bounds() {
        let b = BoundingBox { x1: 0, y1: 0, x2: 10, y2: 10 };
        let padded = b.padded_and_clamped(0.25, 12, 12);
        assert_eq!(padded.x2, 12);
        assert_eq!(padded.y2, 12);
        assert_eq!(padded.x1, 0);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox { x1: 0, y1: 0, x2: 10, y2: 10 };
        let b = BoundingBox { x1: 20, y1: 20, x2: 30, y2: 30 };
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox { x1: 0, y1: 0, x2: 10, y2: 10 };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn tiny_box_is_not_eligible() {
        let b = BoundingBox { x1: 0, y1: 0, x2: 5, y2: 5 };
        assert!(!b.is_eligible());
    }

    #[test]
    fn average_positive_distance_ignores_zeros() {
        let distances = vec![0.0, 0.2, 0.0, 0.4];
        assert!((CloakMetadata::average_positive_distance(&distances) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn average_positive_distance_of_empty_is_zero() {
        assert_eq!(CloakMetadata::average_positive_distance(&[]), 0.0);
    }

    #[test]
    fn strength_presets_match_spec() {
        let p = Strength::Subtle.preset();
        assert!((p.epsilon - 6.0 / 255.0).abs() < 1e-6);
        assert_eq!(p.steps, 40);
        assert_eq!(p.samples_per_step, 4);

        let p = Strength::Maximum.preset();
        assert_eq!(p.steps, 100);
        assert_eq!(p.samples_per_step, 8);
    }
}
