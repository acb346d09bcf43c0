//! The public entrypoint: `cloak(image_bytes, config, registry) ->
//! (image_bytes, metadata, analysis_bytes)`.
//!
//! Wires every stage crate into the sequence the reference implementation's
//! `cloak_image` follows: decode, detect, per-face embed/optimize/blend,
//! analysis render, encode. Model-unavailable and per-face failures degrade
//! gracefully (spec section 7); only decode/encode errors are fatal.

pub mod registry;

pub use registry::ModelRegistry;

use cloak_common::{BoundingBox, CloakConfig, CloakMetadata};
use cloak_face_embedding::{Embedding, EmbeddingExtractor};
use cloak_perturbation::Embedder;
use ndarray::{s, Array3, ArrayView3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloakError {
    #[error("failed to decode input image: {0}")]
    Decode(cloak_common::ImageIoError),

    #[error("failed to encode output image: {0}")]
    Encode(cloak_common::ImageIoError),
}

/// Run the full pipeline on an in-memory image. Never touches the network
/// itself beyond what `registry`'s first touch already triggered; never
/// writes to disk.
pub fn cloak(
    image_bytes: &[u8],
    config: &CloakConfig,
    registry: &ModelRegistry,
) -> Result<(Vec<u8>, CloakMetadata, Option<Vec<u8>>), CloakError> {
    let original_u8 =
        cloak_core::image_io::decode_image(image_bytes).map_err(CloakError::Decode)?;
    let start = Instant::now();

    let (width, height) = original_u8.dimensions();
    let preset = config.strength.preset();

    let detector = cloak_face_detector::Detector::new(registry.detector());
    let faces = detector.detect_with_fallback(&original_u8);
    if faces.is_empty() {
        let encoded = cloak_core::image_io::encode_image(
            &original_u8,
            config.output_format,
            config.output_quality,
        )
        .map_err(CloakError::Encode)?;
        let metadata = CloakMetadata {
            faces_detected: 0,
            faces_cloaked: 0,
            strength: config.strength,
            epsilon: preset.epsilon,
            pgd_steps: preset.steps,
            width,
            height,
            model_guided: false,
            embedding_distances: Vec::new(),
            avg_embedding_distance: 0.0,
            processing_time_seconds: start.elapsed().as_secs_f64(),
        };
        return Ok((encoded, metadata, None));
    }

    let embedder = registry.embedder();
    let model_guided = embedder.is_some();

    let original_f32 = cloak_core::rgb_u8_to_f32_hwc(&original_u8);
    let mut rng: StdRng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut distances = Vec::with_capacity(faces.len());
    let mut to_composite: Vec<(BoundingBox, Array3<f32>)> = Vec::new();
    let mut faces_cloaked = 0usize;

    for face in &faces {
        if !face.bbox.is_eligible() {
            distances.push(0.0);
            continue;
        }

        let crop = crop_f32(&original_f32, face.bbox);
        let adapter = embedder.map(|extractor| EmbedderAdapter { extractor });
        let embedder_ref: Option<&dyn Embedder> = adapter.as_ref().map(|a| a as &dyn Embedder);

        let (perturbation, distance) = cloak_perturbation::optimize(
            &crop.view(),
            preset.epsilon,
            preset.steps,
            preset.samples_per_step,
            embedder_ref,
            &mut rng,
        );
        distances.push(distance);
        to_composite.push((face.bbox, perturbation));
        faces_cloaked += 1;
    }

    let cloaked_f32 = cloak_compositor::composite_all(&original_f32, &to_composite);
    let cloaked_u8 = cloak_core::f32_hwc_to_rgb_u8(&cloaked_f32.view());

    let analysis_bytes = match cloak_analysis::render_analysis(
        &original_f32,
        &cloaked_f32,
        &faces,
        &distances,
        &config.model_dir,
    ) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!(error = %e, "analysis render failed, omitting analysis image");
            None
        }
    };

    let encoded = cloak_core::image_io::encode_image(
        &cloaked_u8,
        config.output_format,
        config.output_quality,
    )
    .map_err(CloakError::Encode)?;

    let avg_embedding_distance = CloakMetadata::average_positive_distance(&distances);
    let metadata = CloakMetadata {
        faces_detected: faces.len(),
        faces_cloaked,
        strength: config.strength,
        epsilon: preset.epsilon,
        pgd_steps: preset.steps,
        width,
        height,
        model_guided,
        embedding_distances: distances,
        avg_embedding_distance,
        processing_time_seconds: start.elapsed().as_secs_f64(),
    };

    Ok((encoded, metadata, analysis_bytes))
}

fn crop_f32(image: &Array3<f32>, bbox: BoundingBox) -> Array3<f32> {
    image
        .slice(s![
            bbox.y1 as usize..bbox.y2 as usize,
            bbox.x1 as usize..bbox.x2 as usize,
            ..
        ])
        .to_owned()
}

/// Bridges the embedding extractor's `u8` image contract to the
/// perturbation engine's float-tensor `Embedder` trait.
struct EmbedderAdapter<'a> {
    extractor: &'a EmbeddingExtractor,
}

impl Embedder for EmbedderAdapter<'_> {
    fn embed(&self, face_112_rgb01: &ArrayView3<f32>) -> Option<Embedding> {
        let face_u8 = cloak_core::f32_hwc_to_rgb_u8(face_112_rgb01);
        match self.extractor.embed(&face_u8) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                tracing::debug!(error = %e, "embedding probe failed, treated as a skipped step");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloak_common::{CloakConfig, OutputFormat, Strength};
    use image::{Rgb, RgbImage};

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 110, 100]));
        cloak_core::image_io::encode_image(&img, OutputFormat::Jpeg, 95).unwrap()
    }

    #[test]
    fn no_faces_short_circuits_to_original_with_empty_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path().to_path_buf());
        let config = CloakConfig {
            strength: Strength::Standard,
            output_format: OutputFormat::Jpeg,
            output_quality: 90,
            model_dir: dir.path().to_path_buf(),
            seed: Some(1),
        };

        // A uniform, featureless image should not trip the classical
        // cascade fallback (no DNN model reachable in this sandbox).
        let bytes = jpeg_bytes(64, 64);
        let (_, metadata, analysis) = cloak(&bytes, &config, &registry).unwrap();
        assert_eq!(metadata.faces_detected, 0);
        assert_eq!(metadata.faces_cloaked, 0);
        assert!(!metadata.model_guided);
        assert_eq!(metadata.avg_embedding_distance, 0.0);
        assert!(analysis.is_none());
    }

    #[test]
    fn crop_f32_extracts_expected_region() {
        let image = cloak_core::rgb_u8_to_f32_hwc(&RgbImage::from_pixel(20, 20, Rgb([50, 60, 70])));
        let bbox = BoundingBox { x1: 2, y1: 3, x2: 10, y2: 12 };
        let crop = crop_f32(&image, bbox);
        assert_eq!(crop.dim(), (9, 8, 3));
    }
}
