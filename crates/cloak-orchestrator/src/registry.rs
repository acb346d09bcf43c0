//! Process-wide, lazily-initialized model handles.
//!
//! Replaces the reference implementation's module-level `_face_net`/
//! `_sface_net` globals with an explicit, dependency-injected holder: one
//! `ModelRegistry` per process (or per test), each session built at most
//! once behind a `OnceCell`, safe under concurrent first-touch. The
//! classical cascade tier needs no such cell — its "cascades" are a handful
//! of compile-time constants evaluated fresh per call, not a loaded file.

use cloak_face_detector::dnn::DnnDetector;
use cloak_face_embedding::EmbeddingExtractor;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// This architecture's common ONNX export of the Caffe `res10_300x300_ssd`
/// weights the reference implementation loads via `deploy.prototxt` +
/// `res10_300x300_ssd_iter_140000.caffemodel`: this stack runs everything
/// through `ort`, with no Caffe-graph loader in the dependency tree, so the
/// cached artifact here is the ONNX conversion of the same architecture.
const DETECTOR_FILENAME: &str = "res10_300x300_ssd_iter_140000.onnx";
const DETECTOR_URLS: &[&str] = &[
    "https://github.com/opencv/opencv_3rdparty/raw/dnn_samples_face_detector_20180205_fp16/res10_300x300_ssd_iter_140000.onnx",
];
const DETECTOR_MIN_BYTES: u64 = 1_000_000;

const FR_FILENAME: &str = "face_recognition_sface_2021dec.onnx";
const FR_URLS: &[&str] = &[
    "https://github.com/opencv/opencv_zoo/raw/main/models/face_recognition_sface/face_recognition_sface_2021dec.onnx",
];
const FR_MIN_BYTES: u64 = 1_000_000;

#[derive(Debug, Error)]
enum RegistryError {
    #[error(transparent)]
    Cache(#[from] cloak_core::model_cache::ModelCacheError),
    #[error(transparent)]
    Onnx(#[from] cloak_core::onnx_utils::OnnxError),
}

pub struct ModelRegistry {
    model_dir: PathBuf,
    detector: OnceCell<Option<DnnDetector>>,
    embedder: OnceCell<Option<EmbeddingExtractor>>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new(model_dir: PathBuf) -> Self {
        ModelRegistry {
            model_dir,
            detector: OnceCell::new(),
            embedder: OnceCell::new(),
        }
    }

    /// `None` if the model is unreachable; callers fall back to the
    /// classical detector tier, never treating this as fatal.
    pub fn detector(&self) -> Option<&DnnDetector> {
        self.detector
            .get_or_init(|| match load_detector(&self.model_dir) {
                Ok(d) => {
                    tracing::info!("dnn face detector ready");
                    Some(d)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dnn face detector unavailable, using classical tier");
                    None
                }
            })
            .as_ref()
    }

    /// `None` if the FR model is unreachable; callers fall back to the
    /// untargeted perturbation strategy and report `model_guided = false`.
    pub fn embedder(&self) -> Option<&EmbeddingExtractor> {
        self.embedder
            .get_or_init(|| match load_embedder(&self.model_dir) {
                Ok(e) => {
                    tracing::info!("fr embedding model ready");
                    Some(e)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "fr embedding model unavailable, using untargeted perturbation");
                    None
                }
            })
            .as_ref()
    }
}

fn load_detector(model_dir: &Path) -> Result<DnnDetector, RegistryError> {
    let path = cloak_core::model_cache::ensure_model_file(
        model_dir,
        DETECTOR_FILENAME,
        DETECTOR_URLS,
        DETECTOR_MIN_BYTES,
    )?;
    let session = cloak_core::onnx_utils::create_optimized_session(&path)?;
    Ok(DnnDetector::new(session))
}

fn load_embedder(model_dir: &Path) -> Result<EmbeddingExtractor, RegistryError> {
    let path =
        cloak_core::model_cache::ensure_model_file(model_dir, FR_FILENAME, FR_URLS, FR_MIN_BYTES)?;
    let session = cloak_core::onnx_utils::create_optimized_session(&path)?;
    Ok(EmbeddingExtractor::new(session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registry_does_not_eagerly_load_anything() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path().to_path_buf());
        assert!(registry.detector.get().is_none());
        assert!(registry.embedder.get().is_none());
    }
}
