//! Face-recognition embedding extractor.
//!
//! Wraps a single pretrained FR model (SFace-style: 112x112 BGR input, a
//! 128-dim output vector) behind `embed`, which never panics and returns a
//! typed error on any failure — callers (the perturbation engine) treat any
//! `Err` identically to "model unavailable" and fall back to the untargeted
//! strategy, per spec 4.3.

use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::sync::Mutex;
use thiserror::Error;

pub const EMBEDDING_DIM: usize = 128;
pub const INPUT_SIZE: u32 = 112;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to build onnx session: {0}")]
    Session(#[from] cloak_core::onnx_utils::OnnxError),

    #[error("onnx inference failed: {0}")]
    Inference(String),

    #[error("unexpected embedding output shape: {0}")]
    OutputShape(String),

    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
}

/// 128-dimensional embedding produced by the FR model.
pub type Embedding = [f32; EMBEDDING_DIM];

pub struct EmbeddingExtractor {
    session: Mutex<Session>,
}

impl EmbeddingExtractor {
    pub fn new(session: Session) -> Self {
        EmbeddingExtractor {
            session: Mutex::new(session),
        }
    }

    /// `face_rgb`: any size RGB crop; it is resized to the model's native
    /// 112x112 and converted to BGR internally, matching spec 4.3's
    /// contract of "consumes a 112x112 BGR uint8 image" without requiring
    /// every caller to pre-resize.
    pub fn embed(&self, face_rgb: &RgbImage) -> Result<Embedding, EmbeddingError> {
        let input = cloak_core::to_bgr_chw(face_rgb, INPUT_SIZE);

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbeddingError::Poisoned(e.to_string()))?;

        let input_value = TensorRef::from_array_view(input.view())
            .map_err(|e| EmbeddingError::Inference(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| EmbeddingError::Inference(e.to_string()))?;

        let (_, data) = outputs
            .iter()
            .next()
            .ok_or_else(|| EmbeddingError::OutputShape("model produced no outputs".into()))?
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::Inference(e.to_string()))?;

        if data.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::OutputShape(format!(
                "expected {EMBEDDING_DIM} values, got {}",
                data.len()
            )));
        }

        let mut embedding = [0.0f32; EMBEDDING_DIM];
        embedding.copy_from_slice(data);
        Ok(embedding)
    }
}

/// Cosine similarity over raw (non-prenormalized) vectors: norms are
/// computed per comparison, matching the reference implementation exactly
/// (spec 3's Embedding data model note).
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// `1 - cosine_similarity`, in `[0, 2]`.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_of_opposite_vectors_is_two() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_with_zero_vector_is_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
