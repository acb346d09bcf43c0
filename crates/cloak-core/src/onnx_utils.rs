//! ONNX Runtime session construction with platform execution-provider
//! fallback, shared by the face detector and the embedding extractor.

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnnxError {
    #[error("failed to create session builder: {0}")]
    SessionBuilder(String),

    #[error("failed to load onnx model from {path}: {error}")]
    ModelLoad { path: String, error: String },

    #[error("model file not found: {0}")]
    ModelNotFound(String),
}

fn get_coreml_cache_dir() -> String {
    if let Ok(dir) = std::env::var("CLOAK_COREML_CACHE_DIR") {
        let _ = std::fs::create_dir_all(&dir);
        return dir;
    }
    if let Ok(home) = std::env::var("HOME") {
        let cache_dir = format!("{home}/.cache/cloak/coreml");
        let _ = std::fs::create_dir_all(&cache_dir);
        return cache_dir;
    }
    let temp_dir = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
    let cache_dir = format!("{temp_dir}/cloak-coreml");
    let _ = std::fs::create_dir_all(&cache_dir);
    cache_dir
}

fn num_threads() -> usize {
    std::env::var("CLOAK_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or_else(num_cpus::get_physical)
}

/// Build a session with graph optimization level 3 and, in order of
/// preference, CoreML, CUDA, then CPU execution. If CoreML fails to compile
/// the model, retries with CoreML removed rather than failing the whole load.
pub fn create_optimized_session(model_path: &Path) -> Result<Session, OnnxError> {
    if !model_path.exists() {
        return Err(OnnxError::ModelNotFound(model_path.display().to_string()));
    }

    let threads = num_threads();
    let cache_dir = get_coreml_cache_dir();

    let session = Session::builder()
        .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
        .with_intra_threads(threads)
        .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
        .with_memory_pattern(true)
        .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
        .with_execution_providers([
            CoreMLExecutionProvider::default()
                .with_subgraphs(true)
                .with_model_cache_dir(cache_dir.clone())
                .build(),
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ])
        .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
        .commit_from_file(model_path);

    match session {
        Ok(s) => Ok(s),
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("CoreML") || msg.contains("MLModel") {
                tracing::warn!(model = %model_path.display(), error = %msg, "CoreML compile failed, retrying CUDA/CPU only");
                Session::builder()
                    .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
                    .with_intra_threads(threads)
                    .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
                    .with_memory_pattern(true)
                    .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
                    .with_execution_providers([
                        CUDAExecutionProvider::default().build(),
                        CPUExecutionProvider::default().build(),
                    ])
                    .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
                    .commit_from_file(model_path)
                    .map_err(|e| OnnxError::ModelLoad {
                        path: model_path.display().to_string(),
                        error: format!("CoreML failed, CPU/CUDA also failed: {e}"),
                    })
            } else {
                Err(OnnxError::ModelLoad {
                    path: model_path.display().to_string(),
                    error: msg,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_reported() {
        let result = create_optimized_session(Path::new("nonexistent_model.onnx"));
        assert!(matches!(result, Err(OnnxError::ModelNotFound(_))));
    }
}
