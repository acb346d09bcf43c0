//! On-disk model file cache: fetch-on-first-touch, validate, reuse.
//!
//! Mirrors the idempotent-first-touch model handling required by the
//! concurrency model: a file already present and large enough is trusted as
//!-is; a missing or undersized file is (re)downloaded from the given URLs in
//! order, the first one that both succeeds and passes the size check wins.

use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelCacheError {
    #[error("failed to create model cache directory {0}: {1}")]
    CreateDir(String, std::io::Error),

    #[error("failed to write model file {0}: {1}")]
    Write(String, std::io::Error),

    #[error("no source for {name} produced a valid file (tried {tried} urls)")]
    AllSourcesFailed { name: String, tried: usize },
}

/// Ensure `filename` exists under `cache_dir` and is at least `min_bytes`
/// long, downloading from `urls` in order on a cache miss or a too-small
/// existing file. Returns the resolved path.
pub fn ensure_model_file(
    cache_dir: &Path,
    filename: &str,
    urls: &[&str],
    min_bytes: u64,
) -> Result<PathBuf, ModelCacheError> {
    std::fs::create_dir_all(cache_dir)
        .map_err(|e| ModelCacheError::CreateDir(cache_dir.display().to_string(), e))?;

    let path = cache_dir.join(filename);

    if is_valid(&path, min_bytes) {
        return Ok(path);
    }

    for url in urls {
        match download(url) {
            Ok(bytes) if bytes.len() as u64 >= min_bytes => {
                std::fs::write(&path, &bytes)
                    .map_err(|e| ModelCacheError::Write(path.display().to_string(), e))?;
                tracing::info!(url = %url, bytes = bytes.len(), "fetched model file");
                return Ok(path);
            }
            Ok(bytes) => {
                tracing::warn!(url = %url, bytes = bytes.len(), min_bytes, "downloaded file too small, discarding");
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "model download failed, trying next source");
            }
        }
    }

    Err(ModelCacheError::AllSourcesFailed {
        name: filename.to_string(),
        tried: urls.len(),
    })
}

fn is_valid(path: &Path, min_bytes: u64) -> bool {
    std::fs::metadata(path)
        .map(|m| m.len() >= min_bytes)
        .unwrap_or(false)
}

fn download(url: &str) -> Result<Vec<u8>, String> {
    let response = ureq::get(url).call().map_err(|e| e.to_string())?;
    let mut buf = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut buf)
        .map_err(|e| e.to_string())?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_valid_file_is_reused_without_download() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();

        let resolved = ensure_model_file(dir.path(), "model.bin", &[], 1024).unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn missing_file_with_no_sources_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = ensure_model_file(dir.path(), "model.bin", &[], 1024);
        assert!(result.is_err());
    }

    #[test]
    fn too_small_existing_file_is_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, vec![0u8; 10]).unwrap();

        let result = ensure_model_file(dir.path(), "model.bin", &[], 1024);
        assert!(result.is_err());
    }
}
