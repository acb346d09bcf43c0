//! Lazy, process-wide label font, resolved through the same fetch-or-cache
//! path as the detector and embedding model files. Overlay rendering is
//! diagnostic, not load-bearing: any failure to resolve a usable font here
//! degrades to box/heatmap-only output rather than failing the analysis.

use once_cell::sync::OnceCell;
use std::path::Path;

const FONT_FILENAME: &str = "DejaVuSans.ttf";
const FONT_URLS: &[&str] = &[
    "https://raw.githubusercontent.com/dejavu-fonts/dejavu-fonts/master/ttf/DejaVuSans.ttf",
];
const FONT_MIN_BYTES: u64 = 50_000;

static FONT_BYTES: OnceCell<Option<Vec<u8>>> = OnceCell::new();

/// Return the cached label font bytes, fetching into `cache_dir` on first
/// use if needed. `None` means no usable font was available; callers skip
/// text rendering rather than treating it as fatal.
pub fn font_bytes(cache_dir: &Path) -> Option<&'static [u8]> {
    FONT_BYTES
        .get_or_init(|| {
            match cloak_core::model_cache::ensure_model_file(
                cache_dir,
                FONT_FILENAME,
                FONT_URLS,
                FONT_MIN_BYTES,
            ) {
                Ok(path) => match std::fs::read(&path) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read cached label font");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "label font unavailable, captions will be skipped");
                    None
                }
            }
        })
        .as_deref()
}
