//! Speech models present in the local Hugging Face hub cache.

use fs_err as fs;
use std::path::Path;

const MODEL_MARKER: &str = "faster-whisper-";
const MODEL_PREFIX: &str = "models--Systran--faster-whisper-";

/// Names of cached models (`tiny`, `base.en`, ...), sorted. An unreadable or
/// missing cache means no models.
pub fn installed_models(cache_dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!(error = %err, "Model cache unavailable");
            return Vec::new();
        }
    };

    let mut models: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(MODEL_MARKER))
        .map(|name| name.trim_start_matches(MODEL_PREFIX).to_string())
        .collect();
    models.sort();
    models
}
