//! Uploaded artifact storage
//!
//! Uploads are staged under an import-scoped directory with a
//! timestamp-prefixed, sanitized file name, and removed exactly once when
//! the attempt sequence concludes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Strip path components and anything shell-hostile from an original
/// file name, preserving the extension.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches(['.', '_']).is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Write the uploaded bytes under `dir` as `{unix_ts}_{sanitized_name}`.
/// Returns the stored path.
pub fn store_upload(dir: &str, original_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create import storage dir {dir}"))?;

    let stored_name = format!(
        "{}_{}",
        chrono::Utc::now().timestamp(),
        sanitize_file_name(original_name)
    );
    let path = Path::new(dir).join(stored_name);

    std::fs::write(&path, bytes)
        .with_context(|| format!("failed to store upload at {}", path.display()))?;

    info!("Stored upload {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

/// Delete a stored upload. Idempotent; a failed delete is logged, never
/// propagated — cleanup must not mask the import outcome.
pub fn remove_upload(path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => info!("Cleanup: deleted import file {}", path.display()),
        Err(e) => warn!("Failed to delete import file {}: {}", path.display(), e),
    }
}
