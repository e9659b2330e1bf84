//! Files stored under the media directory: profile pictures and wiki
//! attachments. Stored names are `<uuid>-<sanitized original name>`; the
//! path recorded in the database is relative to the media directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use uuid::Uuid;

use crate::errors::UploadError;

const MAX_FILENAME_LEN: usize = 100;
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    /// Path relative to the media directory, always `/`-separated.
    pub relative_path: String,
    pub size: usize,
}

/// Reduce a client-supplied filename to a safe basename.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let cleaned: String = cleaned.chars().take(MAX_FILENAME_LEN).collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn check_size(bytes: &[u8], max: usize) -> Result<(), UploadError> {
    if bytes.is_empty() {
        return Err(UploadError::Empty);
    }
    if bytes.len() > max {
        return Err(UploadError::TooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(())
}

async fn write_under(
    media_dir: &Path,
    segments: &[String],
    filename: &str,
    bytes: &[u8],
) -> Result<StoredFile, UploadError> {
    let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_filename(filename));
    let mut dir = PathBuf::from(media_dir);
    for segment in segments {
        dir.push(segment);
    }
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;
    let path = dir.join(&stored_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write upload {}", path.display()))?;

    let mut relative = segments.join("/");
    relative.push('/');
    relative.push_str(&stored_name);
    tracing::debug!(path = %relative, size = bytes.len(), "stored upload");
    Ok(StoredFile {
        relative_path: relative,
        size: bytes.len(),
    })
}

/// Store an attachment at `wiki/<org_id>/<uuid>-<filename>`.
pub async fn store_wiki_attachment(
    media_dir: &Path,
    org_id: i64,
    filename: &str,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<StoredFile, UploadError> {
    check_size(bytes, max_bytes)?;
    write_under(
        media_dir,
        &["wiki".to_string(), org_id.to_string()],
        filename,
        bytes,
    )
    .await
}

/// Store a profile picture at `profiles/<user_id>/<uuid>-<filename>`.
pub async fn store_profile_picture(
    media_dir: &Path,
    user_id: i64,
    filename: &str,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<StoredFile, UploadError> {
    check_size(bytes, max_bytes)?;
    match extension(filename) {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => {}
        other => return Err(UploadError::UnsupportedType(other.unwrap_or_default())),
    }
    write_under(
        media_dir,
        &["profiles".to_string(), user_id.to_string()],
        filename,
        bytes,
    )
    .await
}

/// Remove previously stored uploads. Missing files are skipped and other
/// failures are logged; nothing here fails the caller.
pub async fn remove_stored(media_dir: &Path, relative_paths: &[String]) -> usize {
    let mut removed = 0;
    for relative in relative_paths {
        let path = media_dir.join(relative);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove stored upload");
            }
        }
    }
    removed
}
