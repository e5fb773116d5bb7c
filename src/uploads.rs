//! Image uploads stored on local disk and served from `/uploads`.

use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
];

/// File extension for an accepted image content type.
pub fn extension_for(content_type: &str) -> AppResult<&'static str> {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    ALLOWED_TYPES.iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
        .ok_or_else(|| AppError::BadRequest(format!("unsupported file type {content_type}, images only")))
}

/// Writes `bytes` under `dir` with a generated name and returns that name.
pub async fn store(dir: &Path, content_type: &str, bytes: &[u8]) -> AppResult<String> {
    if bytes.is_empty() { return Err(AppError::BadRequest("uploaded file is empty".into())); }
    if bytes.len() > MAX_UPLOAD_BYTES { return Err(AppError::BadRequest("file exceeds the 10 MiB limit".into())); }
    let ext = extension_for(content_type)?;
    let name = format!("{}.{ext}", Uuid::now_v7().simple());
    tokio::fs::create_dir_all(dir).await.map_err(|e| AppError::Internal(format!("upload dir: {e}")))?;
    tokio::fs::write(dir.join(&name), bytes).await.map_err(|e| AppError::Internal(format!("upload write: {e}")))?;
    info!(file = %name, size = bytes.len(), "upload stored");
    Ok(name)
}
