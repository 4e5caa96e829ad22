use std::path::Path;

use tracing::debug;
use uuid::Uuid;

use crate::storage::FileStorage;

/// Moves a stored file to a fresh random name that keeps the original
/// extension. A missing source is left alone and its path returned as is.
pub async fn rename_stored_file(storage: &dyn FileStorage, path: &str) -> anyhow::Result<String> {
    let Some(bytes) = storage.read(path).await? else {
        debug!(path, "nothing to rename");
        return Ok(path.to_string());
    };

    let (directory, file_name) = split_path(path);
    let renamed = random_file_name(file_name);

    storage.delete(path).await?;
    let stored = storage.save(directory, &renamed, &bytes).await?;
    debug!(from = path, to = %stored, "renamed stored file");

    Ok(stored)
}

pub fn random_file_name(original: &str) -> String {
    let stem = Uuid::new_v4().simple().to_string();
    match extension(original) {
        Some(extension) => format!("{stem}.{extension}"),
        None => stem,
    }
}

/// Reduces a client-supplied name to a safe final path component.
pub fn sanitize_file_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((directory, file_name)) => (directory, file_name),
        None => ("", path),
    }
}

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|ch| ch.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
}
