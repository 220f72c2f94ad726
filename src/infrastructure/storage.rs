use crate::domain::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of reading a JSON document from disk
#[derive(Debug)]
pub enum JsonLoad<T> {
    Missing,
    Loaded(T),
    /// The file could not be parsed and was moved aside
    Quarantined { backup: PathBuf, reason: String },
}

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

pub fn ensure_parent_dir(file: &Path) -> std::io::Result<()> {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// `cache.json` → `cache.bak.json`
pub fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}.bak.{}", stem, ext.to_string_lossy()),
        None => format!("{}.bak", stem),
    };
    path.with_file_name(name)
}

/// Read a JSON document. Empty files count as missing; unparseable files are
/// renamed to their backup path and reported as quarantined.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<JsonLoad<T>> {
    if !path.exists() {
        return Ok(JsonLoad::Missing);
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(JsonLoad::Missing);
    }
    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Ok(JsonLoad::Loaded(value)),
        Err(e) => {
            let backup = backup_path(path);
            fs::rename(path, &backup)?;
            Ok(JsonLoad::Quarantined {
                backup,
                reason: e.to_string(),
            })
        }
    }
}

/// Serialize to a sibling temp file, then rename over the target so readers
/// never observe a partial document.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::ParseError(format!("Failed to serialize {}: {}", path.display(), e)))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "store.json".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    fs::write(&tmp, body)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
