use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

pub fn exists(path: &Path) -> Option<&Path> {
  if fs::metadata(path).is_err() {
    return None;
  }
  Some(path)
}

/// Ensure the directory for `path` exists.
///
/// A path with an extension is treated as a file and its parent is created;
/// anything else is created as a directory.
pub fn with_dir(path: &Path) -> Result<()> {
  let dir = if path.extension().is_some() {
    path.parent().unwrap_or_else(|| Path::new("."))
  } else {
    path
  };

  if dir.as_os_str().is_empty() || dir.exists() {
    return Ok(());
  }
  fs::create_dir_all(dir).map_err(|e| Error::write(dir, e))
}

/// Pretty-printed JSON, newline terminated. Parent directories are created.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
  with_dir(path)?;
  let mut text = serde_json::to_string_pretty(value).map_err(|source| Error::Artifact {
    path: path.to_path_buf(),
    source,
  })?;
  text.push('\n');
  fs::write(path, text).map_err(|e| Error::write(path, e))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let text = fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
  serde_json::from_str(&text).map_err(|source| Error::Artifact {
    path: path.to_path_buf(),
    source,
  })
}

/// Like [`read_json`] but maps a missing file to the given error, so a step run out of order
/// reports which prerequisite is absent.
pub fn read_required<T, F>(path: &Path, missing: F) -> Result<T>
where
  T: DeserializeOwned,
  F: FnOnce(PathBuf) -> Error,
{
  if exists(path).is_none() {
    return Err(missing(path.to_path_buf()));
  }
  read_json(path)
}
