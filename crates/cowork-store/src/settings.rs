//! Atomic on-disk persistence for workspaces, channels, and gateway config.

use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Write `value` to `path` by writing a sibling `.tmp` file, fsyncing it, then
/// renaming over the destination. A crash mid-write leaves the old file (or
/// no file) intact, never a half-written one.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load `path`, returning `Ok(None)` if it does not exist. A corrupt file is
/// moved aside to `.bak` and treated as absent, so the caller can fall back
/// to defaults instead of failing to start.
pub fn read_or_none<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    match serde_json::from_reader(reader) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            let bak_path = path.with_extension("bak");
            warn!(error = %e, path = %path.display(), bak = %bak_path.display(), "corrupt settings file, moving aside");
            fs::rename(path, &bak_path)?;
            Ok(None)
        }
    }
}

/// Default config root: `$XDG_CONFIG_HOME/cowork` or `~/.config/cowork`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("cowork")
}
