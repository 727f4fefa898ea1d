pub mod codec;
mod preferences;

pub use codec::{decode, encode, CorruptSidecar, SIDECAR_VERSION};
pub use preferences::PreferencesStore;

use fai_model::BubbleStore;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const SIDECAR_SUFFIX: &str = ".as9102_bubbles.json";
const CORRUPT_SUFFIX: &str = ".corrupt";

#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Corrupt(#[from] CorruptSidecar),
}

/// Sidecar location for a drawing: the suffix is appended to the full file
/// name, so `part.pdf` pairs with `part.pdf.as9102_bubbles.json`.
pub fn sidecar_path(drawing: &Path) -> PathBuf {
    let mut name = drawing.as_os_str().to_owned();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

pub fn sidecar_exists(drawing: &Path) -> bool {
    sidecar_path(drawing).exists()
}

/// Load the bubbles saved next to `drawing`. A missing sidecar is not an
/// error; it means the drawing has never been bubbled here.
pub fn load_sidecar(drawing: &Path) -> Result<Option<BubbleStore>, SidecarError> {
    let path = sidecar_path(drawing);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(&path)?;
    let store = decode(&bytes)?;
    tracing::debug!(path = %path.display(), bubbles = store.len(), "loaded sidecar");

    Ok(Some(store))
}

pub fn save_sidecar(drawing: &Path, store: &BubbleStore) -> Result<PathBuf, SidecarError> {
    let path = sidecar_path(drawing);
    let bytes = encode(store)?;
    atomic_write(&path, &bytes)?;
    tracing::debug!(path = %path.display(), bubbles = store.len(), "saved sidecar");

    Ok(path)
}

pub fn delete_sidecar(drawing: &Path) -> Result<(), SidecarError> {
    let path = sidecar_path(drawing);
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Copy an unreadable sidecar to `<sidecar>.corrupt` so an overwrite does not
/// lose it. Returns the copy's path, or `None` when there was nothing to keep.
pub fn preserve_corrupt_sidecar(drawing: &Path) -> Result<Option<PathBuf>, SidecarError> {
    let path = sidecar_path(drawing);
    if !path.exists() {
        return Ok(None);
    }

    let mut name = path.as_os_str().to_owned();
    name.push(CORRUPT_SUFFIX);
    let backup = PathBuf::from(name);
    fs::copy(&path, &backup)?;
    tracing::warn!(backup = %backup.display(), "kept a copy of the unreadable sidecar");

    Ok(Some(backup))
}

/// Write `bytes` to `path` through a temporary file in the same directory,
/// renamed over the destination once fully written.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|error| error.error)?;
    Ok(())
}
