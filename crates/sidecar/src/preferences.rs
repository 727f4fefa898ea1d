use crate::{atomic_write, SidecarError};
use directories::ProjectDirs;
use fai_model::Preferences;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const PREFS_SCHEMA_VERSION: u32 = 1;

/// Per-user preference file under the platform data directory.
#[derive(Debug, Clone)]
pub struct PreferencesStore {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreferencesEnvelope {
    version: u32,
    preferences: Preferences,
}

impl PreferencesStore {
    pub fn from_default_project() -> Result<Self, SidecarError> {
        let dirs = ProjectDirs::from("org", "AS9102", "AS9102 FAI")
            .ok_or(SidecarError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.root.join("preferences.json")
    }

    pub fn load(&self) -> Result<Preferences, SidecarError> {
        let path = self.path();
        if !path.exists() {
            return Ok(Preferences::default());
        }

        let bytes = fs::read(path)?;
        let envelope: PreferencesEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version > PREFS_SCHEMA_VERSION {
            tracing::warn!(version = envelope.version, "preferences written by a newer build");
        }

        Ok(envelope.preferences)
    }

    pub fn save(&self, preferences: &Preferences) -> Result<(), SidecarError> {
        fs::create_dir_all(&self.root)?;

        let envelope =
            PreferencesEnvelope { version: PREFS_SCHEMA_VERSION, preferences: preferences.clone() };

        let bytes = serde_json::to_vec_pretty(&envelope)?;
        atomic_write(&self.path(), &bytes)?;
        Ok(())
    }
}
