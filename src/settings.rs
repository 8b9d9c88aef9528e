//! Persisted controller settings
//!
//! Stored as JSON at `<config dir>/argb_driver/config.json`. Only what is
//! needed to re-arm the device after connecting lives here.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::audio_reactive::AudioConfig;
use crate::led::{LightingMode, RgbColor};

/// Vendor id of the controller firmware
pub const DEFAULT_VID: u16 = 0x20A0;
/// Product id of the controller firmware
pub const DEFAULT_PID: u16 = 0x423D;

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("Failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Settings restored on connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub vid: u16,
    pub pid: u16,
    pub mode: LightingMode,
    pub color: RgbColor,
    pub audio: AudioConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vid: DEFAULT_VID,
            pid: DEFAULT_PID,
            mode: LightingMode::Static,
            color: RgbColor::CYAN,
            audio: AudioConfig::default(),
        }
    }
}

impl Settings {
    /// Pull every field into its valid range
    pub fn clamped(mut self) -> Self {
        self.audio = self.audio.clamped();
        self
    }

    /// Default per-user settings path
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let dirs = ProjectDirs::from("", "", "argb_driver").ok_or(SettingsError::NoConfigDir)?;
        Ok(dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            info!(?path, "Settings file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(?path, "Loaded settings");
        Ok(settings.clamped())
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)?;
        info!(?path, "Settings saved");
        Ok(())
    }
}
