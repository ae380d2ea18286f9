//! TOML configuration file loading
//!
//! Supports `~/.config/voxlink/config.toml` as a persistent config source.
//! Every field is optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// REST base URL
    pub api_url: Option<String>,

    /// WebSocket base URL
    pub ws_url: Option<String>,

    /// Bearer token
    pub token: Option<String>,

    /// User whose conversations are listed
    pub user_id: Option<String>,

    /// Audio pipeline settings
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Session lifecycle settings
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Audio pipeline settings
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_samples: Option<usize>,
    pub input_gain: Option<f32>,
    pub lead_window_ms: Option<u64>,
    pub max_backlog_frames: Option<usize>,
}

/// Session lifecycle settings
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Delay after a conversation ends before refreshing data
    pub grace_ms: Option<u64>,

    /// Same, after an onboarding interview
    pub onboarding_grace_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    config_file_path().map_or_else(ConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_from(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voxlink/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voxlink").join("config.toml"))
}
