use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::report::{FeatureConfiguration, AUTH_PAYLOAD_SIZE};
use crate::sequencer::SequencerSettings;

const CONFIG_DIR: &str = "opends4";
const CONFIG_FILE: &str = "opends4.toml";
const KEY_FILE: &str = "ds4key.bin";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid setting {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Emulator settings, read from `opends4.toml`.
///
/// Every field has a default, so a partial file only overrides what it names.
///
/// ```toml
/// key_path = "/etc/opends4/ds4key.bin"
/// log_level = "debug"
///
/// [features]
/// rumble = false
///
/// [timing]
/// report_interval_ms = 4
/// ```
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EmulatorConfig {
    pub key_path: PathBuf,
    pub log_level: String,
    pub features: FeatureToggles,
    pub timing: TimingConfig,
    pub auth: AuthConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FeatureToggles {
    pub touchpad: bool,
    pub imu: bool,
    pub led: bool,
    pub rumble: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub report_interval_ms: u64,
    pub tick_interval_ms: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub challenge_page_size: usize,
    pub response_page_size: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            key_path: config_dir().join(KEY_FILE),
            log_level: "info".to_string(),
            features: FeatureToggles::default(),
            timing: TimingConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            touchpad: true,
            imu: true,
            led: true,
            rumble: true,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: 4,
            tick_interval_ms: 4,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            challenge_page_size: AUTH_PAYLOAD_SIZE,
            response_page_size: AUTH_PAYLOAD_SIZE,
        }
    }
}

fn config_dir() -> PathBuf {
    let mut base = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    base.push(CONFIG_DIR);
    base
}

impl EmulatorConfig {
    /// `<config dir>/opends4/opends4.toml`
    pub fn default_path() -> PathBuf {
        config_dir().join(CONFIG_FILE)
    }

    /// Read the config at `path`, falling back to defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read, parsed
    /// or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            warn!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        debug!("Parsed config: {:?}", config);
        Ok(config)
    }

    /// Write the config as pretty TOML, creating parent directories.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await.map_err(io_err)?;
        info!("Config saved to {}", path.display());
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, size) in [
            ("auth.challenge_page_size", self.auth.challenge_page_size),
            ("auth.response_page_size", self.auth.response_page_size),
        ] {
            if size == 0 || size > AUTH_PAYLOAD_SIZE {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{} is outside 1..={}", size, AUTH_PAYLOAD_SIZE),
                });
            }
        }
        for (field, interval) in [
            ("timing.report_interval_ms", self.timing.report_interval_ms),
            ("timing.tick_interval_ms", self.timing.tick_interval_ms),
        ] {
            if interval == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be at least 1 ms".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn feature_configuration(&self) -> FeatureConfiguration {
        let f = &self.features;
        FeatureConfiguration::new(f.touchpad, f.imu, f.led, f.rumble)
    }

    pub fn sequencer_settings(&self) -> SequencerSettings {
        SequencerSettings {
            tick_interval: std::time::Duration::from_millis(self.timing.tick_interval_ms),
            ..SequencerSettings::default()
        }
    }

    pub fn report_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timing.report_interval_ms)
    }
}
