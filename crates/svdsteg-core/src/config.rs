//! Configuration loading and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::capacity::{MAX_LSB, MAX_SCALE, MIN_LSB, MIN_SCALE};
use crate::error::{Error, Result};

/// Resampling filter used by the resize engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    #[default]
    CatmullRom,
    Lanczos3,
}

/// Starting values for a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_scale")]
    pub hidden_scale: f64,
    #[serde(default = "default_scale")]
    pub cover_scale: f64,
    #[serde(default = "default_rank")]
    pub rank: u32,
    #[serde(default = "default_max_lsb")]
    pub max_lsb: u32,
}

/// Tuning for the computation engines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub resize_filter: ResizeFilter,
}

/// Top-level svdsteg configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvdStegConfig {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub defaults: SessionDefaults,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Path to config file (not serialized).
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_scale() -> f64 {
    1.0
}
fn default_rank() -> u32 {
    50
}
fn default_max_lsb() -> u32 {
    4
}
fn default_log_filter() -> String {
    "info".into()
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            hidden_scale: default_scale(),
            cover_scale: default_scale(),
            rank: default_rank(),
            max_lsb: default_max_lsb(),
        }
    }
}

impl Default for SvdStegConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            defaults: SessionDefaults::default(),
            engine: EngineConfig::default(),
            config_path: PathBuf::new(),
        }
    }
}

impl SvdStegConfig {
    /// Load config from a JSON file, or return defaults.
    pub fn load(config_path: &Path) -> Self {
        let mut config: SvdStegConfig = std::fs::read_to_string(config_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        config.config_path = config_path.to_path_buf();
        config
    }

    /// Create configuration from environment and defaults.
    ///
    /// `SVDSTEG_CONFIG` names the config file, `SVDSTEG_LOG` overrides the
    /// log filter.
    pub fn from_env() -> Self {
        let mut config = match std::env::var("SVDSTEG_CONFIG") {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => Self::default(),
        };
        if let Ok(filter) = std::env::var("SVDSTEG_LOG") {
            config.log_filter = filter;
        }
        config
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.config_path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.defaults;
        for (name, scale) in [("hidden_scale", d.hidden_scale), ("cover_scale", d.cover_scale)] {
            if !(MIN_SCALE..=MAX_SCALE).contains(&scale) {
                return Err(Error::Config(format!(
                    "{} must be within [{}, {}], got {}",
                    name, MIN_SCALE, MAX_SCALE, scale
                )));
            }
        }
        if !(MIN_LSB..=MAX_LSB).contains(&d.max_lsb) {
            return Err(Error::Config(format!(
                "max_lsb must be within [{}, {}], got {}",
                MIN_LSB, MAX_LSB, d.max_lsb
            )));
        }
        if d.rank == 0 {
            return Err(Error::Config("rank must be at least 1".into()));
        }
        Ok(())
    }
}
