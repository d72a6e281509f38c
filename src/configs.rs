use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_home")]
    pub home: PathBuf,
    #[serde(default)]
    pub defaults: IssuanceDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            defaults: IssuanceDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_home() -> PathBuf {
    PathBuf::from("myca-home")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IssuanceDefaults {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    #[serde(default = "default_root_validity")]
    pub root_validity_days: u32,
    #[serde(default = "default_validity")]
    pub validity_days: u32,
}

impl Default for IssuanceDefaults {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            key_size: default_key_size(),
            root_validity_days: default_root_validity(),
            validity_days: default_validity(),
        }
    }
}

fn default_algorithm() -> String {
    "ECDSA".to_string()
}

fn default_key_size() -> u32 {
    256
}

fn default_root_validity() -> u32 {
    3650 // 10 years
}

fn default_validity() -> u32 {
    1825 // 5 years
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
}

impl AppConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse config file")
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&config_str)
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration with default path (myca.toml)
    pub fn load() -> Result<Self> {
        Self::load_or_default("myca.toml")
    }
}
