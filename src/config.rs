//! User configuration: the desk address and named positions, stored as YAML.

use crate::constants::{ADDRESS_LEN, MAX_HEIGHT, MIN_HEIGHT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Names that would shadow a built-in `desk` subcommand.
pub const RESERVED_NAMES: &[&str] = &[
    "init", "pair", "height", "speed", "monitor", "save", "delete", "stop", "help",
];

pub const DEFAULT_ADDRESS: &str = "AA:AA:AA:AA:AA:AA";

const HEADER: &str = "# Desk configuration, positions are heights in meters\n";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(
        "Invalid configuration: mac_address must be {len} characters, got {0:?}",
        len = ADDRESS_LEN
    )]
    InvalidAddress(String),

    #[error(
        "Invalid configuration: position {name} = {height:.3} is outside {min:.2}..={max:.2}",
        min = MIN_HEIGHT,
        max = MAX_HEIGHT
    )]
    HeightOutOfRange { name: String, height: f64 },

    #[error("Position name {0:?} is reserved")]
    ReservedName(String),

    #[error("Position {0:?} not found")]
    UnknownPosition(String),

    #[error("Could not determine the configuration directory")]
    NoConfigDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub positions: BTreeMap<String, f64>,
}

impl Default for Config {
    /// Seed written by `desk init`.
    fn default() -> Self {
        Config {
            mac_address: Some(DEFAULT_ADDRESS.to_string()),
            positions: BTreeMap::from([("stand".to_string(), 1.1), ("sit".to_string(), 0.75)]),
        }
    }
}

/// `<config dir>/idasen/idasen.yaml`
pub fn default_path() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    path.push("idasen");
    path.push("idasen.yaml");
    Ok(path)
}

impl Config {
    pub fn empty() -> Self {
        Config {
            mac_address: None,
            positions: BTreeMap::new(),
        }
    }

    /// Loads and validates `path`. A missing file yields an empty config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::empty()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::empty());
        }
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let body = serde_yaml::to_string(self)?;
        fs::write(path, format!("{}{}", HEADER, body)).map_err(io_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(address) = &self.mac_address {
            if address.len() != ADDRESS_LEN {
                return Err(ConfigError::InvalidAddress(address.clone()));
            }
        }
        for (name, &height) in &self.positions {
            check_name(name)?;
            check_position(name, height)?;
        }
        Ok(())
    }

    pub fn position(&self, name: &str) -> Option<f64> {
        self.positions.get(name).copied()
    }

    pub fn set_position(&mut self, name: &str, height: f64) -> Result<(), ConfigError> {
        check_name(name)?;
        check_position(name, height)?;
        self.positions.insert(name.to_string(), height);
        Ok(())
    }

    pub fn remove_position(&mut self, name: &str) -> Result<f64, ConfigError> {
        self.positions
            .remove(name)
            .ok_or_else(|| ConfigError::UnknownPosition(name.to_string()))
    }
}

fn check_name(name: &str) -> Result<(), ConfigError> {
    if RESERVED_NAMES.contains(&name) || name.starts_with('-') || name.is_empty() {
        return Err(ConfigError::ReservedName(name.to_string()));
    }
    Ok(())
}

fn check_position(name: &str, height: f64) -> Result<(), ConfigError> {
    if !(MIN_HEIGHT..=MAX_HEIGHT).contains(&height) {
        return Err(ConfigError::HeightOutOfRange {
            name: name.to_string(),
            height,
        });
    }
    Ok(())
}
