use std::{fs, path::Path};

use log::debug;
use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, ReportError, TopologyError};

mod array;
mod controller;

pub use array::{
    ConnectionConfig, ConnectionEnd, DiskArrayConfiguration, DriveTemplate, EnclosureConfig,
    ExpanderConfig, PortConfig, SesConfig,
};
pub use controller::{ConnectorConfig, ControllerConfig};

/// Port ids may be written as numbers or strings; both become strings.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}

impl DiskArrayConfiguration {
    /// Loads and parses an array description from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        debug!("Loading configuration from '{}'", path.as_ref().display());
        let contents = fs::read_to_string(path.as_ref()).structured(
            ConfigError::LoadConfiguration {
                path: path.as_ref().display().to_string(),
            },
        )?;
        Self::from_yaml_str(&contents).structured(ConfigError::ParseDiskArrayConfiguration)
    }
}

impl ControllerConfig {
    /// Loads and parses a controller description from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        debug!("Loading configuration from '{}'", path.as_ref().display());
        let contents = fs::read_to_string(path.as_ref()).structured(
            ConfigError::LoadConfiguration {
                path: path.as_ref().display().to_string(),
            },
        )?;
        Self::from_yaml_str(&contents).structured(ConfigError::ParseControllerConfiguration)
    }
}
