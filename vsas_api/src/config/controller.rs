use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{constants::DEFAULT_SCSI_ID_BASE, error::ConfigError, is_default};

use super::string_or_number;

/// Per-controller input: where the controller plugs into the array and where
/// its resolved record goes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Name of the controller, used in errors and the resolved record.
    pub name: String,

    /// Host-controller ports, in port index order.
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,

    /// Peer-controller attachments. They occupy phys but never receive a SCSI
    /// id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_connectors: Vec<ConnectorConfig>,

    /// First SCSI id handed out on this controller.
    #[serde(default = "default_scsi_id_base")]
    pub scsi_id_base: u32,

    /// Options appended to every drive record after the template's own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drive_options: Vec<String>,

    /// Controller-specific path of the resolved record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            connectors: Vec::new(),
            external_connectors: Vec::new(),
            scsi_id_base: DEFAULT_SCSI_ID_BASE,
            drive_options: Vec::new(),
            output: None,
        }
    }
}

fn default_scsi_id_base() -> u32 {
    DEFAULT_SCSI_ID_BASE
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConnectorConfig {
    pub attached_enclosure: String,
    pub attached_expander: String,
    #[serde(deserialize_with = "string_or_number")]
    pub attached_port: String,

    /// Controller-side phy.
    #[serde(default, skip_serializing_if = "is_default")]
    pub phy: u32,

    /// Controller-side address.
    pub address: u64,
}

impl ConnectorConfig {
    pub fn expander_id(&self) -> String {
        crate::expander_id(&self.attached_enclosure, &self.attached_expander)
    }
}

impl ControllerConfig {
    pub fn from_yaml_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidName {
                entity: "Controller".into(),
                name: self.name.clone(),
                reason: "name must not be empty".into(),
            });
        }
        Ok(())
    }
}
