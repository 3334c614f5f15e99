use std::{collections::BTreeSet, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    constants::EXPANDER_ID_SEPARATOR, error::ConfigError, is_default, pattern::Pattern,
};

use super::string_or_number;

/// Declarative description of one disk array: its enclosures and the wiring
/// between their expanders.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DiskArrayConfiguration {
    /// Name of the array, used in log output only.
    #[serde(default, skip_serializing_if = "is_default")]
    pub name: String,

    /// Enclosures (shelves) in the array.
    #[serde(default)]
    pub enclosures: Vec<EnclosureConfig>,

    /// Inter-expander wiring, within or across enclosures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnclosureConfig {
    /// Unique name of the enclosure.
    pub name: String,

    /// Free-form classification of the enclosure, e.g. `12-bay`.
    #[serde(rename = "type", default, skip_serializing_if = "is_default")]
    pub enclosure_type: String,

    #[serde(default)]
    pub expanders: Vec<ExpanderConfig>,

    /// Drive templates. Each one expands into `repeat` drive instances wired
    /// to both sibling expanders.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drives: Vec<DriveTemplate>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExpanderConfig {
    /// Name of the expander, unique within its enclosure.
    pub name: String,

    /// WWN of the expander.
    pub address: u64,

    /// Number of phys, not counting a synthesized SES phy.
    pub phy_count: u32,

    /// Named phy ranges used to attach controllers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortConfig>,

    /// Enclosure services sub-device. Its address is the expander address
    /// minus one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ses: Option<SesConfig>,

    /// Logical position of the expander in the enclosure. Defaults to the
    /// declaration index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<u8>,

    /// Maps a drive's logical phy to the physical phy it occupies. Identity
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phy_map: Option<Vec<u32>>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PortConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    /// First phy of the port.
    pub phy: u32,

    /// Number of contiguous phys in the port.
    pub number: u32,

    /// Reserves the port for a peer controller. The phys are held by an
    /// `active` placeholder link until an external connector claims them.
    #[serde(default, skip_serializing_if = "is_default")]
    pub external: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SesConfig {
    /// Backing file for the SES diagnostic pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_data_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DriveTemplate {
    /// Backing file of each instance, with one `{}` for the instance index.
    pub file_pattern: String,

    /// Address of instance 0. Instance `i` uses `address_base + 4 * i`.
    pub address_base: u64,

    /// Serial of each instance, with one `{}` for the zero-padded hex index.
    pub serial_pattern: String,

    /// Number of instances.
    pub repeat: u32,

    /// Slot of instance 0.
    pub slot_number: u32,

    /// Logical phy of instance 0 on both sibling expanders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_phy_id: Option<u32>,

    /// Options passed through to the device-emulation layer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// One wire between two expanders.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct ConnectionConfig(pub [ConnectionEnd; 2]);

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConnectionEnd {
    /// Name of the enclosure.
    pub disk_array: String,
    pub expander: String,
    pub phy: u32,
    pub number: u32,
}

impl DiskArrayConfiguration {
    pub fn from_yaml_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Static checks that need no cross-enclosure lookups.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut enclosure_names = BTreeSet::new();
        for enclosure in &self.enclosures {
            check_name("Enclosure", &enclosure.name)?;
            if !enclosure_names.insert(enclosure.name.as_str()) {
                return Err(ConfigError::DuplicateEnclosure {
                    enclosure: enclosure.name.clone(),
                });
            }
            enclosure.validate()?;
        }

        for (index, connection) in self.connections.iter().enumerate() {
            connection.validate(index)?;
        }

        Ok(())
    }
}

impl EnclosureConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let mut expander_names = BTreeSet::new();
        for expander in &self.expanders {
            check_name("Expander", &expander.name)?;
            if !expander_names.insert(expander.name.as_str()) {
                return Err(ConfigError::DuplicateExpander {
                    enclosure: self.name.clone(),
                    expander: expander.name.clone(),
                });
            }
            expander.validate(&self.name)?;
        }

        for template in &self.drives {
            template.validate(&self.name)?;
        }

        Ok(())
    }
}

impl ExpanderConfig {
    /// Fully-qualified name of the expander within `enclosure`.
    pub fn id(&self, enclosure: &str) -> String {
        crate::expander_id(enclosure, &self.name)
    }

    fn validate(&self, enclosure: &str) -> Result<(), ConfigError> {
        let id = self.id(enclosure);
        if self.phy_count == 0 {
            return Err(ConfigError::ZeroPhyCount { expander: id });
        }

        if self.ses.is_some() {
            if self.address == 0 {
                return Err(ConfigError::SesAddressUnderflow { expander: id });
            }
            if self.phy_count == u32::MAX {
                return Err(ConfigError::SesPhyOverflow {
                    expander: id,
                    phy_count: self.phy_count,
                });
            }
        }

        if let Some(side) = self.side {
            if side > 1 {
                return Err(ConfigError::InvalidSide {
                    enclosure: enclosure.to_string(),
                    expander: self.name.clone(),
                    side,
                });
            }
        }

        let mut port_ids = BTreeSet::new();
        for port in &self.ports {
            if !port_ids.insert(port.id.as_str()) {
                return Err(ConfigError::DuplicatePort {
                    expander: id,
                    port: port.id.clone(),
                });
            }
            check_range(
                &format!("port {}", port.id),
                &id,
                port.phy,
                port.number,
                self.phy_count,
            )?;
        }

        Ok(())
    }
}

impl DriveTemplate {
    pub fn serial_pattern(&self) -> Result<Pattern, ConfigError> {
        Pattern::parse("serial_pattern", &self.serial_pattern)
    }

    pub fn file_pattern(&self) -> Result<Pattern, ConfigError> {
        Pattern::parse("file_pattern", &self.file_pattern)
    }

    fn validate(&self, enclosure: &str) -> Result<(), ConfigError> {
        if self.repeat == 0 {
            return Err(ConfigError::EmptyDriveTemplate {
                enclosure: enclosure.to_string(),
                slot: self.slot_number,
            });
        }
        self.serial_pattern()?;
        self.file_pattern()?;
        Ok(())
    }
}

impl ConnectionEnd {
    pub fn expander_id(&self) -> String {
        crate::expander_id(&self.disk_array, &self.expander)
    }
}

impl ConnectionConfig {
    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let [left, right] = &self.0;
        for end in [left, right] {
            if end.number == 0 {
                return Err(ConfigError::EmptyPhyRange {
                    owner: format!("connection {index}"),
                    expander: end.expander_id(),
                    phy: end.phy,
                });
            }
        }

        if left.number != right.number {
            return Err(ConfigError::ConnectionWidthMismatch {
                connection: index,
                left: left.expander_id(),
                left_number: left.number,
                right: right.expander_id(),
                right_number: right.number,
            });
        }

        if left.expander_id() == right.expander_id()
            && left.phy < right.phy + right.number
            && right.phy < left.phy + left.number
        {
            return Err(ConfigError::LoopbackConnection {
                connection: index,
                expander: left.expander_id(),
                phy: left.phy.max(right.phy),
            });
        }

        Ok(())
    }
}

fn check_name(entity: &str, name: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        "name must not be empty"
    } else if name.contains(EXPANDER_ID_SEPARATOR) {
        "name must not contain '/'"
    } else {
        return Ok(());
    };

    Err(ConfigError::InvalidName {
        entity: entity.to_string(),
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Checks that `[phy, phy + number)` is non-empty and fits in `phy_count`.
pub(crate) fn check_range(
    owner: &str,
    expander: &str,
    phy: u32,
    number: u32,
    phy_count: u32,
) -> Result<(), ConfigError> {
    if number == 0 {
        return Err(ConfigError::EmptyPhyRange {
            owner: owner.to_string(),
            expander: expander.to_string(),
            phy,
        });
    }

    if phy.checked_add(number).map_or(true, |end| end > phy_count) {
        return Err(ConfigError::PhyRangeOutOfBounds {
            owner: owner.to_string(),
            expander: expander.to_string(),
            phy,
            number,
            phy_count,
        });
    }

    Ok(())
}
