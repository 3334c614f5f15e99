//! Resolved topology records handed to the device-emulation layer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

use crate::{is_default, ExpanderId};

/// What sits on the far side of a link.
#[derive(
    Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, Display, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AttachmentKind {
    None,
    EndDevice,
    Expander,
    HostController,
    Active,
    Ses,
}

/// Everything resolved for one controller.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolvedTopology {
    pub controller: String,
    pub ports: Vec<ResolvedPort>,
    pub drives: Vec<DriveRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ses: Vec<SesRecord>,
}

/// One host-controller port and the expanders discovered from it, in
/// discovery order.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolvedPort {
    pub index: usize,
    pub phy: u32,
    pub address: u64,
    pub attached_expander: ExpanderId,
    pub expanders: Vec<ExpanderRecord>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpanderRecord {
    pub name: ExpanderId,
    pub address: u64,
    /// Includes the synthesized SES phy, if any.
    pub phy_count: u32,
    pub start_scsi_id: u32,
    pub side: u8,
    pub links: Vec<LinkRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub phy: u32,
    pub num: u32,
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_phy: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_address: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_slot: Option<u32>,
}

/// One drive port as seen through one expander.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DriveRecord {
    /// Index of the controller port the drive was reached from.
    pub port: usize,
    pub enclosure: String,
    pub expander: ExpanderId,
    pub slot: u32,
    pub side: u8,
    pub serial: String,
    pub file: String,
    pub scsi_id: u32,
    pub address: u64,
    pub port_address: u64,
    pub target_address: u64,
    pub attached_address: u64,
    pub attached_phy: u32,
    #[serde(default, skip_serializing_if = "is_default")]
    pub options: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct SesRecord {
    pub physical_port: usize,
    pub expander: ExpanderId,
    pub address: u64,
    pub serial: u64,
    pub phy: u32,
    pub scsi_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_data_path: Option<PathBuf>,
}
