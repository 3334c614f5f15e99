//! Links: contiguous phy ranges on a device and what they are attached to.

use vsas_api::{
    topology::{AttachmentKind, LinkRecord},
    ExpanderId,
};

/// The far side of a link. Each variant carries exactly the fields that make
/// sense for its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    None,

    /// A drive port.
    EndDevice {
        phy: u32,
        address: u64,
        name: String,
        slot: u32,
    },

    /// Another expander.
    Expander {
        phy: u32,
        address: u64,
        name: ExpanderId,
    },

    /// A port of the controller being resolved.
    HostController { phy: u32, address: u64 },

    /// A peer controller. `address` is `None` while the phys are only
    /// reserved.
    Active {
        phy: u32,
        address: Option<u64>,
        name: Option<String>,
    },

    /// The expander's own enclosure services sub-device.
    Ses { address: u64, name: String },
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        match self {
            Attachment::None => AttachmentKind::None,
            Attachment::EndDevice { .. } => AttachmentKind::EndDevice,
            Attachment::Expander { .. } => AttachmentKind::Expander,
            Attachment::HostController { .. } => AttachmentKind::HostController,
            Attachment::Active { .. } => AttachmentKind::Active,
            Attachment::Ses { .. } => AttachmentKind::Ses,
        }
    }

    /// Human-readable name of the attached device, used in conflict errors.
    pub fn describe(&self) -> String {
        match self {
            Attachment::None => "nothing".into(),
            Attachment::EndDevice { name, slot, .. } => format!("drive {name} (slot {slot})"),
            Attachment::Expander { name, .. } => name.clone(),
            Attachment::HostController { address, .. } => {
                format!("host controller {address:#x}")
            }
            Attachment::Active {
                name: Some(name), ..
            } => name.clone(),
            Attachment::Active { name: None, .. } => "reserved peer-controller port".into(),
            Attachment::Ses { name, .. } => name.clone(),
        }
    }

    /// True for a peer-controller reservation that no connector claimed yet.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Attachment::Active { address: None, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// First phy on the local device.
    pub phy: u32,

    /// Number of contiguous phys occupied.
    pub num: u32,

    pub attachment: Attachment,
}

impl Link {
    pub fn new(phy: u32, num: u32, attachment: Attachment) -> Self {
        Self {
            phy,
            num,
            attachment,
        }
    }

    /// One past the last occupied phy.
    pub fn end(&self) -> u32 {
        self.phy.saturating_add(self.num)
    }

    /// True if both links claim at least one common phy.
    pub fn overlaps(&self, other: &Link) -> bool {
        self.phy < other.end() && other.phy < self.end()
    }

    pub fn contains(&self, phy: u32) -> bool {
        self.phy <= phy && phy < self.end()
    }

    pub fn to_record(&self) -> LinkRecord {
        let (attached_phy, attached_address, attached_name, attached_slot) = match &self.attachment
        {
            Attachment::None => (None, None, None, None),
            Attachment::EndDevice {
                phy,
                address,
                name,
                slot,
            } => (Some(*phy), Some(*address), Some(name.clone()), Some(*slot)),
            Attachment::Expander { phy, address, name } => {
                (Some(*phy), Some(*address), Some(name.clone()), None)
            }
            Attachment::HostController { phy, address } => {
                (Some(*phy), Some(*address), None, None)
            }
            Attachment::Active { phy, address, name } => (Some(*phy), *address, name.clone(), None),
            Attachment::Ses { address, name } => (None, Some(*address), Some(name.clone()), None),
        };

        LinkRecord {
            phy: self.phy,
            num: self.num,
            kind: self.attachment.kind(),
            attached_phy,
            attached_address,
            attached_name,
            attached_slot,
        }
    }
}
