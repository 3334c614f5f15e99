//! Working representation of an expander and its phy occupancy.

use std::{collections::BTreeMap, path::PathBuf};

use log::trace;

use vsas_api::{
    config::{ExpanderConfig, PortConfig},
    constants::SES_DEVICE_SUFFIX,
    error::{ConfigError, ConflictError, TopologyError},
    topology::{ExpanderRecord, SesRecord},
    ExpanderId,
};

use crate::link::{Attachment, Link};

/// A named phy range on an expander.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub phy: u32,
    pub number: u32,
    pub external: bool,
}

impl From<&PortConfig> for PortRange {
    fn from(port: &PortConfig) -> Self {
        Self {
            phy: port.phy,
            number: port.number,
            external: port.external,
        }
    }
}

/// Enclosure services sub-device of an expander.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ses {
    pub address: u64,
    pub serial: u64,
    pub buffer_data_path: Option<PathBuf>,

    /// Phy synthesized for the SES device, set once it is attached.
    pub phy: Option<u32>,

    /// Controller port the SES device is reported through.
    pub physical_port: Option<usize>,

    pub scsi_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expander {
    pub id: ExpanderId,
    pub enclosure: String,
    pub name: String,
    pub address: u64,

    /// Includes the synthesized SES phy once it is attached.
    pub phy_count: u32,

    pub side: u8,
    pub ports: BTreeMap<String, PortRange>,
    pub ses: Option<Ses>,
    pub phy_map: Option<Vec<u32>>,

    /// Occupied ranges keyed by their first phy.
    pub links: BTreeMap<u32, Link>,

    /// First SCSI id of this expander, set by the address allocator.
    pub start_scsi_id: Option<u32>,
}

impl Expander {
    /// Builds the working copy of a declared expander. An SES sub-device
    /// needs a non-zero expander address.
    pub fn from_config(
        enclosure: &str,
        side: u8,
        config: &ExpanderConfig,
    ) -> Result<Self, ConfigError> {
        let id = config.id(enclosure);
        let ses = match &config.ses {
            None => None,
            Some(ses) => {
                let address = config
                    .address
                    .checked_sub(1)
                    .ok_or_else(|| ConfigError::SesAddressUnderflow {
                        expander: id.clone(),
                    })?;
                Some(Ses {
                    address,
                    serial: address,
                    buffer_data_path: ses.buffer_data_path.clone(),
                    phy: None,
                    physical_port: None,
                    scsi_id: None,
                })
            }
        };

        Ok(Self {
            id,
            enclosure: enclosure.to_string(),
            name: config.name.clone(),
            address: config.address,
            phy_count: config.phy_count,
            side,
            ports: config
                .ports
                .iter()
                .map(|port| (port.id.clone(), port.into()))
                .collect(),
            ses,
            phy_map: config.phy_map.clone(),
            links: BTreeMap::new(),
            start_scsi_id: None,
        })
    }

    /// Looks up a port by id. `referrer` names the configuration entry in
    /// the error.
    pub fn port(&self, port: &str, referrer: &str) -> Result<PortRange, TopologyError> {
        self.ports.get(port).copied().ok_or_else(|| {
            TopologyError::new(ConfigError::UndefinedPort {
                referrer: referrer.to_string(),
                expander: self.id.clone(),
                port: port.to_string(),
            })
        })
    }

    /// Returns the link occupying `phy`, if any.
    pub fn link_at(&self, phy: u32) -> Option<&Link> {
        self.links
            .range(..=phy)
            .next_back()
            .map(|(_, link)| link)
            .filter(|link| link.contains(phy))
    }

    /// Records `link` on this expander.
    ///
    /// Recording a link identical to one already present is a no-op, so both
    /// halves of an edge can be recorded from either side. Any other overlap
    /// is a conflict.
    pub fn occupy(&mut self, link: Link) -> Result<(), TopologyError> {
        if self.links.get(&link.phy) == Some(&link) {
            return Ok(());
        }

        if let Some(existing) = self.links.values().find(|existing| existing.overlaps(&link)) {
            return Err(TopologyError::new(ConflictError::PhyOccupied {
                device: self.id.clone(),
                phy: existing.phy.max(link.phy),
                phy_start: existing.phy,
                num: existing.num,
                existing: existing.attachment.describe(),
                new_start: link.phy,
                new_num: link.num,
                new: link.attachment.describe(),
            }));
        }

        trace!(
            "Expander '{}': phys [{}, {}) attached to {}",
            self.id,
            link.phy,
            link.end(),
            link.attachment.describe()
        );
        self.links.insert(link.phy, link);
        Ok(())
    }

    /// Replaces the link starting at `link.phy` if it is an unclaimed
    /// peer-controller reservation of the same width, otherwise occupies the
    /// phys as usual.
    pub fn claim(&mut self, link: Link) -> Result<(), TopologyError> {
        let replaces_placeholder = self
            .links
            .get(&link.phy)
            .is_some_and(|existing| existing.num == link.num && existing.attachment.is_placeholder());
        if replaces_placeholder {
            self.links.remove(&link.phy);
        }
        self.occupy(link)
    }

    /// Appends the SES phy at index `phy_count` and grows `phy_count` by one.
    /// Does nothing for expanders without SES or with the phy already
    /// attached.
    pub fn attach_ses(&mut self) -> Result<(), TopologyError> {
        let Some(ses) = &self.ses else {
            return Ok(());
        };
        if ses.phy.is_some() {
            return Ok(());
        }

        let phy = self.phy_count;
        let phy_count = phy.checked_add(1).ok_or_else(|| {
            TopologyError::new(ConfigError::SesPhyOverflow {
                expander: self.id.clone(),
                phy_count: phy,
            })
        })?;
        let link = Link::new(
            phy,
            1,
            Attachment::Ses {
                address: ses.address,
                name: format!("{}/{}", self.id, SES_DEVICE_SUFFIX),
            },
        );
        self.occupy(link)?;
        self.phy_count = phy_count;
        if let Some(ses) = &mut self.ses {
            ses.phy = Some(phy);
        }
        Ok(())
    }

    /// Maps a drive's logical phy to the phy it occupies.
    pub fn drive_phy(&self, logical: u32) -> Result<u32, ConfigError> {
        match &self.phy_map {
            None => Ok(logical),
            Some(map) => map
                .get(logical as usize)
                .copied()
                .ok_or_else(|| ConfigError::PhyMapMiss {
                    expander: self.id.clone(),
                    phy: logical,
                    map_len: map.len(),
                }),
        }
    }

    pub fn to_record(&self) -> ExpanderRecord {
        ExpanderRecord {
            name: self.id.clone(),
            address: self.address,
            phy_count: self.phy_count,
            start_scsi_id: self.start_scsi_id.unwrap_or_default(),
            side: self.side,
            links: self.links.values().map(Link::to_record).collect(),
        }
    }

    /// The SES record, once the allocator has assigned its port and id.
    pub fn ses_record(&self) -> Option<SesRecord> {
        let ses = self.ses.as_ref()?;
        Some(SesRecord {
            physical_port: ses.physical_port?,
            expander: self.id.clone(),
            address: ses.address,
            serial: ses.serial,
            phy: ses.phy?,
            scsi_id: ses.scsi_id?,
            buffer_data_path: ses.buffer_data_path.clone(),
        })
    }
}
