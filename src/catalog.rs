//! # Entity catalog
//!
//! Canonical registries of enclosures, expanders and concrete drive
//! instances, built once from a `DiskArrayConfiguration`.
//!
//! Building the catalog:
//! - checks that enclosure and expander names are unique,
//! - assigns each expander its side (declared, or its declaration index),
//! - expands every drive template into `repeat` drive instances, each wired
//!   to the side-0 and side-1 expanders of its enclosure,
//! - reserves every address (expanders, SES devices and the 4-address block
//!   of each drive) and rejects collisions.
//!
//! The catalog is never mutated after construction. Traversal passes clone
//! the expanders they need.

use std::collections::{btree_map::Entry, BTreeMap};

use log::debug;

use vsas_api::{
    config::{DiskArrayConfiguration, DriveTemplate, EnclosureConfig},
    constants::{
        DRIVE_ADDRESS_STRIDE, DRIVE_PORT_COUNT, DRIVE_TARGET_ADDRESS_OFFSET,
        EXPANDER_ID_SEPARATOR, SERIAL_INDEX_WIDTH,
    },
    error::{ConfigError, ConflictError, NotFoundError, TopologyError},
    ExpanderId,
};

use crate::{
    expander::Expander,
    link::{Attachment, Link},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub name: String,
    pub enclosure_type: String,

    /// Expanders in declaration order.
    pub expanders: Vec<ExpanderId>,
}

/// A concrete drive expanded from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveInstance {
    pub enclosure: String,

    /// Index of the instance within its template.
    pub index: u32,

    pub slot: u32,

    /// Base of the drive's 4-address block.
    pub address: u64,

    pub serial: String,
    pub file: String,

    /// Logical phy on both sibling expanders.
    pub phy: u32,

    pub options: Vec<String>,
}

impl DriveInstance {
    pub fn port_address(&self, side: u8) -> u64 {
        self.address + u64::from(side) + 1
    }

    pub fn target_address(&self) -> u64 {
        self.address + DRIVE_TARGET_ADDRESS_OFFSET
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Enclosures in declaration order.
    enclosures: Vec<Enclosure>,
    expanders: BTreeMap<ExpanderId, Expander>,
    drives: Vec<DriveInstance>,

    /// Drive indices and sides attached to each expander, in instance order.
    drives_by_expander: BTreeMap<ExpanderId, Vec<(usize, u8)>>,
}

impl Catalog {
    /// Builds the catalog. The configuration is expected to have passed
    /// `DiskArrayConfiguration::validate()`.
    pub fn build(config: &DiskArrayConfiguration) -> Result<Self, TopologyError> {
        let mut catalog = Catalog::default();
        let mut reservations = AddressReservations::default();

        for enclosure_config in &config.enclosures {
            if catalog.enclosure(&enclosure_config.name).is_some() {
                return Err(TopologyError::new(ConfigError::DuplicateEnclosure {
                    enclosure: enclosure_config.name.clone(),
                }));
            }

            let enclosure = catalog.add_expanders(enclosure_config, &mut reservations)?;
            let siblings = catalog.siblings(&enclosure)?;
            for template in &enclosure_config.drives {
                catalog.add_drives(&enclosure, siblings.as_ref(), template, &mut reservations)?;
            }
            catalog.enclosures.push(enclosure);
        }

        debug!(
            "Catalog of array '{}': {} enclosure(s), {} expander(s), {} drive(s)",
            config.name,
            catalog.enclosures.len(),
            catalog.expanders.len(),
            catalog.drives.len()
        );

        Ok(catalog)
    }

    fn add_expanders(
        &mut self,
        config: &EnclosureConfig,
        reservations: &mut AddressReservations,
    ) -> Result<Enclosure, TopologyError> {
        let mut enclosure = Enclosure {
            name: config.name.clone(),
            enclosure_type: config.enclosure_type.clone(),
            expanders: Vec::new(),
        };

        for (position, expander_config) in config.expanders.iter().enumerate() {
            let side = expander_config
                .side
                .unwrap_or_else(|| u8::try_from(position).unwrap_or(u8::MAX));
            let mut expander = Expander::from_config(&config.name, side, expander_config)
                .map_err(TopologyError::new)?;

            reservations.reserve(expander.address, &expander.id)?;
            if let Some(ses) = &expander.ses {
                reservations.reserve(ses.address, &format!("{} SES", expander.id))?;
            }

            // Ports reserved for a peer controller hold a placeholder until an
            // external connector claims them.
            for port in expander_config.ports.iter().filter(|port| port.external) {
                expander.occupy(Link::new(
                    port.phy,
                    port.number,
                    Attachment::Active {
                        phy: 0,
                        address: None,
                        name: None,
                    },
                ))?;
            }

            match self.expanders.entry(expander.id.clone()) {
                Entry::Occupied(_) => {
                    return Err(TopologyError::new(ConfigError::DuplicateExpander {
                        enclosure: config.name.clone(),
                        expander: expander_config.name.clone(),
                    }))
                }
                Entry::Vacant(entry) => {
                    enclosure.expanders.push(expander.id.clone());
                    entry.insert(expander);
                }
            }
        }

        Ok(enclosure)
    }

    /// Finds the side-0 and side-1 expanders of an enclosure. Returns `None`
    /// if the enclosure lacks either; templates turn that into an error.
    fn siblings(
        &self,
        enclosure: &Enclosure,
    ) -> Result<Option<[ExpanderId; DRIVE_PORT_COUNT]>, TopologyError> {
        let mut sides: [Option<&Expander>; DRIVE_PORT_COUNT] = [None, None];
        for expander in enclosure.expanders.iter().filter_map(|id| self.expanders.get(id)) {
            let Some(slot) = sides.get_mut(usize::from(expander.side)) else {
                continue;
            };
            if let Some(other) = slot {
                return Err(TopologyError::new(ConfigError::DuplicateSide {
                    enclosure: enclosure.name.clone(),
                    expander: expander.name.clone(),
                    other: other.name.clone(),
                    side: expander.side,
                }));
            }
            *slot = Some(expander);
        }

        Ok(match sides {
            [Some(a), Some(b)] => Some([a.id.clone(), b.id.clone()]),
            _ => None,
        })
    }

    fn add_drives(
        &mut self,
        enclosure: &Enclosure,
        siblings: Option<&[ExpanderId; DRIVE_PORT_COUNT]>,
        template: &DriveTemplate,
        reservations: &mut AddressReservations,
    ) -> Result<(), TopologyError> {
        let siblings = siblings.ok_or_else(|| {
            let found = enclosure
                .expanders
                .iter()
                .filter_map(|id| self.expanders.get(id))
                .filter(|expander| usize::from(expander.side) < DRIVE_PORT_COUNT)
                .count();
            let missing = (0..DRIVE_PORT_COUNT as u8)
                .find(|side| {
                    !enclosure
                        .expanders
                        .iter()
                        .filter_map(|id| self.expanders.get(id))
                        .any(|expander| expander.side == *side)
                })
                .unwrap_or_default();
            TopologyError::new(ConfigError::MissingSiblingExpander {
                enclosure: enclosure.name.clone(),
                slot: template.slot_number,
                side: missing,
                found,
            })
        })?;

        let serial_pattern = template.serial_pattern().map_err(TopologyError::new)?;
        let file_pattern = template.file_pattern().map_err(TopologyError::new)?;
        let start_phy = template.start_phy_id.unwrap_or_default();
        let expanders = [self.expander(&siblings[0])?, self.expander(&siblings[1])?];

        let mut drives = Vec::new();
        for index in 0..template.repeat {
            let slot = template.slot_number.checked_add(index).ok_or_else(|| {
                TopologyError::new(ConfigError::SlotOverflow {
                    enclosure: enclosure.name.clone(),
                    slot_number: template.slot_number,
                    index,
                })
            })?;
            let phy = start_phy.checked_add(index).ok_or_else(|| {
                TopologyError::new(ConfigError::PhyRangeOutOfBounds {
                    owner: format!("drive slot {slot}"),
                    expander: expanders[0].id.clone(),
                    phy: start_phy,
                    number: template.repeat,
                    phy_count: expanders[0].phy_count,
                })
            })?;

            // The whole 4-address block must fit below u64::MAX.
            let address = DRIVE_ADDRESS_STRIDE
                .checked_mul(u64::from(index))
                .and_then(|offset| template.address_base.checked_add(offset))
                .filter(|address| address.checked_add(DRIVE_ADDRESS_STRIDE - 1).is_some())
                .ok_or_else(|| {
                    TopologyError::new(ConfigError::AddressOverflow {
                        enclosure: enclosure.name.clone(),
                        slot,
                        address_base: template.address_base,
                    })
                })?;
            let serial = serial_pattern.render_hex(index, SERIAL_INDEX_WIDTH);

            // The logical phy must land on a real phy of both expanders.
            for expander in &expanders {
                let mapped = expander.drive_phy(phy).map_err(TopologyError::new)?;
                if mapped >= expander.phy_count {
                    return Err(TopologyError::new(ConfigError::PhyRangeOutOfBounds {
                        owner: format!("drive slot {slot}"),
                        expander: expander.id.clone(),
                        phy: mapped,
                        number: 1,
                        phy_count: expander.phy_count,
                    }));
                }
            }

            for offset in 0..DRIVE_ADDRESS_STRIDE {
                reservations.reserve(address + offset, &format!("drive {serial}"))?;
            }

            drives.push(DriveInstance {
                enclosure: enclosure.name.clone(),
                index,
                slot,
                address,
                serial,
                file: file_pattern.render(index),
                phy,
                options: template.options.clone(),
            });
        }

        for drive in drives {
            let drive_index = self.drives.len();
            for (side, id) in siblings.iter().enumerate() {
                self.drives_by_expander
                    .entry(id.clone())
                    .or_default()
                    .push((drive_index, side as u8));
            }
            self.drives.push(drive);
        }

        Ok(())
    }

    /// Looks up an expander by enclosure and expander name.
    pub fn lookup(&self, enclosure: &str, expander: &str) -> Option<&Expander> {
        self.expanders
            .get(&vsas_api::expander_id(enclosure, expander))
    }

    /// Looks up an expander by fully-qualified name.
    pub fn expander(&self, id: &ExpanderId) -> Result<&Expander, TopologyError> {
        self.expanders.get(id).ok_or_else(|| {
            let (enclosure, expander) = id
                .split_once(EXPANDER_ID_SEPARATOR)
                .unwrap_or((id.as_str(), ""));
            TopologyError::new(ConfigError::UndefinedExpander {
                referrer: "Catalog lookup".into(),
                enclosure: enclosure.to_string(),
                expander: expander.to_string(),
            })
        })
    }

    pub fn enclosure(&self, name: &str) -> Option<&Enclosure> {
        self.enclosures.iter().find(|enclosure| enclosure.name == name)
    }

    pub fn enclosures(&self) -> &[Enclosure] {
        &self.enclosures
    }

    /// All expanders, ordered by fully-qualified name.
    pub fn expanders(&self) -> impl Iterator<Item = &Expander> {
        self.expanders.values()
    }

    pub fn drives(&self) -> &[DriveInstance] {
        &self.drives
    }

    /// Drives wired to `id`, with the side they are attached through.
    pub fn drives_on<'a>(
        &'a self,
        id: &ExpanderId,
    ) -> impl Iterator<Item = (&'a DriveInstance, u8)> + 'a {
        self.drives_by_expander
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|(index, side)| self.drives.get(*index).map(|drive| (drive, *side)))
    }

    /// Looks up the drive installed in `slot` of `enclosure`.
    pub fn lookup_drive(&self, enclosure: &str, slot: u32) -> Result<&DriveInstance, TopologyError> {
        self.drives
            .iter()
            .find(|drive| drive.enclosure == enclosure && drive.slot == slot)
            .ok_or_else(|| {
                TopologyError::new(NotFoundError::Drive {
                    enclosure: enclosure.to_string(),
                    slot,
                })
            })
    }
}

/// Tracks which entity owns each address.
#[derive(Debug, Default)]
struct AddressReservations(BTreeMap<u64, String>);

impl AddressReservations {
    fn reserve(&mut self, address: u64, owner: &str) -> Result<(), TopologyError> {
        match self.0.entry(address) {
            Entry::Occupied(entry) => Err(TopologyError::new(ConflictError::DuplicateAddress {
                address,
                owner: entry.get().clone(),
                other: owner.to_string(),
            })),
            Entry::Vacant(entry) => {
                entry.insert(owner.to_string());
                Ok(())
            }
        }
    }
}
