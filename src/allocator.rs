//! # Address allocator
//!
//! Walks a discovered container in discovery order and assigns SCSI ids and
//! drive addresses in place:
//!
//! 1. External-connector overrides claim their peer-controller ports first.
//!    They consume phys but never receive a SCSI id.
//! 2. Each expander starts at the running SCSI id. Every drive wired to it is
//!    attached at its mapped phy and gets `start_scsi_id + phy`.
//! 3. The running id then advances by the expander's full `phy_count`,
//!    including a synthesized SES phy, whose id is the last one of the block.

use log::{debug, trace, warn};

use vsas_api::{
    config::{ConnectorConfig, ControllerConfig},
    error::{ConfigError, InternalError, ReportError, TopologyError},
    topology::DriveRecord,
};

use crate::{
    catalog::Catalog,
    container::Container,
    link::{Attachment, Link},
};

/// An external connector matched to the container it applies to.
#[derive(Debug, Clone, Copy)]
pub struct ExternalOverride<'a> {
    /// Position of the connector in the controller configuration.
    pub index: usize,
    pub connector: &'a ConnectorConfig,
}

pub struct AddressAllocator<'a> {
    catalog: &'a Catalog,
    controller: &'a ControllerConfig,
    next_scsi_id: u32,
}

impl<'a> AddressAllocator<'a> {
    /// Starts allocating at the controller's SCSI id base.
    pub fn new(catalog: &'a Catalog, controller: &'a ControllerConfig) -> Self {
        Self {
            catalog,
            controller,
            next_scsi_id: controller.scsi_id_base,
        }
    }

    /// The id the next expander will start at.
    pub fn next_scsi_id(&self) -> u32 {
        self.next_scsi_id
    }

    /// Finalizes `container`: applies `overrides`, then assigns SCSI ids and
    /// drive addresses to every expander in discovery order.
    pub fn allocate(
        &mut self,
        container: &mut Container,
        overrides: &[ExternalOverride<'_>],
    ) -> Result<(), TopologyError> {
        for external in overrides {
            apply_override(container, external)?;
        }

        let port_index = container.port.index;
        for id in container.ids().to_vec() {
            let expander = container
                .get_mut(&id)
                .structured(InternalError::Internal("expander missing from container"))?;

            let start_scsi_id = self.next_scsi_id;
            let end_scsi_id = start_scsi_id
                .checked_add(expander.phy_count)
                .ok_or_else(|| {
                    TopologyError::new(ConfigError::ScsiIdOverflow {
                        controller: self.controller.name.clone(),
                        expander: id.clone(),
                        start_scsi_id,
                        phy_count: expander.phy_count,
                    })
                })?;
            expander.start_scsi_id = Some(start_scsi_id);

            let mut drives = Vec::new();
            for (drive, side) in self.catalog.drives_on(&id) {
                let phy = expander.drive_phy(drive.phy).map_err(TopologyError::new)?;
                let scsi_id = start_scsi_id
                    .checked_add(phy)
                    .filter(|scsi_id| *scsi_id < end_scsi_id)
                    .structured(InternalError::Internal("drive phy outside its expander"))?;
                let port_address = drive.port_address(side);
                expander.occupy(Link::new(
                    phy,
                    1,
                    Attachment::EndDevice {
                        phy: u32::from(side),
                        address: port_address,
                        name: drive.serial.clone(),
                        slot: drive.slot,
                    },
                ))?;

                trace!(
                    "Drive '{}' (slot {}) on '{}' phy {}: SCSI id {}",
                    drive.serial,
                    drive.slot,
                    id,
                    phy,
                    scsi_id
                );

                drives.push(DriveRecord {
                    port: port_index,
                    enclosure: drive.enclosure.clone(),
                    expander: id.clone(),
                    slot: drive.slot,
                    side: expander.side,
                    serial: drive.serial.clone(),
                    file: drive.file.clone(),
                    scsi_id,
                    address: drive.address,
                    port_address,
                    target_address: drive.target_address(),
                    attached_address: expander.address,
                    attached_phy: phy,
                    options: drive
                        .options
                        .iter()
                        .chain(&self.controller.drive_options)
                        .cloned()
                        .collect(),
                });
            }

            self.next_scsi_id = end_scsi_id;

            // phy_count is never zero, so the block holds at least one id.
            if let Some(ses) = &mut expander.ses {
                ses.physical_port = Some(port_index);
                ses.scsi_id = Some(end_scsi_id - 1);
            }

            debug!(
                "Expander '{}': SCSI ids [{}, {}), {} drive port(s)",
                id,
                start_scsi_id,
                self.next_scsi_id,
                drives.len()
            );
            container.drives.extend(drives);
        }

        Ok(())
    }
}

/// Replaces the placeholder on the connector's port with a concrete
/// peer-controller link.
fn apply_override(
    container: &mut Container,
    external: &ExternalOverride<'_>,
) -> Result<(), TopologyError> {
    let connector = external.connector;
    let referrer = format!("External connector {}", external.index);
    let name = format!("external connector {}", external.index);
    let expander = container
        .get_mut(&connector.expander_id())
        .structured(InternalError::Internal(
            "external connector applied to a container without its expander",
        ))?;

    let range = expander.port(&connector.attached_port, &referrer)?;
    if !range.external {
        warn!(
            "{} attaches to port '{}' of '{}', which is not reserved for a peer controller",
            referrer, connector.attached_port, expander.id
        );
    }
    expander.claim(Link::new(
        range.phy,
        range.number,
        Attachment::Active {
            phy: connector.phy,
            address: Some(connector.address),
            name: Some(name),
        },
    ))?;

    debug!(
        "{} claims phys [{}, {}) of '{}'",
        referrer,
        range.phy,
        range.phy + range.number,
        expander.id
    );
    Ok(())
}
