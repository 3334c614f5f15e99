//! # SAS topology resolver
//!
//! Reconstructs the physical SAS wiring reachable from each port of a host
//! controller, checks it for phy and address conflicts, assigns SCSI ids and
//! drive addresses, and emits the resolved record consumed by the
//! device-emulation layer.
//!
//! The pipeline, run once per controller at start-up:
//!
//! 1. `Catalog` and `LinkRegistry` are built once per array definition
//!    (`DiskArray::new()`).
//! 2. For each controller port, `traversal::discover()` builds a private
//!    `Container` of every reachable expander.
//! 3. `AddressAllocator` applies external-connector overrides and assigns
//!    SCSI ids and addresses in place.
//! 4. `serializer` flattens the containers into a `ResolvedTopology` and
//!    optionally writes it out.
//!
//! Any error aborts the whole resolution; no partial record is produced.
//!
//! ## Layout
//!
//! ```text
//! src
//! ├── allocator.rs          # AddressAllocator & external-connector overrides
//! ├── catalog.rs            # Catalog of enclosures, expanders & drive instances
//! ├── container.rs          # Per-port working copy of discovered expanders
//! ├── expander.rs           # Expander phy occupancy & SES synthesis
//! ├── lib.rs                # This file
//! ├── link.rs               # Link & Attachment
//! ├── registry.rs           # LinkRegistry of inter-expander connections
//! ├── serializer.rs         # ResolvedTopology flattening & output
//! ├── traversal.rs          # Cycle-safe discovery
//! └── validation_tests.rs
//! ```

use std::{
    collections::{btree_map::Entry, BTreeMap, BTreeSet},
    path::Path,
};

use log::{debug, info, warn};

use vsas_api::{
    config::{ControllerConfig, DiskArrayConfiguration},
    error::{ConflictError, NotFoundError, TopologyError, TopologyResultExt},
    topology::ResolvedTopology,
};

pub mod allocator;
pub mod catalog;
pub mod container;
pub mod expander;
pub mod link;
pub mod registry;
pub mod serializer;
pub mod traversal;

#[cfg(test)]
mod validation_tests;

use allocator::{AddressAllocator, ExternalOverride};
use catalog::Catalog;
use container::{Container, ControllerPort};
use registry::LinkRegistry;

/// The static, immutable half of the pipeline: catalog and link registry of
/// one array.
#[derive(Debug, Clone)]
pub struct DiskArray {
    catalog: Catalog,
    registry: LinkRegistry,
}

impl DiskArray {
    /// Validates `config` and builds its catalog and link registry.
    pub fn new(config: &DiskArrayConfiguration) -> Result<Self, TopologyError> {
        config
            .validate()
            .map_err(TopologyError::new)
            .message("Invalid disk array configuration")?;

        let catalog = Catalog::build(config).message("Failed to build entity catalog")?;
        let registry = LinkRegistry::build(&catalog, &config.connections)
            .message("Failed to build link registry")?;

        Ok(Self { catalog, registry })
    }

    /// Runs discovery, allocation and flattening for every port of
    /// `controller`. The array itself is left untouched.
    pub fn resolve(&self, controller: &ControllerConfig) -> Result<ResolvedTopology, TopologyError> {
        controller
            .validate()
            .map_err(TopologyError::new)
            .message("Invalid controller configuration")?;

        let mut containers = controller
            .connectors
            .iter()
            .enumerate()
            .map(|(index, connector)| {
                traversal::discover(
                    &self.catalog,
                    &self.registry,
                    &ControllerPort::from_connector(index, connector),
                )
                .message(format!(
                    "Failed to discover topology of controller '{}' port {}",
                    controller.name, index
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let overrides = assign_overrides(controller, &containers)?;

        let mut allocator = AddressAllocator::new(&self.catalog, controller);
        for (container, overrides) in containers.iter_mut().zip(&overrides) {
            let index = container.port.index;
            allocator.allocate(container, overrides).message(format!(
                "Failed to allocate addresses of controller '{}' port {}",
                controller.name, index
            ))?;
        }
        debug!(
            "Controller '{}' uses SCSI ids [{}, {})",
            controller.name,
            controller.scsi_id_base,
            allocator.next_scsi_id()
        );

        self.warn_unreached(controller, &containers);

        for container in &containers {
            check_unique_port_addresses(container)?;
        }
        let topology = serializer::flatten(&controller.name, &containers);
        check_unique_scsi_ids(&topology)?;

        info!(
            "Resolved controller '{}': {} port(s), {} drive port(s), {} SES device(s)",
            topology.controller,
            topology.ports.len(),
            topology.drives.len(),
            topology.ses.len()
        );

        Ok(topology)
    }

    /// Resolves `controller` and writes the record to `output`, or to the
    /// controller's configured path when `output` is `None`. Nothing is
    /// written if resolution fails.
    pub fn resolve_and_write(
        &self,
        controller: &ControllerConfig,
        output: Option<&Path>,
    ) -> Result<ResolvedTopology, TopologyError> {
        let topology = self.resolve(controller)?;
        if let Some(path) = output.or(controller.output.as_deref()) {
            serializer::write_topology(&topology, path)
                .message(format!("Failed to write topology of '{}'", controller.name))?;
        } else {
            warn!(
                "Controller '{}' has no output path, resolved topology not written",
                controller.name
            );
        }
        Ok(topology)
    }

    fn warn_unreached(&self, controller: &ControllerConfig, containers: &[Container]) {
        let reached: BTreeSet<_> = containers
            .iter()
            .flat_map(|container| container.ids().iter())
            .collect();
        for expander in self.catalog.expanders() {
            if !reached.contains(&expander.id) {
                warn!(
                    "Expander '{}' is not reachable from any port of controller '{}'",
                    expander.id, controller.name
                );
            }
        }
    }
}

/// Resolves one controller against an array description in a single call.
pub fn resolve_controller(
    array: &DiskArrayConfiguration,
    controller: &ControllerConfig,
) -> Result<ResolvedTopology, TopologyError> {
    DiskArray::new(array)?.resolve(controller)
}

/// Resolves one controller and writes its record to the controller's
/// configured output path.
pub fn resolve_and_write(
    array: &DiskArrayConfiguration,
    controller: &ControllerConfig,
) -> Result<ResolvedTopology, TopologyError> {
    DiskArray::new(array)?.resolve_and_write(controller, None)
}

/// Matches each external connector to every container holding its expander.
/// A connector whose expander no port reaches is an error.
fn assign_overrides<'a>(
    controller: &'a ControllerConfig,
    containers: &[Container],
) -> Result<Vec<Vec<ExternalOverride<'a>>>, TopologyError> {
    let mut overrides = vec![Vec::new(); containers.len()];

    for (index, connector) in controller.external_connectors.iter().enumerate() {
        let id = connector.expander_id();
        let mut applied = false;
        for (container, matched) in containers.iter().zip(overrides.iter_mut()) {
            if container.contains(&id) {
                matched.push(ExternalOverride { index, connector });
                applied = true;
            }
        }

        if !applied {
            return Err(TopologyError::new(NotFoundError::Expander {
                controller: controller.name.clone(),
                referrer: format!("External connector {index}"),
                expander: id,
            }));
        }
    }

    Ok(overrides)
}

/// A drive port address may be reached only once through one controller port.
fn check_unique_port_addresses(container: &Container) -> Result<(), TopologyError> {
    let mut owners: BTreeMap<u64, String> = BTreeMap::new();
    for drive in &container.drives {
        let owner = format!("drive {} via '{}'", drive.serial, drive.expander);
        if let Some(existing) = owners.insert(drive.port_address, owner.clone()) {
            return Err(TopologyError::new(ConflictError::DuplicateAddress {
                address: drive.port_address,
                owner: existing,
                other: owner,
            }));
        }
    }
    Ok(())
}

/// Every SCSI id of a controller, across all of its ports, must be unique.
fn check_unique_scsi_ids(topology: &ResolvedTopology) -> Result<(), TopologyError> {
    let mut owners: BTreeMap<u32, String> = BTreeMap::new();
    let drives = topology
        .drives
        .iter()
        .map(|drive| (drive.scsi_id, format!("drive {} via '{}'", drive.serial, drive.expander)));
    let ses = topology
        .ses
        .iter()
        .map(|ses| (ses.scsi_id, format!("SES of '{}'", ses.expander)));

    for (scsi_id, owner) in drives.chain(ses) {
        match owners.entry(scsi_id) {
            Entry::Occupied(entry) => {
                return Err(TopologyError::new(ConflictError::DuplicateScsiId {
                    controller: topology.controller.clone(),
                    scsi_id,
                    owner: entry.get().clone(),
                    other: owner,
                }))
            }
            Entry::Vacant(entry) => {
                entry.insert(owner);
            }
        }
    }

    Ok(())
}
