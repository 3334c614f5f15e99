//! Flattens finalized containers into the record consumed by the
//! device-emulation layer, and writes it out.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use log::info;
use tempfile::NamedTempFile;

use vsas_api::{
    error::{OutputError, ReportError, TopologyError},
    topology::{ResolvedPort, ResolvedTopology},
};

use crate::container::Container;

/// Builds the resolved record of `controller` from its finalized containers,
/// one per controller port.
pub fn flatten(controller: &str, containers: &[Container]) -> ResolvedTopology {
    let ports = containers
        .iter()
        .map(|container| ResolvedPort {
            index: container.port.index,
            phy: container.port.phy,
            address: container.port.address,
            attached_expander: container.port.expander_id(),
            expanders: container.iter().map(|expander| expander.to_record()).collect(),
        })
        .collect();

    let drives = containers
        .iter()
        .flat_map(|container| container.drives.iter().cloned())
        .collect();

    let ses = containers
        .iter()
        .flat_map(|container| container.iter().filter_map(|expander| expander.ses_record()))
        .collect();

    ResolvedTopology {
        controller: controller.to_string(),
        ports,
        drives,
        ses,
    }
}

pub fn to_yaml(topology: &ResolvedTopology) -> Result<String, TopologyError> {
    serde_yaml::to_string(topology).structured(OutputError::SerializeTopology {
        controller: topology.controller.clone(),
    })
}

/// Writes `topology` as YAML to `path`.
///
/// The record goes to a temporary file in the destination directory first
/// and is then renamed over `path`, so readers never see a partial record.
pub fn write_topology(topology: &ResolvedTopology, path: &Path) -> Result<(), TopologyError> {
    let contents = to_yaml(topology)?;

    write_atomically(path, &contents).structured(OutputError::WriteTopology {
        path: path.display().to_string(),
    })?;

    info!(
        "Wrote resolved topology of controller '{}' to '{}'",
        topology.controller,
        path.display()
    );
    Ok(())
}

fn write_atomically(path: &Path, contents: &str) -> Result<(), anyhow::Error> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut file = NamedTempFile::new_in(&directory).with_context(|| {
        format!(
            "Failed to create temporary file in '{}'",
            directory.display()
        )
    })?;
    file.write_all(contents.as_bytes())
        .context("Failed to write resolved topology to temporary file")?;
    file.flush().context("Failed to flush temporary file")?;
    file.persist(path)
        .with_context(|| format!("Failed to persist '{}'", path.display()))?;

    Ok(())
}
