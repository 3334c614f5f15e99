//! # Link registry
//!
//! Inter-expander wiring declared outside any single enclosure. Every
//! connection is stored twice, once under each end's fully-qualified expander
//! name, and each half names its peer so traversal can follow it with a
//! single map lookup.

use std::collections::BTreeMap;

use log::debug;

use vsas_api::{
    config::{ConnectionConfig, ConnectionEnd},
    error::{ConfigError, ConflictError, TopologyError},
    ExpanderId,
};

use crate::catalog::Catalog;

/// One direction of a connection, stored under the local expander.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeHalf {
    /// Index of the connection in the array configuration.
    pub connection: usize,

    /// First local phy.
    pub phy: u32,

    /// Number of contiguous phys on both ends.
    pub num: u32,

    pub peer: ExpanderId,
    pub peer_phy: u32,
}

impl EdgeHalf {
    fn same_wiring(&self, other: &EdgeHalf) -> bool {
        self.phy == other.phy
            && self.num == other.num
            && self.peer == other.peer
            && self.peer_phy == other.peer_phy
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkRegistry {
    edges: BTreeMap<ExpanderId, Vec<EdgeHalf>>,
}

impl LinkRegistry {
    /// Builds the registry, checking every end against the catalog. A
    /// connection declared twice, in either direction, is rejected.
    pub fn build(
        catalog: &Catalog,
        connections: &[ConnectionConfig],
    ) -> Result<Self, TopologyError> {
        let mut registry = LinkRegistry::default();

        for (index, ConnectionConfig([left, right])) in connections.iter().enumerate() {
            for end in [left, right] {
                Self::check_end(catalog, index, end)?;
            }

            registry.insert(index, left, right)?;
            registry.insert(index, right, left)?;
        }

        debug!(
            "Link registry: {} connection(s) across {} expander(s)",
            connections.len(),
            registry.edges.len()
        );

        Ok(registry)
    }

    fn check_end(
        catalog: &Catalog,
        index: usize,
        end: &ConnectionEnd,
    ) -> Result<(), TopologyError> {
        let referrer = format!("Connection {index}");
        if catalog.enclosure(&end.disk_array).is_none() {
            return Err(TopologyError::new(ConfigError::UndefinedEnclosure {
                referrer,
                enclosure: end.disk_array.clone(),
            }));
        }

        let expander = catalog.lookup(&end.disk_array, &end.expander).ok_or_else(|| {
            TopologyError::new(ConfigError::UndefinedExpander {
                referrer: referrer.clone(),
                enclosure: end.disk_array.clone(),
                expander: end.expander.clone(),
            })
        })?;

        if end.phy.checked_add(end.number).map_or(true, |last| last > expander.phy_count) {
            return Err(TopologyError::new(ConfigError::PhyRangeOutOfBounds {
                owner: referrer,
                expander: expander.id.clone(),
                phy: end.phy,
                number: end.number,
                phy_count: expander.phy_count,
            }));
        }

        Ok(())
    }

    fn insert(
        &mut self,
        connection: usize,
        local: &ConnectionEnd,
        peer: &ConnectionEnd,
    ) -> Result<(), TopologyError> {
        let id = local.expander_id();
        let half = EdgeHalf {
            connection,
            phy: local.phy,
            num: local.number,
            peer: peer.expander_id(),
            peer_phy: peer.phy,
        };

        let halves = self.edges.entry(id.clone()).or_default();
        if let Some(earlier) = halves
            .iter()
            .find(|earlier| earlier.connection != connection && earlier.same_wiring(&half))
        {
            return Err(TopologyError::new(ConflictError::DuplicateConnection {
                expander: id,
                phy: half.phy,
                peer: half.peer,
                connection: earlier.connection,
                other: connection,
            }));
        }
        halves.push(half);

        Ok(())
    }

    /// Edge halves stored under `id`, in declaration order.
    pub fn edges(&self, id: &ExpanderId) -> &[EdgeHalf] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of expanders with at least one edge.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
