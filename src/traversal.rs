//! # Topology traversal
//!
//! Discovers every expander reachable from one controller port.
//!
//! 1. The attached expander is cloned from the catalog into a fresh
//!    container, its port phys are marked as occupied by the host controller
//!    and its SES phy, if declared, is synthesized.
//! 2. For each registry edge of an expander already in the container, the
//!    peer is cloned in (with its SES phy) *before* recursing into it, and
//!    the edge is recorded as a link on both sides.
//! 3. Recursion stops when no new expander is found.
//!
//! Because an expander is marked present before its own edges are followed,
//! cycles in the expander graph are traversed exactly once.

use log::{debug, info};

use vsas_api::{
    config::ConnectorConfig,
    error::{ConfigError, InternalError, ReportError, TopologyError},
    ExpanderId,
};

use crate::{
    catalog::Catalog,
    container::{Container, ControllerPort},
    expander::Expander,
    link::{Attachment, Link},
    registry::{EdgeHalf, LinkRegistry},
};

impl ControllerPort {
    pub fn from_connector(index: usize, connector: &ConnectorConfig) -> Self {
        Self {
            index,
            phy: connector.phy,
            address: connector.address,
            enclosure: connector.attached_enclosure.clone(),
            expander: connector.attached_expander.clone(),
            port: connector.attached_port.clone(),
        }
    }
}

/// Discovers the container of expanders reachable from `port`.
pub fn discover(
    catalog: &Catalog,
    registry: &LinkRegistry,
    port: &ControllerPort,
) -> Result<Container, TopologyError> {
    let referrer = format!("Connector {}", port.index);
    let seed = catalog
        .lookup(&port.enclosure, &port.expander)
        .structured(ConfigError::UndefinedExpander {
            referrer: referrer.clone(),
            enclosure: port.enclosure.clone(),
            expander: port.expander.clone(),
        })?;

    let mut expander = seed.clone();
    let range = expander.port(&port.port, &referrer)?;
    expander.occupy(Link::new(
        range.phy,
        range.number,
        Attachment::HostController {
            phy: port.phy,
            address: port.address,
        },
    ))?;
    expander.attach_ses()?;

    let seed_id = expander.id.clone();
    let mut walker = Walker {
        catalog,
        registry,
        container: Container::new(port.clone()),
    };
    walker.container.insert(expander);
    walker.walk(&seed_id)?;

    info!(
        "Controller port {} attached to '{}' reaches {} expander(s)",
        port.index,
        seed_id,
        walker.container.len()
    );

    Ok(walker.container)
}

struct Walker<'a> {
    catalog: &'a Catalog,
    registry: &'a LinkRegistry,
    container: Container,
}

impl Walker<'_> {
    fn walk(&mut self, id: &ExpanderId) -> Result<(), TopologyError> {
        let registry = self.registry;
        for edge in registry.edges(id) {
            let discovered = !self.container.contains(&edge.peer);
            if discovered {
                let mut peer = self.catalog.expander(&edge.peer)?.clone();
                peer.attach_ses()?;
                debug!("Discovered expander '{}' via '{}'", edge.peer, id);
                self.container.insert(peer);
            }

            self.record(id, edge)?;

            if discovered {
                self.walk(&edge.peer)?;
            }
        }
        Ok(())
    }

    /// Records `edge` as a link on both of its expanders.
    fn record(&mut self, id: &ExpanderId, edge: &EdgeHalf) -> Result<(), TopologyError> {
        let local_address = self.expander(id)?.address;
        let peer_address = self.expander(&edge.peer)?.address;

        self.expander_mut(id)?.occupy(Link::new(
            edge.phy,
            edge.num,
            Attachment::Expander {
                phy: edge.peer_phy,
                address: peer_address,
                name: edge.peer.clone(),
            },
        ))?;
        self.expander_mut(&edge.peer)?.occupy(Link::new(
            edge.peer_phy,
            edge.num,
            Attachment::Expander {
                phy: edge.phy,
                address: local_address,
                name: id.clone(),
            },
        ))?;
        Ok(())
    }

    fn expander(&self, id: &ExpanderId) -> Result<&Expander, TopologyError> {
        self.container
            .get(id)
            .structured(InternalError::Internal("expander missing from container"))
    }

    fn expander_mut(&mut self, id: &ExpanderId) -> Result<&mut Expander, TopologyError> {
        self.container
            .get_mut(id)
            .structured(InternalError::Internal("expander missing from container"))
    }
}
