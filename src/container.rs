use std::collections::HashMap;

use vsas_api::{topology::DriveRecord, ExpanderId};

use crate::expander::Expander;

/// The controller port a container was discovered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerPort {
    /// Position of the connector in the controller configuration.
    pub index: usize,
    pub phy: u32,
    pub address: u64,
    pub enclosure: String,
    pub expander: String,
    pub port: String,
}

impl ControllerPort {
    pub fn expander_id(&self) -> ExpanderId {
        vsas_api::expander_id(&self.enclosure, &self.expander)
    }
}

/// Private working copy of every expander reachable from one controller
/// port. The container owns its expanders; links name their peers by
/// fully-qualified name and are resolved by lookup.
#[derive(Debug, Clone)]
pub struct Container {
    pub port: ControllerPort,

    /// Fully-qualified names in discovery order.
    order: Vec<ExpanderId>,
    expanders: HashMap<ExpanderId, Expander>,

    /// Finalized drive records, filled in by the address allocator.
    pub drives: Vec<DriveRecord>,
}

impl Container {
    pub fn new(port: ControllerPort) -> Self {
        Self {
            port,
            order: Vec::new(),
            expanders: HashMap::new(),
            drives: Vec::new(),
        }
    }

    /// Adds `expander` at the end of the discovery order. Returns false and
    /// leaves the container untouched if it is already present.
    pub fn insert(&mut self, expander: Expander) -> bool {
        if self.expanders.contains_key(&expander.id) {
            return false;
        }
        self.order.push(expander.id.clone());
        self.expanders.insert(expander.id.clone(), expander);
        true
    }

    pub fn contains(&self, id: &ExpanderId) -> bool {
        self.expanders.contains_key(id)
    }

    pub fn get(&self, id: &ExpanderId) -> Option<&Expander> {
        self.expanders.get(id)
    }

    pub fn get_mut(&mut self, id: &ExpanderId) -> Option<&mut Expander> {
        self.expanders.get_mut(id)
    }

    /// Fully-qualified names in discovery order.
    pub fn ids(&self) -> &[ExpanderId] {
        &self.order
    }

    /// Expanders in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &Expander> {
        self.order.iter().filter_map(|id| self.expanders.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
