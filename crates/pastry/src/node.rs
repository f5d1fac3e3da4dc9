//! Per-node Pastry state.

use crate::leafset::LeafSet;
use crate::routing_table::RoutingTable;
use dhtsim_types::{Id, Record};
use std::collections::BTreeMap;

/// State held by one prefix-routing node: leaf set, routing table, and the
/// local key store for the keys it is numerically closest to.
#[derive(Debug, Clone)]
pub struct PastryNode {
    pub(crate) id: Id,
    pub(crate) label: String,
    pub(crate) leaf: LeafSet,
    pub(crate) table: RoutingTable,
    pub(crate) store: BTreeMap<Id, Record>,
}

impl PastryNode {
    pub(crate) fn new(id: Id, label: &str, leaf_half: usize, digit_bits: u8) -> Self {
        Self {
            id,
            label: label.to_owned(),
            leaf: LeafSet::new(id, leaf_half),
            table: RoutingTable::new(id, digit_bits),
            store: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn leaf_set(&self) -> &LeafSet {
        &self.leaf
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    pub(crate) fn stored_keys(&self) -> impl Iterator<Item = &Id> {
        self.store.keys()
    }

    /// Every peer this node references, leaf set and table combined.
    pub(crate) fn known_peers(&self) -> Vec<Id> {
        let mut peers = self.leaf.members();
        for id in self.table.members() {
            if !peers.contains(&id) {
                peers.push(id);
            }
        }
        peers
    }
}
