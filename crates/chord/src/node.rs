//! Per-node Chord state.

use dhtsim_types::{Id, Record, ID_BITS};
use std::collections::BTreeMap;

/// State held by one ring node.
///
/// All references to other nodes are bare identifiers resolved through the
/// overlay's arena; a node never owns another node.
#[derive(Debug, Clone)]
pub struct ChordNode {
    pub(crate) id: Id,
    pub(crate) label: String,
    /// Previous node on the ring; unknown right after a join.
    pub(crate) predecessor: Option<Id>,
    /// Ordered successor list. The first entry is the immediate successor;
    /// the rest are fallbacks consulted when the head has departed.
    pub(crate) successors: Vec<Id>,
    /// `finger[i]` points at the node succeeding `(id + 2^i) mod 2^160`.
    pub(crate) finger: Vec<Id>,
    /// Local key store for the arc `(predecessor, id]`.
    pub(crate) store: BTreeMap<Id, Record>,
}

impl ChordNode {
    pub(crate) fn new(id: Id, label: &str) -> Self {
        Self {
            id,
            label: label.to_owned(),
            predecessor: None,
            successors: vec![id],
            finger: vec![id; ID_BITS],
            store: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn predecessor(&self) -> Option<Id> {
        self.predecessor
    }

    /// Immediate successor as currently believed by this node.
    pub fn successor(&self) -> Id {
        self.successors.first().copied().unwrap_or(self.id)
    }

    pub fn successor_list(&self) -> &[Id] {
        &self.successors
    }

    pub fn finger_table(&self) -> &[Id] {
        &self.finger
    }

    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    pub(crate) fn stored_keys(&self) -> impl Iterator<Item = &Id> {
        self.store.keys()
    }
}
