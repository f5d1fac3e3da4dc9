//! The overlay capability set.

use crate::hops::Routed;
use crate::stats::RoutingStatsSnapshot;
use dhtsim_types::{Id, Record, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which overlay protocol an implementation speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Chord,
    Pastry,
}

impl Protocol {
    /// Stable lowercase name used in result records and file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Chord => "chord",
            Protocol::Pastry => "pastry",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common capability set the workload driver exercises.
///
/// Implementations are:
///
/// - **Synchronous**: one operation at a time, no suspension inside routing
/// - **Deterministic**: the same membership and arguments produce the same
///   owner and the same hop count
/// - **Hop-accounted**: every routed operation returns its own hop count;
///   nothing accumulates in ambient state
///
/// `get` takes `&self` because the concurrent lookup experiment shares one
/// overlay across worker threads; all mutation goes through `&mut self`
/// methods, which the driver only calls between barriers.
pub trait Overlay {
    /// Protocol this overlay implements.
    fn protocol(&self) -> Protocol;

    /// Number of live (joined, not departed) nodes.
    fn node_count(&self) -> usize;

    /// Live node identifiers in ascending ring order.
    fn live_ids(&self) -> Vec<Id>;

    /// Hop budget currently applied to routed operations.
    fn hop_budget(&self) -> u32;

    /// Join a node derived from `label`, bootstrapping through an existing
    /// node. `bootstrap` may be `None` only when the overlay is empty.
    ///
    /// Returns the new node's identifier and the hops spent routing the
    /// join to its place on the overlay.
    fn join(&mut self, bootstrap: Option<Id>, label: &str) -> Result<Routed<Id>>;

    /// Gracefully remove a node, handing its keys to the protocol's
    /// successor. Unknown ids are ignored (the node may have already left).
    fn leave(&mut self, node: Id) -> Result<Routed<()>>;

    /// Route an insert from `start`; the resolved owner stores the record.
    fn put(&mut self, start: Id, key: Id, value: Record) -> Result<Routed<()>>;

    /// Route a lookup from `start`. `KeyNotFound` if the owner has no record.
    fn get(&self, start: Id, key: Id) -> Result<Routed<Record>>;

    /// Route an update from `start`. `KeyNotFound` if the key is absent.
    fn update(&mut self, start: Id, key: Id, value: Record) -> Result<Routed<()>>;

    /// Route a delete from `start`. `KeyNotFound` if the key is absent.
    fn delete(&mut self, start: Id, key: Id) -> Result<Routed<()>>;

    /// Run protocol maintenance to a fixed point.
    ///
    /// The driver invokes this at explicit barriers (after the initial
    /// build and after each churn event); maintenance never runs
    /// concurrently with workload operations and its messages are not
    /// hop-accounted.
    fn maintenance_barrier(&mut self);

    /// Total records resident across all live nodes.
    fn total_keys(&self) -> usize;

    /// Routing counters accumulated so far.
    fn stats(&self) -> RoutingStatsSnapshot;
}
