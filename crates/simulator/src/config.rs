//! Workload descriptor.

use serde::{Deserialize, Serialize};

/// One workload run against one overlay: how many nodes to build, how many
/// operations of each class to issue, and the seed every random choice
/// derives from.
///
/// The descriptor is echoed verbatim into the result record's `params`
/// section, so it is serde-serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Number of initial nodes.
    pub n_nodes: usize,
    /// Insert operations drawn from the head of the key source.
    pub inserts: usize,
    /// Lookup operations over already-inserted keys.
    pub lookups: usize,
    /// Update operations over already-inserted keys.
    pub updates: usize,
    /// Delete operations over already-inserted keys.
    pub deletes: usize,
    /// Churn events; each is one join immediately followed by one leave.
    pub join_leave: usize,
    /// Fan-out of the concurrent lookup sub-experiment.
    pub k: usize,
    /// Seed for the RNG driving every random choice.
    pub seed: u64,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            n_nodes: 100,
            inserts: 2000,
            lookups: 2000,
            updates: 300,
            deletes: 300,
            join_leave: 30,
            k: 50,
            seed: 0,
        }
    }
}

impl WorkloadSpec {
    pub fn new(n_nodes: usize) -> Self {
        Self {
            n_nodes,
            ..Self::default()
        }
    }

    pub fn with_n_nodes(mut self, n_nodes: usize) -> Self {
        self.n_nodes = n_nodes;
        self
    }

    pub fn with_inserts(mut self, inserts: usize) -> Self {
        self.inserts = inserts;
        self
    }

    pub fn with_lookups(mut self, lookups: usize) -> Self {
        self.lookups = lookups;
        self
    }

    pub fn with_updates(mut self, updates: usize) -> Self {
        self.updates = updates;
        self
    }

    pub fn with_deletes(mut self, deletes: usize) -> Self {
        self.deletes = deletes;
        self
    }

    pub fn with_join_leave(mut self, join_leave: usize) -> Self {
        self.join_leave = join_leave;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Bound on how much of the key source a run can consume.
    pub fn max_source_items(&self) -> usize {
        self.inserts
            .max(self.lookups)
            .max(self.updates)
            .max(self.deletes)
            .max(self.k)
            + 100
    }
}
