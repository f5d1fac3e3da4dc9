//! The Chord ring overlay.
//!
//! Nodes live in an overlay-owned arena ([`Vec`] of slots) and reference
//! each other by identifier; the ring index maps identifiers to slots.
//! Routing follows the classic iterative `find_successor` with
//! closest-preceding-finger forwarding, one hop per forward.

use crate::node::ChordNode;
use dhtsim_core::{
    ring_hop_budget, HopCounter, NodeIndex, Overlay, Protocol, Routed, RoutingStats,
    RoutingStatsSnapshot,
};
use dhtsim_types::{in_interval, DhtError, Id, Record, Result, ID_BITS};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use tracing::{debug, trace, warn};

/// Tunables for the ring overlay.
#[derive(Debug, Clone)]
pub struct ChordConfig {
    /// Length of each node's successor list.
    pub successor_list_len: usize,
    /// Cap on stabilize rounds per maintenance barrier.
    pub max_stabilize_rounds: usize,
    /// Rehash attempts before a node-id collision becomes fatal.
    pub id_retry_limit: u32,
}

impl Default for ChordConfig {
    fn default() -> Self {
        Self {
            successor_list_len: 8,
            max_stabilize_rounds: 64,
            id_retry_limit: 8,
        }
    }
}

/// In-process Chord overlay.
pub struct ChordOverlay {
    config: ChordConfig,
    /// Arena owning all node state. `None` slots belonged to departed nodes.
    slots: Vec<Option<ChordNode>>,
    /// Recycled slot indices.
    free: Vec<NodeIndex>,
    /// Live nodes in ascending id order.
    ring: BTreeMap<Id, NodeIndex>,
    stats: RoutingStats,
}

impl ChordOverlay {
    pub fn new(config: ChordConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            free: Vec::new(),
            ring: BTreeMap::new(),
            stats: RoutingStats::default(),
        }
    }

    // ── Arena access ─────────────────────────────────────────────────

    fn resolve(&self, id: &Id) -> Option<NodeIndex> {
        self.ring.get(id).copied()
    }

    fn node(&self, idx: NodeIndex) -> &ChordNode {
        self.slots[idx as usize].as_ref().expect("live arena slot")
    }

    fn node_mut(&mut self, idx: NodeIndex) -> &mut ChordNode {
        self.slots[idx as usize].as_mut().expect("live arena slot")
    }

    fn insert_node(&mut self, node: ChordNode) -> NodeIndex {
        let id = node.id;
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                (self.slots.len() - 1) as NodeIndex
            }
        };
        self.ring.insert(id, idx);
        idx
    }

    /// Node with the smallest id at or after `target`, wrapping at the top.
    fn ring_successor_of(&self, target: &Id) -> Option<Id> {
        self.ring
            .range(*target..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(id, _)| *id)
    }

    /// First live entry of a node's successor list, falling back to ring
    /// order when the whole list has departed.
    fn live_successor(&self, idx: NodeIndex) -> Id {
        let node = self.node(idx);
        for s in &node.successors {
            if *s != node.id && self.ring.contains_key(s) {
                return *s;
            }
        }
        self.ring
            .range((Excluded(node.id), Unbounded))
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(id, _)| *id)
            .expect("ring is non-empty")
    }

    // ── Routing ──────────────────────────────────────────────────────

    /// Highest finger strictly between this node and the target, skipping
    /// entries whose nodes have departed.
    fn closest_preceding_finger(&self, idx: NodeIndex, target: &Id) -> Id {
        let node = self.node(idx);
        for f in node.finger.iter().rev() {
            if *f == node.id || !self.ring.contains_key(f) {
                continue;
            }
            if in_interval(f, &node.id, target, true, true) {
                return *f;
            }
        }
        node.id
    }

    /// Iterative `find_successor`: returns the owner of `target` and the
    /// forwards spent reaching it.
    fn route(&self, start: Id, target: Id) -> Result<(NodeIndex, u32)> {
        if self.ring.is_empty() {
            return Err(DhtError::OverlayEmpty);
        }
        let mut current = self.resolve(&start).ok_or_else(|| {
            DhtError::IdFormat(format!("route started from unknown node {start:?}"))
        })?;
        let mut counter = HopCounter::new(self.hop_budget());
        loop {
            let node = self.node(current);
            let succ = self.live_successor(current);
            if succ == node.id {
                // Alone on the ring: every key resolves here.
                return Ok((current, counter.hops()));
            }
            // Resolve locally when this node already owns the target arc.
            if let Some(pred) = node.predecessor {
                if self.ring.contains_key(&pred)
                    && in_interval(&target, &pred, &node.id, true, false)
                {
                    return Ok((current, counter.hops()));
                }
            }
            if in_interval(&target, &node.id, &succ, true, false) {
                counter.forward()?;
                let owner = self.resolve(&succ).expect("successor is live");
                return Ok((owner, counter.hops()));
            }
            let mut next = self.closest_preceding_finger(current, &target);
            if next == node.id {
                next = succ;
            }
            counter.forward()?;
            current = self.resolve(&next).expect("finger target is live");
        }
    }

    fn route_tracked(&self, start: Id, target: Id) -> Result<(NodeIndex, u32)> {
        match self.route(start, target) {
            Err(err @ DhtError::RoutingDiverged { .. }) => {
                self.stats.record_divergence();
                Err(err)
            }
            other => other,
        }
    }

    // ── Membership ───────────────────────────────────────────────────

    fn derive_node_id(&self, label: &str) -> Result<Id> {
        let mut id = Id::hash(label.as_bytes());
        let mut attempt = 0u32;
        while self.ring.contains_key(&id) {
            attempt += 1;
            if attempt > self.config.id_retry_limit {
                return Err(DhtError::DuplicateId {
                    id,
                    attempts: attempt - 1,
                });
            }
            id = Id::hash(format!("{label}#{attempt}").as_bytes());
        }
        Ok(id)
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Drop predecessor pointers at nodes whose predecessor departed.
    fn check_predecessors(&mut self) {
        let indices: Vec<NodeIndex> = self.ring.values().copied().collect();
        for idx in indices {
            let stale = match self.node(idx).predecessor {
                Some(p) => !self.ring.contains_key(&p),
                None => false,
            };
            if stale {
                self.node_mut(idx).predecessor = None;
            }
        }
    }

    /// One stabilize step for one node. Returns whether any pointer moved.
    fn stabilize(&mut self, idx: NodeIndex) -> bool {
        let node_id = self.node(idx).id;
        let mut succ_id = self.live_successor(idx);
        let mut changed = false;

        if succ_id == node_id {
            // Alone: close the ring onto ourselves.
            let node = self.node_mut(idx);
            if node.predecessor != Some(node_id) {
                node.predecessor = Some(node_id);
                changed = true;
            }
            if node.successors.first() != Some(&node_id) {
                node.successors = vec![node_id];
                changed = true;
            }
            return changed;
        }

        // x = successor.predecessor; adopt it if it sits between us.
        let succ_idx = self.resolve(&succ_id).expect("successor is live");
        if let Some(x) = self.node(succ_idx).predecessor {
            if x != node_id
                && self.ring.contains_key(&x)
                && in_interval(&x, &node_id, &succ_id, true, true)
            {
                succ_id = x;
                changed = true;
            }
        }
        if self.node(idx).successors.first() != Some(&succ_id) {
            let node = self.node_mut(idx);
            node.successors.retain(|s| *s != succ_id);
            node.successors.insert(0, succ_id);
            changed = true;
        }

        // notify(successor): it adopts us if we beat its current predecessor.
        let succ_idx = self.resolve(&succ_id).expect("successor is live");
        let adopt = match self.node(succ_idx).predecessor {
            None => true,
            Some(p) => {
                !self.ring.contains_key(&p) || in_interval(&node_id, &p, &succ_id, true, true)
            }
        };
        if adopt && self.node(succ_idx).predecessor != Some(node_id) {
            self.node_mut(succ_idx).predecessor = Some(node_id);
            changed = true;
        }
        changed
    }

    /// Recompute successor lists and finger tables against the stabilized
    /// ring. At a barrier the routed `find_successor((id + 2^i))` of the
    /// fix-fingers protocol resolves to exactly the ring successor, so the
    /// table is filled directly from the ring index.
    fn refresh_tables(&mut self) {
        let ids: Vec<Id> = self.ring.keys().copied().collect();
        let n = ids.len();
        for (pos, id) in ids.iter().enumerate() {
            let mut successors = Vec::with_capacity(self.config.successor_list_len);
            for k in 1..=self.config.successor_list_len.min(n.saturating_sub(1)) {
                successors.push(ids[(pos + k) % n]);
            }
            if successors.is_empty() {
                successors.push(*id);
            }

            let mut finger = Vec::with_capacity(ID_BITS);
            for i in 0..ID_BITS {
                let target = id.add_pow2(i).expect("exponent below ID_BITS");
                finger.push(self.ring_successor_of(&target).expect("ring is non-empty"));
            }

            let idx = self.resolve(id).expect("ring entry resolves");
            let node = self.node_mut(idx);
            node.successors = successors;
            node.finger = finger;
        }
    }

    // ── Introspection for audits ─────────────────────────────────────

    /// Node responsible for `key` under the ring predicate: the first node
    /// at or after the key, walking forward.
    pub fn responsible_node(&self, key: &Id) -> Option<Id> {
        self.ring_successor_of(key)
    }

    /// Shared view of a node for audits and tests.
    pub fn node_state(&self, id: &Id) -> Option<&ChordNode> {
        self.resolve(id).map(|idx| self.node(idx))
    }

    /// Verify the quantified ring invariants. Intended for use at
    /// maintenance barriers; returns a description of the first violation.
    pub fn verify_invariants(&self) -> std::result::Result<(), String> {
        let ids: Vec<Id> = self.ring.keys().copied().collect();
        let n = ids.len();
        for (pos, id) in ids.iter().enumerate() {
            let node = self.node_state(id).expect("ring entry resolves");
            let expected_succ = ids[(pos + 1) % n];
            let expected_pred = ids[(pos + n - 1) % n];
            if node.successor() != expected_succ {
                return Err(format!(
                    "node {id} has successor {}, ring order says {expected_succ}",
                    node.successor()
                ));
            }
            // successor(n).predecessor == n, which also gives ring coverage:
            // the (pred, id] arcs tile the id space exactly once.
            if node.predecessor() != Some(expected_pred) {
                return Err(format!(
                    "node {id} has predecessor {:?}, ring order says {expected_pred}",
                    node.predecessor()
                ));
            }
            for key in node.stored_keys() {
                if !in_interval(key, &expected_pred, id, true, false) && n > 1 {
                    return Err(format!("key {key} resident at {id} outside its arc"));
                }
            }
        }
        Ok(())
    }
}

impl Overlay for ChordOverlay {
    fn protocol(&self) -> Protocol {
        Protocol::Chord
    }

    fn node_count(&self) -> usize {
        self.ring.len()
    }

    fn live_ids(&self) -> Vec<Id> {
        self.ring.keys().copied().collect()
    }

    fn hop_budget(&self) -> u32 {
        ring_hop_budget(self.ring.len())
    }

    fn join(&mut self, bootstrap: Option<Id>, label: &str) -> Result<Routed<Id>> {
        let new_id = self.derive_node_id(label)?;

        if self.ring.is_empty() {
            let mut node = ChordNode::new(new_id, label);
            node.predecessor = Some(new_id);
            self.insert_node(node);
            debug!(node = %new_id, label, "seeded first ring node");
            return Ok(Routed::local(new_id));
        }

        let boot = bootstrap
            .filter(|b| self.ring.contains_key(b))
            .or_else(|| self.ring.keys().next().copied())
            .expect("ring is non-empty");
        let (owner_idx, hops) = self.route_tracked(boot, new_id)?;
        let succ_id = self.node(owner_idx).id;

        // The successor hands over every key on the arc the newcomer now
        // owns: (pred(successor), new_id]. With the predecessor unknown the
        // split degenerates to (successor, new_id], which is exactly the
        // complement of what the successor keeps.
        let hand_from = self.node(owner_idx).predecessor.unwrap_or(succ_id);
        let moved: Vec<Id> = self
            .node(owner_idx)
            .store
            .keys()
            .filter(|k| in_interval(k, &hand_from, &new_id, true, false))
            .copied()
            .collect();

        let mut node = ChordNode::new(new_id, label);
        node.successors = vec![succ_id];
        for key in &moved {
            let record = self
                .node_mut(owner_idx)
                .store
                .remove(key)
                .expect("key listed from this store");
            node.store.insert(*key, record);
        }
        self.stats.record_handoff(moved.len());
        self.insert_node(node);

        debug!(
            node = %new_id,
            successor = %succ_id,
            keys_handed = moved.len(),
            hops,
            "node joined ring"
        );
        self.stats.record_op(hops);
        Ok(Routed::new(new_id, hops))
    }

    fn leave(&mut self, id: Id) -> Result<Routed<()>> {
        if self.ring.is_empty() {
            return Err(DhtError::OverlayEmpty);
        }
        let Some(idx) = self.resolve(&id) else {
            warn!(node = %id, "leave for a node that is not on the ring");
            return Ok(Routed::local(()));
        };

        if self.ring.len() == 1 {
            let node = self.slots[idx as usize].take().expect("live arena slot");
            self.ring.remove(&id);
            self.free.push(idx);
            if node.store_len() > 0 {
                warn!(dropped = node.store_len(), "last node left; resident keys dropped");
            }
            return Ok(Routed::local(()));
        }

        let succ_id = self.live_successor(idx);
        let node = self.slots[idx as usize].take().expect("live arena slot");
        self.ring.remove(&id);
        self.free.push(idx);

        let pred_id = node.predecessor.filter(|p| *p != id && self.ring.contains_key(p));
        let key_count = node.store.len();

        // Push the departing store to the successor, one batch transfer.
        let succ_idx = self.resolve(&succ_id).expect("successor is live");
        {
            let succ = self.node_mut(succ_idx);
            for (key, record) in node.store {
                succ.store.insert(key, record);
            }
            if succ.predecessor == Some(id) {
                succ.predecessor = pred_id;
            }
        }
        self.stats.record_handoff(key_count);

        // Tell the predecessor to point successor-forward.
        if let Some(pred_id) = pred_id {
            let pred_idx = self.resolve(&pred_id).expect("predecessor is live");
            let pred = self.node_mut(pred_idx);
            pred.successors.retain(|s| *s != id && *s != succ_id);
            pred.successors.insert(0, succ_id);
        }

        let hops = u32::from(key_count > 0);
        debug!(node = %id, successor = %succ_id, keys_handed = key_count, "node left ring");
        self.stats.record_op(hops);
        Ok(Routed::new((), hops))
    }

    fn put(&mut self, start: Id, key: Id, value: Record) -> Result<Routed<()>> {
        let (owner, hops) = self.route_tracked(start, key)?;
        self.node_mut(owner).store.insert(key, value);
        self.stats.record_op(hops);
        Ok(Routed::new((), hops))
    }

    fn get(&self, start: Id, key: Id) -> Result<Routed<Record>> {
        let (owner, hops) = self.route_tracked(start, key)?;
        self.stats.record_op(hops);
        let record = self
            .node(owner)
            .store
            .get(&key)
            .cloned()
            .ok_or(DhtError::KeyNotFound(key))?;
        Ok(Routed::new(record, hops))
    }

    fn update(&mut self, start: Id, key: Id, value: Record) -> Result<Routed<()>> {
        let (owner, hops) = self.route_tracked(start, key)?;
        self.stats.record_op(hops);
        let store = &mut self.node_mut(owner).store;
        if !store.contains_key(&key) {
            return Err(DhtError::KeyNotFound(key));
        }
        store.insert(key, value);
        Ok(Routed::new((), hops))
    }

    fn delete(&mut self, start: Id, key: Id) -> Result<Routed<()>> {
        let (owner, hops) = self.route_tracked(start, key)?;
        self.stats.record_op(hops);
        if self.node_mut(owner).store.remove(&key).is_none() {
            return Err(DhtError::KeyNotFound(key));
        }
        Ok(Routed::new((), hops))
    }

    fn maintenance_barrier(&mut self) {
        if self.ring.is_empty() {
            return;
        }
        self.check_predecessors();

        let mut rounds = 0;
        loop {
            let mut changed = false;
            let indices: Vec<NodeIndex> = self.ring.values().copied().collect();
            for idx in indices {
                changed |= self.stabilize(idx);
            }
            rounds += 1;
            if !changed || rounds >= self.config.max_stabilize_rounds {
                if rounds >= self.config.max_stabilize_rounds {
                    warn!(rounds, "stabilization hit the round cap before a fixed point");
                }
                break;
            }
        }

        self.refresh_tables();
        trace!(nodes = self.ring.len(), rounds, "ring stabilized");
    }

    fn total_keys(&self) -> usize {
        self.ring
            .values()
            .map(|idx| self.node(*idx).store_len())
            .sum()
    }

    fn stats(&self) -> RoutingStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for ChordOverlay {
    fn default() -> Self {
        Self::new(ChordConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(n: usize) -> ChordOverlay {
        let mut overlay = ChordOverlay::default();
        let mut bootstrap = None;
        for i in 0..n {
            let joined = overlay
                .join(bootstrap, &format!("node-{i:04}"))
                .expect("join succeeds");
            bootstrap.get_or_insert(joined.value);
            overlay.maintenance_barrier();
        }
        overlay
    }

    #[test]
    fn single_node_owns_everything() {
        let mut overlay = build(1);
        let start = overlay.live_ids()[0];
        let key = Id::hash(b"Inception");
        let put = overlay.put(start, key, Record::default()).unwrap();
        assert_eq!(put.hops, 0);
        let got = overlay.get(start, key).unwrap();
        assert_eq!(got.hops, 0);
    }

    #[test]
    fn delete_on_empty_overlay() {
        let mut overlay = ChordOverlay::default();
        let err = overlay
            .delete(Id::ZERO, Id::hash(b"anything"))
            .unwrap_err();
        assert_eq!(err, DhtError::OverlayEmpty);
    }

    #[test]
    fn update_missing_key_fails() {
        let mut overlay = build(5);
        let start = overlay.live_ids()[0];
        let key = Id::hash(b"missing");
        let err = overlay
            .update(start, key, Record::default())
            .unwrap_err();
        assert_eq!(err, DhtError::KeyNotFound(key));
    }

    #[test]
    fn duplicate_label_rehashes() {
        let mut overlay = build(3);
        let existing = overlay.live_ids()[0];
        // Force a collision by joining a label that hashes to a taken id:
        // same label joins twice must yield distinct ids.
        let first = overlay.join(Some(existing), "twin").unwrap().value;
        overlay.maintenance_barrier();
        let second = overlay.join(Some(existing), "twin").unwrap().value;
        assert_ne!(first, second);
    }

    #[test]
    fn ring_invariants_after_build() {
        let mut overlay = build(20);
        overlay.maintenance_barrier();
        overlay.verify_invariants().expect("invariants hold");
    }

    #[test]
    fn keys_follow_their_owner_through_leave() {
        let mut overlay = build(10);
        let start = overlay.live_ids()[0];
        let key = Id::hash(b"The Matrix");
        overlay.put(start, key, Record::with_popularity(9.0)).unwrap();

        let owner = overlay.responsible_node(&key).unwrap();
        overlay.leave(owner).unwrap();
        overlay.maintenance_barrier();

        let start = overlay.live_ids()[0];
        let got = overlay.get(start, key).unwrap();
        assert_eq!(got.value.popularity, Some(9.0));
        overlay.verify_invariants().expect("invariants hold after leave");
    }
}
