//! The Pastry prefix overlay.
//!
//! Nodes live in an overlay-owned arena and reference each other by
//! identifier. Routing follows the three Pastry cases: leaf-set delivery
//! when the key falls inside the leaf span, longest-prefix routing through
//! the table otherwise, and the rare-case numeric fallback when the needed
//! slot is empty. Every forward costs one hop.

use crate::node::PastryNode;
use dhtsim_core::{
    prefix_hop_budget, HopCounter, NodeIndex, Overlay, Protocol, Routed, RoutingStats,
    RoutingStatsSnapshot,
};
use dhtsim_types::{numeric_distance, shared_prefix_len, DhtError, Id, Record, Result};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use tracing::{debug, trace, warn};

/// Tunables for the prefix overlay.
#[derive(Debug, Clone)]
pub struct PastryConfig {
    /// Bits per routing digit (b). Base 16 routing uses 4.
    pub digit_bits: u8,
    /// Total leaf set size (L); half sit below the node, half above.
    pub leaf_set_len: usize,
    /// Cap on leaf-exchange rounds per maintenance barrier.
    pub max_gossip_rounds: usize,
    /// Rehash attempts before a node-id collision becomes fatal.
    pub id_retry_limit: u32,
}

impl Default for PastryConfig {
    fn default() -> Self {
        Self {
            digit_bits: 4,
            leaf_set_len: 16,
            max_gossip_rounds: 128,
            id_retry_limit: 8,
        }
    }
}

impl PastryConfig {
    pub fn with_digit_bits(mut self, digit_bits: u8) -> Self {
        self.digit_bits = digit_bits;
        self
    }

    pub fn with_leaf_set_len(mut self, leaf_set_len: usize) -> Self {
        self.leaf_set_len = leaf_set_len;
        self
    }

    fn leaf_half(&self) -> usize {
        (self.leaf_set_len / 2).max(1)
    }
}

/// In-process Pastry overlay.
pub struct PastryOverlay {
    config: PastryConfig,
    /// Arena owning all node state. `None` slots belonged to departed nodes.
    slots: Vec<Option<PastryNode>>,
    /// Recycled slot indices.
    free: Vec<NodeIndex>,
    /// Live nodes in ascending id order.
    index: BTreeMap<Id, NodeIndex>,
    stats: RoutingStats,
}

impl PastryOverlay {
    pub fn new(config: PastryConfig) -> Self {
        assert!(
            (1..=8).contains(&config.digit_bits),
            "digit width must be 1..=8 bits"
        );
        Self {
            config,
            slots: Vec::new(),
            free: Vec::new(),
            index: BTreeMap::new(),
            stats: RoutingStats::default(),
        }
    }

    pub fn config(&self) -> &PastryConfig {
        &self.config
    }

    // ── Arena access ─────────────────────────────────────────────────

    fn resolve(&self, id: &Id) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    fn node(&self, idx: NodeIndex) -> &PastryNode {
        self.slots[idx as usize].as_ref().expect("live arena slot")
    }

    fn node_mut(&mut self, idx: NodeIndex) -> &mut PastryNode {
        self.slots[idx as usize].as_mut().expect("live arena slot")
    }

    fn insert_node(&mut self, node: PastryNode) -> NodeIndex {
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
        self.index.insert(id, idx);
        idx
    }

    fn derive_node_id(&self, label: &str) -> Result<Id> {
        let mut id = Id::hash(label.as_bytes());
        let mut attempt = 0u32;
        while self.index.contains_key(&id) {
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

    // ── Responsibility ───────────────────────────────────────────────

    /// The live node numerically nearest to `key`, ties to the lower id.
    /// Only the two ring-adjacent nodes can minimize the arc distance.
    pub fn responsible_node(&self, key: &Id) -> Option<Id> {
        if self.index.is_empty() {
            return None;
        }
        let above = self
            .index
            .range(*key..)
            .next()
            .or_else(|| self.index.iter().next())
            .map(|(id, _)| *id)
            .expect("index is non-empty");
        let below = self
            .index
            .range((Unbounded, Excluded(*key)))
            .next_back()
            .or_else(|| self.index.iter().next_back())
            .map(|(id, _)| *id)
            .expect("index is non-empty");
        let (da, db) = (numeric_distance(&above, key), numeric_distance(&below, key));
        if da < db || (da == db && above < below) {
            Some(above)
        } else {
            Some(below)
        }
    }

    // ── Routing ──────────────────────────────────────────────────────

    /// Route toward `target`, returning the whole forwarding path (start
    /// node included) and the hops spent. The join protocol consumes the
    /// path; key operations take only the final node.
    fn route_traced(&self, start: Id, target: Id) -> Result<(Vec<NodeIndex>, u32)> {
        if self.index.is_empty() {
            return Err(DhtError::OverlayEmpty);
        }
        let mut current = self.resolve(&start).ok_or_else(|| {
            DhtError::IdFormat(format!("route started from unknown node {start:?}"))
        })?;
        let mut counter = HopCounter::new(self.hop_budget());
        let mut path = vec![current];
        let digit_bits = self.config.digit_bits;

        loop {
            let node = self.node(current);
            if node.id == target || node.leaf.is_empty() {
                return Ok((path, counter.hops()));
            }

            // Case 1: the key sits inside the leaf span; the numerically
            // closest member takes it, or we already are that member.
            if node.leaf.covers(&target) {
                let best = node.leaf.closest_to(&target);
                if best == node.id {
                    return Ok((path, counter.hops()));
                }
                counter.forward()?;
                current = self.resolve(&best).expect("leaf member is live");
                path.push(current);
                continue;
            }

            // Case 2: routing table entry for one more shared digit.
            let l = shared_prefix_len(&node.id, &target, digit_bits)?;
            let col = target.digit(l, digit_bits)? as usize;
            if let Some(next) = node.table.entry(l, col) {
                if let Some(next_idx) = self.resolve(&next) {
                    counter.forward()?;
                    current = next_idx;
                    path.push(current);
                    continue;
                }
            }

            // Rare case: any known peer at least as prefixed and strictly
            // closer; otherwise the key is delivered here.
            let own_distance = numeric_distance(&node.id, &target);
            let mut best: Option<(Id, Id)> = None;
            for peer in node.known_peers() {
                if self.resolve(&peer).is_none() {
                    continue;
                }
                if shared_prefix_len(&peer, &target, digit_bits)? < l {
                    continue;
                }
                let d = numeric_distance(&peer, &target);
                if d >= own_distance {
                    continue;
                }
                let beats = match &best {
                    None => true,
                    Some((bd, bid)) => d < *bd || (d == *bd && peer < *bid),
                };
                if beats {
                    best = Some((d, peer));
                }
            }
            match best {
                Some((_, peer)) => {
                    counter.forward()?;
                    current = self.resolve(&peer).expect("peer liveness checked");
                    path.push(current);
                }
                None => return Ok((path, counter.hops())),
            }
        }
    }

    fn route(&self, start: Id, target: Id) -> Result<(NodeIndex, u32)> {
        match self.route_traced(start, target) {
            Ok((path, hops)) => Ok((*path.last().expect("path starts non-empty"), hops)),
            Err(err @ DhtError::RoutingDiverged { .. }) => {
                self.stats.record_divergence();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    // ── Introspection for audits ─────────────────────────────────────

    /// Shared view of a node for audits and tests.
    pub fn node_state(&self, id: &Id) -> Option<&PastryNode> {
        self.resolve(id).map(|idx| self.node(idx))
    }

    /// Verify leaf closure, the routing-table prefix property, and key
    /// residency. Intended for use at maintenance barriers.
    pub fn verify_invariants(&self) -> std::result::Result<(), String> {
        let ids: Vec<Id> = self.index.keys().copied().collect();
        let n = ids.len();
        let half = self.config.leaf_half().min(n.saturating_sub(1));
        let digit_bits = self.config.digit_bits;

        for (pos, id) in ids.iter().enumerate() {
            let node = self.node_state(id).expect("index entry resolves");

            // Leaf closure: the `half` ring neighbors on each side are known.
            for k in 1..=half {
                let below = ids[(pos + n - k) % n];
                let above = ids[(pos + k) % n];
                for expected in [below, above] {
                    if expected != *id && !node.leaf.contains(&expected) {
                        return Err(format!("node {id} is missing leaf neighbor {expected}"));
                    }
                }
            }

            // Prefix property of every occupied routing slot.
            for (row, col, peer) in node.table.occupied() {
                let p = shared_prefix_len(id, &peer, digit_bits).map_err(|e| e.to_string())?;
                let d = peer.digit(row, digit_bits).map_err(|e| e.to_string())?;
                if p != row || d as usize != col {
                    return Err(format!(
                        "slot [{row}][{col}] at node {id} holds {peer} with prefix {p}, digit {d}"
                    ));
                }
            }

            // Residency: every stored key is numerically closest to us.
            for key in node.stored_keys() {
                let owner = self.responsible_node(key).expect("index is non-empty");
                if owner != *id {
                    return Err(format!(
                        "key {key} resident at {id} but numerically closest to {owner}"
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Overlay for PastryOverlay {
    fn protocol(&self) -> Protocol {
        Protocol::Pastry
    }

    fn node_count(&self) -> usize {
        self.index.len()
    }

    fn live_ids(&self) -> Vec<Id> {
        self.index.keys().copied().collect()
    }

    fn hop_budget(&self) -> u32 {
        prefix_hop_budget(self.index.len(), self.config.digit_bits)
    }

    fn join(&mut self, bootstrap: Option<Id>, label: &str) -> Result<Routed<Id>> {
        let new_id = self.derive_node_id(label)?;
        let leaf_half = self.config.leaf_half();
        let digit_bits = self.config.digit_bits;

        if self.index.is_empty() {
            let node = PastryNode::new(new_id, label, leaf_half, digit_bits);
            self.insert_node(node);
            debug!(node = %new_id, label, "seeded first pastry node");
            return Ok(Routed::local(new_id));
        }

        let boot = bootstrap
            .filter(|b| self.index.contains_key(b))
            .or_else(|| self.index.keys().next().copied())
            .expect("index is non-empty");
        let (path, hops) = match self.route_traced(boot, new_id) {
            Err(err @ DhtError::RoutingDiverged { .. }) => {
                self.stats.record_divergence();
                return Err(err);
            }
            other => other?,
        };
        let landing_idx = *path.last().expect("path starts non-empty");
        let landing_id = self.node(landing_idx).id;

        let mut node = PastryNode::new(new_id, label, leaf_half, digit_bits);

        // Row r of the newcomer's table comes from the r-th node on the
        // join path: that node shares r digits with the newcomer by
        // construction, so its row-r entries fit. `install` re-derives the
        // slot, which also handles a path shorter than the table.
        for (r, &path_idx) in path.iter().enumerate() {
            let hop_node = self.node(path_idx);
            node.table.install(hop_node.id)?;
            if r < hop_node.table.row_count() {
                for peer in hop_node.table.row_members(r) {
                    node.table.install(peer)?;
                }
            }
        }

        // Leaf set seeds from the landing node, the numerically nearest.
        node.leaf.insert(landing_id);
        for peer in self.node(landing_idx).leaf.members() {
            node.leaf.insert(peer);
            node.table.install(peer)?;
        }

        // Announce to every node the newcomer now references; they adopt it
        // opportunistically where it improves their own tables.
        for peer in node.known_peers() {
            if let Some(peer_idx) = self.resolve(&peer) {
                let peer_node = self.node_mut(peer_idx);
                peer_node.leaf.insert(new_id);
                peer_node.table.install(new_id)?;
            }
        }

        // Key handoff: the landing node forwards every key now numerically
        // closer to the newcomer (ties to the lower id).
        let moved: Vec<Id> = self
            .node(landing_idx)
            .store
            .keys()
            .filter(|k| {
                let dn = numeric_distance(&new_id, k);
                let dl = numeric_distance(&landing_id, k);
                dn < dl || (dn == dl && new_id < landing_id)
            })
            .copied()
            .collect();
        for key in &moved {
            let record = self
                .node_mut(landing_idx)
                .store
                .remove(key)
                .expect("key listed from this store");
            node.store.insert(*key, record);
        }
        self.stats.record_handoff(moved.len());
        self.insert_node(node);

        debug!(
            node = %new_id,
            landing = %landing_id,
            path_len = path.len(),
            keys_handed = moved.len(),
            hops,
            "node joined overlay"
        );
        self.stats.record_op(hops);
        Ok(Routed::new(new_id, hops))
    }

    fn leave(&mut self, id: Id) -> Result<Routed<()>> {
        if self.index.is_empty() {
            return Err(DhtError::OverlayEmpty);
        }
        let Some(idx) = self.resolve(&id) else {
            warn!(node = %id, "leave for a node that is not in the overlay");
            return Ok(Routed::local(()));
        };

        let node = self.slots[idx as usize].take().expect("live arena slot");
        self.index.remove(&id);
        self.free.push(idx);

        if self.index.is_empty() {
            if node.store_len() > 0 {
                warn!(dropped = node.store_len(), "last node left; resident keys dropped");
            }
            return Ok(Routed::local(()));
        }

        // Keys go to the numerically nearest live leaf, falling back to a
        // global scan when the whole leaf set departed first.
        let dest_id = node
            .leaf
            .members()
            .into_iter()
            .filter(|m| self.index.contains_key(m))
            .min_by(|a, b| {
                numeric_distance(a, &id)
                    .cmp(&numeric_distance(b, &id))
                    .then(a.cmp(b))
            })
            .or_else(|| self.responsible_node(&id))
            .expect("index is non-empty");
        let key_count = node.store.len();
        let dest_idx = self.resolve(&dest_id).expect("destination is live");
        {
            let dest = self.node_mut(dest_idx);
            for (key, record) in node.store {
                dest.store.insert(key, record);
            }
        }
        self.stats.record_handoff(key_count);

        // Every holder drops the departed id and refills vacated slots from
        // peers it already knows; gaps left over are covered by the
        // rare-case fallback until the next barrier.
        let indices: Vec<NodeIndex> = self.index.values().copied().collect();
        for holder_idx in indices {
            let holder = self.node_mut(holder_idx);
            holder.leaf.remove(&id);
            let vacated = holder.table.remove(&id);
            if !vacated.is_empty() {
                let peers = self.node(holder_idx).known_peers();
                let holder = self.node_mut(holder_idx);
                for peer in peers {
                    holder.table.install(peer)?;
                }
            }
        }

        let hops = u32::from(key_count > 0);
        debug!(node = %id, dest = %dest_id, keys_handed = key_count, "node left overlay");
        self.stats.record_op(hops);
        Ok(Routed::new((), hops))
    }

    fn put(&mut self, start: Id, key: Id, value: Record) -> Result<Routed<()>> {
        let (owner, hops) = self.route(start, key)?;
        self.node_mut(owner).store.insert(key, value);
        self.stats.record_op(hops);
        Ok(Routed::new((), hops))
    }

    fn get(&self, start: Id, key: Id) -> Result<Routed<Record>> {
        let (owner, hops) = self.route(start, key)?;
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
        let (owner, hops) = self.route(start, key)?;
        self.stats.record_op(hops);
        let store = &mut self.node_mut(owner).store;
        if !store.contains_key(&key) {
            return Err(DhtError::KeyNotFound(key));
        }
        store.insert(key, value);
        Ok(Routed::new((), hops))
    }

    fn delete(&mut self, start: Id, key: Id) -> Result<Routed<()>> {
        let (owner, hops) = self.route(start, key)?;
        self.stats.record_op(hops);
        if self.node_mut(owner).store.remove(&key).is_none() {
            return Err(DhtError::KeyNotFound(key));
        }
        Ok(Routed::new((), hops))
    }

    fn maintenance_barrier(&mut self) {
        if self.index.is_empty() {
            return;
        }

        // Finalize third-party updates: neighbors exchange leaf sets until
        // nothing improves, which closes the leaf sets over the live ring.
        let indices: Vec<NodeIndex> = self.index.values().copied().collect();
        let mut rounds = 0;
        loop {
            let mut changed = false;
            for &idx in &indices {
                let mut candidates: Vec<Id> = Vec::new();
                for member in self.node(idx).leaf.members() {
                    if let Some(member_idx) = self.resolve(&member) {
                        for second in self.node(member_idx).leaf.members() {
                            if !candidates.contains(&second) {
                                candidates.push(second);
                            }
                        }
                    }
                }
                let node = self.node_mut(idx);
                for candidate in candidates {
                    changed |= node.leaf.insert(candidate);
                }
            }
            rounds += 1;
            if !changed || rounds >= self.config.max_gossip_rounds {
                if rounds >= self.config.max_gossip_rounds {
                    warn!(rounds, "leaf exchange hit the round cap before a fixed point");
                }
                break;
            }
        }

        // Refresh routing slots from the (now complete) leaf sets.
        for &idx in &indices {
            let members = self.node(idx).leaf.members();
            let node = self.node_mut(idx);
            for member in members {
                node.table
                    .install(member)
                    .expect("digit width is validated at construction");
            }
        }

        // Re-home records whose responsible node shifted in ways the
        // per-node handoffs could not see (a leave sends the whole store to
        // one neighbor, a join only drains the landing node).
        let mut moves: Vec<(NodeIndex, Id)> = Vec::new();
        for &idx in &indices {
            let node = self.node(idx);
            for key in node.stored_keys() {
                let owner = self.responsible_node(key).expect("index is non-empty");
                if owner != node.id {
                    moves.push((idx, *key));
                }
            }
        }
        let moved = moves.len();
        for (idx, key) in moves {
            let record = self
                .node_mut(idx)
                .store
                .remove(&key)
                .expect("key listed from this store");
            let owner = self.responsible_node(&key).expect("index is non-empty");
            let owner_idx = self.resolve(&owner).expect("owner is live");
            self.node_mut(owner_idx).store.insert(key, record);
        }
        if moved > 0 {
            self.stats.record_handoff(moved);
        }
        trace!(nodes = self.index.len(), rounds, rehomed = moved, "leaf sets converged");
    }

    fn total_keys(&self) -> usize {
        self.index
            .values()
            .map(|idx| self.node(*idx).store_len())
            .sum()
    }

    fn stats(&self) -> RoutingStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for PastryOverlay {
    fn default() -> Self {
        Self::new(PastryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(n: usize) -> PastryOverlay {
        let mut overlay = PastryOverlay::default();
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
        assert_eq!(overlay.put(start, key, Record::default()).unwrap().hops, 0);
        assert_eq!(overlay.get(start, key).unwrap().hops, 0);
    }

    #[test]
    fn delete_on_empty_overlay() {
        let mut overlay = PastryOverlay::default();
        let err = overlay.delete(Id::ZERO, Id::hash(b"anything")).unwrap_err();
        assert_eq!(err, DhtError::OverlayEmpty);
    }

    #[test]
    fn records_land_on_the_numerically_closest_node() {
        let mut overlay = build(12);
        let ids = overlay.live_ids();
        for title in ["Alien", "Blade Runner", "Solaris", "Stalker"] {
            let key = Id::hash(title.as_bytes());
            overlay.put(ids[0], key, Record::default()).unwrap();
            let owner = overlay.responsible_node(&key).unwrap();
            assert!(overlay.node_state(&owner).unwrap().store_len() > 0);
        }
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

    #[test]
    fn update_missing_key_fails() {
        let mut overlay = build(5);
        let start = overlay.live_ids()[0];
        let key = Id::hash(b"missing");
        let err = overlay.update(start, key, Record::default()).unwrap_err();
        assert_eq!(err, DhtError::KeyNotFound(key));
    }
}
