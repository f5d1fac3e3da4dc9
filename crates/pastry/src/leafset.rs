//! Leaf set: the numerically nearest neighbors on each side.

use dhtsim_types::{numeric_distance, ring_distance, Id};

/// Up to `half` live nodes numerically below the owner and `half` above.
///
/// Both sides are kept sorted nearest-first. With few nodes in the overlay
/// the same peer may legitimately appear on both sides (the ring wraps).
#[derive(Debug, Clone)]
pub struct LeafSet {
    owner: Id,
    half: usize,
    below: Vec<Id>,
    above: Vec<Id>,
}

impl LeafSet {
    pub fn new(owner: Id, half: usize) -> Self {
        Self {
            owner,
            half,
            below: Vec::new(),
            above: Vec::new(),
        }
    }

    pub fn owner(&self) -> Id {
        self.owner
    }

    /// Offer a peer to both sides. Returns true if either side changed.
    pub fn insert(&mut self, id: Id) -> bool {
        if id == self.owner {
            return false;
        }
        let owner = self.owner;
        let half = self.half;
        let mut changed = false;
        // Distance walking up from the peer to the owner: how far below it sits.
        changed |= Self::insert_side(&mut self.below, half, id, |x| ring_distance(x, &owner));
        // Distance walking up from the owner to the peer: how far above.
        changed |= Self::insert_side(&mut self.above, half, id, |x| ring_distance(&owner, x));
        changed
    }

    fn insert_side(side: &mut Vec<Id>, half: usize, id: Id, dist: impl Fn(&Id) -> Id) -> bool {
        if side.contains(&id) {
            return false;
        }
        let d = dist(&id);
        let pos = side.partition_point(|x| dist(x) < d);
        if pos >= half {
            return false;
        }
        side.insert(pos, id);
        side.truncate(half);
        true
    }

    pub fn remove(&mut self, id: &Id) {
        self.below.retain(|x| x != id);
        self.above.retain(|x| x != id);
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.below.contains(id) || self.above.contains(id)
    }

    /// All distinct members, below side first.
    pub fn members(&self) -> Vec<Id> {
        let mut out = self.below.clone();
        for id in &self.above {
            if !out.contains(id) {
                out.push(*id);
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.below.is_empty() && self.above.is_empty()
    }

    /// Whether `target` falls inside the span from the farthest-below leaf
    /// to the farthest-above leaf (walking forward through the owner).
    ///
    /// When a peer sits on both sides, the two half-walks meet around the
    /// ring: the set holds every live node and the span is the whole id
    /// space. An empty set never covers.
    pub fn covers(&self, target: &Id) -> bool {
        let (Some(lowest), Some(highest)) = (self.below.last(), self.above.last()) else {
            return false;
        };
        if self.below.iter().any(|id| self.above.contains(id)) {
            return true;
        }
        ring_distance(lowest, target) <= ring_distance(lowest, highest)
    }

    /// The member (or the owner itself) numerically closest to `target`,
    /// ties to the lower id.
    pub fn closest_to(&self, target: &Id) -> Id {
        let mut best = self.owner;
        let mut best_d = numeric_distance(&self.owner, target);
        for id in self.members() {
            let d = numeric_distance(&id, target);
            if d < best_d || (d == best_d && id < best) {
                best = id;
                best_d = d;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhtsim_types::ID_BYTES;

    fn id(v: u64) -> Id {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 8..].copy_from_slice(&v.to_be_bytes());
        Id::from_bytes(bytes)
    }

    #[test]
    fn keeps_nearest_per_side() {
        let mut leaf = LeafSet::new(id(100), 2);
        for v in [10, 90, 95, 110, 120, 500] {
            leaf.insert(id(v));
        }
        // below keeps 95 and 90, above keeps 110 and 120
        assert!(leaf.contains(&id(95)) && leaf.contains(&id(90)));
        assert!(leaf.contains(&id(110)) && leaf.contains(&id(120)));
        assert!(!leaf.contains(&id(10)) && !leaf.contains(&id(500)));
    }

    #[test]
    fn same_peer_on_both_sides_with_two_nodes() {
        let mut leaf = LeafSet::new(id(100), 4);
        leaf.insert(id(200));
        assert_eq!(leaf.members(), vec![id(200)]);
        // the single peer is both the closest below (wrapping) and above
        assert!(leaf.covers(&id(150)));
    }

    #[test]
    fn covers_span_between_extremes() {
        let mut leaf = LeafSet::new(id(100), 2);
        for v in [80, 90, 110, 120] {
            leaf.insert(id(v));
        }
        assert!(leaf.covers(&id(100)));
        assert!(leaf.covers(&id(81)));
        assert!(leaf.covers(&id(119)));
        assert!(!leaf.covers(&id(200)));
        assert!(!leaf.covers(&id(5)));
    }

    #[test]
    fn closest_prefers_lower_id_on_tie() {
        let mut leaf = LeafSet::new(id(100), 2);
        leaf.insert(id(90));
        leaf.insert(id(110));
        // 90 and 110 are equidistant from 100's... target 100 is the owner itself
        assert_eq!(leaf.closest_to(&id(100)), id(100));
        // equidistant from 105: 100 and 110, lower id wins
        assert_eq!(leaf.closest_to(&id(105)), id(100));
    }

    #[test]
    fn remove_clears_both_sides() {
        let mut leaf = LeafSet::new(id(100), 4);
        leaf.insert(id(90));
        leaf.remove(&id(90));
        assert!(leaf.is_empty());
    }
}
