//! Prefix routing table: rows by shared-prefix length, columns by next digit.

use dhtsim_types::{numeric_distance, shared_prefix_len, Id, Result};

/// `rows × 2^b` table of optional peer ids.
///
/// An entry at `[r][c]` shares exactly `r` leading digits with the owner and
/// has `c` as its next digit. Slots may be empty; routing covers gaps with
/// the rare-case fallback.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    owner: Id,
    digit_bits: u8,
    rows: Vec<Vec<Option<Id>>>,
}

impl RoutingTable {
    pub fn new(owner: Id, digit_bits: u8) -> Self {
        let row_count = Id::digit_count(digit_bits);
        let col_count = 1usize << digit_bits;
        Self {
            owner,
            digit_bits,
            rows: vec![vec![None; col_count]; row_count],
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn entry(&self, row: usize, col: usize) -> Option<Id> {
        self.rows.get(row).and_then(|r| r.get(col)).copied().flatten()
    }

    /// Offer a peer; it lands in the slot its prefix dictates. An occupied
    /// slot is only replaced by a numerically closer peer. Returns whether
    /// the table changed.
    pub fn install(&mut self, candidate: Id) -> Result<bool> {
        if candidate == self.owner {
            return Ok(false);
        }
        let row = shared_prefix_len(&self.owner, &candidate, self.digit_bits)?;
        if row >= self.rows.len() {
            return Ok(false);
        }
        let col = candidate.digit(row, self.digit_bits)? as usize;
        let slot = &mut self.rows[row][col];
        match slot {
            None => {
                *slot = Some(candidate);
                Ok(true)
            }
            Some(current) if *current == candidate => Ok(false),
            Some(current) => {
                let better = numeric_distance(&candidate, &self.owner)
                    < numeric_distance(current, &self.owner);
                if better {
                    *slot = Some(candidate);
                }
                Ok(better)
            }
        }
    }

    /// Clear every slot holding `id`; returns the vacated (row, col) pairs.
    pub fn remove(&mut self, id: &Id) -> Vec<(usize, usize)> {
        let mut vacated = Vec::new();
        for (r, row) in self.rows.iter_mut().enumerate() {
            for (c, slot) in row.iter_mut().enumerate() {
                if slot.as_ref() == Some(id) {
                    *slot = None;
                    vacated.push((r, c));
                }
            }
        }
        vacated
    }

    /// Live ids in one row.
    pub fn row_members(&self, row: usize) -> Vec<Id> {
        self.rows
            .get(row)
            .map(|r| r.iter().copied().flatten().collect())
            .unwrap_or_default()
    }

    /// Every id referenced anywhere in the table.
    pub fn members(&self) -> Vec<Id> {
        self.rows
            .iter()
            .flat_map(|row| row.iter().copied().flatten())
            .collect()
    }

    /// Iterate all occupied slots as `(row, col, id)`.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, usize, Id)> + '_ {
        self.rows.iter().enumerate().flat_map(|(r, row)| {
            row.iter()
                .enumerate()
                .filter_map(move |(c, slot)| slot.map(|id| (r, c, id)))
        })
    }
}
