//! Key-value payload stored in the overlays.

use serde::{Deserialize, Serialize};

/// Opaque value attached to a key.
///
/// Mirrors the subset of movie attributes the CSV source yields. All fields
/// are optional because real dataset rows are sparse; the overlays never
/// look inside, they only move the record to its responsible node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub id: Option<String>,
    pub popularity: Option<f64>,
    pub vote_average: Option<f64>,
    pub vote_count: Option<u64>,
    pub release_date: Option<String>,
}

impl Record {
    /// A record carrying only a popularity score, the shape the update
    /// phase of the workload writes.
    pub fn with_popularity(popularity: f64) -> Self {
        Self {
            popularity: Some(popularity),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_payload_only_sets_popularity() {
        let rec = Record::with_popularity(42.5);
        assert_eq!(rec.popularity, Some(42.5));
        assert!(rec.id.is_none() && rec.release_date.is_none());
    }
}
