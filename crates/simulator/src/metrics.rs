//! Hop-count aggregation and the emitted result record.

use crate::config::WorkloadSpec;
use dhtsim_types::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Operation classes the driver tags hop samples with.
///
/// The concurrent lookup sub-experiment is its own class, kept apart from
/// the sequential `lookup` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpClass {
    Insert,
    Lookup,
    Update,
    Delete,
    Join,
    Leave,
    Kquery,
}

impl OpClass {
    pub const ALL: [OpClass; 7] = [
        OpClass::Insert,
        OpClass::Lookup,
        OpClass::Update,
        OpClass::Delete,
        OpClass::Join,
        OpClass::Leave,
        OpClass::Kquery,
    ];

    /// Stable lowercase name used in serialized records.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpClass::Insert => "insert",
            OpClass::Lookup => "lookup",
            OpClass::Update => "update",
            OpClass::Delete => "delete",
            OpClass::Join => "join",
            OpClass::Leave => "leave",
            OpClass::Kquery => "kquery",
        }
    }
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary statistics for one operation class.
///
/// An empty class reports `count = 0` with the statistics as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStats {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<u32>,
    pub p95: Option<u32>,
}

impl ClassStats {
    fn empty() -> Self {
        Self {
            count: 0,
            mean: None,
            median: None,
            p95: None,
        }
    }

    fn from_samples(mut values: Vec<u32>) -> Self {
        let n = values.len();
        if n == 0 {
            return Self::empty();
        }
        values.sort_unstable();
        let mean = values.iter().map(|v| *v as u64).sum::<u64>() as f64 / n as f64;
        // Lower of the two middles for even counts.
        let median = values[(n - 1) / 2];
        // Nearest-rank p95: ceil(0.95 * n), 1-indexed.
        let rank = ((0.95 * n as f64).ceil() as usize).clamp(1, n);
        let p95 = values[rank - 1];
        Self {
            count: n,
            mean: Some(mean),
            median: Some(median),
            p95: Some(p95),
        }
    }
}

/// Collects `(op_class, hops)` samples for one protocol run.
#[derive(Debug, Default, Clone)]
pub struct HopMetrics {
    samples: BTreeMap<OpClass, Vec<u32>>,
}

impl HopMetrics {
    pub fn record(&mut self, op: OpClass, hops: u32) {
        self.samples.entry(op).or_default().push(hops);
    }

    pub fn count(&self, op: OpClass) -> usize {
        self.samples.get(&op).map_or(0, Vec::len)
    }

    /// Per-class statistics, every class always present so empty groups
    /// serialize with `count = 0` and `null` statistics.
    pub fn summary(&self) -> BTreeMap<String, ClassStats> {
        let mut out = BTreeMap::new();
        for op in OpClass::ALL {
            let stats = match self.samples.get(&op) {
                Some(values) => ClassStats::from_samples(values.clone()),
                None => ClassStats::empty(),
            };
            out.insert(op.as_str().to_owned(), stats);
        }
        out
    }
}

/// Running count of recoverable errors, keyed by kind name.
#[derive(Debug, Default, Clone)]
pub struct ErrorTally {
    counts: BTreeMap<String, u64>,
}

impl ErrorTally {
    pub fn record(&mut self, kind: ErrorKind) {
        *self.counts.entry(kind.as_str().to_owned()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: ErrorTally) {
        for (kind, count) in other.counts {
            *self.counts.entry(kind).or_insert(0) += count;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn into_map(self) -> BTreeMap<String, u64> {
        self.counts
    }
}

/// The structured record a run emits: per-protocol per-class statistics,
/// the echoed descriptor, and the recoverable-error tally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub chord: BTreeMap<String, ClassStats>,
    pub pastry: BTreeMap<String, ClassStats>,
    pub params: WorkloadSpec,
    pub errors: BTreeMap<String, u64>,
}

impl ResultRecord {
    /// Serialize for the external writer. Struct fields and `BTreeMap` keys
    /// have a fixed order, so identical runs produce byte-identical output.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Per-class statistics for one protocol.
    pub fn class(&self, protocol: dhtsim_core::Protocol, op: OpClass) -> Option<&ClassStats> {
        let table = match protocol {
            dhtsim_core::Protocol::Chord => &self.chord,
            dhtsim_core::Protocol::Pastry => &self.pastry,
        };
        table.get(op.as_str())
    }

    pub fn print_summary(&self) {
        println!("=== Routing cost (hops) ===");
        for (name, table) in [("chord", &self.chord), ("pastry", &self.pastry)] {
            println!("{name}:");
            for (op, stats) in table {
                match stats.mean {
                    Some(mean) => println!(
                        "  {op:<8} count={:<6} mean={mean:<8.3} median={:<4} p95={}",
                        stats.count,
                        stats.median.unwrap_or(0),
                        stats.p95.unwrap_or(0),
                    ),
                    None => println!("  {op:<8} count=0"),
                }
            }
        }
        if !self.errors.is_empty() {
            println!("errors: {:?}", self.errors);
        }
    }
}

/// One row of the K-query grid summary, per `(protocol, N, join_leave)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSummaryRow {
    pub protocol: dhtsim_core::Protocol,
    pub n_nodes: usize,
    pub join_leave: usize,
    pub k: usize,
    pub seed: u64,
    pub kquery_mean_hops: Option<f64>,
    pub kquery_p95_hops: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_takes_lower_middle() {
        let stats = ClassStats::from_samples(vec![4, 1, 3, 2]);
        assert_eq!(stats.median, Some(2));
        let stats = ClassStats::from_samples(vec![5, 1, 3]);
        assert_eq!(stats.median, Some(3));
    }

    #[test]
    fn p95_is_nearest_rank() {
        // 100 samples: rank ceil(95) = 95 -> the 95th smallest, value 94
        let stats = ClassStats::from_samples((0..100).collect());
        assert_eq!(stats.p95, Some(94));
        // one sample: rank 1
        let stats = ClassStats::from_samples(vec![7]);
        assert_eq!(stats.p95, Some(7));
    }

    #[test]
    fn empty_classes_report_null_statistics() {
        let metrics = HopMetrics::default();
        let summary = metrics.summary();
        assert_eq!(summary.len(), OpClass::ALL.len());
        let lookup = &summary["lookup"];
        assert_eq!(lookup.count, 0);
        assert!(lookup.mean.is_none() && lookup.median.is_none() && lookup.p95.is_none());
    }

    #[test]
    fn summary_counts_match_recorded_samples() {
        let mut metrics = HopMetrics::default();
        for hops in [1, 2, 3] {
            metrics.record(OpClass::Insert, hops);
        }
        metrics.record(OpClass::Kquery, 2);
        let summary = metrics.summary();
        assert_eq!(summary["insert"].count, 3);
        assert_eq!(summary["insert"].mean, Some(2.0));
        assert_eq!(summary["kquery"].count, 1);
    }

    #[test]
    fn error_tally_merges() {
        let mut a = ErrorTally::default();
        a.record(ErrorKind::RoutingDiverged);
        let mut b = ErrorTally::default();
        b.record(ErrorKind::RoutingDiverged);
        b.record(ErrorKind::KeyNotFound);
        a.merge(b);
        let map = a.into_map();
        assert_eq!(map["RoutingDiverged"], 2);
        assert_eq!(map["KeyNotFound"], 1);
    }

    #[test]
    fn record_serialization_is_stable() {
        let record = ResultRecord {
            chord: HopMetrics::default().summary(),
            pastry: HopMetrics::default().summary(),
            params: WorkloadSpec::default(),
            errors: BTreeMap::new(),
        };
        let a = record.to_json().unwrap();
        let b = record.to_json().unwrap();
        assert_eq!(a, b);
        let parsed: ResultRecord = serde_json::from_str(&a).unwrap();
        assert_eq!(parsed, record);
    }
}
