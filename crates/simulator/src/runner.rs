//! Experiment runner: baseline runs and the K-query grid.

use crate::config::WorkloadSpec;
use crate::driver::WorkloadDriver;
use crate::metrics::{GridSummaryRow, OpClass, ResultRecord};
use dhtsim_chord::ChordOverlay;
use dhtsim_core::Protocol;
use dhtsim_pastry::PastryOverlay;
use dhtsim_types::{DhtError, Record};
use tracing::info;

/// One cell of the experiment grid.
#[derive(Debug, Clone)]
pub struct GridCell {
    pub n_nodes: usize,
    pub join_leave: usize,
    pub record: ResultRecord,
}

/// Thin orchestration: build one overlay of each protocol, run the same
/// workload against both, and assemble the result record. Determinism
/// holds because each protocol run re-seeds its own ChaCha8 stream from
/// the descriptor.
pub struct ExperimentRunner {
    spec: WorkloadSpec,
}

impl ExperimentRunner {
    pub fn new(spec: WorkloadSpec) -> Self {
        Self { spec }
    }

    /// One overlay of each protocol, one workload, one record out.
    pub fn run_baseline(&self, items: &[(String, Record)]) -> Result<ResultRecord, DhtError> {
        let driver = WorkloadDriver::new(self.spec.clone());

        let mut chord = ChordOverlay::default();
        let chord_out = driver.run(&mut chord, items)?;

        let mut pastry = PastryOverlay::default();
        let pastry_out = driver.run(&mut pastry, items)?;

        let mut errors = chord_out.errors;
        errors.merge(pastry_out.errors);

        Ok(ResultRecord {
            chord: chord_out.metrics.summary(),
            pastry: pastry_out.metrics.summary(),
            params: self.spec.clone(),
            errors: errors.into_map(),
        })
    }

    /// Cartesian product over `N × join_leave` with the descriptor's K and
    /// seed fixed; one record per cell.
    pub fn run_grid(
        &self,
        n_values: &[usize],
        join_leave_values: &[usize],
        items: &[(String, Record)],
    ) -> Result<Vec<GridCell>, DhtError> {
        let mut cells = Vec::with_capacity(n_values.len() * join_leave_values.len());
        for &n_nodes in n_values {
            for &join_leave in join_leave_values {
                let spec = self
                    .spec
                    .clone()
                    .with_n_nodes(n_nodes)
                    .with_join_leave(join_leave);
                info!(n_nodes, join_leave, k = spec.k, seed = spec.seed, "running grid cell");
                let record = ExperimentRunner::new(spec).run_baseline(items)?;
                cells.push(GridCell {
                    n_nodes,
                    join_leave,
                    record,
                });
            }
        }
        Ok(cells)
    }
}

/// Flatten grid cells into one summary row per `(protocol, N, join_leave)`.
pub fn grid_summary(cells: &[GridCell]) -> Vec<GridSummaryRow> {
    let mut rows = Vec::with_capacity(cells.len() * 2);
    for cell in cells {
        for protocol in [Protocol::Chord, Protocol::Pastry] {
            let stats = cell
                .record
                .class(protocol, OpClass::Kquery)
                .expect("summary always carries every class");
            rows.push(GridSummaryRow {
                protocol,
                n_nodes: cell.n_nodes,
                join_leave: cell.join_leave,
                k: cell.record.params.k,
                seed: cell.record.params.seed,
                kquery_mean_hops: stats.mean,
                kquery_p95_hops: stats.p95,
            });
        }
    }
    rows
}
