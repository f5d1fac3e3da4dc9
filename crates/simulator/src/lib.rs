//! Experimental harness for the Chord and Pastry overlays.
//!
//! Orchestrates workload generation, routing-cost collection, and result
//! assembly over the in-process overlays:
//!
//! - [`WorkloadSpec`]: the workload descriptor (node count, op counts,
//!   churn events, K-query fan-out, seed)
//! - [`WorkloadDriver`]: executes the phase-ordered operation stream
//!   against one overlay
//! - [`HopMetrics`] / [`ResultRecord`]: per-class hop statistics and the
//!   JSON-shaped record the external writer serializes
//! - [`ExperimentRunner`]: baseline run and the `N × join_leave` grid
//!
//! Given the same descriptor and seed, a run reproduces the identifier
//! sequence, every operation choice, and the emitted record byte for byte.

mod config;
mod driver;
mod metrics;
mod runner;
mod source;

pub use config::WorkloadSpec;
pub use driver::{WorkloadDriver, WorkloadOutcome};
pub use metrics::{ClassStats, ErrorTally, GridSummaryRow, HopMetrics, OpClass, ResultRecord};
pub use runner::{grid_summary, ExperimentRunner, GridCell};
pub use source::{load_csv, synthetic, SourceError};
