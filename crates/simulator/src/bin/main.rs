//! DHT simulator CLI
//!
//! Runs the mixed key-value workload against both overlays and writes the
//! result record for the external plotting tools.
//!
//! # Example
//!
//! ```bash
//! # Baseline run over a movies CSV with a fixed seed
//! dhtsim run --csv movies.csv --N 100 --inserts 2000 --lookups 2000 --seed 1
//!
//! # The K-query grid: one record per (N, join_leave) cell plus a summary CSV
//! dhtsim grid --csv movies.csv --K 20 --seed 1 --outdir results
//! ```

use clap::{Args, Parser, Subcommand};
use dhtsim_simulator::{grid_summary, ExperimentRunner, WorkloadSpec};
use dhtsim_types::Record;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// DHT simulator
///
/// Builds N-node Chord and Pastry overlays, executes a seeded workload
/// against each, and reports routing cost in hops per operation class.
/// Single-threaded apart from the K-query phase; reproducible when the
/// same seed is used.
#[derive(Parser, Debug)]
#[command(name = "dhtsim")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Workload descriptor flags, shared by both subcommands.
#[derive(Args, Debug)]
struct WorkloadArgs {
    /// Path to the movies CSV; a synthetic catalog is used when omitted
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Number of initial nodes
    #[arg(long = "N", default_value_t = 100)]
    n_nodes: usize,

    /// Insert operations drawn from the source head
    #[arg(long, default_value_t = 2000)]
    inserts: usize,

    /// Lookup operations over already-inserted keys
    #[arg(long, default_value_t = 2000)]
    lookups: usize,

    /// Update operations over already-inserted keys
    #[arg(long, default_value_t = 300)]
    updates: usize,

    /// Delete operations over already-inserted keys
    #[arg(long, default_value_t = 300)]
    deletes: usize,

    /// Churn events, each one join immediately followed by one leave
    #[arg(long = "join_leave", default_value_t = 30)]
    join_leave: usize,

    /// Fan-out of the concurrent lookup sub-experiment
    #[arg(long = "K", default_value_t = 50)]
    k: usize,

    /// Seed for every random choice in the run
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl WorkloadArgs {
    fn to_spec(&self) -> WorkloadSpec {
        WorkloadSpec {
            n_nodes: self.n_nodes,
            inserts: self.inserts,
            lookups: self.lookups,
            updates: self.updates,
            deletes: self.deletes,
            join_leave: self.join_leave,
            k: self.k,
            seed: self.seed,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the baseline workload against both overlays
    Run {
        #[command(flatten)]
        workload: WorkloadArgs,

        /// Where to write the result record
        #[arg(long, default_value = "results.json")]
        out: PathBuf,
    },

    /// Run the K-query grid over N x join_leave
    Grid {
        #[command(flatten)]
        workload: WorkloadArgs,

        /// Grid values for N
        #[arg(long = "N-grid", value_delimiter = ',', default_values_t = [20, 50, 100])]
        n_values: Vec<usize>,

        /// Grid values for join_leave
        #[arg(long = "join-leave-grid", value_delimiter = ',', default_values_t = [0, 20, 50])]
        join_leave_values: Vec<usize>,

        /// Directory for per-cell records and the summary CSV
        #[arg(long, default_value = "results")]
        outdir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,dhtsim_simulator=info,dhtsim=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { workload, out } => {
            let spec = workload.to_spec();
            let items = load_items(workload.csv.as_deref(), spec.max_source_items())?;
            info!(?spec, items = items.len(), "starting baseline run");

            let record = ExperimentRunner::new(spec).run_baseline(&items)?;
            std::fs::write(&out, record.to_json()? + "\n")?;
            record.print_summary();
            info!(path = %out.display(), "wrote result record");
        }
        Commands::Grid {
            workload,
            n_values,
            join_leave_values,
            outdir,
        } => {
            let spec = workload.to_spec();
            let items = load_items(workload.csv.as_deref(), spec.max_source_items())?;
            info!(
                ?n_values,
                ?join_leave_values,
                k = spec.k,
                seed = spec.seed,
                "starting grid run"
            );

            let cells =
                ExperimentRunner::new(spec).run_grid(&n_values, &join_leave_values, &items)?;
            std::fs::create_dir_all(&outdir)?;
            for cell in &cells {
                let name = format!(
                    "res_N{}_JL{}_K{}_S{}.json",
                    cell.n_nodes, cell.join_leave, cell.record.params.k, cell.record.params.seed
                );
                std::fs::write(outdir.join(&name), cell.record.to_json()? + "\n")?;
            }

            let summary_path = outdir.join("kquery_summary.csv");
            let mut writer = csv::Writer::from_path(&summary_path)?;
            for row in grid_summary(&cells) {
                writer.serialize(row)?;
            }
            writer.flush()?;
            info!(
                cells = cells.len(),
                summary = %summary_path.display(),
                "wrote grid records"
            );
        }
    }
    Ok(())
}

/// Load the key source: the CSV when given, the synthetic catalog otherwise.
fn load_items(
    csv: Option<&Path>,
    limit: usize,
) -> Result<Vec<(String, Record)>, dhtsim_simulator::SourceError> {
    match csv {
        Some(path) => dhtsim_simulator::load_csv(path, limit),
        None => Ok(dhtsim_simulator::synthetic(limit)),
    }
}
