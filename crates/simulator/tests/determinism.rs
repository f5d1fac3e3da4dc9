//! Tests for deterministic experiment runs.
//!
//! These verify that a run produces identical results given the same
//! descriptor and seed, which is the core property the harness needs for
//! comparable experiments.

use dhtsim_simulator::{synthetic, ExperimentRunner, WorkloadSpec};
use tracing_test::traced_test;

fn test_spec() -> WorkloadSpec {
    WorkloadSpec::new(12)
        .with_inserts(60)
        .with_lookups(60)
        .with_updates(20)
        .with_deletes(20)
        .with_join_leave(5)
        .with_k(10)
        .with_seed(42)
}

#[test]
fn identical_runs_produce_byte_identical_records() {
    let spec = test_spec();
    let items = synthetic(spec.max_source_items());

    let record1 = ExperimentRunner::new(spec.clone())
        .run_baseline(&items)
        .expect("first run completes");
    let record2 = ExperimentRunner::new(spec)
        .run_baseline(&items)
        .expect("second run completes");

    assert_eq!(record1, record2, "records should be identical");
    assert_eq!(
        record1.to_json().unwrap(),
        record2.to_json().unwrap(),
        "serialized records should match byte for byte"
    );
}

#[test]
fn kquery_is_deterministic_despite_thread_interleaving() {
    // Hop counts are per-path, so scheduling order cannot change them; two
    // runs must agree on the whole kquery class.
    let spec = test_spec().with_k(20);
    let items = synthetic(spec.max_source_items());

    let record1 = ExperimentRunner::new(spec.clone())
        .run_baseline(&items)
        .expect("first run completes");
    let record2 = ExperimentRunner::new(spec)
        .run_baseline(&items)
        .expect("second run completes");

    assert_eq!(record1.chord["kquery"], record2.chord["kquery"]);
    assert_eq!(record1.pastry["kquery"], record2.pastry["kquery"]);
}

#[traced_test]
#[test]
fn different_seeds_complete_independently() {
    let items = synthetic(test_spec().max_source_items());

    let record1 = ExperimentRunner::new(test_spec().with_seed(111))
        .run_baseline(&items)
        .expect("seed 111 completes");
    let record2 = ExperimentRunner::new(test_spec().with_seed(222))
        .run_baseline(&items)
        .expect("seed 222 completes");

    // Both runs executed the full workload; the seeds only steer start-node
    // and key choices, so the counts still match.
    assert_eq!(record1.chord["insert"].count, record2.chord["insert"].count);
    assert_eq!(record1.params.seed, 111);
    assert_eq!(record2.params.seed, 222);
}

#[test]
fn params_echo_the_descriptor() {
    let spec = test_spec();
    let items = synthetic(spec.max_source_items());
    let record = ExperimentRunner::new(spec.clone())
        .run_baseline(&items)
        .expect("run completes");
    assert_eq!(record.params, spec);
}
