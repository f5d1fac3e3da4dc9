//! Workload driver: turns a descriptor into an operation stream against
//! one overlay, tagging every routed operation with its hop cost.

use crate::config::WorkloadSpec;
use crate::metrics::{ErrorTally, HopMetrics, OpClass};
use dhtsim_core::Overlay;
use dhtsim_types::{DhtError, Id, Record};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

/// Multiplier from the deterministic child-stream derivation used for
/// per-task RNGs in the concurrent lookup phase.
const SEED_SPLIT: u64 = 0x517cc1b727220a95;

/// Metrics and recoverable-error tally from one protocol run.
#[derive(Debug, Default)]
pub struct WorkloadOutcome {
    pub metrics: HopMetrics,
    pub errors: ErrorTally,
}

/// Executes a [`WorkloadSpec`] against any [`Overlay`].
///
/// Phases run in a fixed order — insert, lookup, update, delete, churn,
/// K-query — with a maintenance barrier after the initial build and after
/// every churn event. All random choices come from one ChaCha8 stream
/// seeded by the descriptor, so a run is reproducible bit-for-bit.
pub struct WorkloadDriver {
    spec: WorkloadSpec,
}

impl WorkloadDriver {
    pub fn new(spec: WorkloadSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    /// Run the full workload. Recoverable errors are tallied; structural
    /// errors abort the run for this protocol.
    pub fn run<O: Overlay + Sync>(
        &self,
        overlay: &mut O,
        items: &[(String, Record)],
    ) -> Result<WorkloadOutcome, DhtError> {
        let spec = &self.spec;
        let mut rng = ChaCha8Rng::seed_from_u64(spec.seed);
        let mut out = WorkloadOutcome::default();

        self.build_overlay(overlay)?;

        // Inserts come from the head of the source in its stable order.
        let mut live_keys: Vec<Id> = Vec::with_capacity(spec.inserts);
        for (title, record) in items.iter().take(spec.inserts) {
            let key = Id::hash(title.as_bytes());
            let start = pick_start(overlay, &mut rng)?;
            match overlay.put(start, key, record.clone()) {
                Ok(routed) => {
                    out.metrics.record(OpClass::Insert, routed.hops);
                    live_keys.push(key);
                }
                Err(err) => record_or_abort(&mut out.errors, err)?,
            }
        }

        // Lookups and updates draw uniformly over the inserted keys. With
        // nothing inserted they fall back to the first catalog title, which
        // routes fine and tallies as KeyNotFound.
        let fallback_key = items.first().map(|(title, _)| Id::hash(title.as_bytes()));
        for _ in 0..spec.lookups {
            let Some(key) = choose_key(&live_keys, fallback_key, &mut rng) else {
                break;
            };
            let start = pick_start(overlay, &mut rng)?;
            match overlay.get(start, key) {
                Ok(routed) => out.metrics.record(OpClass::Lookup, routed.hops),
                Err(err) => record_or_abort(&mut out.errors, err)?,
            }
        }

        for _ in 0..spec.updates {
            let Some(key) = choose_key(&live_keys, fallback_key, &mut rng) else {
                break;
            };
            let start = pick_start(overlay, &mut rng)?;
            let value = Record::with_popularity(rng.gen::<f64>() * 100.0);
            match overlay.update(start, key, value) {
                Ok(routed) => out.metrics.record(OpClass::Update, routed.hops),
                Err(err) => record_or_abort(&mut out.errors, err)?,
            }
        }

        // Deletes consume distinct live keys so a key dies exactly once.
        for _ in 0..spec.deletes {
            let key = if live_keys.is_empty() {
                match fallback_key {
                    Some(key) => key,
                    None => break,
                }
            } else {
                let i = rng.gen_range(0..live_keys.len());
                live_keys.swap_remove(i)
            };
            let start = pick_start(overlay, &mut rng)?;
            match overlay.delete(start, key) {
                Ok(routed) => out.metrics.record(OpClass::Delete, routed.hops),
                Err(err) => record_or_abort(&mut out.errors, err)?,
            }
        }

        // Churn: one join immediately followed by one random leave, with a
        // maintenance barrier closing each event.
        for round in 0..spec.join_leave {
            let bootstrap = pick_start(overlay, &mut rng)?;
            match overlay.join(Some(bootstrap), &format!("churn-node-{round:04}")) {
                Ok(routed) => out.metrics.record(OpClass::Join, routed.hops),
                Err(err) => record_or_abort(&mut out.errors, err)?,
            }
            let victim = pick_start(overlay, &mut rng)?;
            match overlay.leave(victim) {
                Ok(routed) => out.metrics.record(OpClass::Leave, routed.hops),
                Err(err) => record_or_abort(&mut out.errors, err)?,
            }
            overlay.maintenance_barrier();
        }

        self.run_kquery(overlay, &live_keys, &mut rng, &mut out)?;

        info!(
            protocol = %overlay.protocol(),
            nodes = overlay.node_count(),
            resident_keys = overlay.total_keys(),
            recoverable_errors = out.errors.total(),
            stats = ?overlay.stats(),
            "workload complete"
        );
        Ok(out)
    }

    /// Materialize the initial nodes with deterministically derived labels,
    /// joining each through the first node and stabilizing between joins.
    fn build_overlay<O: Overlay>(&self, overlay: &mut O) -> Result<(), DhtError> {
        let mut bootstrap = None;
        for i in 0..self.spec.n_nodes {
            let joined = overlay.join(bootstrap, &format!("node-{i:04}"))?;
            bootstrap.get_or_insert(joined.value);
            overlay.maintenance_barrier();
        }
        info!(
            protocol = %overlay.protocol(),
            nodes = overlay.node_count(),
            hop_budget = overlay.hop_budget(),
            "overlay built"
        );
        Ok(())
    }

    /// K lookups over a disjoint sample of live keys, scheduled in parallel
    /// over scoped worker threads.
    ///
    /// The hot path is read-only, so the overlay is shared immutably; each
    /// task derives its own RNG stream from the parent seed and its task
    /// index, and results are folded in task order so the interleaving
    /// cannot influence the record.
    fn run_kquery<O: Overlay + Sync>(
        &self,
        overlay: &mut O,
        live_keys: &[Id],
        rng: &mut ChaCha8Rng,
        out: &mut WorkloadOutcome,
    ) -> Result<(), DhtError> {
        let spec = &self.spec;
        if spec.k == 0 {
            return Ok(());
        }
        let k = spec.k.min(live_keys.len());
        if k < spec.k {
            warn!(
                requested = spec.k,
                live = live_keys.len(),
                "clamping concurrent lookups to the live key count"
            );
        }
        if k == 0 {
            return Ok(());
        }

        let mut pool = live_keys.to_vec();
        let mut sample = Vec::with_capacity(k);
        for _ in 0..k {
            let i = rng.gen_range(0..pool.len());
            sample.push(pool.swap_remove(i));
        }

        let ids = overlay.live_ids();
        let shared: &O = overlay;
        let (tx, rx) = crossbeam::channel::unbounded();
        std::thread::scope(|scope| {
            for (task, key) in sample.iter().enumerate() {
                let tx = tx.clone();
                let ids = &ids;
                let seed = spec.seed;
                scope.spawn(move || {
                    let child = seed.wrapping_add(task as u64).wrapping_mul(SEED_SPLIT);
                    let mut task_rng = ChaCha8Rng::seed_from_u64(child);
                    let start = ids[task_rng.gen_range(0..ids.len())];
                    let result = shared.get(start, *key).map(|routed| routed.hops);
                    tx.send((task, result)).expect("collector outlives workers");
                });
            }
            drop(tx);
        });

        let mut slots: Vec<Option<Result<u32, DhtError>>> = vec![None; k];
        for (task, result) in rx {
            slots[task] = Some(result);
        }
        for slot in slots {
            match slot.expect("every task reported") {
                Ok(hops) => out.metrics.record(OpClass::Kquery, hops),
                Err(err) => record_or_abort(&mut out.errors, err)?,
            }
        }
        Ok(())
    }
}

/// Uniformly pick a live node to start routing from.
fn pick_start<O: Overlay + ?Sized>(overlay: &O, rng: &mut ChaCha8Rng) -> Result<Id, DhtError> {
    let ids = overlay.live_ids();
    if ids.is_empty() {
        return Err(DhtError::OverlayEmpty);
    }
    Ok(ids[rng.gen_range(0..ids.len())])
}

fn choose_key(live: &[Id], fallback: Option<Id>, rng: &mut ChaCha8Rng) -> Option<Id> {
    if live.is_empty() {
        fallback
    } else {
        Some(live[rng.gen_range(0..live.len())])
    }
}

/// Tally recoverable errors; structural kinds abort the protocol run.
fn record_or_abort(errors: &mut ErrorTally, err: DhtError) -> Result<(), DhtError> {
    if err.is_recoverable() {
        errors.record(err.kind());
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhtsim_chord::ChordOverlay;
    use dhtsim_pastry::PastryOverlay;

    fn small_spec() -> WorkloadSpec {
        WorkloadSpec::new(8)
            .with_inserts(30)
            .with_lookups(30)
            .with_updates(10)
            .with_deletes(10)
            .with_join_leave(3)
            .with_k(5)
            .with_seed(1)
    }

    #[test]
    fn chord_workload_records_every_class() {
        let spec = small_spec();
        let items = crate::source::synthetic(spec.max_source_items());
        let driver = WorkloadDriver::new(spec.clone());
        let mut overlay = ChordOverlay::default();
        let out = driver.run(&mut overlay, &items).expect("run completes");

        assert_eq!(out.metrics.count(OpClass::Insert), spec.inserts);
        assert_eq!(out.metrics.count(OpClass::Lookup), spec.lookups);
        assert_eq!(out.metrics.count(OpClass::Update), spec.updates);
        assert_eq!(out.metrics.count(OpClass::Delete), spec.deletes);
        assert_eq!(out.metrics.count(OpClass::Join), spec.join_leave);
        assert_eq!(out.metrics.count(OpClass::Leave), spec.join_leave);
        assert_eq!(out.metrics.count(OpClass::Kquery), spec.k);
        assert_eq!(out.errors.total(), 0);
        // inserts minus distinct deletes remain resident
        assert_eq!(overlay.total_keys(), spec.inserts - spec.deletes);
    }

    #[test]
    fn pastry_workload_records_every_class() {
        let spec = small_spec();
        let items = crate::source::synthetic(spec.max_source_items());
        let driver = WorkloadDriver::new(spec.clone());
        let mut overlay = PastryOverlay::default();
        let out = driver.run(&mut overlay, &items).expect("run completes");

        assert_eq!(out.metrics.count(OpClass::Insert), spec.inserts);
        assert_eq!(out.metrics.count(OpClass::Kquery), spec.k);
        assert_eq!(out.errors.total(), 0);
        assert_eq!(overlay.total_keys(), spec.inserts - spec.deletes);
    }

    #[test]
    fn kquery_clamps_to_live_keys() {
        let spec = WorkloadSpec::new(4)
            .with_inserts(3)
            .with_lookups(0)
            .with_updates(0)
            .with_deletes(0)
            .with_join_leave(0)
            .with_k(10)
            .with_seed(2);
        let items = crate::source::synthetic(spec.max_source_items());
        let driver = WorkloadDriver::new(spec);
        let mut overlay = ChordOverlay::default();
        let out = driver.run(&mut overlay, &items).expect("run completes");
        assert_eq!(out.metrics.count(OpClass::Kquery), 3);
    }
}
