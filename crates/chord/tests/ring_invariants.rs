//! Ring-level invariants for the Chord overlay.
//!
//! These exercise the quantified properties that must hold after every
//! maintenance barrier: successor consistency, ring coverage, and key
//! residency, plus the round-trip laws of the key operations.

use dhtsim_chord::ChordOverlay;
use dhtsim_core::Overlay;
use dhtsim_types::{DhtError, Id, Record};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Join `n` labeled nodes through the first as bootstrap, stabilizing
/// after each join.
fn build(n: usize) -> ChordOverlay {
    let mut overlay = ChordOverlay::default();
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

fn insert_keys(overlay: &mut ChordOverlay, count: usize, rng: &mut ChaCha8Rng) -> Vec<Id> {
    let ids = overlay.live_ids();
    let mut keys = Vec::with_capacity(count);
    for i in 0..count {
        let key = Id::hash(format!("movie-{i:05}").as_bytes());
        let start = ids[rng.gen_range(0..ids.len())];
        overlay
            .put(start, key, Record::with_popularity(i as f64))
            .expect("put succeeds");
        keys.push(key);
    }
    keys
}

#[test]
fn successor_consistency_and_coverage() {
    let mut overlay = build(20);
    overlay.maintenance_barrier();
    overlay.verify_invariants().expect("ring invariants hold");

    // Every id resolves to exactly one responsible node.
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    for _ in 0..100 {
        let probe = Id::hash(&rng.gen::<[u8; 16]>());
        assert!(overlay.responsible_node(&probe).is_some());
    }
}

#[test]
fn key_residency_after_inserts() {
    let mut overlay = build(20);
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let keys = insert_keys(&mut overlay, 50, &mut rng);

    assert_eq!(overlay.total_keys(), keys.len());
    for key in &keys {
        let owner = overlay.responsible_node(key).expect("overlay non-empty");
        let node = overlay.node_state(&owner).expect("owner resolves");
        assert!(
            node.store_len() > 0,
            "responsible node {owner} holds nothing"
        );
    }
    overlay.verify_invariants().expect("residency holds");
}

#[test]
fn round_trip_laws() {
    let mut overlay = build(10);
    let start = overlay.live_ids()[0];
    let key = Id::hash(b"Inception");

    overlay.put(start, key, Record::with_popularity(99.0)).unwrap();
    assert_eq!(
        overlay.get(start, key).unwrap().value.popularity,
        Some(99.0)
    );

    overlay
        .update(start, key, Record::with_popularity(100.0))
        .unwrap();
    assert_eq!(
        overlay.get(start, key).unwrap().value.popularity,
        Some(100.0)
    );

    overlay.delete(start, key).unwrap();
    assert_eq!(
        overlay.get(start, key).unwrap_err(),
        DhtError::KeyNotFound(key)
    );
}

#[test]
fn churn_preserves_surviving_keys() {
    let mut overlay = build(15);
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let keys = insert_keys(&mut overlay, 40, &mut rng);

    // Ten churn events: one join immediately followed by one random leave,
    // stabilizing after each pair.
    for round in 0..10 {
        let ids = overlay.live_ids();
        let bootstrap = ids[rng.gen_range(0..ids.len())];
        overlay
            .join(Some(bootstrap), &format!("churn-{round:02}"))
            .expect("join succeeds");
        let ids = overlay.live_ids();
        let victim = ids[rng.gen_range(0..ids.len())];
        overlay.leave(victim).expect("leave succeeds");
        overlay.maintenance_barrier();
        overlay.verify_invariants().expect("invariants hold mid-churn");
    }

    // Every inserted key is still retrievable with its last written value.
    let ids = overlay.live_ids();
    for (i, key) in keys.iter().enumerate() {
        let start = ids[rng.gen_range(0..ids.len())];
        let got = overlay.get(start, *key).expect("key survived churn");
        assert_eq!(got.value.popularity, Some(i as f64));
    }
    assert_eq!(overlay.total_keys(), keys.len());
}

#[test]
fn lookup_hops_stay_logarithmic() {
    let mut overlay = build(50);
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let keys = insert_keys(&mut overlay, 100, &mut rng);

    let ids = overlay.live_ids();
    let mut total_hops = 0u64;
    for key in &keys {
        let start = ids[rng.gen_range(0..ids.len())];
        total_hops += overlay.get(start, *key).expect("lookup succeeds").hops as u64;
    }
    let mean = total_hops as f64 / keys.len() as f64;
    // Expected cost is O(log2 N) ~ 5.6 for N = 50; this is a statistical
    // bound over many lookups, not a per-operation guarantee.
    println!("chord mean lookup hops over {} lookups: {mean:.2}", keys.len());
    assert!(mean <= 8.0, "mean hops {mean:.2} above the logarithmic band");
}
