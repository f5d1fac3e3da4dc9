//! Core abstractions for the DHT simulator.
//!
//! This crate defines the seam between the overlay implementations and the
//! workload driver:
//!
//! - [`Overlay`]: the capability set both protocols implement
//! - [`Routed`] / [`HopCounter`]: per-operation hop accounting with a
//!   divergence budget
//! - [`RoutingStats`]: informational counters per overlay
//!
//! # Architecture
//!
//! ```text
//! WorkloadDriver ──(Overlay trait)──▶ ChordOverlay / PastryOverlay
//!        ▲                                   │
//!        └────────── Routed<T> { hops } ◀────┘
//! ```
//!
//! Routing is a synchronous in-memory dispatch: a forward from node A to
//! node B increments the operation's [`HopCounter`] by one, and the hop
//! count travels back to the caller inside [`Routed`] instead of living in
//! ambient state.

mod hops;
mod stats;
mod traits;

pub use hops::{prefix_hop_budget, ring_hop_budget, HopCounter, Routed, MIN_HOP_BUDGET};
pub use stats::{RoutingStats, RoutingStatsSnapshot};
pub use traits::{Overlay, Protocol};

/// Deterministic index of a node slot in an overlay's arena.
///
/// Overlays own all node storage in an arena; inter-node references are
/// indices resolved through the arena, never owning handles, which keeps
/// the cyclic successor/predecessor topology out of the ownership graph.
pub type NodeIndex = u32;
