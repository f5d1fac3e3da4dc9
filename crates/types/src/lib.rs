//! Shared types for the DHT simulator.
//!
//! This crate provides the foundational pieces both overlays build on:
//!
//! - [`Id`]: 160-bit identifier with ring and digit arithmetic
//! - [`Record`]: the opaque key-value payload
//! - [`DhtError`] / [`ErrorKind`]: error kinds and their tally names
//!
//! # Design Philosophy
//!
//! This crate is self-contained and does not depend on any other workspace
//! crates. Everything here is pure and deterministic: identical inputs
//! produce identical identifiers, distances and digits on every run, which
//! is what makes seeded experiments reproducible.

mod error;
mod id;
mod record;

pub use error::{DhtError, ErrorKind, Result};
pub use id::{
    in_interval, numeric_distance, ring_distance, shared_prefix_len, Id, ID_BITS, ID_BYTES,
};
pub use record::Record;
