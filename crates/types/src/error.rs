//! Error kinds shared across the overlays and the workload driver.

use crate::id::Id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DhtError>;

/// Errors surfaced by overlay operations.
///
/// `KeyNotFound` and `RoutingDiverged` are recoverable: the driver tallies
/// them and keeps going. The structural kinds abort the current protocol run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DhtError {
    /// Lookup/update/delete against a key absent at its owning node.
    #[error("key {0} has no record at its owner")]
    KeyNotFound(Id),

    /// A routed operation exceeded its hop budget. Divergence on a stable
    /// overlay indicates a topology invariant violation, so no retry is
    /// attempted.
    #[error("routing diverged after {hops} hops (budget {budget})")]
    RoutingDiverged { hops: u32, budget: u32 },

    /// An operation was issued before any node joined.
    #[error("operation issued against an overlay with no joined nodes")]
    OverlayEmpty,

    /// Malformed identifier (programmer error).
    #[error("malformed identifier: {0}")]
    IdFormat(String),

    /// Two node labels collided on the same identifier even after the
    /// bounded rehash attempts.
    #[error("node id {id} still colliding after {attempts} rehash attempts")]
    DuplicateId { id: Id, attempts: u32 },
}

impl DhtError {
    /// The tally key for this error, as reported in the `errors` map of a
    /// result record.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DhtError::KeyNotFound(_) => ErrorKind::KeyNotFound,
            DhtError::RoutingDiverged { .. } => ErrorKind::RoutingDiverged,
            DhtError::OverlayEmpty => ErrorKind::OverlayEmpty,
            DhtError::IdFormat(_) => ErrorKind::IdFormat,
            DhtError::DuplicateId { .. } => ErrorKind::DuplicateId,
        }
    }

    /// Whether the workload driver may tally this error and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DhtError::KeyNotFound(_) | DhtError::RoutingDiverged { .. }
        )
    }
}

/// Error classification used as the key of the `errors` tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    KeyNotFound,
    RoutingDiverged,
    OverlayEmpty,
    IdFormat,
    DuplicateId,
}

impl ErrorKind {
    /// Stable name used in serialized records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::KeyNotFound => "KeyNotFound",
            ErrorKind::RoutingDiverged => "RoutingDiverged",
            ErrorKind::OverlayEmpty => "OverlayEmpty",
            ErrorKind::IdFormat => "IdFormat",
            ErrorKind::DuplicateId => "DuplicateId",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(DhtError::KeyNotFound(Id::ZERO).is_recoverable());
        assert!(DhtError::RoutingDiverged { hops: 33, budget: 32 }.is_recoverable());
        assert!(!DhtError::OverlayEmpty.is_recoverable());
        assert!(!DhtError::IdFormat("short".into()).is_recoverable());
        assert!(!DhtError::DuplicateId { id: Id::ZERO, attempts: 8 }.is_recoverable());
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(DhtError::OverlayEmpty.kind().as_str(), "OverlayEmpty");
        assert_eq!(
            DhtError::RoutingDiverged { hops: 1, budget: 1 }.kind().as_str(),
            "RoutingDiverged"
        );
    }
}
