//! Pastry prefix overlay.
//!
//! Implements Pastry over the shared 160-bit id space read as base-2^b
//! digit strings: each node keeps a leaf set of its numerically nearest
//! neighbors and a routing table indexed by shared-prefix length and next
//! digit; keys live at the node numerically closest to their hashed id.
//!
//! Joins route a traced message toward the newcomer's id and seed its
//! state from the nodes on the path; leaf-set exchange at maintenance
//! barriers finalizes the third-party updates.

mod leafset;
mod node;
mod overlay;
mod routing_table;

pub use leafset::LeafSet;
pub use node::PastryNode;
pub use overlay::{PastryConfig, PastryOverlay};
pub use routing_table::RoutingTable;
