//! # Liftnet Types
//!
//! Shared data model for the liftnet elevator group control system.
//!
//! Every node in the building runs the same process; these types describe
//! what the nodes exchange: per-car states, the building-wide hall request
//! matrix, and the gossip envelope carrying both. Wire field names follow
//! the hall request assigner's JSON contract and must not change.

pub mod id;
pub mod snapshot;
pub mod state;

pub use id::NodeId;
pub use snapshot::{HallMatrix, NetMsg, Snapshot, UpdateKind};
pub use state::{Behaviour, ButtonKind, CabRequests, Direction, ElevState};

/// Number of floors served by every car in the building.
pub const N_FLOORS: usize = 4;

/// Button kinds per floor (hall up, hall down, cab).
pub const N_BUTTONS: usize = 3;
