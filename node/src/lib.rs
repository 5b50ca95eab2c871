//! # Liftnet Node
//!
//! One process per elevator car. The node wires four long-lived tasks
//! around typed channels:
//!
//! 1. the peer transport (in `liftnet-network`),
//! 2. the world-view replicator (in `liftnet-network`),
//! 3. the controller: hardware polling, request synchronization and the car
//!    FSM in a single task,
//! 4. the assignment pipeline invoking the external hall request assigner.
//!
//! Everything here is per-node owned state; the only shared values are the
//! peer registry and the hardware driver handle.

pub mod assigner;
pub mod config;
pub mod controller;
pub mod driver;
pub mod sync;

pub use assigner::{Assigner, AssignerConfig};
pub use config::{Config, ConfigError};
pub use controller::{Controller, ControllerChannels};
pub use driver::{Driver, DriverError};
pub use sync::{RequestSynchronizer, ServicedAt, SyncConfig};
