//! # Liftnet Car
//!
//! The per-car finite state machine. The FSM owns the car's motion state and
//! active request table and reacts to four events: a button press committed
//! by the synchronizer, a floor arrival, a door timeout, and boot between
//! floors. Outputs (motor, door lamp, floor indicator) go through the
//! [`CarOutput`] seam so the node can plug in the hardware driver and tests
//! can plug in a mock.
//!
//! Policy functions (direction selection, stop decision, clear-at-floor) are
//! pure over the request table and live in `requests`.

mod elevator;
mod fsm;
mod requests;
mod timer;

pub use elevator::{Car, CarConfig, ClearVariant};
pub use fsm::CarOutput;
pub use requests::ClearedAt;
pub use timer::DoorTimer;
