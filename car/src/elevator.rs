//! Car state and request table.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use liftnet_types::{Behaviour, ButtonKind, Direction, HallMatrix, N_BUTTONS, N_FLOORS};

/// Which requests a car clears when it opens its door at a floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClearVariant {
    /// Clear everything at the floor. Reference mode, used by some tests.
    All,
    /// Clear the cab bit and the in-direction hall bit; take the opposite
    /// hall bit only when travel onward is not needed. Operational default.
    #[default]
    InDirn,
}

/// Static per-car tuning.
#[derive(Debug, Clone)]
pub struct CarConfig {
    pub clear_variant: ClearVariant,
    pub door_open_duration: Duration,
}

impl Default for CarConfig {
    fn default() -> Self {
        Self {
            clear_variant: ClearVariant::InDirn,
            door_open_duration: Duration::from_secs(3),
        }
    }
}

/// One car: motion state plus the active request table.
///
/// The request table holds only requests the synchronizer has committed;
/// pending and remote requests live outside the FSM.
#[derive(Debug, Clone)]
pub struct Car {
    pub(crate) floor: i32,
    pub(crate) direction: Direction,
    pub(crate) behaviour: Behaviour,
    pub(crate) requests: [[bool; N_BUTTONS]; N_FLOORS],
    pub(crate) config: CarConfig,
}

impl Car {
    /// A car that has not yet seen a floor sensor reading.
    pub fn new(config: CarConfig) -> Self {
        Self {
            floor: -1,
            direction: Direction::Stop,
            behaviour: Behaviour::Idle,
            requests: [[false; N_BUTTONS]; N_FLOORS],
            config,
        }
    }

    pub fn floor(&self) -> i32 {
        self.floor
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn behaviour(&self) -> Behaviour {
        self.behaviour
    }

    pub fn door_open_duration(&self) -> Duration {
        self.config.door_open_duration
    }

    pub fn request(&self, floor: usize, kind: ButtonKind) -> bool {
        self.requests[floor][kind.index()]
    }

    /// Set a request bit directly. Phantom hall slots are ignored.
    pub(crate) fn set_request(&mut self, floor: usize, kind: ButtonKind) {
        if kind.is_hall() && !HallMatrix::slot_exists(floor, kind) {
            return;
        }
        self.requests[floor][kind.index()] = true;
    }

    /// Remove a request without re-evaluating motion; the FSM picks the
    /// change up at its next event. Used when an assignment moves away.
    pub fn clear_request(&mut self, floor: usize, kind: ButtonKind) {
        self.requests[floor][kind.index()] = false;
    }
}
