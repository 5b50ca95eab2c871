//! Pure policy functions over the request table.

use liftnet_types::{Behaviour, ButtonKind, Direction, N_BUTTONS, N_FLOORS};

use crate::elevator::{Car, ClearVariant};

/// Which request kinds a clear-at-floor pass covered.
///
/// The synchronizer intersects this with its own tracking to decide which
/// bits to retract in the `Serviced` broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearedAt {
    pub hall_up: bool,
    pub hall_down: bool,
    pub cab: bool,
}

impl ClearedAt {
    pub fn covers(&self, kind: ButtonKind) -> bool {
        match kind {
            ButtonKind::HallUp => self.hall_up,
            ButtonKind::HallDown => self.hall_down,
            ButtonKind::Cab => self.cab,
        }
    }
}

impl Car {
    pub(crate) fn any_above(&self) -> bool {
        let from = (self.floor + 1).max(0) as usize;
        self.requests[from.min(N_FLOORS)..]
            .iter()
            .any(|floor| floor.iter().any(|&b| b))
    }

    pub(crate) fn any_below(&self) -> bool {
        let to = self.floor.clamp(0, N_FLOORS as i32) as usize;
        self.requests[..to].iter().any(|floor| floor.iter().any(|&b| b))
    }

    pub(crate) fn any_here(&self) -> bool {
        match usize::try_from(self.floor) {
            Ok(f) if f < N_FLOORS => self.requests[f].iter().any(|&b| b),
            _ => false,
        }
    }

    /// Pick the next direction and behaviour from the request table.
    ///
    /// Keeps the current travel direction while requests remain ahead,
    /// serves the current floor on reversal, and falls back to idle.
    pub(crate) fn choose_direction(&self) -> (Direction, Behaviour) {
        match self.direction {
            Direction::Up => {
                if self.any_above() {
                    (Direction::Up, Behaviour::Moving)
                } else if self.any_here() {
                    (Direction::Down, Behaviour::DoorOpen)
                } else if self.any_below() {
                    (Direction::Down, Behaviour::Moving)
                } else {
                    (Direction::Stop, Behaviour::Idle)
                }
            }
            Direction::Down => {
                if self.any_below() {
                    (Direction::Down, Behaviour::Moving)
                } else if self.any_here() {
                    (Direction::Up, Behaviour::DoorOpen)
                } else if self.any_above() {
                    (Direction::Up, Behaviour::Moving)
                } else {
                    (Direction::Stop, Behaviour::Idle)
                }
            }
            Direction::Stop => {
                if self.any_here() {
                    (Direction::Stop, Behaviour::DoorOpen)
                } else if self.any_above() {
                    (Direction::Up, Behaviour::Moving)
                } else if self.any_below() {
                    (Direction::Down, Behaviour::Moving)
                } else {
                    (Direction::Stop, Behaviour::Idle)
                }
            }
        }
    }

    /// Whether a moving car should stop at the floor it just reached.
    pub(crate) fn should_stop(&self) -> bool {
        let f = match usize::try_from(self.floor) {
            Ok(f) if f < N_FLOORS => f,
            _ => return true,
        };
        match self.direction {
            Direction::Down => {
                self.requests[f][ButtonKind::HallDown.index()]
                    || self.requests[f][ButtonKind::Cab.index()]
                    || !self.any_below()
            }
            Direction::Up => {
                self.requests[f][ButtonKind::HallUp.index()]
                    || self.requests[f][ButtonKind::Cab.index()]
                    || !self.any_above()
            }
            Direction::Stop => true,
        }
    }

    /// Whether a press while the door is open at that floor is served by the
    /// open door instead of being queued.
    pub(crate) fn should_clear_immediately(&self, floor: usize, kind: ButtonKind) -> bool {
        if self.floor != floor as i32 {
            return false;
        }
        match self.config.clear_variant {
            ClearVariant::All => true,
            ClearVariant::InDirn => {
                kind == ButtonKind::Cab
                    || self.direction == Direction::Stop
                    || (self.direction == Direction::Up && kind == ButtonKind::HallUp)
                    || (self.direction == Direction::Down && kind == ButtonKind::HallDown)
            }
        }
    }

    /// Clear the requests served by opening the door at the current floor.
    ///
    /// `InDirn` keeps the opposite-direction hall call queued while onward
    /// travel is still needed; at the extreme floors both hall calls clear.
    pub(crate) fn clear_at_current_floor(&mut self) -> ClearedAt {
        let f = match usize::try_from(self.floor) {
            Ok(f) if f < N_FLOORS => f,
            _ => return ClearedAt::default(),
        };

        match self.config.clear_variant {
            ClearVariant::All => {
                for b in 0..N_BUTTONS {
                    self.requests[f][b] = false;
                }
                ClearedAt { hall_up: true, hall_down: true, cab: true }
            }
            ClearVariant::InDirn => {
                self.requests[f][ButtonKind::Cab.index()] = false;

                let (clear_up, clear_down) = match self.direction {
                    Direction::Up => {
                        let take_down = f == N_FLOORS - 1
                            || (!self.any_above()
                                && !self.requests[f][ButtonKind::HallUp.index()]);
                        (true, take_down)
                    }
                    Direction::Down => {
                        let take_up = f == 0
                            || (!self.any_below()
                                && !self.requests[f][ButtonKind::HallDown.index()]);
                        (take_up, true)
                    }
                    Direction::Stop => (true, true),
                };

                if clear_up {
                    self.requests[f][ButtonKind::HallUp.index()] = false;
                }
                if clear_down {
                    self.requests[f][ButtonKind::HallDown.index()] = false;
                }
                ClearedAt { hall_up: clear_up, hall_down: clear_down, cab: true }
            }
        }
    }
}
