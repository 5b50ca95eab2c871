//! FSM event handlers.

use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use liftnet_types::{Behaviour, ButtonKind, Direction};

use crate::elevator::Car;
use crate::requests::ClearedAt;
use crate::timer::DoorTimer;

/// Outputs the FSM drives. The node implements this over the hardware
/// driver; tests implement it over a recording mock.
///
/// Implementations absorb I/O failures (the FSM never sees an error; a lost
/// write is repaired by the next state change).
#[async_trait]
pub trait CarOutput: Send + Sync {
    async fn motor_direction(&self, direction: Direction);
    async fn door_light(&self, on: bool);
    async fn floor_indicator(&self, floor: u8);
}

impl Car {
    /// Boot path for a car whose floor sensor reads between floors: drive
    /// down until the first floor arrival.
    pub async fn on_init_between_floors<O: CarOutput>(&mut self, out: &O) {
        out.motor_direction(Direction::Down).await;
        self.direction = Direction::Down;
        self.behaviour = Behaviour::Moving;
    }

    /// A request committed into the active table.
    ///
    /// Returns the clear coverage when the press was served on the spot
    /// (door already open at that floor, or the car is idle there).
    pub async fn on_request_button_press<O: CarOutput>(
        &mut self,
        floor: usize,
        kind: ButtonKind,
        timer: &mut DoorTimer,
        now: Instant,
        out: &O,
    ) -> Option<ClearedAt> {
        debug!(floor, kind = kind.as_str(), "request button press");
        match self.behaviour {
            Behaviour::DoorOpen => {
                if self.should_clear_immediately(floor, kind) {
                    timer.start(self.config.door_open_duration, now);
                    let mut cleared = ClearedAt::default();
                    match kind {
                        ButtonKind::HallUp => cleared.hall_up = true,
                        ButtonKind::HallDown => cleared.hall_down = true,
                        ButtonKind::Cab => cleared.cab = true,
                    }
                    Some(cleared)
                } else {
                    self.set_request(floor, kind);
                    None
                }
            }
            Behaviour::Moving => {
                self.set_request(floor, kind);
                None
            }
            Behaviour::Idle => {
                self.set_request(floor, kind);
                let (direction, behaviour) = self.choose_direction();
                self.direction = direction;
                self.behaviour = behaviour;
                match behaviour {
                    Behaviour::DoorOpen => {
                        out.door_light(true).await;
                        timer.start(self.config.door_open_duration, now);
                        Some(self.clear_at_current_floor())
                    }
                    Behaviour::Moving => {
                        out.motor_direction(direction).await;
                        None
                    }
                    Behaviour::Idle => None,
                }
            }
        }
    }

    /// The floor sensor latched a new floor.
    pub async fn on_floor_arrival<O: CarOutput>(
        &mut self,
        new_floor: usize,
        timer: &mut DoorTimer,
        now: Instant,
        out: &O,
    ) -> Option<ClearedAt> {
        debug!(floor = new_floor, "floor arrival");
        self.floor = new_floor as i32;
        out.floor_indicator(new_floor as u8).await;

        if self.behaviour == Behaviour::Moving && self.should_stop() {
            out.motor_direction(Direction::Stop).await;
            out.door_light(true).await;
            let cleared = self.clear_at_current_floor();
            timer.start(self.config.door_open_duration, now);
            self.behaviour = Behaviour::DoorOpen;
            return Some(cleared);
        }
        None
    }

    /// The door has been open long enough.
    pub async fn on_door_timeout<O: CarOutput>(
        &mut self,
        timer: &mut DoorTimer,
        now: Instant,
        out: &O,
    ) -> Option<ClearedAt> {
        if self.behaviour != Behaviour::DoorOpen {
            return None;
        }

        let (direction, behaviour) = self.choose_direction();
        self.direction = direction;
        self.behaviour = behaviour;
        match behaviour {
            Behaviour::DoorOpen => {
                // A request appeared at this floor while the door was open;
                // serve it and hold the door another full period.
                timer.start(self.config.door_open_duration, now);
                Some(self.clear_at_current_floor())
            }
            Behaviour::Moving | Behaviour::Idle => {
                out.door_light(false).await;
                out.motor_direction(direction).await;
                None
            }
        }
    }
}
