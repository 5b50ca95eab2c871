//! Per-car state as published to peers and to the hall request assigner.

use serde::{Deserialize, Serialize};

use crate::N_FLOORS;

/// What the car is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Behaviour {
    #[default]
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "doorOpen")]
    DoorOpen,
    #[serde(rename = "moving")]
    Moving,
}

impl Behaviour {
    pub fn as_str(self) -> &'static str {
        match self {
            Behaviour::Idle => "idle",
            Behaviour::DoorOpen => "doorOpen",
            Behaviour::Moving => "moving",
        }
    }
}

/// Motor / travel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    #[default]
    Stop,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Stop => "stop",
        }
    }
}

/// One of the three button kinds at a floor.
///
/// The discriminants match the hardware protocol's button codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonKind {
    HallUp = 0,
    HallDown = 1,
    Cab = 2,
}

impl ButtonKind {
    pub const ALL: [ButtonKind; 3] = [ButtonKind::HallUp, ButtonKind::HallDown, ButtonKind::Cab];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<ButtonKind> {
        match i {
            0 => Some(ButtonKind::HallUp),
            1 => Some(ButtonKind::HallDown),
            2 => Some(ButtonKind::Cab),
            _ => None,
        }
    }

    pub fn is_hall(self) -> bool {
        !matches!(self, ButtonKind::Cab)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ButtonKind::HallUp => "hallUp",
            ButtonKind::HallDown => "hallDown",
            ButtonKind::Cab => "cab",
        }
    }
}

/// Cab request bits for one car, one per floor.
pub type CabRequests = [bool; N_FLOORS];

/// State of one car as it appears in the shared world view.
///
/// `floor` is `-1` only between floors, which a car may legitimately report
/// before its boot-time floor seek completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElevState {
    pub behaviour: Behaviour,
    pub floor: i32,
    pub direction: Direction,
    #[serde(rename = "cabRequests")]
    pub cab_requests: CabRequests,
}

impl ElevState {
    /// Fields the coherence check compares (everything but the cab bits).
    pub fn motion_eq(&self, other: &ElevState) -> bool {
        self.behaviour == other.behaviour
            && self.floor == other.floor
            && self.direction == other.direction
    }
}

impl Default for ElevState {
    fn default() -> Self {
        Self {
            behaviour: Behaviour::Idle,
            floor: 0,
            direction: Direction::Stop,
            cab_requests: [false; N_FLOORS],
        }
    }
}
