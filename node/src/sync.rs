//! Request synchronization.
//!
//! The synchronizer decides when a locally observed button press is
//! confirmed enough to commit into the car's active request table, and what
//! to retract when the car services a floor. It tracks four populations per
//! floor and button kind:
//!
//! - **local**: observed or committed on this node,
//! - **net**: reflected in the latest accepted network snapshot,
//! - **pending**: locally observed, not yet confirmed through the network,
//! - **injected**: already committed into the FSM for this bit's lifetime.
//!
//! Online, a cab press commits once the network echoes it back under our own
//! key, and a hall press additionally requires that the latest assignment
//! gives the call to us. Offline, both commit after a short confirmation
//! timeout on the pending press.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use liftnet_car::{Car, ClearedAt};
use liftnet_types::{
    Behaviour, ButtonKind, CabRequests, Direction, ElevState, HallMatrix, NodeId, Snapshot,
    UpdateKind, N_BUTTONS, N_FLOORS,
};

/// Timing knobs for the synchronizer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Silence on the snapshot stream after which the node serves alone.
    pub net_offline_timeout: Duration,
    /// Age a pending press must reach before the offline fallback commits it.
    pub confirm_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            net_offline_timeout: Duration::from_secs(3),
            confirm_timeout: Duration::from_millis(200),
        }
    }
}

/// Which requests a service stop actually retracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServicedAt {
    pub hall_up: bool,
    pub hall_down: bool,
    pub cab: bool,
}

impl ServicedAt {
    pub fn any(&self) -> bool {
        self.hall_up || self.hall_down || self.cab
    }
}

pub struct RequestSynchronizer {
    self_id: NodeId,
    config: SyncConfig,

    net_hall: HallMatrix,
    net_cab: CabRequests,
    has_net: bool,
    last_net_seen: Instant,

    assigned_hall: HallMatrix,
    has_assignment: bool,

    local_hall: HallMatrix,
    local_cab: CabRequests,

    pending_since: [[Option<Instant>; N_BUTTONS]; N_FLOORS],
    injected: [[bool; N_BUTTONS]; N_FLOORS],
    confirmed: [[bool; N_BUTTONS]; N_FLOORS],

    reported: Option<(i32, Behaviour, Direction)>,
}

impl RequestSynchronizer {
    /// `now` starts the offline grace period: a freshly booted node counts
    /// as online until the first timeout elapses without a snapshot.
    pub fn new(self_id: NodeId, config: SyncConfig, now: Instant) -> Self {
        Self {
            self_id,
            config,
            net_hall: HallMatrix::default(),
            net_cab: [false; N_FLOORS],
            has_net: false,
            last_net_seen: now,
            assigned_hall: HallMatrix::default(),
            has_assignment: false,
            local_hall: HallMatrix::default(),
            local_cab: [false; N_FLOORS],
            pending_since: [[None; N_BUTTONS]; N_FLOORS],
            injected: [[false; N_BUTTONS]; N_FLOORS],
            confirmed: [[false; N_BUTTONS]; N_FLOORS],
            reported: None,
        }
    }

    pub fn online(&self, now: Instant) -> bool {
        now.duration_since(self.last_net_seen) <= self.config.net_offline_timeout
    }

    /// Record a local press edge: mark it pending and track it locally so it
    /// reaches the network in our next `Requests` snapshot.
    pub fn on_local_press(&mut self, floor: usize, kind: ButtonKind, now: Instant) {
        let b = kind.index();
        if self.pending_since[floor][b].is_none() && !self.injected[floor][b] {
            self.pending_since[floor][b] = Some(now);
            debug!(floor, kind = kind.as_str(), "press pending confirmation");
        }
        match kind {
            ButtonKind::Cab => self.local_cab[floor] = true,
            _ => self.local_hall.set(floor, kind, true),
        }
    }

    /// Reconcile the latest network snapshot against local tracking.
    ///
    /// A bit the network asserts is confirmed (its pending timer stops); a
    /// bit the network released after being confirmed is finished, so local
    /// and injected tracking reset and the bit can live again on a new press.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot, now: Instant) {
        self.has_net = true;
        self.last_net_seen = now;
        self.net_hall = snapshot.hall_requests;
        self.net_cab = snapshot
            .state_of(self.self_id)
            .map(|st| st.cab_requests)
            .unwrap_or_default();

        for floor in 0..N_FLOORS {
            for kind in ButtonKind::ALL {
                let b = kind.index();
                let asserted = match kind {
                    ButtonKind::Cab => self.net_cab[floor],
                    _ => self.net_hall.get(floor, kind),
                };
                let was_confirmed = self.confirmed[floor][b];
                if asserted {
                    self.pending_since[floor][b] = None;
                    self.confirmed[floor][b] = true;
                    if kind == ButtonKind::Cab {
                        self.local_cab[floor] = true;
                    }
                } else {
                    self.confirmed[floor][b] = false;
                    if was_confirmed {
                        self.injected[floor][b] = false;
                        match kind {
                            ButtonKind::Cab => self.local_cab[floor] = false,
                            _ => self.local_hall.set(floor, kind, false),
                        }
                    }
                }
            }
        }
    }

    /// Store a new assignment and cancel everything we previously owned but
    /// no longer do, including its entry in the car's request table.
    pub fn apply_assignment(&mut self, mask: HallMatrix, car: &mut Car) {
        let previous = self.assigned_hall;
        self.assigned_hall = mask;
        self.has_assignment = true;

        for floor in 0..N_FLOORS {
            for kind in [ButtonKind::HallUp, ButtonKind::HallDown] {
                if previous.get(floor, kind) && !mask.get(floor, kind) {
                    self.cancel_hall(floor, kind, car);
                }
            }
        }
    }

    fn cancel_hall(&mut self, floor: usize, kind: ButtonKind, car: &mut Car) {
        let b = kind.index();
        if self.injected[floor][b] || self.pending_since[floor][b].is_some() {
            info!(floor, kind = kind.as_str(), "hall call reassigned away, cancelling");
        }
        self.pending_since[floor][b] = None;
        self.injected[floor][b] = false;
        self.confirmed[floor][b] = false;
        self.local_hall.set(floor, kind, false);
        car.clear_request(floor, kind);
    }

    fn ready_to_inject(&self, floor: usize, b: usize, now: Instant) -> bool {
        if self.injected[floor][b] {
            return false;
        }
        match self.pending_since[floor][b] {
            None => true,
            Some(t) => now.duration_since(t) >= self.config.confirm_timeout,
        }
    }

    /// Which bits are due for committing into the FSM right now.
    ///
    /// Also drops pending hall presses the assigner gave to someone else, so
    /// this node never races a peer for the same call.
    pub fn due_injections(&mut self, now: Instant) -> Vec<(usize, ButtonKind)> {
        let online = self.online(now);
        let mut due = Vec::new();

        for floor in 0..N_FLOORS {
            if online && self.has_net {
                if self.net_cab[floor] && !self.injected[floor][ButtonKind::Cab.index()] {
                    due.push((floor, ButtonKind::Cab));
                }
                if self.has_assignment {
                    for kind in [ButtonKind::HallUp, ButtonKind::HallDown] {
                        let b = kind.index();
                        if !self.net_hall.get(floor, kind) {
                            continue;
                        }
                        if self.assigned_hall.get(floor, kind) {
                            if !self.injected[floor][b] {
                                due.push((floor, kind));
                            }
                        } else if self.pending_since[floor][b].is_some() {
                            debug!(floor, kind = kind.as_str(), "assigned elsewhere, dropping pending");
                            self.pending_since[floor][b] = None;
                        }
                    }
                }
            } else if !online {
                for kind in ButtonKind::ALL {
                    let b = kind.index();
                    let wanted = match kind {
                        ButtonKind::Cab => self.local_cab[floor],
                        _ => self.local_hall.get(floor, kind),
                    };
                    if wanted && self.ready_to_inject(floor, b, now) {
                        due.push((floor, kind));
                    }
                }
            }
        }
        due
    }

    /// Record that a bit was committed into the FSM.
    pub fn mark_injected(&mut self, floor: usize, kind: ButtonKind) {
        let b = kind.index();
        debug!(floor, kind = kind.as_str(), "committing request into car");
        self.injected[floor][b] = true;
        self.pending_since[floor][b] = None;
        match kind {
            ButtonKind::Cab => self.local_cab[floor] = true,
            _ => self.local_hall.set(floor, kind, true),
        }
    }

    /// Apply a clear-at-floor pass from the FSM to local tracking.
    ///
    /// Only bits we had committed count as serviced. Online, the injected
    /// flag survives until the network confirms the clearance, so the bit is
    /// not re-committed while the retraction is in flight; offline it resets
    /// immediately.
    pub fn clear_at_floor(&mut self, floor: usize, covered: ClearedAt, now: Instant) -> ServicedAt {
        let online = self.online(now);
        let mut serviced = ServicedAt::default();

        for kind in ButtonKind::ALL {
            let b = kind.index();
            if !covered.covers(kind) || !self.injected[floor][b] {
                continue;
            }
            match kind {
                ButtonKind::Cab => {
                    serviced.cab = true;
                    self.local_cab[floor] = false;
                }
                ButtonKind::HallUp => {
                    serviced.hall_up = true;
                    self.local_hall.set(floor, kind, false);
                }
                ButtonKind::HallDown => {
                    serviced.hall_down = true;
                    self.local_hall.set(floor, kind, false);
                }
            }
            if !online {
                self.injected[floor][b] = false;
            }
        }
        serviced
    }

    /// Snapshot announcing our local requests and motion state.
    pub fn build_requests_snapshot(
        &self,
        floor: i32,
        behaviour: Behaviour,
        direction: Direction,
    ) -> Snapshot {
        let mut states = BTreeMap::new();
        states.insert(
            self.self_id,
            ElevState { behaviour, floor, direction, cab_requests: self.local_cab },
        );
        Snapshot {
            hall_requests: self.local_hall,
            states,
            alive: BTreeMap::new(),
            update_kind: UpdateKind::Requests,
        }
    }

    /// Snapshot retracting serviced calls: the post-clear hall matrix based
    /// on the network view when online (so the AND merge is meaningful) or
    /// the local view when alone.
    pub fn build_serviced_snapshot(
        &self,
        floor: usize,
        serviced: ServicedAt,
        behaviour: Behaviour,
        direction: Direction,
        now: Instant,
    ) -> Snapshot {
        let mut hall = if self.online(now) && self.has_net {
            self.net_hall
        } else {
            self.local_hall
        };
        if serviced.hall_up {
            hall.set(floor, ButtonKind::HallUp, false);
        }
        if serviced.hall_down {
            hall.set(floor, ButtonKind::HallDown, false);
        }

        let mut states = BTreeMap::new();
        states.insert(
            self.self_id,
            ElevState {
                behaviour,
                floor: floor as i32,
                direction,
                cab_requests: self.local_cab,
            },
        );
        Snapshot {
            hall_requests: hall,
            states,
            alive: BTreeMap::new(),
            update_kind: UpdateKind::Serviced,
        }
    }

    /// True when the motion triple differs from the last reported one.
    pub fn motion_changed(
        &mut self,
        floor: i32,
        behaviour: Behaviour,
        direction: Direction,
    ) -> bool {
        let current = (floor, behaviour, direction);
        if self.reported != Some(current) {
            self.reported = Some(current);
            return true;
        }
        false
    }

    /// Lamp state: the shared view when online, the local view when alone.
    /// Before the first snapshot arrives everything is dark, which also
    /// clears stale lamps from a previous run at startup.
    pub fn lamps(&self, now: Instant) -> (HallMatrix, CabRequests) {
        if self.online(now) {
            if self.has_net {
                (self.net_hall, self.net_cab)
            } else {
                (HallMatrix::default(), [false; N_FLOORS])
            }
        } else {
            (self.local_hall, self.local_cab)
        }
    }
}
