//! Controller task: hardware polling, the car FSM and the synchronizer in
//! one single-threaded loop.
//!
//! Every 25 ms the loop polls buttons, the floor sensor and the obstruction
//! switch, feeding edges into the synchronizer and the FSM; in between it
//! reacts to world snapshots from the replicator and to assignment masks
//! from the pipeline. The FSM state is owned here exclusively and never
//! shared.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use liftnet_car::{Car, ClearedAt, DoorTimer};
use liftnet_types::{Behaviour, ButtonKind, HallMatrix, Snapshot, N_BUTTONS, N_FLOORS};

use crate::driver::{Driver, DriverOutput};
use crate::sync::RequestSynchronizer;

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(25);
const STUCK_SENSOR_AFTER: Duration = Duration::from_secs(5);

/// Receivers the controller listens on.
pub struct ControllerChannels {
    /// Merged world snapshots from the replicator.
    pub world_rx: watch::Receiver<Snapshot>,
    /// Hall mask this car owns, from the assignment pipeline.
    pub assignment_rx: watch::Receiver<HallMatrix>,
}

pub struct Controller {
    driver: Arc<Driver>,
    output: DriverOutput,
    car: Car,
    timer: DoorTimer,
    sync: RequestSynchronizer,
    update_tx: mpsc::Sender<Snapshot>,
    cancel: CancellationToken,

    prev_buttons: [[bool; N_BUTTONS]; N_FLOORS],
    prev_floor: Option<u8>,
    obstructed: bool,
    between_floors_since: Option<Instant>,
    stuck_logged: bool,
}

impl Controller {
    pub fn new(
        driver: Arc<Driver>,
        car: Car,
        sync: RequestSynchronizer,
        update_tx: mpsc::Sender<Snapshot>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            output: DriverOutput::new(Arc::clone(&driver)),
            driver,
            car,
            timer: DoorTimer::new(),
            sync,
            update_tx,
            cancel,
            prev_buttons: [[false; N_BUTTONS]; N_FLOORS],
            prev_floor: None,
            obstructed: false,
            between_floors_since: None,
            stuck_logged: false,
        }
    }

    pub async fn run(mut self, mut channels: ControllerChannels) {
        let now = Instant::now();
        match self.driver.floor_sensor().await {
            Ok(None) => {
                info!("booted between floors, seeking down");
                self.car.on_init_between_floors(&self.output).await;
            }
            Ok(Some(floor)) => debug!(floor, "booted at a floor"),
            Err(e) => warn!("floor sensor read failed at boot: {e}"),
        }
        self.apply_lamps(now).await;
        self.emit_requests();

        let mut poll = tokio::time::interval(INPUT_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("controller started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("controller stopped");
                    return;
                }
                _ = poll.tick() => {
                    self.poll_hardware().await;
                }
                changed = channels.world_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let snapshot = channels.world_rx.borrow_and_update().clone();
                    self.on_snapshot(snapshot).await;
                }
                changed = channels.assignment_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let mask = *channels.assignment_rx.borrow_and_update();
                    self.on_assignment(mask).await;
                }
            }
        }
    }

    async fn poll_hardware(&mut self) {
        let now = Instant::now();
        self.poll_buttons(now).await;
        self.poll_floor_sensor(now).await;
        self.poll_obstruction(now).await;

        if self.timer.timed_out(now) {
            self.timer.stop();
            let cleared = self.car.on_door_timeout(&mut self.timer, now, &self.output).await;
            self.after_car_event(cleared, now).await;
        }

        self.commit_due(now).await;
    }

    async fn poll_buttons(&mut self, now: Instant) {
        for floor in 0..N_FLOORS {
            for kind in ButtonKind::ALL {
                if kind.is_hall() && !HallMatrix::slot_exists(floor, kind) {
                    continue;
                }
                let pressed = match self.driver.order_button(kind, floor as u8).await {
                    Ok(pressed) => pressed,
                    Err(e) => {
                        debug!("button read failed: {e}");
                        continue;
                    }
                };
                let b = kind.index();
                if pressed && !self.prev_buttons[floor][b] {
                    info!(floor, kind = kind.as_str(), "button pressed");
                    self.sync.on_local_press(floor, kind, now);
                    self.emit_requests();
                    self.apply_lamps(now).await;
                }
                self.prev_buttons[floor][b] = pressed;
            }
        }
    }

    async fn poll_floor_sensor(&mut self, now: Instant) {
        match self.driver.floor_sensor().await {
            Ok(Some(floor)) => {
                self.between_floors_since = None;
                self.stuck_logged = false;
                if self.prev_floor != Some(floor) {
                    let cleared = self
                        .car
                        .on_floor_arrival(floor as usize, &mut self.timer, now, &self.output)
                        .await;
                    self.after_car_event(cleared, now).await;
                }
                self.prev_floor = Some(floor);
            }
            Ok(None) => {
                let since = *self.between_floors_since.get_or_insert(now);
                if self.car.behaviour() == Behaviour::Moving
                    && !self.stuck_logged
                    && now.duration_since(since) > STUCK_SENSOR_AFTER
                {
                    // Logged once per stuck episode; the FSM keeps its last
                    // known floor and continues.
                    warn!("floor sensor stuck between floors while moving");
                    self.stuck_logged = true;
                }
                self.prev_floor = None;
            }
            Err(e) => debug!("floor sensor read failed: {e}"),
        }
    }

    async fn poll_obstruction(&mut self, now: Instant) {
        let obstructed = match self.driver.obstruction().await {
            Ok(value) => value,
            Err(e) => {
                debug!("obstruction read failed: {e}");
                return;
            }
        };
        if obstructed == self.obstructed {
            return;
        }
        self.obstructed = obstructed;
        if self.car.behaviour() == Behaviour::DoorOpen {
            if obstructed {
                info!("door obstructed, holding open");
                self.timer.stop();
            } else {
                info!("obstruction cleared, re-arming door timer");
                self.timer.start(self.car.door_open_duration(), now);
            }
        }
    }

    /// Commit every request the synchronizer considers due into the FSM.
    async fn commit_due(&mut self, now: Instant) {
        for (floor, kind) in self.sync.due_injections(now) {
            self.sync.mark_injected(floor, kind);
            let cleared = self
                .car
                .on_request_button_press(floor, kind, &mut self.timer, now, &self.output)
                .await;
            self.after_car_event(cleared, now).await;
        }
    }

    /// Bookkeeping after any FSM event: retract serviced calls, keep the
    /// door held under an active obstruction, and publish motion changes.
    async fn after_car_event(&mut self, cleared: Option<ClearedAt>, now: Instant) {
        if let (Some(covered), Ok(floor)) = (cleared, usize::try_from(self.car.floor())) {
            let serviced = self.sync.clear_at_floor(floor, covered, now);
            if serviced.any() {
                let snapshot = self.sync.build_serviced_snapshot(
                    floor,
                    serviced,
                    self.car.behaviour(),
                    self.car.direction(),
                    now,
                );
                self.send_update(snapshot);
            }
        }

        if self.car.behaviour() == Behaviour::DoorOpen && self.obstructed {
            self.timer.stop();
        }

        if self
            .sync
            .motion_changed(self.car.floor(), self.car.behaviour(), self.car.direction())
        {
            self.emit_requests();
        }
        self.apply_lamps(now).await;
    }

    async fn on_snapshot(&mut self, snapshot: Snapshot) {
        let now = Instant::now();
        self.sync.apply_snapshot(&snapshot, now);
        self.commit_due(now).await;
        self.apply_lamps(now).await;
    }

    async fn on_assignment(&mut self, mask: HallMatrix) {
        let now = Instant::now();
        self.sync.apply_assignment(mask, &mut self.car);
        self.commit_due(now).await;
    }

    fn emit_requests(&mut self) {
        let snapshot = self.sync.build_requests_snapshot(
            self.car.floor(),
            self.car.behaviour(),
            self.car.direction(),
        );
        self.send_update(snapshot);
    }

    /// Non-blocking publish towards the replicator: this loop must never
    /// stall on a slow consumer, so a full queue drops the update and the
    /// next motion change or publish tick supersedes it.
    fn send_update(&mut self, snapshot: Snapshot) {
        match self.update_tx.try_send(snapshot) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("replicator queue full, dropping update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("replicator is gone, dropping update");
            }
        }
    }

    async fn apply_lamps(&mut self, now: Instant) {
        let (hall, cab) = self.sync.lamps(now);
        for floor in 0..N_FLOORS {
            for kind in [ButtonKind::HallUp, ButtonKind::HallDown] {
                if !HallMatrix::slot_exists(floor, kind) {
                    continue;
                }
                if let Err(e) = self
                    .driver
                    .button_lamp(kind, floor as u8, hall.get(floor, kind))
                    .await
                {
                    debug!("hall lamp write failed: {e}");
                }
            }
            if let Err(e) = self.driver.button_lamp(ButtonKind::Cab, floor as u8, cab[floor]).await {
                debug!("cab lamp write failed: {e}");
            }
        }
    }
}
