// Copyright (c) Liftnet Contributors
// SPDX-License-Identifier: Apache-2.0

//! World-view replication.
//!
//! [`WorldView`] is the in-memory merge state: the building-wide snapshot,
//! per-origin counters for dedupe, liveness bookkeeping and the coherence
//! check. It is pure over explicit `Instant`s so every rule is unit-testable.
//! [`Replicator`] is the task wrapping it: it consumes local delta snapshots
//! and peer frames, gossips accepted frames onward, and publishes merged
//! snapshots downstream.
//!
//! Merge rules: hall requests OR under `Requests` and AND under `Serviced`;
//! per-car states are last-writer-wins, except that a remote snapshot never
//! overwrites our own entry (the sole exception is the one-shot cab recovery
//! after a restart).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use liftnet_types::{Behaviour, ElevState, NetMsg, NodeId, Snapshot, UpdateKind};

use crate::frame::{encode_frame, trim_zeros};
use crate::peer_manager::{IncomingFrame, PeerManager};

/// Timing knobs for replication and liveness.
#[derive(Debug, Clone)]
pub struct WorldViewConfig {
    /// Silence after which a peer is considered stale (and after which a
    /// lower counter is accepted as a restart).
    pub peer_timeout: Duration,
    /// How long a freshly started node waits for a first peer snapshot
    /// before it proceeds alone.
    pub initial_contact_timeout: Duration,
    /// No behaviour change within this window while the car is not idle
    /// marks the node itself stale.
    pub health_timeout: Duration,
    /// Cadence of downstream publishes and keep-fresh broadcasts.
    pub publish_interval: Duration,
}

impl Default for WorldViewConfig {
    fn default() -> Self {
        Self {
            peer_timeout: Duration::from_secs(4),
            initial_contact_timeout: Duration::from_secs(8),
            health_timeout: Duration::from_secs(4),
            publish_interval: Duration::from_millis(300),
        }
    }
}

/// Merged view of the whole building from one node's perspective.
pub struct WorldView {
    self_id: NodeId,
    members: Vec<NodeId>,
    config: WorldViewConfig,

    snapshot: Snapshot,
    last_heard: HashMap<NodeId, Instant>,
    last_snapshot: HashMap<NodeId, Snapshot>,
    latest_counter: HashMap<NodeId, u64>,
    counter: u64,

    ready: bool,
    cab_recovered: bool,
    /// Recovered cab bits the controller has not echoed back yet. Kept
    /// asserted in our self state so an in-flight local update cannot erase
    /// them before the controller has seen them.
    recovered_cab: [bool; liftnet_types::N_FLOORS],

    self_alive: bool,
    self_behaviour: Behaviour,
    last_behaviour_change: Instant,

    started_at: Instant,
}

impl WorldView {
    pub fn new(self_id: NodeId, members: Vec<NodeId>, config: WorldViewConfig, now: Instant) -> Self {
        let mut snapshot = Snapshot::default();
        snapshot.states.insert(self_id, ElevState::default());
        Self {
            self_id,
            members,
            config,
            snapshot,
            last_heard: HashMap::new(),
            last_snapshot: HashMap::new(),
            latest_counter: HashMap::new(),
            counter: 0,
            ready: false,
            cab_recovered: false,
            recovered_cab: [false; liftnet_types::N_FLOORS],
            self_alive: true,
            self_behaviour: Behaviour::Idle,
            last_behaviour_change: now,
            started_at: now,
        }
    }

    pub fn config(&self) -> &WorldViewConfig {
        &self.config
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn self_alive(&self) -> bool {
        self.self_alive
    }

    /// Let the node proceed without peers once the contact window elapses.
    pub fn force_ready(&mut self) {
        self.ready = true;
    }

    /// Dedupe gate for a received envelope. Also refreshes liveness for the
    /// origin: even a duplicate proves the sender is up.
    ///
    /// A counter at or below the highest seen is accepted only when the
    /// origin has been silent past the peer timeout; that is a restarted
    /// peer re-baselining its sequence.
    pub fn should_accept(&mut self, origin: NodeId, counter: u64, now: Instant) -> bool {
        if origin == self.self_id {
            return false;
        }
        let prev_heard = self.last_heard.insert(origin, now);
        let max_seen = self.latest_counter.get(&origin).copied().unwrap_or(0);
        if counter <= max_seen {
            let silent = match prev_heard {
                None => true,
                Some(t) => now.duration_since(t) > self.config.peer_timeout,
            };
            if silent {
                self.latest_counter.insert(origin, counter);
                return true;
            }
            return false;
        }
        self.latest_counter.insert(origin, counter);
        true
    }

    /// Merge a snapshot (local or remote) into the view.
    ///
    /// Returns true when this update made the node ready. The first accepted
    /// `Requests` snapshot from any peer also restores our cab requests from
    /// the peer's copy of our state, exactly once per process lifetime.
    pub fn apply_update(&mut self, from: NodeId, snapshot: Snapshot, now: Instant) -> bool {
        self.last_heard.insert(from, now);

        let mut became_ready = false;
        if from != self.self_id && snapshot.update_kind == UpdateKind::Requests {
            if !self.cab_recovered {
                self.recover_cab_requests(&snapshot);
                self.cab_recovered = true;
            }
            if !self.ready {
                self.ready = true;
                became_ready = true;
            }
        }

        self.last_snapshot.insert(from, snapshot.clone());
        self.merge_snapshot(from, snapshot);
        became_ready
    }

    fn merge_snapshot(&mut self, from: NodeId, snapshot: Snapshot) {
        let kind = snapshot.update_kind;
        self.snapshot.hall_requests.merge(&snapshot.hall_requests, kind);

        for (id, mut state) in snapshot.states {
            // Our own entry is authoritative here; a remote copy of it is
            // only consulted by the one-shot cab recovery.
            if id == self.self_id && from != self.self_id {
                continue;
            }
            if id == self.self_id {
                self.hold_recovered_cab(&mut state, kind);
            }
            self.snapshot.states.insert(id, state);
        }
    }

    /// Keep recovered cab bits asserted across local updates until the
    /// controller either echoes them back or opens the door at their floor.
    fn hold_recovered_cab(&mut self, state: &mut ElevState, kind: UpdateKind) {
        for (floor, slot) in state.cab_requests.iter_mut().enumerate() {
            if !self.recovered_cab[floor] {
                continue;
            }
            if *slot {
                self.recovered_cab[floor] = false;
            } else if kind == UpdateKind::Serviced && state.floor == floor as i32 {
                self.recovered_cab[floor] = false;
            } else {
                *slot = true;
            }
        }
    }

    fn recover_cab_requests(&mut self, snapshot: &Snapshot) {
        let Some(peer_copy) = snapshot.states.get(&self.self_id) else {
            return;
        };
        let remembered = peer_copy.cab_requests;
        if !remembered.iter().any(|&b| b) {
            return;
        }
        let ours = self.snapshot.states.entry(self.self_id).or_default();
        for (floor, slot) in ours.cab_requests.iter_mut().enumerate() {
            *slot = *slot || remembered[floor];
        }
        self.recovered_cab = remembered;
        info!(restored = ?remembered, "recovered cab requests from peer snapshot");
    }

    /// Produce the next outgoing envelope, or `None` while self-stale.
    pub fn next_broadcast(&mut self, kind: UpdateKind, now: Instant) -> Option<NetMsg> {
        if !self.self_alive {
            return None;
        }
        self.counter += 1;
        let mut snapshot = self.snapshot.clone();
        snapshot.update_kind = kind;
        snapshot.alive = self.compute_alive(now);

        self.last_heard.insert(self.self_id, now);
        self.last_snapshot.insert(self.self_id, snapshot.clone());

        Some(NetMsg { origin: self.self_id, counter: self.counter, snapshot })
    }

    /// Deep copy of the current view with liveness attached, for downstream
    /// consumers.
    pub fn published_snapshot(&self, now: Instant) -> Snapshot {
        let mut snapshot = self.snapshot.clone();
        snapshot.alive = self.compute_alive(now);
        snapshot
    }

    fn compute_alive(&self, now: Instant) -> BTreeMap<NodeId, bool> {
        let startup_grace = now.duration_since(self.started_at) <= self.config.peer_timeout;
        self.members
            .iter()
            .map(|&id| {
                let alive = if id == self.self_id {
                    self.self_alive
                } else {
                    match self.last_heard.get(&id) {
                        Some(&t) => now.duration_since(t) <= self.config.peer_timeout,
                        None => startup_grace,
                    }
                };
                (id, alive)
            })
            .collect()
    }

    fn alive_members(&self, now: Instant) -> Vec<NodeId> {
        self.compute_alive(now)
            .into_iter()
            .filter_map(|(id, alive)| alive.then_some(id))
            .collect()
    }

    /// All alive peers' last snapshots agree on the hall matrix and on each
    /// alive peer's motion fields. Gates publication to the assigner.
    pub fn is_coherent(&self, now: Instant) -> bool {
        let alive = self.alive_members(now);
        if alive.len() <= 1 {
            return true;
        }

        let Some(reference) = self.last_snapshot.get(&self.self_id) else {
            return false;
        };

        for &id in alive.iter().filter(|&&id| id != self.self_id) {
            let Some(theirs) = self.last_snapshot.get(&id) else {
                return false;
            };
            if theirs.hall_requests != reference.hall_requests {
                return false;
            }
            for &member in &alive {
                match (reference.states.get(&member), theirs.states.get(&member)) {
                    (Some(a), Some(b)) if a.motion_eq(b) => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// Track the local car's behaviour; any change re-arms the health timer
    /// and revives a stale self. Returns true when liveness was restored.
    pub fn note_self_behaviour(&mut self, behaviour: Behaviour, now: Instant) -> bool {
        if behaviour == self.self_behaviour {
            return false;
        }
        self.self_behaviour = behaviour;
        self.last_behaviour_change = now;
        if !self.self_alive {
            self.self_alive = true;
            return true;
        }
        false
    }

    /// Expire self-liveness when the car has been non-idle without any
    /// behaviour change for the health window. Returns true on the
    /// alive-to-stale transition.
    pub fn check_health(&mut self, now: Instant) -> bool {
        if self.self_alive
            && self.self_behaviour != Behaviour::Idle
            && now.duration_since(self.last_behaviour_change) > self.config.health_timeout
        {
            self.self_alive = false;
            return true;
        }
        false
    }

    pub fn contact_window_elapsed(&self, now: Instant) -> bool {
        now.duration_since(self.started_at) >= self.config.initial_contact_timeout
    }
}

/// Channels wiring a [`Replicator`] to the rest of the node.
pub struct ReplicatorChannels {
    /// Delta snapshots from the controller (`update_kind` set by sender).
    pub local_rx: mpsc::Receiver<Snapshot>,
    /// Every merged snapshot, for the synchronizer.
    pub world_tx: watch::Sender<Snapshot>,
    /// Ready-and-coherent snapshots only, for the assignment pipeline.
    pub coherent_tx: watch::Sender<Snapshot>,
}

/// The replication task.
pub struct Replicator {
    view: WorldView,
    peers: Arc<PeerManager>,
    incoming_rx: mpsc::Receiver<IncomingFrame>,
    channels: ReplicatorChannels,
    cancel: CancellationToken,
}

impl Replicator {
    pub fn new(
        view: WorldView,
        peers: Arc<PeerManager>,
        incoming_rx: mpsc::Receiver<IncomingFrame>,
        channels: ReplicatorChannels,
        cancel: CancellationToken,
    ) -> Self {
        Self { view, peers, incoming_rx, channels, cancel }
    }

    pub async fn run(mut self) {
        let mut publish_tick = tokio::time::interval(self.view.config().publish_interval);
        publish_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("replicator started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("replicator stopped");
                    return;
                }
                Some(snapshot) = self.channels.local_rx.recv() => {
                    self.on_local_update(snapshot);
                }
                Some(frame) = self.incoming_rx.recv() => {
                    self.on_peer_frame(frame);
                }
                _ = publish_tick.tick() => {
                    self.on_tick();
                }
            }
        }
    }

    fn on_local_update(&mut self, snapshot: Snapshot) {
        let now = Instant::now();
        let kind = snapshot.update_kind;

        if let Some(state) = snapshot.states.get(&self.peers.self_id()) {
            if self.view.note_self_behaviour(state.behaviour, now) {
                info!("self liveness recovered");
            }
        }

        self.view.apply_update(self.peers.self_id(), snapshot, now);
        self.broadcast(kind, now);
        self.publish(now);
    }

    fn on_peer_frame(&mut self, incoming: IncomingFrame) {
        let now = Instant::now();
        let msg: NetMsg = match serde_json::from_slice(trim_zeros(&incoming.frame)) {
            Ok(msg) => msg,
            Err(e) => {
                // The sender retransmits on its next tick; drop silently.
                debug!(from = %incoming.from, "discarding malformed frame: {e}");
                return;
            }
        };

        if !self.view.should_accept(msg.origin, msg.counter, now) {
            return;
        }
        debug!(origin = %msg.origin, counter = msg.counter, kind = ?msg.snapshot.update_kind, "accepted snapshot");

        if self.view.apply_update(msg.origin, msg.snapshot, now) {
            info!(origin = %msg.origin, "world view ready (first peer contact)");
        }

        // Epidemic dissemination: forward the exact frame, skipping the hop
        // we got it from and its origin. Dedupe bounds the duplication.
        if self.view.self_alive() {
            self.peers
                .broadcast_except(incoming.frame.clone(), &[incoming.from, msg.origin]);
        }

        self.publish(now);
    }

    fn on_tick(&mut self) {
        let now = Instant::now();

        if !self.view.ready() && self.view.contact_window_elapsed(now) {
            info!("initial contact window elapsed; proceeding without peers");
            self.view.force_ready();
        }

        if self.view.check_health(now) {
            warn!("no behaviour change while active; marking self stale");
        }

        self.broadcast(UpdateKind::Requests, now);
        self.publish(now);
    }

    fn broadcast(&mut self, kind: UpdateKind, now: Instant) {
        let Some(msg) = self.view.next_broadcast(kind, now) else {
            return;
        };
        let json = match serde_json::to_vec(&msg) {
            Ok(json) => json,
            Err(e) => {
                warn!("snapshot serialization failed: {e}");
                return;
            }
        };
        match encode_frame(&json) {
            Ok(frame) => self.peers.broadcast(Bytes::copy_from_slice(&frame)),
            Err(e) => warn!("snapshot does not fit a frame: {e}"),
        }
    }

    fn publish(&mut self, now: Instant) {
        let snapshot = self.view.published_snapshot(now);
        if self.view.ready() && self.view.is_coherent(now) {
            self.channels.coherent_tx.send_replace(snapshot.clone());
        }
        self.channels.world_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liftnet_types::{ButtonKind, Direction, HallMatrix};

    fn view(self_id: u32, members: &[u32]) -> (WorldView, Instant) {
        let now = Instant::now();
        let wv = WorldView::new(
            NodeId(self_id),
            members.iter().map(|&id| NodeId(id)).collect(),
            WorldViewConfig::default(),
            now,
        );
        (wv, now)
    }

    fn requests_snapshot(origin: u32, hall: HallMatrix) -> Snapshot {
        let mut snapshot = Snapshot {
            hall_requests: hall,
            ..Default::default()
        };
        snapshot.states.insert(NodeId(origin), ElevState::default());
        snapshot
    }

    #[test]
    fn test_counter_dedupe_is_monotonic_per_origin() {
        let (mut wv, now) = view(1, &[1, 2, 3]);
        assert!(wv.should_accept(NodeId(2), 5, now));
        assert!(!wv.should_accept(NodeId(2), 5, now));
        assert!(!wv.should_accept(NodeId(2), 4, now));
        assert!(wv.should_accept(NodeId(2), 6, now));
    }

    #[test]
    fn test_own_relayed_frames_are_rejected() {
        let (mut wv, now) = view(1, &[1, 2]);
        assert!(!wv.should_accept(NodeId(1), 99, now));
    }

    #[test]
    fn test_counter_reset_accepted_only_after_silence() {
        let (mut wv, now) = view(1, &[1, 2]);
        assert!(wv.should_accept(NodeId(2), 40, now));

        // Restarted peer with a fresh sequence, but we heard it recently.
        let soon = now + Duration::from_secs(1);
        assert!(!wv.should_accept(NodeId(2), 1, soon));

        // The rejected message still refreshed last-heard, so silence is
        // measured from it.
        let after_silence = soon + Duration::from_secs(5);
        assert!(wv.should_accept(NodeId(2), 1, after_silence));
        // And the baseline is re-armed.
        assert!(wv.should_accept(NodeId(2), 2, after_silence));
    }

    #[test]
    fn test_remote_snapshot_cannot_overwrite_self_state() {
        let (mut wv, now) = view(1, &[1, 2]);

        let mut snapshot = requests_snapshot(2, HallMatrix::default());
        snapshot.states.insert(
            NodeId(1),
            ElevState { floor: 3, direction: Direction::Down, ..Default::default() },
        );
        // Drain the one-shot recovery first so this is a plain merge.
        wv.apply_update(NodeId(2), snapshot.clone(), now);
        wv.apply_update(NodeId(2), snapshot, now + Duration::from_millis(10));

        let ours = wv.published_snapshot(now).states[&NodeId(1)].clone();
        assert_eq!(ours.floor, 0);
        assert_eq!(ours.direction, Direction::Stop);
    }

    #[test]
    fn test_cab_recovery_is_one_shot() {
        let (mut wv, now) = view(1, &[1, 2]);

        let mut first = requests_snapshot(2, HallMatrix::default());
        first.states.insert(
            NodeId(1),
            ElevState { cab_requests: [false, true, false, false], ..Default::default() },
        );
        wv.apply_update(NodeId(2), first, now);
        assert_eq!(
            wv.published_snapshot(now).states[&NodeId(1)].cab_requests,
            [false, true, false, false]
        );

        // Later peer copies of our state no longer flow in.
        let mut second = requests_snapshot(2, HallMatrix::default());
        second.states.insert(
            NodeId(1),
            ElevState { cab_requests: [true, true, true, true], ..Default::default() },
        );
        wv.apply_update(NodeId(2), second, now + Duration::from_millis(10));
        assert_eq!(
            wv.published_snapshot(now).states[&NodeId(1)].cab_requests,
            [false, true, false, false]
        );
    }

    #[test]
    fn test_recovered_cab_bits_survive_a_stale_local_update() {
        let (mut wv, now) = view(1, &[1, 2]);

        let mut peer = requests_snapshot(2, HallMatrix::default());
        peer.states.insert(
            NodeId(1),
            ElevState { cab_requests: [false, false, true, false], ..Default::default() },
        );
        wv.apply_update(NodeId(2), peer, now);

        // A local update built before the controller saw the recovery must
        // not erase the recovered bit.
        let stale = requests_snapshot(1, HallMatrix::default());
        wv.apply_update(NodeId(1), stale, now);
        assert!(wv.published_snapshot(now).states[&NodeId(1)].cab_requests[2]);

        // Once the controller echoes the bit, it follows local updates again.
        let mut echoed = requests_snapshot(1, HallMatrix::default());
        echoed.states.get_mut(&NodeId(1)).unwrap().cab_requests[2] = true;
        wv.apply_update(NodeId(1), echoed, now);

        let mut served = requests_snapshot(1, HallMatrix::default());
        served.update_kind = UpdateKind::Serviced;
        wv.apply_update(NodeId(1), served, now);
        assert!(!wv.published_snapshot(now).states[&NodeId(1)].cab_requests[2]);
    }

    #[test]
    fn test_recovered_cab_bit_released_by_service_at_its_floor() {
        let (mut wv, now) = view(1, &[1, 2]);

        let mut peer = requests_snapshot(2, HallMatrix::default());
        peer.states.insert(
            NodeId(1),
            ElevState { cab_requests: [true, false, false, false], ..Default::default() },
        );
        wv.apply_update(NodeId(2), peer, now);

        // The car opened its door at floor 0 without ever echoing the bit
        // (the press was served on the spot).
        let mut served = requests_snapshot(1, HallMatrix::default());
        served.update_kind = UpdateKind::Serviced;
        served.states.get_mut(&NodeId(1)).unwrap().floor = 0;
        wv.apply_update(NodeId(1), served, now);
        assert!(!wv.published_snapshot(now).states[&NodeId(1)].cab_requests[0]);
    }

    #[test]
    fn test_first_peer_requests_snapshot_makes_ready() {
        let (mut wv, now) = view(1, &[1, 2]);
        assert!(!wv.ready());

        let mut serviced = requests_snapshot(2, HallMatrix::default());
        serviced.update_kind = UpdateKind::Serviced;
        assert!(!wv.apply_update(NodeId(2), serviced, now));
        assert!(!wv.ready());

        let became = wv.apply_update(NodeId(2), requests_snapshot(2, HallMatrix::default()), now);
        assert!(became);
        assert!(wv.ready());
    }

    #[test]
    fn test_serviced_update_clears_hall_bits() {
        let (mut wv, now) = view(1, &[1, 2]);

        let mut placed = HallMatrix::default();
        placed.set(2, ButtonKind::HallUp, true);
        wv.apply_update(NodeId(2), requests_snapshot(2, placed), now);
        assert!(wv.published_snapshot(now).hall_requests.get(2, ButtonKind::HallUp));

        let mut serviced = requests_snapshot(2, HallMatrix::default());
        serviced.update_kind = UpdateKind::Serviced;
        wv.apply_update(NodeId(2), serviced, now);
        assert!(!wv.published_snapshot(now).hall_requests.get(2, ButtonKind::HallUp));
    }

    #[test]
    fn test_requests_update_cannot_clear_hall_bits() {
        let (mut wv, now) = view(1, &[1, 2]);

        let mut placed = HallMatrix::default();
        placed.set(1, ButtonKind::HallDown, true);
        wv.apply_update(NodeId(2), requests_snapshot(2, placed), now);

        wv.apply_update(NodeId(2), requests_snapshot(2, HallMatrix::default()), now);
        assert!(wv.published_snapshot(now).hall_requests.get(1, ButtonKind::HallDown));
    }

    #[test]
    fn test_alive_tracks_silence_and_startup_grace() {
        let (mut wv, now) = view(1, &[1, 2, 3]);

        // Within the startup grace everyone is presumed alive.
        let alive = wv.published_snapshot(now + Duration::from_secs(1)).alive;
        assert!(alive[&NodeId(2)] && alive[&NodeId(3)]);

        // After the grace, only peers actually heard from count.
        wv.apply_update(
            NodeId(2),
            requests_snapshot(2, HallMatrix::default()),
            now + Duration::from_secs(6),
        );
        let alive = wv.published_snapshot(now + Duration::from_secs(7)).alive;
        assert!(alive[&NodeId(1)], "self is alive while healthy");
        assert!(alive[&NodeId(2)]);
        assert!(!alive[&NodeId(3)]);

        // And silence expires them again.
        let alive = wv.published_snapshot(now + Duration::from_secs(30)).alive;
        assert!(!alive[&NodeId(2)]);
    }

    #[test]
    fn test_self_health_gate_and_recovery() {
        let (mut wv, now) = view(1, &[1, 2]);

        wv.note_self_behaviour(Behaviour::Moving, now);
        assert!(!wv.check_health(now + Duration::from_secs(2)));
        assert!(wv.self_alive());

        // Stuck moving for longer than the health window.
        assert!(wv.check_health(now + Duration::from_secs(5)));
        assert!(!wv.self_alive());
        assert!(wv.next_broadcast(UpdateKind::Requests, now).is_none());

        // Any behaviour change revives us.
        assert!(wv.note_self_behaviour(Behaviour::DoorOpen, now + Duration::from_secs(6)));
        assert!(wv.self_alive());
        assert!(wv.next_broadcast(UpdateKind::Requests, now + Duration::from_secs(6)).is_some());
    }

    #[test]
    fn test_idle_car_never_goes_stale() {
        let (mut wv, now) = view(1, &[1, 2]);
        assert!(!wv.check_health(now + Duration::from_secs(60)));
        assert!(wv.self_alive());
    }

    #[test]
    fn test_coherence_requires_agreement_on_hall_and_motion() {
        let (mut wv, now) = view(1, &[1, 2]);

        let mut hall = HallMatrix::default();
        hall.set(2, ButtonKind::HallUp, true);

        // Our broadcast records our own reference snapshot.
        let mut ours = requests_snapshot(1, hall);
        ours.states.insert(NodeId(2), ElevState::default());
        wv.apply_update(NodeId(1), ours, now);
        wv.next_broadcast(UpdateKind::Requests, now);

        // Peer agrees on hall matrix and on both states.
        let mut theirs = requests_snapshot(2, hall);
        theirs.states.insert(NodeId(1), ElevState::default());
        wv.apply_update(NodeId(2), theirs.clone(), now);
        assert!(wv.is_coherent(now));

        // Peer's hall matrix diverges.
        let mut diverged = theirs.clone();
        diverged.hall_requests = HallMatrix::default();
        wv.apply_update(NodeId(2), diverged, now);
        assert!(!wv.is_coherent(now));

        // Re-agree on hall, diverge on a motion field.
        let mut moved = theirs;
        moved
            .states
            .get_mut(&NodeId(1))
            .unwrap()
            .floor = 2;
        wv.apply_update(NodeId(2), moved, now);
        assert!(!wv.is_coherent(now));
    }

    #[test]
    fn test_coherence_ignores_cab_bits_and_stale_peers() {
        // Node 3 never speaks; past the startup grace it is stale and not
        // part of the agreement set.
        let (mut wv, now) = view(1, &[1, 2, 3]);
        let later = now + Duration::from_secs(6);

        let mut theirs = requests_snapshot(2, HallMatrix::default());
        theirs.states.insert(NodeId(1), ElevState::default());
        wv.apply_update(NodeId(2), theirs.clone(), later);
        wv.next_broadcast(UpdateKind::Requests, later);
        assert!(wv.is_coherent(later));

        // The peer's next snapshot differs only in its own cab bits.
        theirs.states.get_mut(&NodeId(2)).unwrap().cab_requests = [true; 4];
        wv.apply_update(NodeId(2), theirs, later);
        assert!(wv.is_coherent(later));
    }

    #[test]
    fn test_sole_node_is_coherent() {
        let (wv, now) = view(1, &[1, 2, 3]);
        // Nobody heard from past grace: only self alive.
        assert!(wv.is_coherent(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_applying_the_same_snapshot_twice_is_idempotent() {
        let (mut wv, now) = view(1, &[1, 2]);

        let mut hall = HallMatrix::default();
        hall.set(1, ButtonKind::HallUp, true);
        let mut snapshot = requests_snapshot(2, hall);
        snapshot.states.get_mut(&NodeId(2)).unwrap().floor = 1;

        wv.apply_update(NodeId(2), snapshot.clone(), now);
        let first = wv.published_snapshot(now);
        wv.apply_update(NodeId(2), snapshot, now);
        let second = wv.published_snapshot(now);
        assert_eq!(first, second);
    }
}
