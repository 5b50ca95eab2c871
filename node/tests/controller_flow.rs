//! Controller flow tests against a scripted hardware server.
//!
//! The fake server speaks the 4-byte hardware protocol: tests latch button
//! presses and move the floor sensor, then observe motor commands and the
//! snapshots the controller publishes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use liftnet_car::{Car, CarConfig};
use liftnet_node::controller::{Controller, ControllerChannels};
use liftnet_node::driver::Driver;
use liftnet_node::sync::{RequestSynchronizer, SyncConfig};
use liftnet_types::{ButtonKind, ElevState, HallMatrix, NodeId, Snapshot, UpdateKind};

const MOTOR_UP: u8 = 1;
const MOTOR_STOP: u8 = 0;

#[derive(Default)]
struct FakeHw {
    floor: AtomicU8,
    buttons: Mutex<HashSet<(u8, u8)>>,
    motor: Mutex<Vec<u8>>,
}

impl FakeHw {
    fn press(&self, kind: ButtonKind, floor: u8) {
        self.buttons.lock().unwrap().insert((kind as u8, floor));
    }

    fn release(&self, kind: ButtonKind, floor: u8) {
        self.buttons.lock().unwrap().remove(&(kind as u8, floor));
    }

    fn set_floor(&self, floor: u8) {
        self.floor.store(floor, Ordering::SeqCst);
    }

    fn motor_log(&self) -> Vec<u8> {
        self.motor.lock().unwrap().clone()
    }

    async fn wait_for_motor(&self, wanted: u8, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            if self.motor_log().last() == Some(&wanted) {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "motor never reached {wanted}, log: {:?}",
                self.motor_log()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn serve(listener: TcpListener, hw: Arc<FakeHw>) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut packet = [0u8; 4];
    while socket.read_exact(&mut packet).await.is_ok() {
        match packet[0] {
            1 => hw.motor.lock().unwrap().push(packet[1]),
            2..=5 => {} // lamps and indicators
            6 => {
                let pressed = hw.buttons.lock().unwrap().contains(&(packet[1], packet[2]));
                socket.write_all(&[6, pressed as u8, 0, 0]).await.unwrap();
            }
            7 => {
                let floor = hw.floor.load(Ordering::SeqCst);
                socket.write_all(&[7, 1, floor, 0]).await.unwrap();
            }
            8 => socket.write_all(&[8, 0, 0, 0]).await.unwrap(),
            9 => socket.write_all(&[9, 0, 0, 0]).await.unwrap(),
            _ => panic!("unexpected command {}", packet[0]),
        }
    }
}

struct Rig {
    hw: Arc<FakeHw>,
    update_rx: mpsc::Receiver<Snapshot>,
    world_tx: watch::Sender<Snapshot>,
    assignment_tx: watch::Sender<HallMatrix>,
    cancel: CancellationToken,
}

async fn start_rig(sync_config: SyncConfig) -> Rig {
    let hw = Arc::new(FakeHw::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::clone(&hw)));

    let driver = Arc::new(Driver::connect(&addr.to_string()).await.unwrap());
    let (update_tx, update_rx) = mpsc::channel(256);
    let (world_tx, world_rx) = watch::channel(Snapshot::default());
    let (assignment_tx, assignment_rx) = watch::channel(HallMatrix::default());
    let cancel = CancellationToken::new();

    let controller = Controller::new(
        driver,
        Car::new(CarConfig::default()),
        RequestSynchronizer::new(NodeId(1), sync_config, Instant::now()),
        update_tx,
        cancel.clone(),
    );
    tokio::spawn(controller.run(ControllerChannels { world_rx, assignment_rx }));

    Rig { hw, update_rx, world_tx, assignment_tx, cancel }
}

fn drain(update_rx: &mut mpsc::Receiver<Snapshot>) -> Vec<Snapshot> {
    let mut snapshots = Vec::new();
    while let Ok(snapshot) = update_rx.try_recv() {
        snapshots.push(snapshot);
    }
    snapshots
}

/// A node alone in the building serves its own cab call after the offline
/// confirmation timeout.
#[tokio::test]
async fn test_offline_node_serves_cab_call_alone() {
    let mut rig = start_rig(SyncConfig {
        net_offline_timeout: Duration::ZERO,
        confirm_timeout: Duration::from_millis(50),
    })
    .await;

    rig.hw.press(ButtonKind::Cab, 2);
    rig.hw.wait_for_motor(MOTOR_UP, Duration::from_secs(3)).await;
    rig.hw.release(ButtonKind::Cab, 2);

    rig.hw.set_floor(1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        rig.hw.motor_log().last(),
        Some(&MOTOR_UP),
        "no stop at an unrequested floor"
    );

    rig.hw.set_floor(2);
    rig.hw.wait_for_motor(MOTOR_STOP, Duration::from_secs(3)).await;

    // The service stop was announced as a Serviced snapshot with the cab
    // bit retracted.
    let snapshots = drain(&mut rig.update_rx);
    let serviced: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|s| s.update_kind == UpdateKind::Serviced)
        .collect();
    assert!(!serviced.is_empty(), "service stop must publish a Serviced update");
    let last = serviced.last().unwrap();
    assert!(!last.states[&NodeId(1)].cab_requests[2]);
    assert_eq!(last.states[&NodeId(1)].floor, 2);

    rig.cancel.cancel();
}

/// Online, a hall press is committed only once the network confirms it and
/// the assigner hands it to us; the car then serves it.
#[tokio::test]
async fn test_online_hall_call_waits_for_confirmation_and_ownership() {
    let mut rig = start_rig(SyncConfig::default()).await;

    rig.hw.press(ButtonKind::HallUp, 1);

    // The controller announces the press.
    let announced = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let snapshot = rig.update_rx.recv().await.expect("controller alive");
            if snapshot.hall_requests.get(1, ButtonKind::HallUp) {
                return snapshot;
            }
        }
    })
    .await
    .expect("press must be announced");
    assert_eq!(announced.update_kind, UpdateKind::Requests);

    // Network confirmation alone must not start the car.
    let mut confirmed = Snapshot::default();
    confirmed.hall_requests.set(1, ButtonKind::HallUp, true);
    confirmed.states.insert(NodeId(1), ElevState::default());
    rig.world_tx.send(confirmed).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        !rig.hw.motor_log().contains(&MOTOR_UP),
        "unassigned hall call must not move the car"
    );

    // Ownership arrives: the car commits and goes.
    let mut mask = HallMatrix::default();
    mask.set(1, ButtonKind::HallUp, true);
    rig.assignment_tx.send(mask).unwrap();
    rig.hw.wait_for_motor(MOTOR_UP, Duration::from_secs(3)).await;

    rig.hw.release(ButtonKind::HallUp, 1);
    rig.hw.set_floor(1);
    rig.hw.wait_for_motor(MOTOR_STOP, Duration::from_secs(3)).await;

    // The stop publishes a post-clear Serviced snapshot based on the net
    // view.
    let serviced = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let snapshot = rig.update_rx.recv().await.expect("controller alive");
            if snapshot.update_kind == UpdateKind::Serviced {
                return snapshot;
            }
        }
    })
    .await
    .expect("service stop must publish a Serviced update");
    assert!(!serviced.hall_requests.get(1, ButtonKind::HallUp));

    rig.cancel.cancel();
}
