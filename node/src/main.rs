//! Liftnet node entry point: load configuration, detect our identity, wire
//! the tasks together and run until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use liftnet_car::{Car, CarConfig};
use liftnet_network::peer_manager::{self, PeerConfig};
use liftnet_network::world_view::{Replicator, ReplicatorChannels, WorldView, WorldViewConfig};
use liftnet_node::assigner::{Assigner, AssignerConfig};
use liftnet_node::config::Config;
use liftnet_node::controller::{Controller, ControllerChannels};
use liftnet_node::driver::Driver;
use liftnet_node::sync::{RequestSynchronizer, SyncConfig};
use liftnet_types::{HallMatrix, NodeId, Snapshot};

#[derive(Debug, Parser)]
#[command(name = "liftnet-node", about = "Distributed elevator group control node")]
struct Args {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override self-detection with an explicit node id.
    #[arg(long)]
    id: Option<u32>,

    /// Override the elevator hardware server address.
    #[arg(long)]
    hw_addr: Option<String>,

    /// Override the QUIC port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the hall request assigner executable.
    #[arg(long)]
    assigner: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(hw_addr) = args.hw_addr {
        config.hw_addr = hw_addr;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(assigner) = args.assigner {
        config.assigner = assigner.display().to_string();
    }

    let self_id = match args.id {
        Some(id) => NodeId(id),
        None => config.detect_self_id()?,
    };
    let peer_addrs = config.peer_addrs(self_id)?;

    info!(%self_id, port = config.port, hw = %config.hw_addr, "liftnet node starting");

    let driver = Arc::new(
        Driver::connect(&config.hw_addr)
            .await
            .with_context(|| format!("connecting to elevator hardware at {}", config.hw_addr))?,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    // Channel graph: controller -> replicator (deltas), replicator ->
    // controller (world) and -> assigner (coherent views), assigner ->
    // controller (our hall mask).
    let (update_tx, update_rx) = mpsc::channel::<Snapshot>(16);
    let (world_tx, world_rx) = watch::channel(Snapshot::default());
    let (coherent_tx, coherent_rx) = watch::channel(Snapshot::default());
    let (mask_tx, mask_rx) = watch::channel(HallMatrix::default());

    let (peers, incoming_rx) =
        peer_manager::start(PeerConfig::new(self_id, config.port, peer_addrs), cancel.clone())?;

    let view = WorldView::new(self_id, config.members(), WorldViewConfig::default(), Instant::now());
    let replicator = Replicator::new(
        view,
        peers,
        incoming_rx,
        ReplicatorChannels { local_rx: update_rx, world_tx, coherent_tx },
        cancel.clone(),
    );

    let assigner = Assigner::new(
        AssignerConfig { executable: config.assigner.clone().into(), ..Default::default() },
        self_id,
        coherent_rx,
        mask_tx,
        cancel.clone(),
    );

    let car = Car::new(CarConfig {
        clear_variant: config.car.clear_variant,
        door_open_duration: Duration::from_millis(config.car.door_open_duration_ms),
    });
    let sync = RequestSynchronizer::new(self_id, SyncConfig::default(), Instant::now());
    let controller = Controller::new(driver, car, sync, update_tx, cancel.clone());

    let replicator_task = tokio::spawn(replicator.run());
    let assigner_task = tokio::spawn(assigner.run());
    let controller_task =
        tokio::spawn(controller.run(ControllerChannels { world_rx, assignment_rx: mask_rx }));

    let _ = tokio::join!(replicator_task, assigner_task, controller_task);
    info!("shutdown complete");
    Ok(())
}
