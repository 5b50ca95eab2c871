//! Assignment pipeline.
//!
//! Consumes coherent world snapshots, invokes the external hall request
//! assigner with the snapshot as JSON, and publishes the hall mask this car
//! owns. Assigner failures keep the previous assignment; a snapshot arriving
//! while a run is pending supersedes it (the watch channel keeps only the
//! newest input).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use liftnet_types::{ElevState, HallMatrix, NodeId, Snapshot};

#[derive(Error, Debug)]
pub enum AssignError {
    #[error("failed to run assigner: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("assigner exited with {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("assigner output was not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tuning for the pipeline.
#[derive(Debug, Clone)]
pub struct AssignerConfig {
    /// Path of the assigner executable.
    pub executable: PathBuf,
    /// Minimum spacing between assigner runs; faster snapshots coalesce.
    pub min_interval: Duration,
}

impl Default for AssignerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("hall_request_assigner"),
            min_interval: Duration::from_millis(250),
        }
    }
}

/// Input contract of the external assigner: the hall matrix and the states
/// of the cars that should be considered.
#[derive(Debug, Serialize)]
struct AssignerInput<'a> {
    #[serde(rename = "hallRequests")]
    hall_requests: HallMatrix,
    states: BTreeMap<NodeId, &'a ElevState>,
}

/// Strip cars the snapshot marks stale; the assigner must not hand calls to
/// a node that will not serve them.
fn assignable_states(snapshot: &Snapshot) -> BTreeMap<NodeId, &ElevState> {
    snapshot
        .states
        .iter()
        .filter(|(id, _)| snapshot.alive.get(id).copied().unwrap_or(true))
        .map(|(&id, state)| (id, state))
        .collect()
}

fn parse_output(stdout: &[u8], self_id: NodeId) -> Result<HallMatrix, AssignError> {
    let masks: BTreeMap<NodeId, HallMatrix> = serde_json::from_slice(stdout)?;
    // A car absent from the output simply owns nothing right now.
    Ok(masks.get(&self_id).copied().unwrap_or_default())
}

/// The assignment pipeline task.
pub struct Assigner {
    config: AssignerConfig,
    self_id: NodeId,
    snapshot_rx: watch::Receiver<Snapshot>,
    mask_tx: watch::Sender<HallMatrix>,
    cancel: CancellationToken,
}

impl Assigner {
    pub fn new(
        config: AssignerConfig,
        self_id: NodeId,
        snapshot_rx: watch::Receiver<Snapshot>,
        mask_tx: watch::Sender<HallMatrix>,
        cancel: CancellationToken,
    ) -> Self {
        Self { config, self_id, snapshot_rx, mask_tx, cancel }
    }

    pub async fn run(mut self) {
        info!(executable = %self.config.executable.display(), "assignment pipeline started");
        let mut last_run = Instant::now() - self.config.min_interval;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("assignment pipeline stopped");
                    return;
                }
                changed = self.snapshot_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }

            // Coalesce: wait out the minimum interval, then take whatever
            // snapshot is newest.
            let since_last = last_run.elapsed();
            if since_last < self.config.min_interval {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.config.min_interval - since_last) => {}
                }
            }
            let snapshot = self.snapshot_rx.borrow_and_update().clone();
            last_run = Instant::now();

            match invoke(&self.config.executable, self.self_id, &snapshot).await {
                Ok(mask) => {
                    debug!(?mask, "assignment updated");
                    self.mask_tx.send_replace(mask);
                }
                Err(e) => {
                    // The previous assignment stays in the watch channel.
                    warn!("assigner failed, keeping previous assignment: {e}");
                }
            }
        }
    }
}

/// Run the assigner once over a snapshot and extract our mask.
async fn invoke(
    executable: &std::path::Path,
    self_id: NodeId,
    snapshot: &Snapshot,
) -> Result<HallMatrix, AssignError> {
    let input = AssignerInput {
        hall_requests: snapshot.hall_requests,
        states: assignable_states(snapshot),
    };
    let json = serde_json::to_string(&input)?;

    let output = Command::new(executable).arg("-i").arg(&json).output().await?;
    if !output.status.success() {
        return Err(AssignError::Failed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    parse_output(&output.stdout, self_id)
}
