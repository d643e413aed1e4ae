//! Asynchronous export of a composition to a single output file.

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use pipcut_core::instruction::RenderSpec;
use pipcut_core::types::Composition;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{RenderError, Result};
use crate::plan::compile;
use crate::transcode::{FfmpegTranscoder, RenderProgress, Transcoder};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Lifecycle of one export job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportState {
    Idle,
    Exporting,
    Completed,
    Failed(String),
    Cancelled,
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportState::Completed | ExportState::Failed(_) | ExportState::Cancelled
        )
    }

    /// Move to `next` if the lifecycle allows it. Returns false otherwise.
    ///
    /// `Idle -> Exporting -> {Completed | Failed | Cancelled}`; terminal
    /// states never change.
    pub fn transition(&mut self, next: ExportState) -> bool {
        let allowed = matches!(
            (&*self, &next),
            (ExportState::Idle, ExportState::Exporting)
        ) || (*self == ExportState::Exporting && next.is_terminal());

        if allowed {
            *self = next;
        } else {
            tracing::warn!(from = %self, to = %next, "rejected export state transition");
        }
        allowed
    }

    /// The terminal status, once there is one.
    pub fn status(&self) -> Option<ExportStatus> {
        match self {
            ExportState::Completed => Some(ExportStatus::Completed),
            ExportState::Failed(msg) => Some(ExportStatus::Failed(msg.clone())),
            ExportState::Cancelled => Some(ExportStatus::Cancelled),
            ExportState::Idle | ExportState::Exporting => None,
        }
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportState::Idle => f.write_str("idle"),
            ExportState::Exporting => f.write_str("exporting"),
            ExportState::Completed => f.write_str("completed"),
            ExportState::Failed(msg) => write!(f, "failed: {msg}"),
            ExportState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Terminal outcome handed to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStatus {
    Completed,
    Failed(String),
    Cancelled,
}

impl ExportStatus {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => ExportStatus::Completed,
            Err(RenderError::Cancelled) => ExportStatus::Cancelled,
            Err(e) => ExportStatus::Failed(e.to_string()),
        }
    }
}

impl From<ExportStatus> for ExportState {
    fn from(status: ExportStatus) -> Self {
        match status {
            ExportStatus::Completed => ExportState::Completed,
            ExportStatus::Failed(msg) => ExportState::Failed(msg),
            ExportStatus::Cancelled => ExportState::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// Exporter
// ---------------------------------------------------------------------------

type InFlight = Arc<Mutex<HashSet<PathBuf>>>;

/// Starts export jobs and keeps at most one in flight per destination.
#[derive(Clone)]
pub struct Exporter {
    transcoder: Arc<dyn Transcoder>,
    in_flight: InFlight,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(Arc::new(FfmpegTranscoder::default()))
    }
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl Exporter {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            in_flight: Arc::default(),
        }
    }

    /// Whether an export to `destination` is currently running.
    pub fn is_busy(&self, destination: impl AsRef<Path>) -> bool {
        let key = lease_key(destination.as_ref());
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }

    /// Export `composition` to `destination` in the background.
    ///
    /// Fails synchronously only with [`RenderError::DestinationBusy`]. Every
    /// other problem is reported as [`ExportStatus::Failed`] through
    /// `completion`, which fires exactly once after the output file is closed
    /// and the destination has been released. Must be called from within a
    /// tokio runtime.
    pub fn export<F>(
        &self,
        composition: &Composition,
        spec: &RenderSpec,
        destination: impl AsRef<Path>,
        completion: F,
    ) -> Result<ExportJob>
    where
        F: FnOnce(ExportStatus) + Send + 'static,
    {
        let destination = destination.as_ref().to_path_buf();
        let lease = DestinationLease::acquire(&self.in_flight, &destination)?;

        let id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(ExportState::Idle);
        let (progress_tx, progress_rx) = watch::channel(RenderProgress::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = ExportTask {
            id,
            transcoder: Arc::clone(&self.transcoder),
            composition: composition.clone(),
            spec: spec.clone(),
            destination: destination.clone(),
        };

        tokio::spawn(async move {
            state_tx.send_modify(|s| {
                s.transition(ExportState::Exporting);
            });
            tracing::info!(job = %task.id, destination = %task.destination.display(), "export started");

            let status = ExportStatus::from_result(task.run(progress_tx, cancel_rx).await);
            match &status {
                ExportStatus::Completed => {
                    tracing::info!(job = %task.id, destination = %task.destination.display(), "export completed")
                }
                ExportStatus::Failed(msg) => {
                    tracing::error!(job = %task.id, error = %msg, "export failed")
                }
                ExportStatus::Cancelled => tracing::info!(job = %task.id, "export cancelled"),
            }

            drop(lease);
            state_tx.send_modify(|s| {
                s.transition(status.clone().into());
            });
            completion(status);
        });

        Ok(ExportJob {
            id,
            destination,
            state: state_rx,
            progress: progress_rx,
            cancel: cancel_tx,
        })
    }
}

struct ExportTask {
    id: Uuid,
    transcoder: Arc<dyn Transcoder>,
    composition: Composition,
    spec: RenderSpec,
    destination: PathBuf,
}

impl ExportTask {
    async fn run(
        &self,
        progress: watch::Sender<RenderProgress>,
        cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        remove_if_exists(&self.destination).await;
        ensure_parent_dir(&self.destination).await?;

        let partial = partial_path(&self.destination);
        remove_if_exists(&partial).await;

        let plan = compile(&self.composition, &self.spec, &partial)?;
        tracing::debug!(
            job = %self.id,
            inputs = plan.inputs.len(),
            duration = %plan.duration,
            "compiled render plan"
        );

        if *cancel.borrow() {
            return Err(RenderError::Cancelled);
        }

        let result = async {
            self.transcoder.transcode(&plan, progress, cancel).await?;
            tokio::fs::rename(&partial, &self.destination).await?;
            Ok::<(), RenderError>(())
        }
        .await;

        if result.is_err() {
            remove_if_exists(&partial).await;
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Job handle
// ---------------------------------------------------------------------------

/// Handle to a running export.
///
/// Dropping the handle does not stop the export.
#[derive(Debug)]
pub struct ExportJob {
    id: Uuid,
    destination: PathBuf,
    state: watch::Receiver<ExportState>,
    progress: watch::Receiver<RenderProgress>,
    cancel: watch::Sender<bool>,
}

impl ExportJob {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn state(&self) -> ExportState {
        self.state.borrow().clone()
    }

    /// Receiver of transcode progress updates.
    pub fn progress(&self) -> watch::Receiver<RenderProgress> {
        self.progress.clone()
    }

    /// Ask the export to stop. Has no effect once it has finished.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Wait for the terminal state.
    pub async fn finished(&self) -> ExportState {
        let mut state = self.state.clone();
        let terminal = state
            .wait_for(ExportState::is_terminal)
            .await
            .map(|s| s.clone());
        terminal.unwrap_or_else(|_| state.borrow().clone())
    }
}

// ---------------------------------------------------------------------------
// Destination handling
// ---------------------------------------------------------------------------

/// Claim on a destination and its partial file, released on drop.
struct DestinationLease {
    keys: [PathBuf; 2],
    in_flight: InFlight,
}

impl DestinationLease {
    fn acquire(in_flight: &InFlight, destination: &Path) -> Result<Self> {
        let key = lease_key(destination);
        let keys = [partial_path(&key), key];

        let mut held = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if keys.iter().any(|k| held.contains(k)) {
            tracing::warn!(destination = %destination.display(), "destination busy");
            return Err(RenderError::DestinationBusy(destination.to_path_buf()));
        }
        held.extend(keys.iter().cloned());
        drop(held);

        Ok(Self {
            keys,
            in_flight: Arc::clone(in_flight),
        })
    }
}

impl Drop for DestinationLease {
    fn drop(&mut self) {
        let mut held = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
    }
}

/// Absolute form of `destination` with `.` and `..` folded away.
///
/// Symlinks are not resolved; the file may not exist yet.
fn lease_key(destination: &Path) -> PathBuf {
    let absolute =
        std::path::absolute(destination).unwrap_or_else(|_| destination.to_path_buf());
    let mut key = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                key.pop();
            }
            other => key.push(other),
        }
    }
    key
}

/// `out.mp4` becomes `out.partial.mp4`.
pub fn partial_path(destination: &Path) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match destination.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    destination.with_file_name(name)
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed existing file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove existing file"),
    }
}

async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
