// Copyright (c) 2024 the Kiln contributors.
// SPDX-License-Identifier: AGPL-3.0-or-later
//
// This file is part of Kiln.
//
// Kiln is free software: you can redistribute it and/or modify it under the
// terms of the GNU Affero General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Kiln is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with Kiln. If not, see <https://www.gnu.org/licenses/>.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use kiln_runtime::{
    asset::{Asset, AssetBusy, AssetLease, AssetLocks, LeaseKind},
    config::ExportConfig,
    flume,
    kiln_schema::{WorkerReply, WorkerRequest},
    scene::{NodeId, Scene},
    tracing::{debug, error, info, warn},
    yield_to_host,
};
use tokio::sync::watch;

use crate::{
    encode::{collect_meshes, DescriptorEncoder},
    worker::WorkerHandle,
};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Busy(#[from] AssetBusy),

    #[error("failed to start export worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Where an [ExportSession] is in its lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    SessionOpen,
    Streaming,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Cooperative cancellation shared between a session and its owner.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self {
            flag: Arc::new(watch::channel(false).0),
        }
    }
}

impl CancelToken {
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once [CancelToken::cancel] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ExportProgress {
    pub received: usize,
    pub total: usize,

    /// 0 to 100. Never decreases within a session.
    pub percent: f32,
}

/// A finished export file.
#[derive(Clone, Debug)]
pub struct ExportArtifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    /// Writes the artifact into `dir`, returning the full path.
    pub fn save(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.bytes)?;
        info!("saved {} bytes to {}", self.bytes.len(), path.display());
        Ok(path)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub exported: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub enum ExportOutcome {
    Done {
        artifact: ExportArtifact,
        summary: ExportSummary,
    },
    Failed(String),
    Cancelled,
}

/// Builds the artifact file name for an asset: the configured prefix, the
/// asset name without its extension, and the configured extension.
pub fn export_file_name(config: &ExportConfig, asset_name: &str) -> String {
    let stem = Path::new(asset_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(asset_name);

    format!("{}{}.{}", config.file_prefix, stem, config.extension)
}

/// Starts export sessions. Each session gets a fresh worker.
#[derive(Clone, Debug)]
pub struct Exporter {
    config: ExportConfig,
    locks: AssetLocks,
}

impl Exporter {
    pub fn new(config: ExportConfig, locks: AssetLocks) -> Self {
        Self { config, locks }
    }

    /// Claims the asset and spawns a worker for it.
    pub fn start(&self, asset: &Asset) -> Result<ExportSession, ExportError> {
        let lease = self.locks.try_acquire(asset.id, LeaseKind::Export)?;
        let worker = WorkerHandle::spawn(self.config.ack_interval, &self.config.generator)?;
        Ok(ExportSession::new(lease, worker, self.config.clone(), asset))
    }

    #[cfg(test)]
    pub(crate) fn start_with(
        &self,
        asset: &Asset,
        worker: WorkerHandle,
    ) -> Result<ExportSession, ExportError> {
        let lease = self.locks.try_acquire(asset.id, LeaseKind::Export)?;
        Ok(ExportSession::new(lease, worker, self.config.clone(), asset))
    }
}

/// What the coordinator does after a worker reply.
#[derive(Debug)]
pub(crate) enum Step {
    Continue,
    Ready,
    Done(Vec<u8>),
    Failed(String),
    Cancelled,
}

/// One streaming export of one asset.
///
/// Holds the asset's export lease until dropped.
#[derive(Debug)]
pub struct ExportSession {
    _lease: AssetLease,
    worker: WorkerHandle,
    config: ExportConfig,
    asset_name: String,
    root: NodeId,
    state: SessionState,
    cancel: CancelToken,
    progress_tx: flume::Sender<ExportProgress>,
    progress_rx: flume::Receiver<ExportProgress>,
    percent: f32,
}

impl ExportSession {
    fn new(lease: AssetLease, worker: WorkerHandle, config: ExportConfig, asset: &Asset) -> Self {
        let (progress_tx, progress_rx) = flume::unbounded();
        Self {
            _lease: lease,
            worker,
            config,
            asset_name: asset.name.clone(),
            root: asset.root,
            state: SessionState::Idle,
            cancel: CancelToken::default(),
            progress_tx,
            progress_rx,
            percent: 0.0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A handle that cancels this session from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> flume::Receiver<ExportProgress> {
        self.progress_rx.clone()
    }

    fn transition(&mut self, to: SessionState) {
        debug!("export of {:?}: {:?} -> {:?}", self.asset_name, self.state, to);
        self.state = to;
    }

    fn report_progress(&mut self, received: usize, total: usize) {
        let percent = if total == 0 {
            100.0
        } else {
            (received as f32 / total as f32 * 100.0).min(100.0)
        };

        if percent <= self.percent {
            return;
        }

        self.percent = percent;
        let _ = self.progress_tx.send(ExportProgress {
            received,
            total,
            percent,
        });
    }

    pub(crate) fn on_reply(&mut self, reply: WorkerReply) -> Step {
        if self.cancel.is_cancelled() {
            debug!("discarding {reply:?} after cancellation");
            return Step::Cancelled;
        }

        match reply {
            WorkerReply::Ready => Step::Ready,
            WorkerReply::MeshOk { received, total } => {
                self.report_progress(received, total);
                Step::Continue
            }
            WorkerReply::Done { blob } => Step::Done(blob),
            WorkerReply::Error { message } => Step::Failed(message),
            WorkerReply::Aborted => Step::Failed("export worker abandoned the session".into()),
        }
    }

    /// Waits for the next reply, or for cancellation.
    async fn next_step(&mut self) -> Step {
        let replies = self.worker.replies.clone();
        let cancel = self.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            reply = replies.recv_async() => match reply {
                Ok(reply) => self.on_reply(reply),
                Err(_) => Step::Failed("export worker disconnected".into()),
            },
        }
    }

    fn send(&self, request: WorkerRequest) -> Result<(), String> {
        self.worker
            .send(request)
            .map_err(|_| "export worker disconnected".to_string())
    }

    fn fail(&mut self, message: String) -> ExportOutcome {
        error!("export of {:?} failed: {message}", self.asset_name);
        let _ = self.worker.send(WorkerRequest::Abort);
        self.transition(SessionState::Failed);
        ExportOutcome::Failed(message)
    }

    fn abandon(&mut self) -> ExportOutcome {
        info!("export of {:?} cancelled", self.asset_name);
        let _ = self.worker.send(WorkerRequest::Abort);
        self.transition(SessionState::Cancelled);
        ExportOutcome::Cancelled
    }

    fn conclude(&mut self, step: Step) -> Option<ExportOutcome> {
        match step {
            Step::Failed(message) => Some(self.fail(message)),
            Step::Cancelled => Some(self.abandon()),
            _ => None,
        }
    }

    /// Streams every mesh under the asset root to the worker and waits for the
    /// artifact.
    ///
    /// The scene is only read. Consumes the session, releasing the asset when
    /// it returns.
    pub async fn run(mut self, scene: &Scene) -> ExportOutcome {
        let meshes = collect_meshes(scene, self.root);
        let mut summary = ExportSummary::default();
        let mut exportable = Vec::with_capacity(meshes.len());
        for id in meshes {
            match DescriptorEncoder::validate(scene, id) {
                Ok(()) => exportable.push(id),
                Err(err) => {
                    warn!("skipping mesh: {err}");
                    summary.skipped += 1;
                }
            }
        }

        if exportable.is_empty() {
            return self.fail(format!("{:?} has no exportable meshes", self.asset_name));
        }

        if self.cancel.is_cancelled() {
            return self.abandon();
        }

        let total = exportable.len();
        info!("exporting {total} mesh(es) of {:?}", self.asset_name);
        self.transition(SessionState::SessionOpen);
        if let Err(message) = self.send(WorkerRequest::Begin { count: total }) {
            return self.fail(message);
        }

        loop {
            match self.next_step().await {
                Step::Ready => break,
                Step::Continue | Step::Done(_) => continue,
                step => {
                    if let Some(outcome) = self.conclude(step) {
                        return outcome;
                    }
                }
            }
        }

        self.transition(SessionState::Streaming);
        let mut encoder = DescriptorEncoder::new();
        for id in exportable {
            if self.cancel.is_cancelled() {
                return self.abandon();
            }

            let encoded = match encoder.encode(scene, id) {
                Ok(encoded) => encoded,
                Err(err) => {
                    warn!("skipping mesh: {err}");
                    summary.skipped += 1;
                    continue;
                }
            };

            let request = WorkerRequest::Mesh {
                payload: Box::new(encoded.descriptor),
                attachments: encoded.attachments,
            };

            if let Err(message) = self.send(request) {
                return self.fail(message);
            }

            summary.exported += 1;
            yield_to_host(self.config.pacing()).await;

            while let Ok(reply) = self.worker.replies.try_recv() {
                let step = self.on_reply(reply);
                if let Some(outcome) = self.conclude(step) {
                    return outcome;
                }
            }
        }

        self.transition(SessionState::Finalizing);
        if let Err(message) = self.send(WorkerRequest::Export) {
            return self.fail(message);
        }

        let blob = loop {
            match self.next_step().await {
                Step::Done(blob) => break blob,
                Step::Continue | Step::Ready => continue,
                step => {
                    if let Some(outcome) = self.conclude(step) {
                        return outcome;
                    }
                }
            }
        };

        self.report_progress(total, total);
        self.transition(SessionState::Done);

        let artifact = ExportArtifact {
            file_name: export_file_name(&self.config, &self.asset_name),
            bytes: blob,
        };

        info!(
            "exported {} mesh(es) of {:?} ({} skipped) as {}",
            summary.exported, self.asset_name, summary.skipped, artifact.file_name
        );

        ExportOutcome::Done { artifact, summary }
    }
}
