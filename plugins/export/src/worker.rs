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

use kiln_runtime::{
    flume,
    kiln_schema::{WorkerReply, WorkerRequest},
    tracing::{debug, error, info, warn},
};

use crate::rebuild::SceneRebuilder;

#[derive(Debug)]
enum WorkerState {
    Idle,
    Accumulating {
        expected: usize,
        received: usize,
        rebuilder: Box<SceneRebuilder>,
    },
    Aborted,
}

/// The worker side of the export protocol.
///
/// Owns every buffer it has been sent. Requests that arrive outside of a
/// session are ignored.
#[derive(Debug)]
pub struct ExportWorker {
    state: WorkerState,
    ack_interval: usize,
    generator: String,
}

impl ExportWorker {
    pub fn new(ack_interval: usize, generator: impl Into<String>) -> Self {
        Self {
            state: WorkerState::Idle,
            ack_interval: ack_interval.max(1),
            generator: generator.into(),
        }
    }

    /// Whether a session is currently accepting meshes.
    pub fn in_session(&self) -> bool {
        matches!(self.state, WorkerState::Accumulating { .. })
    }

    /// Processes one request, returning the reply to send if any.
    pub fn handle(&mut self, request: WorkerRequest) -> Option<WorkerReply> {
        match request {
            WorkerRequest::Begin { count } => {
                info!("export session started for {count} mesh(es)");
                self.state = WorkerState::Accumulating {
                    expected: count,
                    received: 0,
                    rebuilder: Default::default(),
                };

                Some(WorkerReply::Ready)
            }
            WorkerRequest::Mesh {
                payload,
                attachments,
            } => {
                let WorkerState::Accumulating {
                    expected,
                    received,
                    rebuilder,
                } = &mut self.state
                else {
                    debug!("ignoring mesh outside of a session");
                    return None;
                };

                *received += 1;
                let name = payload.name.clone();
                rebuilder.add_attachments(attachments);
                if let Err(err) = rebuilder.add_mesh(*payload) {
                    warn!("failed to rebuild mesh {name:?}: {err:#}");
                    return Some(WorkerReply::Error {
                        message: format!("mesh {name:?}: {err:#}"),
                    });
                }

                let total = (*expected).max(*received);
                if *received % self.ack_interval == 0 || *received == total {
                    Some(WorkerReply::MeshOk {
                        received: *received,
                        total,
                    })
                } else {
                    None
                }
            }
            WorkerRequest::Export => {
                let state = std::mem::replace(&mut self.state, WorkerState::Idle);
                let WorkerState::Accumulating { rebuilder, .. } = state else {
                    debug!("ignoring export outside of a session");
                    self.state = state;
                    return None;
                };

                match rebuilder.export(&self.generator) {
                    Ok(blob) => {
                        info!("export finished with {} bytes", blob.len());
                        Some(WorkerReply::Done { blob })
                    }
                    Err(err) => {
                        error!("export failed: {err:#}");
                        Some(WorkerReply::Error {
                            message: format!("{err:#}"),
                        })
                    }
                }
            }
            WorkerRequest::Abort => {
                info!("export session aborted");
                self.state = WorkerState::Aborted;
                Some(WorkerReply::Aborted)
            }
        }
    }
}

/// The coordinator's end of a worker's channels.
#[derive(Debug)]
pub struct WorkerHandle {
    pub(crate) requests: flume::Sender<WorkerRequest>,
    pub(crate) replies: flume::Receiver<WorkerReply>,
}

impl WorkerHandle {
    /// Starts an [ExportWorker] on its own thread.
    ///
    /// The thread exits once this handle is dropped.
    pub fn spawn(ack_interval: usize, generator: &str) -> std::io::Result<Self> {
        let (requests, request_rx) = flume::unbounded();
        let (reply_tx, replies) = flume::unbounded();
        let mut worker = ExportWorker::new(ack_interval, generator);

        std::thread::Builder::new()
            .name("kiln-export-worker".into())
            .spawn(move || {
                for request in request_rx.iter() {
                    let Some(reply) = worker.handle(request) else {
                        continue;
                    };

                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }

                debug!("export worker exiting");
            })?;

        Ok(Self { requests, replies })
    }

    /// Wraps existing channels, for driving a scripted worker.
    #[cfg(test)]
    pub(crate) fn from_channels(
        requests: flume::Sender<WorkerRequest>,
        replies: flume::Receiver<WorkerReply>,
    ) -> Self {
        Self { requests, replies }
    }

    pub fn send(&self, request: WorkerRequest) -> Result<(), flume::SendError<WorkerRequest>> {
        self.requests.send(request)
    }
}
