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

//! The export coordinator/worker message protocol.
//!
//! Payloads are owned by the message. Sending a message moves its buffers to
//! the worker and the sender cannot touch them afterwards.

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::{MeshDescriptor, TextureAttachment};

/// A message from the coordinator to the export worker.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum WorkerRequest {
    /// Starts a new session expecting `count` meshes.
    ///
    /// The worker discards any previous state and replies [WorkerReply::Ready].
    Begin { count: usize },

    /// Adds one mesh to the session.
    ///
    /// `attachments` holds the pixels of every texture this mesh references
    /// that has not been sent earlier in the session.
    Mesh {
        payload: Box<MeshDescriptor>,
        attachments: Vec<TextureAttachment>,
    },

    /// Serializes everything received so far.
    ///
    /// Replies [WorkerReply::Done] or [WorkerReply::Error].
    Export,

    /// Abandons the session. Replies [WorkerReply::Aborted].
    Abort,
}

/// A message from the export worker to the coordinator.
#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum WorkerReply {
    /// The worker has reset and accepts meshes.
    Ready,

    /// Batched progress acknowledgement.
    MeshOk { received: usize, total: usize },

    /// The serialized export artifact.
    Done {
        #[serde_as(as = "Base64")]
        blob: Vec<u8>,
    },

    /// A reconstruction or serialization failure.
    Error { message: String },

    /// The session was abandoned and its state discarded.
    Aborted,
}
