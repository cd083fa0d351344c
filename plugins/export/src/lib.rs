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

//! Streaming GLB export.
//!
//! An [Exporter] starts an [ExportSession] for one asset. The session encodes
//! each mesh of the asset into a [MeshDescriptor](kiln_runtime::kiln_schema::MeshDescriptor),
//! moves it to a freshly spawned [ExportWorker] thread, and waits for the
//! worker to rebuild and serialize the meshes into a GLB.

pub mod coordinator;
pub mod encode;
pub mod rebuild;
pub mod worker;

pub use coordinator::{
    export_file_name, CancelToken, ExportArtifact, ExportError, ExportOutcome, ExportProgress,
    ExportSession, ExportSummary, Exporter, SessionState,
};
pub use encode::{collect_meshes, DescriptorEncoder, EncodeError, EncodedMesh};
pub use rebuild::SceneRebuilder;
pub use worker::{ExportWorker, WorkerHandle};
