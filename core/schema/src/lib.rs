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

//! Shared vocabulary between Kiln's interactive side and its export worker.

pub use glam;

pub mod buffer;
pub mod descriptor;
pub mod protocol;

pub use buffer::*;
pub use descriptor::*;
pub use protocol::*;

/// Malformed geometry data.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DescriptorError {
    #[error("geometry has no position attribute")]
    MissingPositions,

    #[error("geometry position attribute is empty")]
    EmptyPositions,

    #[error("vertex stream of {count} entries does not form whole triangles")]
    PartialTriangle { count: usize },

    #[error("index buffers cannot use {0:?} elements")]
    IndexElement(ElementType),

    #[error("index {index} is out of range for {vertices} vertices")]
    IndexOutOfRange { index: u32, vertices: usize },

    #[error("{name:?} attribute has {count} items but there are {vertices} vertices")]
    AttributeCount {
        name: AttributeName,
        count: usize,
        vertices: usize,
    },
}
