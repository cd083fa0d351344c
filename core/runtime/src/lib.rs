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

use std::time::Duration;

pub mod asset;
pub mod camera;
pub mod config;
pub mod geometry;
pub mod glb;
pub mod material;
pub mod scene;
pub mod viewer;

// export crates used in the public API
pub use anyhow;
pub use flume;
pub use glam;
pub use kiln_schema;
pub use tokio;
pub use tracing;

/// Installs the global `tracing` subscriber. Only binaries should call this.
pub fn init_logging(level: tracing::Level) {
    let result = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    if let Err(err) = result {
        tracing::warn!("logging already initialized: {err}");
    }
}

/// Hands control back to the host runtime between units of work.
///
/// A zero delay only reschedules the current task.
pub async fn yield_to_host(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}
