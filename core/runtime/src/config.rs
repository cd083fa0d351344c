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

//! User configuration, read from `config.toml` in the platform config
//! directory.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, Level};

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub export: ExportConfig,
    pub editor: EditorConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    /// How long the coordinator yields to the host after sending each mesh.
    pub pacing_ms: u64,

    /// The worker acknowledges progress every this many meshes.
    pub ack_interval: usize,

    pub file_prefix: String,
    pub extension: String,

    /// Written to the exported asset's generator field.
    pub generator: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 4,
            ack_interval: 8,
            file_prefix: "exported_".to_string(),
            extension: "glb".to_string(),
            generator: "kiln".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EditorConfig {
    /// A press must be held this long before it starts a box.
    pub debounce_ms: u64,

    /// Triangles tested between yields during an erase.
    pub erase_chunk: usize,

    /// Linear RGBA of the translucent box fill.
    pub box_color: [f32; 4],

    /// Linear RGBA of the box outlines.
    pub edge_color: [f32; 4],
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 120,
            erase_chunk: 15_000,
            box_color: [1.0, 0.27, 0.27, 0.25],
            edge_color: [1.0, 0.4, 0.4, 1.0],
        }
    }
}

impl EditorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// The configured level raised by `verbosity` steps.
    pub fn level(&self, verbosity: u8) -> Level {
        const LEVELS: [Level; 5] = [
            Level::ERROR,
            Level::WARN,
            Level::INFO,
            Level::DEBUG,
            Level::TRACE,
        ];

        let base = Level::from_str(&self.level).unwrap_or(Level::INFO);
        let start = LEVELS.iter().position(|level| *level == base).unwrap_or(2);
        LEVELS[(start + verbosity as usize).min(LEVELS.len() - 1)]
    }
}

impl Config {
    /// The default config file location, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "kiln").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!("no config at {}; using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;

        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Loads from `path` if given, otherwise from [Config::default_path].
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
