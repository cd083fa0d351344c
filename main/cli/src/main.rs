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

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use kiln_export::{collect_meshes, DescriptorEncoder, ExportOutcome, Exporter};
use kiln_mesh_editor::{selection::Aabb, MeshEditor};
use kiln_runtime::{
    anyhow::{self, anyhow, bail, Context},
    asset::{Asset, AssetEvents, AssetLocks, AssetRegistry},
    config::Config,
    glam::Vec3,
    init_logging,
    scene::{NodeId, NodeKind, Scene},
    viewer::HeadlessViewer,
};
use tracing::{info, warn};

/// Command-line driver for Kiln's export and box-erase pipelines.
#[derive(Parser, Debug)]
#[clap(name = "kiln", version, about)]
struct Args {
    /// Config file to use instead of the platform default.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Raises the log level. May be repeated.
    #[clap(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints a JSON summary of a GLB's meshes.
    Inspect { input: PathBuf },

    /// Prints the export descriptor of one mesh as JSON.
    Describe {
        input: PathBuf,

        /// Mesh name. Defaults to the first mesh.
        #[clap(long)]
        mesh: Option<String>,
    },

    /// Streams a GLB through the export worker and saves the result.
    Export {
        input: PathBuf,

        /// Directory to write into.
        #[clap(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Erases triangles inside boxes, then exports the edited asset.
    Erase {
        input: PathBuf,

        /// Mesh name. Defaults to the first mesh.
        #[clap(long)]
        mesh: Option<String>,

        /// A world-space box as x0,y0,z0,x1,y1,z1. May be repeated.
        #[clap(long = "box", value_parser = parse_box, required = true)]
        boxes: Vec<Aabb>,

        /// Directory to write into.
        #[clap(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn parse_box(text: &str) -> Result<Aabb, String> {
    let values = text
        .split(',')
        .map(|value| value.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("invalid number in {text:?}: {err}"))?;

    let &[x0, y0, z0, x1, y1, z1] = values.as_slice() else {
        return Err(format!("expected six numbers, got {}", values.len()));
    };

    Ok(Aabb::from_corners(
        Vec3::new(x0, y0, z0),
        Vec3::new(x1, y1, z1),
    ))
}

/// The loaded file and everything needed to work on it.
struct Workspace {
    viewer: HeadlessViewer,
    registry: AssetRegistry,
    locks: AssetLocks,
    asset: Asset,
}

impl Workspace {
    fn open(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;

        let mut viewer = HeadlessViewer::default();
        let mut registry = AssetRegistry::new(AssetEvents::default());
        let id = registry.load_glb(&mut viewer, name, &bytes)?;
        registry.activate(id);

        let asset = registry
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("asset {id:?} vanished after loading"))?;

        Ok(Self {
            viewer,
            registry,
            locks: AssetLocks::default(),
            asset,
        })
    }

    fn scene(&self) -> &Scene {
        &self.viewer.scene
    }

    fn find_mesh(&self, name: Option<&str>) -> anyhow::Result<NodeId> {
        let meshes = collect_meshes(self.scene(), self.asset.root);
        let found = match name {
            Some(name) => meshes
                .into_iter()
                .find(|id| self.scene().get(*id).map_or(false, |node| node.name == name)),
            None => meshes.into_iter().next(),
        };

        found.ok_or_else(|| match name {
            Some(name) => anyhow!("no mesh named {name:?} in {}", self.asset.name),
            None => anyhow!("{} has no meshes", self.asset.name),
        })
    }

    async fn export(&self, config: &Config, out_dir: &Path) -> anyhow::Result<()> {
        let exporter = Exporter::new(config.export.clone(), self.locks.clone());
        let session = exporter.start(&self.asset)?;

        let token = session.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; cancelling export");
                token.cancel();
            }
        });

        let progress = session.progress();
        tokio::spawn(async move {
            while let Ok(progress) = progress.recv_async().await {
                info!(
                    "{}/{} meshes rebuilt ({:.0}%)",
                    progress.received, progress.total, progress.percent
                );
            }
        });

        match session.run(self.scene()).await {
            ExportOutcome::Done { artifact, summary } => {
                let path = artifact.save(out_dir)?;
                println!(
                    "{} ({} mesh(es) exported, {} skipped)",
                    path.display(),
                    summary.exported,
                    summary.skipped
                );
                Ok(())
            }
            ExportOutcome::Failed(message) => bail!("export failed: {message}"),
            ExportOutcome::Cancelled => bail!("export cancelled"),
        }
    }
}

fn inspect(workspace: &Workspace) -> serde_json::Value {
    let scene = workspace.scene();
    let meshes: Vec<_> = collect_meshes(scene, workspace.asset.root)
        .into_iter()
        .filter_map(|id| scene.get(id))
        .map(|node| {
            let (kind, bones) = match &node.kind {
                NodeKind::SkinnedMesh(skinned) => ("skinned", skinned.skeleton.bones.len()),
                _ => ("static", 0),
            };

            let mesh = node.kind.as_mesh();
            let triangles = mesh.and_then(|mesh| mesh.geometry.triangle_count().ok());
            let vertices = mesh.map(|mesh| mesh.geometry.vertex_count());
            let materials: Vec<_> = mesh
                .map(|mesh| mesh.material.iter().map(|m| m.name.clone()).collect())
                .unwrap_or_default();

            serde_json::json!({
                "name": node.name,
                "kind": kind,
                "triangles": triangles,
                "vertices": vertices,
                "materials": materials,
                "bones": bones,
            })
        })
        .collect();

    serde_json::json!({
        "asset": workspace.asset.name,
        "nodes": scene.len(),
        "meshes": meshes,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_deref())?;
    init_logging(config.log.level(args.verbose));

    match args.command {
        Command::Inspect { input } => {
            let workspace = Workspace::open(&input)?;
            println!("{}", serde_json::to_string_pretty(&inspect(&workspace))?);
        }
        Command::Describe { input, mesh } => {
            let workspace = Workspace::open(&input)?;
            let id = workspace.find_mesh(mesh.as_deref())?;
            let encoded = DescriptorEncoder::new().encode(workspace.scene(), id)?;
            println!("{}", serde_json::to_string_pretty(&encoded.descriptor)?);
        }
        Command::Export { input, out_dir } => {
            let workspace = Workspace::open(&input)?;
            workspace.export(&config, &out_dir).await?;
        }
        Command::Erase {
            input,
            mesh,
            boxes,
            out_dir,
        } => {
            let mut workspace = Workspace::open(&input)?;
            let target = workspace.find_mesh(mesh.as_deref())?;

            let mut editor = MeshEditor::new(
                config.editor.clone(),
                workspace.registry.events().clone(),
                workspace.locks.clone(),
            );

            editor.open(&mut workspace.viewer, workspace.asset.id, target)?;
            for aabb in boxes {
                editor.add_box(&mut workspace.viewer, aabb)?;
            }

            let report = editor.erase(&mut workspace.viewer).await?;
            println!(
                "erased {} triangle(s), {} left",
                report.removed, report.kept
            );

            workspace.export(&config, &out_dir).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxes_parse_in_any_corner_order() {
        let aabb = parse_box("1, 2, 3, -1, 0, 5").unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 5.0));
    }

    #[test]
    fn malformed_boxes_are_rejected() {
        assert!(parse_box("1,2,3").is_err());
        assert!(parse_box("1,2,3,4,5,x").is_err());
    }

    #[test]
    fn arguments_parse() {
        let args = Args::try_parse_from([
            "kiln", "-vv", "erase", "chair.glb", "--box", "0,0,0,1,1,1", "--box",
            "2,2,2,3,3,3", "--mesh", "seat",
        ])
        .unwrap();

        assert_eq!(args.verbose, 2);
        let Command::Erase { boxes, mesh, .. } = args.command else {
            panic!("expected erase");
        };
        assert_eq!(boxes.len(), 2);
        assert_eq!(mesh.as_deref(), Some("seat"));
    }
}
