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

//! Interactive box-erase editing of a single mesh.
//!
//! While the editor is open and orbit-locked, pointer drags draw world-space
//! boxes over the target mesh. Released boxes merge into a persistent set.
//! [MeshEditor::erase] then removes every triangle whose centroid lies in any
//! box and closes the editor.

use std::{sync::Arc, time::Instant};

use kiln_runtime::{
    asset::{AssetBusy, AssetEvent, AssetEvents, AssetId, AssetLease, AssetLocks, LeaseKind},
    config::EditorConfig,
    flume,
    glam::{Vec2, Vec3},
    scene::NodeId,
    tracing::{debug, error, info, warn},
    viewer::Viewer,
};

pub mod erase;
pub mod gesture;
pub mod overlay;
pub mod selection;

use erase::{EraseError, EraseJob};
use gesture::{pick_anchor, DrawGesture};
use overlay::Overlay;
use selection::{Aabb, BoxSet};

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("node {0:?} is not a mesh")]
    NotAMesh(NodeId),

    #[error(transparent)]
    Busy(#[from] AssetBusy),

    #[error("the editor is not open")]
    NotOpen,

    #[error(transparent)]
    Erase(#[from] EraseError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EditorState {
    Closed,
    Open,
    Drawing,
    Erasing,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
}

#[derive(Copy, Clone, Debug)]
pub struct PointerEvent {
    pub phase: PointerPhase,

    /// Viewport pixel, origin top-left.
    pub position: Vec2,

    pub time: Instant,
}

/// Whether the editor took a pointer event or left it for camera controls.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PointerResponse {
    Consumed,
    PassThrough,
}

/// What an editor panel would display.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PanelState {
    pub target: NodeId,
    pub boxes: usize,
    pub orbit_locked: bool,
    pub erase_enabled: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EraseReport {
    pub removed: usize,
    pub kept: usize,
}

#[derive(Copy, Clone, Debug)]
enum Press {
    /// Held, but not long enough to be a drag.
    Pending {
        pixel: Vec2,
        since: Instant,
        anchor: Vec3,
    },
    Drawing(DrawGesture),
}

#[derive(Debug)]
struct EditSession {
    asset: AssetId,
    target: NodeId,
    boxes: BoxSet,
    overlay: Overlay,
    orbit_locked: bool,
    press: Option<Press>,
    erasing: bool,
    _lease: AssetLease,
}

/// Holds a session in [EditorState::Erasing] until dropped.
struct ErasingGuard<'a>(&'a mut bool);

impl<'a> ErasingGuard<'a> {
    fn raise(flag: &'a mut bool) -> Self {
        *flag = true;
        Self(flag)
    }
}

impl Drop for ErasingGuard<'_> {
    fn drop(&mut self) {
        *self.0 = false;
    }
}

/// The box-erase editor. At most one mesh is edited at a time.
#[derive(Debug)]
pub struct MeshEditor {
    config: EditorConfig,
    events: AssetEvents,
    subscription: flume::Receiver<AssetEvent>,
    locks: AssetLocks,
    session: Option<EditSession>,
}

impl MeshEditor {
    pub fn new(config: EditorConfig, events: AssetEvents, locks: AssetLocks) -> Self {
        Self {
            config,
            subscription: events.subscribe(),
            events,
            locks,
            session: None,
        }
    }

    pub fn state(&self) -> EditorState {
        match &self.session {
            None => EditorState::Closed,
            Some(session) if session.erasing => EditorState::Erasing,
            Some(EditSession {
                press: Some(Press::Drawing(_)),
                ..
            }) => EditorState::Drawing,
            Some(_) => EditorState::Open,
        }
    }

    pub fn panel(&self) -> Option<PanelState> {
        self.session.as_ref().map(|session| PanelState {
            target: session.target,
            boxes: session.boxes.len(),
            orbit_locked: session.orbit_locked,
            erase_enabled: !session.boxes.is_empty(),
        })
    }

    pub fn boxes(&self) -> &[Aabb] {
        self.session
            .as_ref()
            .map(|session| session.boxes.boxes())
            .unwrap_or(&[])
    }

    /// Starts editing `target`, a mesh node of `asset`.
    ///
    /// Any previous session is closed first, even if this one is refused.
    pub fn open(
        &mut self,
        viewer: &mut impl Viewer,
        asset: AssetId,
        target: NodeId,
    ) -> Result<(), EditorError> {
        self.close(viewer);

        let is_mesh = viewer
            .scene()
            .get(target)
            .map_or(false, |node| node.kind.is_mesh());

        if !is_mesh {
            warn!("refusing to edit {target:?}: not a mesh");
            return Err(EditorError::NotAMesh(target));
        }

        let lease = self.locks.try_acquire(asset, LeaseKind::Edit)?;
        let overlay = Overlay::attach(viewer, &self.config);

        info!("editing {target:?} of {asset:?}");
        self.session = Some(EditSession {
            asset,
            target,
            boxes: BoxSet::new(),
            overlay,
            orbit_locked: false,
            press: None,
            erasing: false,
            _lease: lease,
        });

        Ok(())
    }

    /// Locking the orbit hands pointer drags to the editor.
    pub fn set_orbit_lock(&mut self, viewer: &mut impl Viewer, locked: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.orbit_locked = locked;
        viewer.set_orbit_controls(!locked);
        if !locked && session.press.take().is_some() {
            session.overlay.clear_live(viewer);
        }

        debug!("orbit lock {}", if locked { "on" } else { "off" });
    }

    pub fn handle_pointer(
        &mut self,
        viewer: &mut impl Viewer,
        event: PointerEvent,
    ) -> PointerResponse {
        let debounce = self.config.debounce();
        let Some(session) = self.session.as_mut() else {
            return PointerResponse::PassThrough;
        };

        if !session.orbit_locked || session.erasing {
            return PointerResponse::PassThrough;
        }

        match event.phase {
            PointerPhase::Down => {
                let anchor = pick_anchor(
                    viewer.scene(),
                    viewer.camera(),
                    session.target,
                    event.position,
                );

                session.press = anchor.map(|anchor| Press::Pending {
                    pixel: event.position,
                    since: event.time,
                    anchor,
                });
            }
            PointerPhase::Move => {
                let mut gesture = match session.press {
                    Some(Press::Pending {
                        pixel,
                        since,
                        anchor,
                    }) if event.time.saturating_duration_since(since) >= debounce => {
                        DrawGesture::new(anchor, pixel)
                    }
                    Some(Press::Drawing(gesture)) => gesture,
                    _ => return PointerResponse::Consumed,
                };

                let aabb = gesture.update(viewer.camera(), event.position);
                session.press = Some(Press::Drawing(gesture));
                session.overlay.show_live(viewer, &aabb);
            }
            PointerPhase::Up => {
                session.overlay.clear_live(viewer);
                match session.press.take() {
                    Some(Press::Drawing(mut gesture)) => {
                        gesture.update(viewer.camera(), event.position);
                        match gesture.finish() {
                            Some(aabb) => Self::commit(session, viewer, aabb),
                            None => debug!("discarding flat box"),
                        }
                    }
                    Some(Press::Pending { .. }) => debug!("tap ignored"),
                    None => {}
                }
            }
            PointerPhase::Cancel => {
                session.press = None;
                session.overlay.clear_live(viewer);
            }
        }

        PointerResponse::Consumed
    }

    /// Promotes a held press to a drag once the debounce has passed, even if
    /// the pointer has not moved.
    pub fn poll(&mut self, viewer: &mut impl Viewer, now: Instant) {
        let debounce = self.config.debounce();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let Some(Press::Pending {
            pixel,
            since,
            anchor,
        }) = session.press
        else {
            return;
        };

        if now.saturating_duration_since(since) < debounce {
            return;
        }

        let mut gesture = DrawGesture::new(anchor, pixel);
        let aabb = gesture.update(viewer.camera(), pixel);
        session.press = Some(Press::Drawing(gesture));
        session.overlay.show_live(viewer, &aabb);
    }

    /// Adds a box to the selection directly. Boxes without volume are
    /// refused.
    pub fn add_box(&mut self, viewer: &mut impl Viewer, aabb: Aabb) -> Result<(), EditorError> {
        let session = self.session.as_mut().ok_or(EditorError::NotOpen)?;
        if aabb.is_degenerate() {
            warn!("ignoring box without volume: {aabb:?}");
            return Ok(());
        }

        Self::commit(session, viewer, aabb);
        Ok(())
    }

    fn commit(session: &mut EditSession, viewer: &mut impl Viewer, aabb: Aabb) {
        session.boxes.insert(aabb);
        session.overlay.set_boxes(viewer, session.boxes.boxes());
        debug!("{} box(es) selected", session.boxes.len());
    }

    /// Erases every triangle of the target whose centroid lies in a selected
    /// box.
    ///
    /// Whatever the result, the editor closes afterwards and the asset is
    /// announced as updated. On failure the mesh is left as it was.
    pub async fn erase(&mut self, viewer: &mut impl Viewer) -> Result<EraseReport, EditorError> {
        let session = self.session.as_mut().ok_or(EditorError::NotOpen)?;
        if session.boxes.is_empty() {
            return Err(EraseError::NothingSelected.into());
        }

        session.press = None;
        session.overlay.clear_live(viewer);

        let chunk = self.config.erase_chunk;
        let asset = session.asset;
        let target = session.target;
        let boxes = session.boxes.boxes().to_vec();
        let geometry = viewer
            .scene()
            .get(target)
            .and_then(|node| node.kind.as_mesh())
            .map(|mesh| mesh.geometry.clone());

        let result = match geometry {
            None => Err(EditorError::NotAMesh(target)),
            Some(geometry) => {
                let world = viewer.scene().world_matrix(target);
                let job = EraseJob::new(geometry, world, boxes, chunk);
                let outcome = {
                    let _erasing = ErasingGuard::raise(&mut session.erasing);
                    job.run().await
                };

                match outcome {
                    Ok(outcome) => {
                        let replacement = Arc::new(outcome.geometry);
                        let old = viewer.scene_mut().replace_geometry(target, replacement);
                        if let Some(old) = old {
                            viewer.release_geometry(old);
                        }

                        info!(
                            "erased {} triangle(s) of {target:?}, {} left",
                            outcome.removed, outcome.kept
                        );

                        Ok(EraseReport {
                            removed: outcome.removed,
                            kept: outcome.kept,
                        })
                    }
                    Err(err) => Err(err.into()),
                }
            }
        };

        if let Err(err) = &result {
            error!("erase of {target:?} failed: {err}");
        }

        self.close(viewer);
        self.events.publish(AssetEvent::Updated(asset));
        result
    }

    /// Ends the session, disposing every visual and handing the pointer back
    /// to the camera.
    pub fn close(&mut self, viewer: &mut impl Viewer) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.overlay.dispose(viewer);
        viewer.set_orbit_controls(true);
        info!("closed editor for {:?}", session.target);
    }

    /// Reacts to asset lifecycle changes that invalidate the session.
    pub fn handle_event(&mut self, viewer: &mut impl Viewer, event: AssetEvent) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let closes = match event {
            AssetEvent::Loaded(id) | AssetEvent::Activated(id) => id != session.asset,
            AssetEvent::Cleaned(id) => id == session.asset,
            AssetEvent::Updated(_) => false,
        };

        if closes {
            debug!("closing editor after {event:?}");
            self.close(viewer);
        }
    }

    /// Handles every asset event published since the last call.
    pub fn process_events(&mut self, viewer: &mut impl Viewer) {
        let pending: Vec<_> = self.subscription.try_iter().collect();
        for event in pending {
            self.handle_event(viewer, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kiln_runtime::{
        camera::Camera,
        geometry::Geometry,
        kiln_schema::{AttributeBuffer, AttributeName, DescriptorError},
        material::Material,
        scene::{MaterialSlot, Mesh, Node, NodeKind},
        viewer::HeadlessViewer,
    };

    use super::*;

    struct Fixture {
        viewer: HeadlessViewer,
        editor: MeshEditor,
        events: AssetEvents,
        locks: AssetLocks,
        mesh: NodeId,
        asset: AssetId,
    }

    /// A 10x10 grid of quads on the ground, seen from above.
    fn fixture() -> Fixture {
        let mut positions = Vec::new();
        for x in 0..10 {
            for z in 0..10 {
                let (x, z) = (x as f32 - 5.0, z as f32 - 5.0);
                positions.extend([
                    Vec3::new(x, 0.0, z),
                    Vec3::new(x, 0.0, z + 1.0),
                    Vec3::new(x + 1.0, 0.0, z),
                    Vec3::new(x + 1.0, 0.0, z),
                    Vec3::new(x, 0.0, z + 1.0),
                    Vec3::new(x + 1.0, 0.0, z + 1.0),
                ]);
            }
        }

        let mut viewer = HeadlessViewer {
            camera: Camera::look_at(
                Vec3::new(0.0, 20.0, 0.001),
                Vec3::ZERO,
                60f32.to_radians(),
                Vec2::new(800.0, 600.0),
            ),
            ..Default::default()
        };

        let root = viewer.scene.add(Node::group("grid.glb"), None);
        let mesh = viewer.scene.add(
            Node::new(
                "grid",
                NodeKind::StaticMesh(Mesh {
                    geometry: Arc::new(Geometry::from_positions(&positions)),
                    material: MaterialSlot::Single(Arc::new(Material::named("grid"))),
                }),
            ),
            Some(root),
        );

        let events = AssetEvents::default();
        let locks = AssetLocks::default();
        let editor = MeshEditor::new(EditorConfig::default(), events.clone(), locks.clone());

        Fixture {
            viewer,
            editor,
            events,
            locks,
            mesh,
            asset: AssetId(0),
        }
    }

    fn pointer(phase: PointerPhase, x: f32, y: f32, time: Instant) -> PointerEvent {
        PointerEvent {
            phase,
            position: Vec2::new(x, y),
            time,
        }
    }

    fn triangle_count(f: &Fixture) -> usize {
        f.viewer
            .scene
            .get(f.mesh)
            .unwrap()
            .kind
            .as_mesh()
            .unwrap()
            .geometry
            .triangle_count()
            .unwrap()
    }

    #[test]
    fn open_refuses_non_meshes() {
        let mut f = fixture();
        let root = f.viewer.scene.get(f.mesh).unwrap().parent().unwrap();

        let err = f.editor.open(&mut f.viewer, f.asset, root).unwrap_err();
        assert!(matches!(err, EditorError::NotAMesh(_)));
        assert_eq!(f.editor.state(), EditorState::Closed);
        assert_eq!(f.locks.holder(f.asset), None);
    }

    #[test]
    fn open_refuses_busy_assets() {
        let mut f = fixture();
        let _export = f.locks.try_acquire(f.asset, LeaseKind::Export).unwrap();
        let err = f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap_err();
        assert!(matches!(err, EditorError::Busy(_)));
    }

    #[test]
    fn pointer_passes_through_until_locked() {
        let mut f = fixture();
        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();
        let now = Instant::now();

        let down = pointer(PointerPhase::Down, 400.0, 300.0, now);
        assert_eq!(
            f.editor.handle_pointer(&mut f.viewer, down),
            PointerResponse::PassThrough
        );

        f.editor.set_orbit_lock(&mut f.viewer, true);
        assert!(!f.viewer.orbit);
        assert_eq!(
            f.editor.handle_pointer(&mut f.viewer, down),
            PointerResponse::Consumed
        );
    }

    #[test]
    fn quick_tap_draws_nothing() {
        let mut f = fixture();
        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();
        f.editor.set_orbit_lock(&mut f.viewer, true);

        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(50);
        f.editor
            .handle_pointer(&mut f.viewer, pointer(PointerPhase::Down, 400.0, 300.0, t0));
        f.editor
            .handle_pointer(&mut f.viewer, pointer(PointerPhase::Move, 450.0, 250.0, t1));
        assert_eq!(f.editor.state(), EditorState::Open);
        f.editor
            .handle_pointer(&mut f.viewer, pointer(PointerPhase::Up, 450.0, 250.0, t1));

        assert!(f.editor.boxes().is_empty());
        assert!(!f.editor.panel().unwrap().erase_enabled);
    }

    #[test]
    fn held_drag_commits_a_box() {
        let mut f = fixture();
        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();
        f.editor.set_orbit_lock(&mut f.viewer, true);

        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(200);
        f.editor
            .handle_pointer(&mut f.viewer, pointer(PointerPhase::Down, 400.0, 300.0, t0));
        f.editor
            .handle_pointer(&mut f.viewer, pointer(PointerPhase::Move, 500.0, 250.0, t1));
        assert_eq!(f.editor.state(), EditorState::Drawing);
        f.editor
            .handle_pointer(&mut f.viewer, pointer(PointerPhase::Up, 500.0, 250.0, t1));

        assert_eq!(f.editor.state(), EditorState::Open);
        assert_eq!(f.editor.boxes().len(), 1);
        let aabb = f.editor.boxes()[0];
        assert!(aabb.max.y > 0.0);
        assert!(aabb.size().x > 1.0);
        assert!(f.editor.panel().unwrap().erase_enabled);
    }

    #[test]
    fn poll_starts_drawing_after_debounce() {
        let mut f = fixture();
        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();
        f.editor.set_orbit_lock(&mut f.viewer, true);

        let t0 = Instant::now();
        f.editor
            .handle_pointer(&mut f.viewer, pointer(PointerPhase::Down, 400.0, 300.0, t0));
        f.editor.poll(&mut f.viewer, t0 + Duration::from_millis(10));
        assert_eq!(f.editor.state(), EditorState::Open);
        f.editor.poll(&mut f.viewer, t0 + Duration::from_millis(150));
        assert_eq!(f.editor.state(), EditorState::Drawing);
    }

    #[test]
    fn close_disposes_everything() {
        let mut f = fixture();
        let nodes = f.viewer.scene.len();
        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();
        f.editor.set_orbit_lock(&mut f.viewer, true);
        f.editor
            .add_box(
                &mut f.viewer,
                Aabb::from_corners(Vec3::splat(-1.0), Vec3::splat(1.0)),
            )
            .unwrap();

        f.editor.close(&mut f.viewer);
        assert_eq!(f.editor.state(), EditorState::Closed);
        assert_eq!(f.viewer.scene.len(), nodes);
        assert_eq!(f.viewer.released_geometries, 2);
        assert_eq!(f.viewer.released_materials, 2);
        assert!(f.viewer.orbit);
        assert_eq!(f.locks.holder(f.asset), None);
        assert!(f.editor.boxes().is_empty());
    }

    #[tokio::test]
    async fn erase_swaps_geometry_and_closes() {
        let mut f = fixture();
        let updates = f.events.subscribe();
        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();

        // covers the 4x4 quads around the origin
        f.editor
            .add_box(
                &mut f.viewer,
                Aabb::from_corners(Vec3::new(-2.0, -1.0, -2.0), Vec3::new(2.0, 1.0, 2.0)),
            )
            .unwrap();

        let report = f.editor.erase(&mut f.viewer).await.unwrap();
        assert_eq!(
            report,
            EraseReport {
                removed: 32,
                kept: 168
            }
        );
        assert_eq!(triangle_count(&f), 168);
        assert_eq!(f.editor.state(), EditorState::Closed);
        assert_eq!(updates.try_recv(), Ok(AssetEvent::Updated(f.asset)));
    }

    #[tokio::test]
    async fn failed_erase_still_closes() {
        let mut f = fixture();
        let updates = f.events.subscribe();

        let broken = Arc::new(Geometry::from_positions(&[Vec3::ZERO; 3]).with_index(&[0, 1, 7]));
        f.viewer.scene.replace_geometry(f.mesh, broken.clone());

        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();
        f.editor
            .add_box(
                &mut f.viewer,
                Aabb::from_corners(Vec3::splat(-1.0), Vec3::splat(1.0)),
            )
            .unwrap();

        let err = f.editor.erase(&mut f.viewer).await.unwrap_err();
        assert!(matches!(err, EditorError::Erase(EraseError::Geometry(_))));
        assert_eq!(f.editor.state(), EditorState::Closed);
        assert_eq!(updates.try_recv(), Ok(AssetEvent::Updated(f.asset)));

        let mesh = f.viewer.scene.get(f.mesh).unwrap().kind.as_mesh().unwrap();
        assert!(Arc::ptr_eq(&mesh.geometry, &broken));
    }

    #[tokio::test]
    async fn mismatched_attributes_fail_without_panicking() {
        let mut f = fixture();
        let short = Arc::new(
            Geometry::from_positions(&[Vec3::ZERO, Vec3::X, Vec3::Z, Vec3::X, Vec3::Z, Vec3::ONE])
                .with_attribute(AttributeName::Uv, AttributeBuffer::from_f32(2, &[0.0, 0.0])),
        );
        f.viewer.scene.replace_geometry(f.mesh, short.clone());

        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();
        f.editor
            .add_box(
                &mut f.viewer,
                Aabb::from_corners(Vec3::splat(-2.0), Vec3::splat(2.0)),
            )
            .unwrap();

        let err = f.editor.erase(&mut f.viewer).await.unwrap_err();
        assert!(matches!(
            err,
            EditorError::Erase(EraseError::Geometry(DescriptorError::AttributeCount {
                name: AttributeName::Uv,
                ..
            }))
        ));
        assert_eq!(f.editor.state(), EditorState::Closed);

        let mesh = f.viewer.scene.get(f.mesh).unwrap().kind.as_mesh().unwrap();
        assert!(Arc::ptr_eq(&mesh.geometry, &short));
    }

    #[tokio::test]
    async fn abandoned_erase_leaves_editor_open() {
        let mut f = fixture();
        let config = EditorConfig {
            erase_chunk: 1,
            ..Default::default()
        };
        f.editor = MeshEditor::new(config, f.events.clone(), f.locks.clone());

        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();
        f.editor.set_orbit_lock(&mut f.viewer, true);
        f.editor
            .add_box(
                &mut f.viewer,
                Aabb::from_corners(Vec3::splat(-1.0), Vec3::splat(1.0)),
            )
            .unwrap();

        {
            let erase = f.editor.erase(&mut f.viewer);
            tokio::pin!(erase);
            tokio::select! {
                biased;
                _ = &mut erase => panic!("erase finished without yielding"),
                _ = std::future::ready(()) => {}
            }
        }

        assert_eq!(f.editor.state(), EditorState::Open);
        assert_eq!(triangle_count(&f), 200);

        let now = Instant::now();
        let response = f
            .editor
            .handle_pointer(&mut f.viewer, pointer(PointerPhase::Down, 400.0, 300.0, now));
        assert_eq!(response, PointerResponse::Consumed);
    }

    #[tokio::test]
    async fn erase_without_boxes_keeps_editor_open() {
        let mut f = fixture();
        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();
        let err = f.editor.erase(&mut f.viewer).await.unwrap_err();
        assert!(matches!(err, EditorError::Erase(EraseError::NothingSelected)));
        assert_eq!(f.editor.state(), EditorState::Open);
    }

    #[test]
    fn switching_assets_closes() {
        let mut f = fixture();
        f.editor.open(&mut f.viewer, f.asset, f.mesh).unwrap();

        f.events.publish(AssetEvent::Activated(f.asset));
        f.editor.process_events(&mut f.viewer);
        assert_eq!(f.editor.state(), EditorState::Open);

        f.events.publish(AssetEvent::Activated(AssetId(9)));
        f.editor.process_events(&mut f.viewer);
        assert_eq!(f.editor.state(), EditorState::Closed);
    }
}
