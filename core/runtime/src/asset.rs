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

//! Loaded assets, their lifecycle events, and per-asset work leases.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{scene::NodeId, viewer::Viewer};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId(pub u32);

/// A GLB that has been loaded into the scene.
#[derive(Clone, Debug)]
pub struct Asset {
    pub id: AssetId,

    /// The source file name, extension included.
    pub name: String,

    /// The node every part of this asset hangs from.
    pub root: NodeId,
}

/// Asset lifecycle notifications.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssetEvent {
    Loaded(AssetId),
    Activated(AssetId),
    Cleaned(AssetId),

    /// The asset's geometry was modified in place.
    Updated(AssetId),
}

impl AssetEvent {
    pub fn asset(&self) -> AssetId {
        match self {
            AssetEvent::Loaded(id)
            | AssetEvent::Activated(id)
            | AssetEvent::Cleaned(id)
            | AssetEvent::Updated(id) => *id,
        }
    }
}

/// A fan-out of [AssetEvent]s to any number of subscribers.
///
/// Cloning shares the subscriber list. Subscribers whose receivers were
/// dropped are pruned on the next publish.
#[derive(Clone, Debug, Default)]
pub struct AssetEvents {
    subscribers: Arc<Mutex<Vec<flume::Sender<AssetEvent>>>>,
}

impl AssetEvents {
    pub fn subscribe(&self) -> flume::Receiver<AssetEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: AssetEvent) {
        debug!(?event, "publishing asset event");
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event).is_ok());
    }
}

/// The kind of work holding an asset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaseKind {
    Export,
    Edit,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("asset {asset:?} is busy with {held:?}")]
pub struct AssetBusy {
    pub asset: AssetId,
    pub held: LeaseKind,
}

/// Per-asset mutual exclusion between export and edit sessions.
#[derive(Clone, Debug, Default)]
pub struct AssetLocks {
    held: Arc<Mutex<HashMap<AssetId, LeaseKind>>>,
}

impl AssetLocks {
    pub fn try_acquire(&self, asset: AssetId, kind: LeaseKind) -> Result<AssetLease, AssetBusy> {
        let mut held = self.held.lock();
        if let Some(held) = held.get(&asset) {
            return Err(AssetBusy {
                asset,
                held: *held,
            });
        }

        held.insert(asset, kind);
        Ok(AssetLease {
            locks: self.clone(),
            asset,
            kind,
        })
    }

    pub fn holder(&self, asset: AssetId) -> Option<LeaseKind> {
        self.held.lock().get(&asset).copied()
    }
}

/// Exclusive access to one asset. Released on drop.
#[derive(Debug)]
pub struct AssetLease {
    locks: AssetLocks,
    asset: AssetId,
    kind: LeaseKind,
}

impl AssetLease {
    pub fn asset(&self) -> AssetId {
        self.asset
    }

    pub fn kind(&self) -> LeaseKind {
        self.kind
    }
}

impl Drop for AssetLease {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.asset);
    }
}

/// Tracks loaded assets and which one is active.
#[derive(Debug, Default)]
pub struct AssetRegistry {
    assets: HashMap<AssetId, Asset>,
    next_id: u32,
    active: Option<AssetId>,
    events: AssetEvents,
}

impl AssetRegistry {
    pub fn new(events: AssetEvents) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn events(&self) -> &AssetEvents {
        &self.events
    }

    /// Parses a GLB into the viewer's scene and registers it.
    pub fn load_glb(
        &mut self,
        viewer: &mut impl Viewer,
        name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<AssetId> {
        let root = crate::glb::load_glb(bytes, viewer.scene_mut(), name)?;
        Ok(self.insert(name, root))
    }

    /// Registers a subtree that is already in the scene.
    pub fn insert(&mut self, name: &str, root: NodeId) -> AssetId {
        let id = AssetId(self.next_id);
        self.next_id += 1;

        info!("loaded asset {name:?} as {id:?}");
        self.assets.insert(
            id,
            Asset {
                id,
                name: name.to_string(),
                root,
            },
        );

        self.events.publish(AssetEvent::Loaded(id));
        id
    }

    /// Makes an asset the active one. Returns false for unknown ids.
    pub fn activate(&mut self, id: AssetId) -> bool {
        if !self.assets.contains_key(&id) {
            return false;
        }

        self.active = Some(id);
        self.events.publish(AssetEvent::Activated(id));
        true
    }

    /// Removes an asset and disposes its nodes.
    pub fn clean(&mut self, viewer: &mut impl Viewer, id: AssetId) -> Option<Asset> {
        let asset = self.assets.remove(&id)?;
        viewer.dispose_subtree(asset.root);

        if self.active == Some(id) {
            self.active = None;
        }

        info!("cleaned asset {:?}", asset.name);
        self.events.publish(AssetEvent::Cleaned(id));
        Some(asset)
    }

    pub fn get(&self, id: AssetId) -> Option<&Asset> {
        self.assets.get(&id)
    }

    pub fn active(&self) -> Option<&Asset> {
        self.active.and_then(|id| self.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scene::Node, viewer::HeadlessViewer};

    #[test]
    fn leases_are_exclusive_until_dropped() {
        let locks = AssetLocks::default();
        let asset = AssetId(3);

        let lease = locks.try_acquire(asset, LeaseKind::Export).unwrap();
        let busy = locks.try_acquire(asset, LeaseKind::Edit).unwrap_err();
        assert_eq!(busy.held, LeaseKind::Export);
        assert!(locks.try_acquire(AssetId(4), LeaseKind::Edit).is_ok());

        drop(lease);
        assert_eq!(locks.holder(asset), None);
        assert!(locks.try_acquire(asset, LeaseKind::Edit).is_ok());
    }

    #[test]
    fn registry_publishes_lifecycle() {
        let events = AssetEvents::default();
        let rx = events.subscribe();
        let mut registry = AssetRegistry::new(events);
        let mut viewer = HeadlessViewer::default();

        let root = viewer.scene.add(Node::group("chair.glb"), None);
        let id = registry.insert("chair.glb", root);
        assert!(registry.activate(id));
        assert!(!registry.activate(AssetId(99)));
        assert_eq!(registry.active().unwrap().root, root);

        registry.clean(&mut viewer, id).unwrap();
        assert!(registry.active().is_none());
        assert!(viewer.scene.is_empty());

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                AssetEvent::Loaded(id),
                AssetEvent::Activated(id),
                AssetEvent::Cleaned(id)
            ]
        );
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let events = AssetEvents::default();
        drop(events.subscribe());
        let live = events.subscribe();
        events.publish(AssetEvent::Updated(AssetId(0)));
        assert_eq!(events.subscribers.lock().len(), 1);
        assert_eq!(live.recv().unwrap(), AssetEvent::Updated(AssetId(0)));
    }
}
