//! Per-connection visibility and replication compiler
//!
//! Once per tick every camera compares what its client knows against what it
//! should see now and emits create/update/delete records. Deletes come first,
//! ordered by the zIndex recorded when the entity was first seen, then creates
//! and updates in zIndex order. A client never receives an update or delete
//! for an entity it was not sent a create for.

use rustc_hash::FxHashSet;

use crate::game::constants::view::{MIN_FOV, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::game::entity::{Entity, EntityBuilder, EntityError, EntityHandle, EntityState};
use crate::game::fields::GroupKind;
use crate::game::store::EntityStore;
use crate::net::protocol::EntityRecord;

/// World-space rectangle seen by a camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub half_width: f32,
    pub half_height: f32,
}

impl Viewport {
    pub fn from_fov(x: f32, y: f32, fov: f32) -> Self {
        let fov = fov.max(MIN_FOV);
        Self {
            x,
            y,
            half_width: SCREEN_WIDTH / fov / 2.0,
            half_height: SCREEN_HEIGHT / fov / 2.0,
        }
    }

    /// Whether a circle of `radius` at `(x, y)` overlaps the viewport
    #[inline]
    pub fn overlaps(&self, x: f32, y: f32, radius: f32) -> bool {
        (x - self.x).abs() <= self.half_width + radius && (y - self.y).abs() <= self.half_height + radius
    }
}

/// The replication state of one connection
#[derive(Debug)]
pub struct Camera {
    entity: EntityHandle,
    /// (zIndex when first seen, handle), kept sorted by zIndex
    visible: Vec<(u64, EntityHandle)>,
}

impl Camera {
    /// Register the camera entity for a new connection
    pub fn create(store: &mut EntityStore) -> Result<Self, EntityError> {
        let entity = store.create(
            EntityBuilder::new("Camera")
                .with(GroupKind::Camera)
                .with(GroupKind::Relations),
        )?;
        Ok(Self {
            entity,
            visible: Vec::new(),
        })
    }

    /// Handle of the camera entity carrying this connection's view state
    #[inline]
    pub fn entity(&self) -> EntityHandle {
        self.entity
    }

    /// The live tank controlled through this camera, if any
    pub fn player(&self, store: &EntityStore) -> Option<EntityHandle> {
        let player = store.get(self.entity).ok()?.camera().ok()?.player()?;
        store.exists(player).then_some(player)
    }

    pub fn viewport(&self, store: &EntityStore) -> Result<Viewport, EntityError> {
        let camera = store.get(self.entity)?.camera()?;
        Ok(Viewport::from_fov(camera.camera_x(), camera.camera_y(), camera.fov()))
    }

    pub fn is_visible(&self, handle: EntityHandle) -> bool {
        self.visible.iter().any(|(_, h)| *h == handle)
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }

    fn should_see(&self, entity: &Entity, viewport: &Viewport, player: Option<EntityHandle>) -> bool {
        if entity.state.contains(EntityState::NEEDS_DELETE) {
            return false;
        }
        let handle = entity.handle();
        if handle == self.entity || Some(handle) == player || entity.is_global() {
            return true;
        }
        let Some(position) = entity.groups.position.as_ref() else {
            return false;
        };
        let radius = entity
            .groups
            .physics
            .as_ref()
            .map_or(0.0, |p| p.size().max(p.width()));
        viewport.overlaps(position.x(), position.y(), radius)
    }

    /// Compile this tick's records and advance the visible set
    pub fn compile(&mut self, store: &EntityStore) -> Result<Vec<EntityRecord>, EntityError> {
        let viewport = self.viewport(store)?;
        let player = self.player(store);

        let mut next: Vec<(u64, EntityHandle)> = Vec::with_capacity(self.visible.len());
        let mut seen: FxHashSet<EntityHandle> = FxHashSet::default();
        for entity in store.iter() {
            if self.should_see(entity, &viewport, player) {
                next.push((entity.z_index(), entity.handle()));
                seen.insert(entity.handle());
            }
        }

        let previous: FxHashSet<EntityHandle> = self.visible.iter().map(|(_, h)| *h).collect();
        let mut records = Vec::new();

        for (_, handle) in &self.visible {
            if !seen.contains(handle) {
                records.push(EntityRecord::Delete { entity: *handle });
            }
        }

        for (_, handle) in &next {
            let entity = store.get(*handle)?;
            if !previous.contains(handle) {
                records.push(EntityRecord::Create {
                    entity: *handle,
                    kind: entity.kind().to_string(),
                    groups: entity.groups.snapshot(),
                });
            } else {
                let groups = entity.groups.changes();
                if !groups.is_empty() {
                    records.push(EntityRecord::Update {
                        entity: *handle,
                        groups,
                    });
                }
            }
        }

        self.visible = next;
        Ok(records)
    }

    /// Delete the camera entity; the connection is going away
    pub fn destroy(self, store: &mut EntityStore) {
        store.delete(self.entity);
    }
}
