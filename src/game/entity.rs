//! Entities: addressable simulation objects composed of optional field groups
//!
//! An entity is identified across ticks by an [`EntityHandle`], the pair of its
//! reusable slot `id` and its `hash`. The hash is unique among alive entities
//! and drops to 0 on deletion, so a handle held from an earlier tick resolves
//! to "not found" once its entity is gone, even if the slot was reused.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::game::behavior::Behavior;
use crate::game::fields::{
    ArenaGroup, BarrelGroup, CameraGroup, FieldGroup, GroupChanges, GroupKind, HealthGroup,
    NameGroup, PhysicsGroup, PositionGroup, RelationsGroup, ScoreGroup, StyleGroup, TeamGroup,
};

/// Slot index of an entity; reused after deletion
pub type EntityId = u16;

/// Staleness-safe reference to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle {
    id: EntityId,
    hash: u32,
}

impl EntityHandle {
    pub(crate) const fn new(id: EntityId, hash: u32) -> Self {
        Self { id, hash }
    }

    #[inline]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[inline]
    pub const fn hash(&self) -> u32 {
        self.hash
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.id, self.hash)
    }
}

/// Entity lifecycle flags read by the cameras and the scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityState(u8);

impl EntityState {
    pub const NEEDS_UPDATE: EntityState = EntityState(1 << 0);
    pub const NEEDS_CREATE: EntityState = EntityState(1 << 1);
    pub const NEEDS_DELETE: EntityState = EntityState(1 << 2);

    #[inline]
    pub const fn empty() -> Self {
        EntityState(0)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: EntityState) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: EntityState) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: EntityState) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for EntityState {
    type Output = EntityState;

    fn bitor(self, rhs: EntityState) -> EntityState {
        EntityState(self.0 | rhs.0)
    }
}

/// Errors raised when resolving entities or their groups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    #[error("Stale entity handle {0}")]
    Stale(EntityHandle),
    #[error("Entity {entity} has no {group:?} group")]
    MissingGroup { entity: EntityHandle, group: GroupKind },
    #[error("Entity store full ({0} entities)")]
    StoreFull(usize),
}

// ============================================================================
// Group Table
// ============================================================================

macro_rules! group_table {
    ($( $field:ident, $field_mut:ident : $ty:ident => $kind:ident; )*) => {
        /// The optional capability bundles carried by an entity
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct Groups {
            $( pub $field: Option<$ty>, )*
        }

        impl Groups {
            /// Add a default-initialised group of the given kind
            pub fn with(mut self, kind: GroupKind) -> Self {
                match kind {
                    $( GroupKind::$kind => self.$field = Some($ty::default()), )*
                }
                self
            }

            pub fn has(&self, kind: GroupKind) -> bool {
                match kind {
                    $( GroupKind::$kind => self.$field.is_some(), )*
                }
            }

            /// Clear the dirty bits of every present group
            pub fn wipe(&mut self) {
                $(
                    if let Some(group) = self.$field.as_mut() {
                        group.wipe();
                    }
                )*
            }

            pub fn is_dirty(&self) -> bool {
                false $( || self.$field.as_ref().is_some_and(|g| g.is_dirty()) )*
            }

            /// Dirty fields of every present group; clean groups are omitted
            pub fn changes(&self) -> Vec<GroupChanges> {
                let mut out = Vec::new();
                $(
                    if let Some(group) = self.$field.as_ref() {
                        if group.is_dirty() {
                            out.push(GroupChanges { kind: GroupKind::$kind, fields: group.changes() });
                        }
                    }
                )*
                out
            }

            /// Every field of every present group
            pub fn snapshot(&self) -> Vec<GroupChanges> {
                let mut out = Vec::new();
                $(
                    if let Some(group) = self.$field.as_ref() {
                        out.push(GroupChanges { kind: GroupKind::$kind, fields: group.snapshot() });
                    }
                )*
                out
            }
        }

        impl Entity {
            $(
                /// Checked group access; an absent group is a caller error
                pub fn $field(&self) -> Result<&$ty, EntityError> {
                    self.groups.$field.as_ref().ok_or(EntityError::MissingGroup {
                        entity: self.handle(),
                        group: GroupKind::$kind,
                    })
                }

                pub fn $field_mut(&mut self) -> Result<&mut $ty, EntityError> {
                    let entity = self.handle();
                    self.groups.$field.as_mut().ok_or(EntityError::MissingGroup {
                        entity,
                        group: GroupKind::$kind,
                    })
                }
            )*
        }
    };
}

group_table! {
    relations, relations_mut: RelationsGroup => Relations;
    barrel, barrel_mut: BarrelGroup => Barrel;
    physics, physics_mut: PhysicsGroup => Physics;
    health, health_mut: HealthGroup => Health;
    arena, arena_mut: ArenaGroup => Arena;
    name, name_mut: NameGroup => Name;
    camera, camera_mut: CameraGroup => Camera;
    position, position_mut: PositionGroup => Position;
    style, style_mut: StyleGroup => Style;
    score, score_mut: ScoreGroup => Score;
    team, team_mut: TeamGroup => Team;
}

// ============================================================================
// Entity
// ============================================================================

/// Construction parameters for [`EntityStore::create`](crate::game::store::EntityStore::create)
pub struct EntityBuilder {
    pub(crate) kind: &'static str,
    pub(crate) groups: Groups,
    pub(crate) global: bool,
    pub(crate) behavior: Option<Box<dyn Behavior>>,
}

impl EntityBuilder {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            groups: Groups::default(),
            global: false,
            behavior: None,
        }
    }

    pub fn with(mut self, kind: GroupKind) -> Self {
        self.groups = self.groups.with(kind);
        self
    }

    pub fn groups(mut self, groups: Groups) -> Self {
        self.groups = groups;
        self
    }

    /// Visible to every camera regardless of viewport
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn behavior(mut self, behavior: impl Behavior + 'static) -> Self {
        self.behavior = Some(Box::new(behavior));
        self
    }
}

/// A simulation object
pub struct Entity {
    id: EntityId,
    hash: u32,
    preserved_hash: u32,
    z_index: u64,
    kind: &'static str,
    global: bool,
    pub state: EntityState,
    pub groups: Groups,
    pub(crate) behavior: Option<Box<dyn Behavior>>,
}

impl Entity {
    pub(crate) fn new(id: EntityId, hash: u32, z_index: u64, builder: EntityBuilder) -> Self {
        Self {
            id,
            hash,
            preserved_hash: hash,
            z_index,
            kind: builder.kind,
            global: builder.global,
            state: EntityState::NEEDS_CREATE | EntityState::NEEDS_UPDATE,
            groups: builder.groups,
            behavior: builder.behavior,
        }
    }

    /// True iff `entity` is present and has not been deleted
    pub fn exists(entity: Option<&Entity>) -> bool {
        entity.is_some_and(|e| e.hash != 0)
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Current hash, 0 once deleted
    #[inline]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Hash assigned at creation; survives deletion for diagnostics
    #[inline]
    pub fn preserved_hash(&self) -> u32 {
        self.preserved_hash
    }

    /// Creation-order sequence number
    #[inline]
    pub fn z_index(&self) -> u64 {
        self.z_index
    }

    #[inline]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[inline]
    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn handle(&self) -> EntityHandle {
        EntityHandle::new(self.id, self.preserved_hash)
    }

    /// Whether anything about this entity must be replicated
    pub fn is_dirty(&self) -> bool {
        !self.state.is_empty() || self.groups.is_dirty()
    }

    /// Makes the entity no longer in need of update
    pub fn wipe_state(&mut self) {
        self.groups.wipe();
        self.state = EntityState::empty();
    }

    /// Terminal transition performed by the store on deletion
    pub(crate) fn kill(&mut self) {
        self.wipe_state();
        self.hash = 0;
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("hash", &self.hash)
            .field("preserved_hash", &self.preserved_hash)
            .field("z_index", &self.z_index)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}, {}>", self.kind, self.id, self.preserved_hash)?;
        if self.hash == 0 {
            write!(f, "(deleted)")?;
        }
        Ok(())
    }
}
