//! Field groups with per-field dirty tracking
//!
//! A field group is a bundle of related attributes carried by an entity. Every
//! setter compares against the current value and, on change, sets exactly the
//! bit of the written field. Cameras read the dirty bits to build partial
//! updates, and the scheduler wipes them once every connection has compiled.
//!
//! Groups never know which entity carries them.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::game::constants::{Color, SCOREBOARD_SLOTS};
use crate::game::entity::EntityHandle;

// ============================================================================
// Group Kinds & Field Values
// ============================================================================

/// Identifies a field group (order matches the wire table order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum GroupKind {
    Relations,
    Barrel,
    Physics,
    Health,
    Arena,
    Name,
    Camera,
    Position,
    Style,
    Score,
    Team,
}

impl GroupKind {
    pub const ALL: [GroupKind; 11] = [
        GroupKind::Relations,
        GroupKind::Barrel,
        GroupKind::Physics,
        GroupKind::Health,
        GroupKind::Arena,
        GroupKind::Name,
        GroupKind::Camera,
        GroupKind::Position,
        GroupKind::Style,
        GroupKind::Score,
        GroupKind::Team,
    ];
}

/// One scoreboard row as shown to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreboardSlot {
    pub color: Color,
    pub name: String,
    pub score: f32,
    /// Tank type marker, -1 for rows that are not a tank
    pub tank: i32,
    pub suffix: String,
}

impl Default for ScoreboardSlot {
    fn default() -> Self {
        Self {
            color: Color::Neutral,
            name: String::new(),
            score: 0.0,
            tank: -1,
            suffix: String::new(),
        }
    }
}

/// Replicated value of a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    F32(f32),
    U32(u32),
    I32(i32),
    Text(String),
    Entity(Option<EntityHandle>),
    Color(Color),
    Slot(ScoreboardSlot),
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::F32(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U32(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::I32(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<Option<EntityHandle>> for FieldValue {
    fn from(v: Option<EntityHandle>) -> Self {
        FieldValue::Entity(v)
    }
}

impl From<Color> for FieldValue {
    fn from(v: Color) -> Self {
        FieldValue::Color(v)
    }
}

impl From<ScoreboardSlot> for FieldValue {
    fn from(v: ScoreboardSlot) -> Self {
        FieldValue::Slot(v)
    }
}

/// A field index within its group paired with the value to replicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: u8,
    pub value: FieldValue,
}

/// All replicated fields of one group in a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupChanges {
    pub kind: GroupKind,
    pub fields: SmallVec<[FieldChange; 4]>,
}

/// Common behaviour of every field group
pub trait FieldGroup {
    const KIND: GroupKind;

    /// Bitmask of fields written since the last wipe
    fn dirty_mask(&self) -> u32;

    /// Clear every dirty bit
    fn wipe(&mut self);

    /// Fields whose dirty bit is set, in field order
    fn changes(&self) -> SmallVec<[FieldChange; 4]>;

    /// Every field regardless of dirty state, in field order
    fn snapshot(&self) -> SmallVec<[FieldChange; 4]>;

    #[inline]
    fn is_dirty(&self) -> bool {
        self.dirty_mask() != 0
    }
}

// ============================================================================
// Group Definitions
// ============================================================================

macro_rules! field_group {
    (
        $(#[$meta:meta])*
        pub struct $name:ident : $kind:ident, $fields:ident {
            $( $(#[$fmeta:meta])* $variant:ident => $field:ident, $setter:ident : $ty:ty = $default:expr, )*
        }
    ) => {
        #[doc = concat!("Field indices of [`", stringify!($name), "`]")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum $fields {
            $( $variant, )*
        }

        impl $fields {
            #[inline]
            pub const fn bit(self) -> u32 {
                1 << (self as u8)
            }
        }

        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* $field: $ty, )*
            state: u32,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $( $field: $default, )*
                    state: 0,
                }
            }
        }

        impl $name {
            $(
                #[inline]
                pub fn $field(&self) -> $ty {
                    self.$field.clone()
                }

                pub fn $setter(&mut self, value: $ty) {
                    if self.$field == value {
                        return;
                    }
                    self.$field = value;
                    self.state |= $fields::$variant.bit();
                }
            )*

            /// Whether the given field was written since the last wipe
            #[inline]
            pub fn is_field_dirty(&self, field: $fields) -> bool {
                self.state & field.bit() != 0
            }
        }

        impl FieldGroup for $name {
            const KIND: GroupKind = GroupKind::$kind;

            #[inline]
            fn dirty_mask(&self) -> u32 {
                self.state
            }

            #[inline]
            fn wipe(&mut self) {
                self.state = 0;
            }

            fn changes(&self) -> SmallVec<[FieldChange; 4]> {
                let mut out = SmallVec::new();
                $(
                    if self.state & $fields::$variant.bit() != 0 {
                        out.push(FieldChange {
                            field: $fields::$variant as u8,
                            value: self.$field.clone().into(),
                        });
                    }
                )*
                out
            }

            fn snapshot(&self) -> SmallVec<[FieldChange; 4]> {
                let mut out = SmallVec::new();
                $(
                    out.push(FieldChange {
                        field: $fields::$variant as u8,
                        value: self.$field.clone().into(),
                    });
                )*
                out
            }
        }
    };
}

field_group! {
    /// Ownership links between entities
    pub struct RelationsGroup: Relations, RelationsField {
        Parent => parent, set_parent: Option<EntityHandle> = None,
        Owner => owner, set_owner: Option<EntityHandle> = None,
        Team => team, set_team: Option<EntityHandle> = None,
    }
}

field_group! {
    /// Barrel shooting state
    pub struct BarrelGroup: Barrel, BarrelField {
        Flags => flags, set_flags: u32 = 0,
        ReloadTime => reload_time, set_reload_time: f32 = 15.0,
        TrackingBarrel => tracking_barrel, set_tracking_barrel: u32 = 0,
    }
}

field_group! {
    /// Collision shape and physical response
    pub struct PhysicsGroup: Physics, PhysicsField {
        Flags => flags, set_flags: u32 = 0,
        /// Polygon side count; 0 marks a non-solid entity such as a spectator
        Sides => sides, set_sides: u32 = 0,
        Size => size, set_size: f32 = 0.0,
        Width => width, set_width: f32 = 0.0,
        AbsorbtionFactor => absorbtion_factor, set_absorbtion_factor: f32 = 1.0,
        Pushback => pushback, set_pushback: f32 = 0.0,
    }
}

field_group! {
    /// Health bar
    pub struct HealthGroup: Health, HealthField {
        Flags => flags, set_flags: u32 = 0,
        Health => health, set_health: f32 = 1.0,
        MaxHealth => max_health, set_max_health: f32 = 1.0,
    }
}

field_group! {
    /// Display name
    pub struct NameGroup: Name, NameField {
        Flags => flags, set_flags: u32 = 0,
        Name => name, set_name: String = String::new(),
    }
}

field_group! {
    /// Per-connection view state and player progression
    pub struct CameraGroup: Camera, CameraField {
        Flags => flags, set_flags: u32 = 0,
        Player => player, set_player: Option<EntityHandle> = None,
        Fov => fov, set_fov: f32 = 0.35,
        Level => level, set_level: u32 = 1,
        Tank => tank, set_tank: i32 = 0,
        LevelProgress => level_progress, set_level_progress: f32 = 0.0,
        Score => score, set_score: f32 = 0.0,
        RespawnLevel => respawn_level, set_respawn_level: u32 = 0,
        CameraX => camera_x, set_camera_x: f32 = 0.0,
        CameraY => camera_y, set_camera_y: f32 = 0.0,
    }
}

field_group! {
    /// World position and facing
    pub struct PositionGroup: Position, PositionField {
        X => x, set_x: f32 = 0.0,
        Y => y, set_y: f32 = 0.0,
        Angle => angle, set_angle: f32 = 0.0,
        Flags => flags, set_flags: u32 = 0,
    }
}

field_group! {
    /// Rendering style
    pub struct StyleGroup: Style, StyleField {
        Flags => flags, set_flags: u32 = 1,
        Color => color, set_color: Color = Color::Neutral,
        BorderWidth => border_width, set_border_width: f32 = 7.5,
        Opacity => opacity, set_opacity: f32 = 1.0,
        ZIndex => z_index, set_z_index: u32 = 0,
    }
}

field_group! {
    /// Score shown on an entity
    pub struct ScoreGroup: Score, ScoreField {
        Score => score, set_score: f32 = 0.0,
    }
}

field_group! {
    /// Team colour and mothership link
    pub struct TeamGroup: Team, TeamField {
        TeamColor => team_color, set_team_color: Color = Color::Neutral,
        Mothership => mothership, set_mothership: Option<EntityHandle> = None,
    }
}

// ============================================================================
// Arena Group (scalar fields plus the scoreboard table)
// ============================================================================

/// Field indices of [`ArenaGroup`]
///
/// Scoreboard rows are addressed as `ScoreboardSlot0 + index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ArenaField {
    Flags,
    LeftX,
    RightX,
    TopY,
    BottomY,
    ScoreboardAmount,
    LeaderX,
    LeaderY,
    PlayerCount,
    Ticks,
    ScoreboardSlot0,
}

impl ArenaField {
    #[inline]
    pub const fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

#[inline]
const fn slot_bit(index: usize) -> u32 {
    1 << (ArenaField::ScoreboardSlot0 as usize + index)
}

/// Arena flag: clients draw an arrow toward the leader
pub const ARENA_FLAG_SHOWS_LEADER_ARROW: u32 = 1 << 1;

/// Health flag: incoming damage is ignored
pub const HEALTH_FLAG_INVINCIBLE: u32 = 1 << 0;

/// Arena-wide metadata: bounds, leader marker and scoreboard
#[derive(Debug, Clone, PartialEq)]
pub struct ArenaGroup {
    flags: u32,
    left_x: f32,
    right_x: f32,
    top_y: f32,
    bottom_y: f32,
    scoreboard_amount: u32,
    leader_x: f32,
    leader_y: f32,
    player_count: u32,
    ticks: u32,
    scoreboard: [ScoreboardSlot; SCOREBOARD_SLOTS],
    state: u32,
}

impl Default for ArenaGroup {
    fn default() -> Self {
        Self {
            flags: 0,
            left_x: 0.0,
            right_x: 0.0,
            top_y: 0.0,
            bottom_y: 0.0,
            scoreboard_amount: 0,
            leader_x: 0.0,
            leader_y: 0.0,
            player_count: 0,
            ticks: 0,
            scoreboard: Default::default(),
            state: 0,
        }
    }
}

macro_rules! arena_scalar {
    ($( $variant:ident => $field:ident, $setter:ident : $ty:ty; )*) => {
        $(
            #[inline]
            pub fn $field(&self) -> $ty {
                self.$field
            }

            pub fn $setter(&mut self, value: $ty) {
                if self.$field == value {
                    return;
                }
                self.$field = value;
                self.state |= ArenaField::$variant.bit();
            }
        )*

        fn scalar_fields(&self) -> [(ArenaField, FieldValue); 10] {
            [$( (ArenaField::$variant, self.$field.into()), )*]
        }
    };
}

impl ArenaGroup {
    arena_scalar! {
        Flags => flags, set_flags: u32;
        LeftX => left_x, set_left_x: f32;
        RightX => right_x, set_right_x: f32;
        TopY => top_y, set_top_y: f32;
        BottomY => bottom_y, set_bottom_y: f32;
        ScoreboardAmount => scoreboard_amount, set_scoreboard_amount: u32;
        LeaderX => leader_x, set_leader_x: f32;
        LeaderY => leader_y, set_leader_y: f32;
        PlayerCount => player_count, set_player_count: u32;
        Ticks => ticks, set_ticks: u32;
    }

    /// Read a scoreboard row
    ///
    /// # Panics
    /// Panics if `index >= SCOREBOARD_SLOTS`.
    pub fn scoreboard_slot(&self, index: usize) -> &ScoreboardSlot {
        &self.scoreboard[index]
    }

    /// Overwrite a scoreboard row, marking it dirty only if it changed
    ///
    /// # Panics
    /// Panics if `index >= SCOREBOARD_SLOTS`.
    pub fn set_scoreboard_slot(&mut self, index: usize, slot: ScoreboardSlot) {
        if self.scoreboard[index] == slot {
            return;
        }
        self.scoreboard[index] = slot;
        self.state |= slot_bit(index);
    }

    pub fn is_field_dirty(&self, field: ArenaField) -> bool {
        self.state & field.bit() != 0
    }

    pub fn is_slot_dirty(&self, index: usize) -> bool {
        self.state & slot_bit(index) != 0
    }

    fn collect(&self, only_dirty: bool) -> SmallVec<[FieldChange; 4]> {
        let mut out = SmallVec::new();
        for (field, value) in self.scalar_fields() {
            if !only_dirty || self.state & field.bit() != 0 {
                out.push(FieldChange { field: field as u8, value });
            }
        }
        for (index, slot) in self.scoreboard.iter().enumerate() {
            if !only_dirty || self.state & slot_bit(index) != 0 {
                out.push(FieldChange {
                    field: ArenaField::ScoreboardSlot0 as u8 + index as u8,
                    value: slot.clone().into(),
                });
            }
        }
        out
    }
}

impl FieldGroup for ArenaGroup {
    const KIND: GroupKind = GroupKind::Arena;

    #[inline]
    fn dirty_mask(&self) -> u32 {
        self.state
    }

    #[inline]
    fn wipe(&mut self) {
        self.state = 0;
    }

    fn changes(&self) -> SmallVec<[FieldChange; 4]> {
        self.collect(true)
    }

    fn snapshot(&self) -> SmallVec<[FieldChange; 4]> {
        self.collect(false)
    }
}
