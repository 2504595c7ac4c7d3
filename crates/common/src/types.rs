use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned index of a networked form. Stable for the form's
/// networked lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteIndex(pub u32);

impl RemoteIndex {
    /// Sentinel standing for "the locally controlled form". Never handed out
    /// by the server and never allocated through `IdentifierMap::allocate`.
    pub const PLAYER: Self = Self(u32::MAX);

    pub fn is_player(self) -> bool {
        self == Self::PLAYER
    }
}

impl Default for RemoteIndex {
    fn default() -> Self {
        Self::PLAYER
    }
}

impl fmt::Display for RemoteIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_player() {
            f.write_str("player")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Object id inside the simulation (a reference or base record id).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FormId(pub u32);

impl FormId {
    pub const NONE: Self = Self(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Position, rotation (euler degrees) and the worldspace or cell holding them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    pub pos: Vec3,
    pub rot: Vec3,
    pub world_or_cell: FormId,
}

impl Transform {
    /// Euclidean distance in the horizontal plane, ignoring height.
    pub fn planar_distance(a: Vec3, b: Vec3) -> f32 {
        a.truncate().distance(b.truncate())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    #[default]
    Standing,
    Walking,
    Running,
    Sprinting,
}

/// Locomotion state of an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub pos: Vec3,
    pub rot: Vec3,
    pub world_or_cell: FormId,
    #[serde(default)]
    pub run_mode: RunMode,
    #[serde(default)]
    pub direction: f32,
    #[serde(default)]
    pub is_in_jump_state: bool,
    #[serde(default)]
    pub is_sneaking: bool,
    #[serde(default)]
    pub is_blocking: bool,
    #[serde(default)]
    pub is_weap_drawn: bool,
    #[serde(default)]
    pub is_dead: bool,
    #[serde(default = "full_health")]
    pub health_percentage: f32,
    #[serde(default)]
    pub speed: f32,
}

fn full_health() -> f32 {
    1.0
}

impl Movement {
    /// A standing, alive, full-health actor at the given transform.
    pub fn standing(transform: &Transform) -> Self {
        Self {
            pos: transform.pos,
            rot: transform.rot,
            world_or_cell: transform.world_or_cell,
            run_mode: RunMode::Standing,
            direction: 0.0,
            is_in_jump_state: false,
            is_sneaking: false,
            is_blocking: false,
            is_weap_drawn: false,
            is_dead: false,
            health_percentage: 1.0,
            speed: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tint {
    pub texture: String,
    pub argb: u32,
    #[serde(rename = "type")]
    pub kind: u32,
}

/// Character appearance: race, body and head data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Appearance {
    pub name: String,
    pub race_id: FormId,
    pub is_female: bool,
    pub weight: f32,
    pub skin_color: i32,
    pub hair_color: i32,
    pub headpart_ids: Vec<FormId>,
    pub head_texture_set_id: FormId,
    pub tints: Vec<Tint>,
    pub presets: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    pub base_id: FormId,
    pub count: i32,
    #[serde(default)]
    pub worn: bool,
    #[serde(default)]
    pub worn_left: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub entries: Vec<InventoryEntry>,
}

impl Inventory {
    /// Total item count across entries with the given base id.
    pub fn count_of(&self, base_id: FormId) -> i32 {
        self.entries
            .iter()
            .filter(|e| e.base_id == base_id)
            .map(|e| e.count)
            .sum()
    }
}

/// Worn items plus equipped spells.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Equipment {
    pub inv: Inventory,
    pub num_changes: u32,
    pub left_spell: Option<FormId>,
    pub right_spell: Option<FormId>,
    pub voice_spell: Option<FormId>,
}

/// Last animation event observed on a form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animation {
    pub anim_event_name: String,
    #[serde(default)]
    pub num_changes: u32,
}

/// Packed behavior-graph variables, forwarded untouched to the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimVariables {
    pub booleans: Vec<u8>,
    pub floats: Vec<u8>,
    pub integers: Vec<u8>,
}

/// Delivery class requested for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Reliability {
    #[default]
    Reliable,
    Unreliable,
}
