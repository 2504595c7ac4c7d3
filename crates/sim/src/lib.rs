//! Simulation adapter: the narrow surface the replication core needs from
//! the live simulation it feeds.
//!
//! # Invariants
//! - The core never holds simulation handles across continuations; it
//!   resolves a [`FormId`] again every time it acts.
//! - Every mutation goes through a [`Simulation`] command.
//!
//! [`HeadlessSimulation`] is an in-memory implementation that records each
//! command. It backs the tests and the CLI replay tool.

mod headless;

pub use headless::{HeadlessSimulation, SimCall, SimObject};

use formsync_common::{AnimVariables, Appearance, Equipment, FormId, Inventory, Transform};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Base record category of a simulated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BaseType {
    Actor,
    Container,
    Furniture,
    Door,
    Flora,
    #[default]
    Other,
}

/// Interface screens the core cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Menu {
    Container,
    RaceSex,
    Console,
}

/// In-game clock handed to a world load.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GameTime {
    pub hours: f32,
    pub minutes: f32,
    pub seconds: f32,
}

impl GameTime {
    /// Clock at the start of the given hour.
    pub fn at_hour(hours: f32) -> Self {
        Self {
            hours,
            minutes: 0.0,
            seconds: 0.0,
        }
    }
}

/// Everything the simulation needs to load the player into the world.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub transform: Transform,
    pub appearance: Option<Appearance>,
    pub load_order: Vec<String>,
    pub time: GameTime,
}

/// A spell cast forwarded from another client.
#[derive(Debug, Clone, PartialEq)]
pub struct CastRequest {
    pub caster: FormId,
    pub casting_source: u32,
    pub spell: FormId,
    pub target: FormId,
    pub aim_angle: f32,
    pub aim_heading: f32,
    pub variables: AnimVariables,
}

/// Failures reported by simulation commands.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// The object cannot take the requested state and must be recreated.
    #[error("object must be respawned")]
    RespawnNeeded,
    #[error("object {0} not found")]
    NotFound(FormId),
    #[error("simulation command failed: {0}")]
    Failed(String),
}

/// The live simulation as seen by the replication core.
///
/// Queries take `&self`; commands take `&mut self`. Implementations must not
/// call back into the core.
pub trait Simulation {
    /// Handle of the locally controlled actor, if one exists right now.
    fn player(&self) -> Option<FormId>;

    /// Base type of `id` if the object currently resolves.
    fn resolve(&self, id: FormId) -> Option<BaseType>;

    /// Display name of the object's base record.
    fn base_name(&self, id: FormId) -> Option<String>;

    fn position(&self, id: FormId) -> Option<Vec3>;

    /// Live handle the view spawned for the form in world-model `slot`.
    fn form_view(&self, slot: usize) -> Option<FormId>;

    /// Content files currently loaded, in load order.
    fn load_order(&self) -> Vec<String>;

    fn game_hour(&self) -> f32;

    fn is_menu_open(&self, menu: Menu) -> bool;

    /// True while a menu is shown that inventory changes would corrupt.
    fn is_blocking_menu_shown(&self) -> bool;

    /// Furniture `actor` is currently using.
    fn furniture_of(&self, actor: FormId) -> Option<FormId>;

    /// True while the object is ragdolled or otherwise detached from its
    /// character controller.
    fn is_physics_detached(&self, id: FormId) -> bool;

    fn equipped_spell(&self, actor: FormId, casting_source: u32) -> Option<FormId>;

    fn load_world(&mut self, request: LoadRequest);

    fn move_to(&mut self, id: FormId, transform: &Transform);

    /// Begin re-attaching a detached object. Completion is observed through
    /// [`Simulation::is_physics_detached`].
    fn clear_physics_detached(&mut self, id: FormId);

    fn apply_inventory(&mut self, id: FormId, inventory: &Inventory);

    fn apply_equipment(&mut self, id: FormId, equipment: &Equipment);

    fn apply_player_appearance(&mut self, appearance: &Appearance);

    fn set_open(&mut self, id: FormId, open: bool);

    fn set_harvested(&mut self, id: FormId, harvested: bool);

    fn set_disabled(&mut self, id: FormId, disabled: bool);

    fn set_node_scale(&mut self, id: FormId, scale: &Value);

    fn set_node_texture_set(&mut self, id: FormId, texture_set: &Value);

    /// Returns false when the animation graph rejected the event.
    fn play_animation(&mut self, id: FormId, anim_event: &str) -> bool;

    fn set_display_name(&mut self, id: FormId, name: &str);

    fn set_actor_value(&mut self, id: FormId, name: &str, value: f32);

    fn set_actor_value_percentage(&mut self, id: FormId, name: &str, fraction: f32);

    /// Drop every known spell and learn `spells`.
    fn replace_spells(&mut self, id: FormId, spells: &[FormId]);

    fn apply_death_state(&mut self, id: FormId, is_dead: bool) -> Result<(), SimError>;

    fn disable_and_delete(&mut self, id: FormId);

    fn unequip_item(&mut self, actor: FormId, item: FormId);

    fn show_race_menu(&mut self);

    /// Leave the simulated world for the non-simulated front end.
    fn quit_to_main_menu(&mut self);

    fn activate(&mut self, target: FormId, activator: FormId);

    fn interrupt_cast(&mut self, actor: FormId, casting_source: u32, variables: &AnimVariables);

    fn cast_spell(&mut self, request: CastRequest);

    /// Returns false when the variables could not be applied.
    fn apply_anim_variables(&mut self, actor: FormId, variables: &AnimVariables) -> bool;
}
