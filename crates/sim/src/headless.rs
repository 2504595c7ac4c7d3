use crate::{BaseType, CastRequest, LoadRequest, Menu, SimError, Simulation};
use formsync_common::{AnimVariables, Appearance, Equipment, FormId, Inventory, Transform};
use glam::Vec3;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One command received by [`HeadlessSimulation`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    LoadWorld(LoadRequest),
    MoveTo { id: FormId, transform: Transform },
    ClearPhysicsDetached(FormId),
    ApplyInventory { id: FormId, inventory: Inventory },
    ApplyEquipment { id: FormId, equipment: Equipment },
    ApplyPlayerAppearance(Appearance),
    SetOpen { id: FormId, open: bool },
    SetHarvested { id: FormId, harvested: bool },
    SetDisabled { id: FormId, disabled: bool },
    SetNodeScale { id: FormId, scale: Value },
    SetNodeTextureSet { id: FormId, texture_set: Value },
    PlayAnimation { id: FormId, anim_event: String, accepted: bool },
    SetDisplayName { id: FormId, name: String },
    SetActorValue { id: FormId, name: String, value: f32 },
    SetActorValuePercentage { id: FormId, name: String, fraction: f32 },
    ReplaceSpells { id: FormId, spells: Vec<FormId> },
    ApplyDeathState { id: FormId, is_dead: bool },
    DisableAndDelete(FormId),
    UnequipItem { actor: FormId, item: FormId },
    ShowRaceMenu,
    QuitToMainMenu,
    Activate { target: FormId, activator: FormId },
    InterruptCast { actor: FormId, casting_source: u32 },
    CastSpell(CastRequest),
    ApplyAnimVariables { actor: FormId, accepted: bool },
}

/// An object living in the headless world.
#[derive(Debug, Clone, PartialEq)]
pub struct SimObject {
    pub base_type: BaseType,
    pub base_name: Option<String>,
    pub position: Vec3,
    pub physics_detached: bool,
    pub furniture: Option<FormId>,
    pub equipped_spells: BTreeMap<u32, FormId>,
}

impl SimObject {
    pub fn new(base_type: BaseType) -> Self {
        Self {
            base_type,
            base_name: None,
            position: Vec3::ZERO,
            physics_detached: false,
            furniture: None,
            equipped_spells: BTreeMap::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.base_name = Some(name.to_owned());
        self
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }
}

/// In-memory simulation that records every command it receives.
///
/// Objects exist only once inserted with [`HeadlessSimulation::spawn`], which
/// makes "message arrived before the object exists" easy to stage.
/// `move_to` either teleports or, with [`HeadlessSimulation::with_approach_step`],
/// moves at most a fixed planar distance per call.
#[derive(Debug, Clone, Default)]
pub struct HeadlessSimulation {
    objects: BTreeMap<FormId, SimObject>,
    player: Option<FormId>,
    views: BTreeMap<usize, FormId>,
    open_menus: BTreeSet<Menu>,
    blocking_menu: bool,
    load_order: Vec<String>,
    game_hour: f32,
    approach_step: Option<f32>,
    animation_rejections: u32,
    respawn_needed: BTreeSet<FormId>,
    death_state_failure: Option<String>,
    anim_variables_rejected: bool,
    calls: Vec<SimCall>,
}

impl HeadlessSimulation {
    pub fn new() -> Self {
        Self {
            load_order: vec!["Skyrim.esm".to_owned(), "Update.esm".to_owned()],
            game_hour: 12.0,
            ..Self::default()
        }
    }

    /// `move_to` covers at most `step` units of planar distance per call.
    pub fn with_approach_step(mut self, step: f32) -> Self {
        self.approach_step = Some(step);
        self
    }

    pub fn spawn(&mut self, id: FormId, object: SimObject) {
        self.objects.insert(id, object);
    }

    pub fn despawn(&mut self, id: FormId) -> Option<SimObject> {
        if self.player == Some(id) {
            self.player = None;
        }
        self.objects.remove(&id)
    }

    /// Spawn the player actor at `position` under `id`.
    pub fn spawn_player(&mut self, id: FormId, position: Vec3) {
        self.spawn(id, SimObject::new(BaseType::Actor).at(position));
        self.player = Some(id);
    }

    pub fn object(&self, id: FormId) -> Option<&SimObject> {
        self.objects.get(&id)
    }

    pub fn object_mut(&mut self, id: FormId) -> Option<&mut SimObject> {
        self.objects.get_mut(&id)
    }

    /// Bind world-model `slot` to a live object, as a view would.
    pub fn bind_view(&mut self, slot: usize, id: FormId) {
        self.views.insert(slot, id);
    }

    pub fn set_menu_open(&mut self, menu: Menu, open: bool) {
        if open {
            self.open_menus.insert(menu);
        } else {
            self.open_menus.remove(&menu);
        }
    }

    pub fn set_blocking_menu(&mut self, shown: bool) {
        self.blocking_menu = shown;
    }

    /// Reject the next `count` animation events.
    pub fn reject_animations(&mut self, count: u32) {
        self.animation_rejections = count;
    }

    /// Make `apply_death_state` on `id` report [`SimError::RespawnNeeded`].
    pub fn require_respawn(&mut self, id: FormId) {
        self.respawn_needed.insert(id);
    }

    /// Make every `apply_death_state` fail with an unclassified error.
    pub fn fail_death_state(&mut self, reason: &str) {
        self.death_state_failure = Some(reason.to_owned());
    }

    pub fn reject_anim_variables(&mut self, rejected: bool) {
        self.anim_variables_rejected = rejected;
    }

    pub fn calls(&self) -> &[SimCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<SimCall> {
        std::mem::take(&mut self.calls)
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&SimCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

impl Simulation for HeadlessSimulation {
    fn player(&self) -> Option<FormId> {
        self.player
    }

    fn resolve(&self, id: FormId) -> Option<BaseType> {
        self.objects.get(&id).map(|o| o.base_type)
    }

    fn base_name(&self, id: FormId) -> Option<String> {
        self.objects.get(&id).and_then(|o| o.base_name.clone())
    }

    fn position(&self, id: FormId) -> Option<Vec3> {
        self.objects.get(&id).map(|o| o.position)
    }

    fn form_view(&self, slot: usize) -> Option<FormId> {
        self.views
            .get(&slot)
            .copied()
            .filter(|id| self.objects.contains_key(id))
    }

    fn load_order(&self) -> Vec<String> {
        self.load_order.clone()
    }

    fn game_hour(&self) -> f32 {
        self.game_hour
    }

    fn is_menu_open(&self, menu: Menu) -> bool {
        self.open_menus.contains(&menu)
    }

    fn is_blocking_menu_shown(&self) -> bool {
        self.blocking_menu
    }

    fn furniture_of(&self, actor: FormId) -> Option<FormId> {
        self.objects.get(&actor).and_then(|o| o.furniture)
    }

    fn is_physics_detached(&self, id: FormId) -> bool {
        self.objects.get(&id).is_some_and(|o| o.physics_detached)
    }

    fn equipped_spell(&self, actor: FormId, casting_source: u32) -> Option<FormId> {
        self.objects
            .get(&actor)
            .and_then(|o| o.equipped_spells.get(&casting_source).copied())
    }

    fn load_world(&mut self, request: LoadRequest) {
        tracing::debug!(cell = %request.transform.world_or_cell, "headless world load");
        self.calls.push(SimCall::LoadWorld(request));
    }

    fn move_to(&mut self, id: FormId, transform: &Transform) {
        if let Some(object) = self.objects.get_mut(&id) {
            let target = transform.pos;
            object.position = match self.approach_step {
                None => target,
                Some(step) => {
                    let from = object.position.truncate();
                    let to = target.truncate();
                    let planar = if from.distance(to) <= step {
                        to
                    } else {
                        from + (to - from).normalize() * step
                    };
                    planar.extend(target.z)
                }
            };
        }
        self.calls.push(SimCall::MoveTo {
            id,
            transform: *transform,
        });
    }

    fn clear_physics_detached(&mut self, id: FormId) {
        if let Some(object) = self.objects.get_mut(&id) {
            object.physics_detached = false;
        }
        self.calls.push(SimCall::ClearPhysicsDetached(id));
    }

    fn apply_inventory(&mut self, id: FormId, inventory: &Inventory) {
        self.calls.push(SimCall::ApplyInventory {
            id,
            inventory: inventory.clone(),
        });
    }

    fn apply_equipment(&mut self, id: FormId, equipment: &Equipment) {
        self.calls.push(SimCall::ApplyEquipment {
            id,
            equipment: equipment.clone(),
        });
    }

    fn apply_player_appearance(&mut self, appearance: &Appearance) {
        self.calls
            .push(SimCall::ApplyPlayerAppearance(appearance.clone()));
    }

    fn set_open(&mut self, id: FormId, open: bool) {
        self.calls.push(SimCall::SetOpen { id, open });
    }

    fn set_harvested(&mut self, id: FormId, harvested: bool) {
        self.calls.push(SimCall::SetHarvested { id, harvested });
    }

    fn set_disabled(&mut self, id: FormId, disabled: bool) {
        self.calls.push(SimCall::SetDisabled { id, disabled });
    }

    fn set_node_scale(&mut self, id: FormId, scale: &Value) {
        self.calls.push(SimCall::SetNodeScale {
            id,
            scale: scale.clone(),
        });
    }

    fn set_node_texture_set(&mut self, id: FormId, texture_set: &Value) {
        self.calls.push(SimCall::SetNodeTextureSet {
            id,
            texture_set: texture_set.clone(),
        });
    }

    fn play_animation(&mut self, id: FormId, anim_event: &str) -> bool {
        let accepted = if self.animation_rejections > 0 {
            self.animation_rejections -= 1;
            false
        } else {
            self.objects.contains_key(&id)
        };
        self.calls.push(SimCall::PlayAnimation {
            id,
            anim_event: anim_event.to_owned(),
            accepted,
        });
        accepted
    }

    fn set_display_name(&mut self, id: FormId, name: &str) {
        self.calls.push(SimCall::SetDisplayName {
            id,
            name: name.to_owned(),
        });
    }

    fn set_actor_value(&mut self, id: FormId, name: &str, value: f32) {
        self.calls.push(SimCall::SetActorValue {
            id,
            name: name.to_owned(),
            value,
        });
    }

    fn set_actor_value_percentage(&mut self, id: FormId, name: &str, fraction: f32) {
        self.calls.push(SimCall::SetActorValuePercentage {
            id,
            name: name.to_owned(),
            fraction,
        });
    }

    fn replace_spells(&mut self, id: FormId, spells: &[FormId]) {
        self.calls.push(SimCall::ReplaceSpells {
            id,
            spells: spells.to_vec(),
        });
    }

    fn apply_death_state(&mut self, id: FormId, is_dead: bool) -> Result<(), SimError> {
        self.calls.push(SimCall::ApplyDeathState { id, is_dead });
        if let Some(reason) = &self.death_state_failure {
            return Err(SimError::Failed(reason.clone()));
        }
        if self.respawn_needed.contains(&id) {
            return Err(SimError::RespawnNeeded);
        }
        if !self.objects.contains_key(&id) {
            return Err(SimError::NotFound(id));
        }
        Ok(())
    }

    fn disable_and_delete(&mut self, id: FormId) {
        self.despawn(id);
        self.calls.push(SimCall::DisableAndDelete(id));
    }

    fn unequip_item(&mut self, actor: FormId, item: FormId) {
        self.calls.push(SimCall::UnequipItem { actor, item });
    }

    fn show_race_menu(&mut self) {
        self.open_menus.insert(Menu::RaceSex);
        self.calls.push(SimCall::ShowRaceMenu);
    }

    fn quit_to_main_menu(&mut self) {
        self.calls.push(SimCall::QuitToMainMenu);
    }

    fn activate(&mut self, target: FormId, activator: FormId) {
        self.calls.push(SimCall::Activate { target, activator });
    }

    fn interrupt_cast(&mut self, actor: FormId, casting_source: u32, _variables: &AnimVariables) {
        self.calls.push(SimCall::InterruptCast {
            actor,
            casting_source,
        });
    }

    fn cast_spell(&mut self, request: CastRequest) {
        self.calls.push(SimCall::CastSpell(request));
    }

    fn apply_anim_variables(&mut self, actor: FormId, _variables: &AnimVariables) -> bool {
        let accepted = !self.anim_variables_rejected && self.objects.contains_key(&actor);
        self.calls
            .push(SimCall::ApplyAnimVariables { actor, accepted });
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYER: FormId = FormId(0x14);

    #[test]
    fn unknown_objects_do_not_resolve() {
        let mut sim = HeadlessSimulation::new();
        assert_eq!(sim.resolve(FormId(0x1234)), None);
        sim.spawn(FormId(0x1234), SimObject::new(BaseType::Container));
        assert_eq!(sim.resolve(FormId(0x1234)), Some(BaseType::Container));
    }

    #[test]
    fn move_to_teleports_by_default() {
        let mut sim = HeadlessSimulation::new();
        sim.spawn_player(PLAYER, Vec3::ZERO);
        let t = Transform {
            pos: Vec3::new(1000.0, 0.0, 50.0),
            ..Transform::default()
        };
        sim.move_to(PLAYER, &t);
        assert_eq!(sim.position(PLAYER), Some(t.pos));
    }

    #[test]
    fn approach_step_limits_movement() {
        let mut sim = HeadlessSimulation::new().with_approach_step(300.0);
        sim.spawn_player(PLAYER, Vec3::ZERO);
        let t = Transform {
            pos: Vec3::new(1000.0, 0.0, 10.0),
            ..Transform::default()
        };
        sim.move_to(PLAYER, &t);
        assert_eq!(sim.position(PLAYER), Some(Vec3::new(300.0, 0.0, 10.0)));
        for _ in 0..3 {
            sim.move_to(PLAYER, &t);
        }
        assert_eq!(sim.position(PLAYER), Some(t.pos));
    }

    #[test]
    fn rejected_animations_count_down() {
        let mut sim = HeadlessSimulation::new();
        sim.spawn(FormId(0x50), SimObject::new(BaseType::Other));
        sim.reject_animations(1);
        assert!(!sim.play_animation(FormId(0x50), "Open"));
        assert!(sim.play_animation(FormId(0x50), "Open"));
        assert_eq!(sim.calls().len(), 2);
    }

    #[test]
    fn death_state_outcomes() {
        let mut sim = HeadlessSimulation::new();
        sim.spawn(FormId(0x60), SimObject::new(BaseType::Actor));
        assert_eq!(sim.apply_death_state(FormId(0x60), true), Ok(()));
        sim.require_respawn(FormId(0x60));
        assert_eq!(
            sim.apply_death_state(FormId(0x60), true),
            Err(SimError::RespawnNeeded)
        );
        assert_eq!(
            sim.apply_death_state(FormId(0x61), true),
            Err(SimError::NotFound(FormId(0x61)))
        );
    }

    #[test]
    fn views_follow_object_lifetime() {
        let mut sim = HeadlessSimulation::new();
        sim.spawn(FormId(0xff00_0001), SimObject::new(BaseType::Actor));
        sim.bind_view(0, FormId(0xff00_0001));
        assert_eq!(sim.form_view(0), Some(FormId(0xff00_0001)));
        sim.despawn(FormId(0xff00_0001));
        assert_eq!(sim.form_view(0), None);
    }
}
