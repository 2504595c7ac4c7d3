//! Continuations scheduled by the handlers and what running them does.

use super::ReplicationEngine;
use crate::bootstrap::BootstrapTask;
use crate::error::ReplicationError;
use crate::materializer::{Attempt, MaterializeTask};
use crate::message::{
    ChangeValues, OutboundMessage, Outgoing, SpellCast, Teleport, UpdateAnimVariables,
    UpdateProperty,
};
use formsync_common::{
    FormId, Inventory, PropertyBag, Reliability, RemoteIndex, Transform, is_truthy,
};
use formsync_scheduler::Wake;
use formsync_sim::{BaseType, CastRequest, Menu, SimError, Simulation};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Placeholder replaced with the base object's own name in display names.
const ORIGINAL_NAME: &str = "%original_name%";

/// Work waiting for an existing object to resolve.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Deferred {
    /// Initial state of an object the server created on top of a pre-existing one.
    CreateProps(PropertyBag),
    Property { name: String, value: Value },
    /// Teleport held back until the target is attached again.
    FinishTeleport(Transform),
}

/// What tells us an activated object is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActivationWatch {
    ContainerMenu,
    Furniture,
}

#[derive(Debug)]
pub(crate) enum Task {
    Materialize(MaterializeTask<Deferred>),
    RetryAnimation {
        target: FormId,
        anim_event: String,
        remaining: u32,
    },
    Bootstrap(BootstrapTask),
    StorePlayerInventory(Inventory),
    ChangeValues(ChangeValues),
    UpdateProperty(UpdateProperty),
    Teleport(Teleport),
    ReflectDeathState {
        slot: usize,
        remote: RemoteIndex,
        refr_id: Option<FormId>,
        is_dead: bool,
    },
    QuitToMainMenu,
    ShowRaceMenu,
    OpenContainer {
        target: FormId,
    },
    WatchActivation {
        target: FormId,
        watch: ActivationWatch,
        opened: bool,
        polls_left: u32,
    },
    SecondActivation {
        target: FormId,
    },
    SpellCast(SpellCast),
    AnimVariables(UpdateAnimVariables),
    CustomPacket {
        packet_type: String,
        content: Map<String, Value>,
    },
}

impl<S: Simulation> ReplicationEngine<S> {
    pub(super) fn run(&mut self, task: Task) -> Result<(), ReplicationError> {
        match task {
            Task::Materialize(task) => self.attempt_materialize(task),
            Task::RetryAnimation {
                target,
                anim_event,
                remaining,
            } => self.play_animation_with_retry(target, anim_event, remaining),
            Task::Bootstrap(task) => {
                let output = self.bootstrap.step(task, &mut self.sim);
                for (wake, next) in output.follow_ups {
                    self.schedule(wake, Task::Bootstrap(next));
                }
                if let Some(inventory) = output.applied_inventory {
                    self.store_player_inventory(inventory, true);
                }
            }
            Task::StorePlayerInventory(inventory) => {
                self.store_player_inventory(inventory, false);
            }
            Task::ChangeValues(msg) => self.apply_change_values(msg),
            Task::UpdateProperty(msg) => return self.on_update_property(msg),
            Task::Teleport(msg) => self.apply_teleport(msg),
            Task::ReflectDeathState {
                slot,
                remote,
                refr_id,
                is_dead,
            } => return self.reflect_death_state(slot, remote, refr_id, is_dead),
            Task::QuitToMainMenu => self.sim.quit_to_main_menu(),
            Task::ShowRaceMenu => self.show_race_menu(),
            Task::OpenContainer { target } => self.activate_container(target),
            Task::WatchActivation {
                target,
                watch,
                opened,
                polls_left,
            } => self.watch_activation(target, watch, opened, polls_left),
            Task::SecondActivation { target } => {
                let message = OutboundMessage::Activate {
                    caster: self.config.player_form_id,
                    target,
                    is_second_activation: true,
                };
                tracing::debug!(%target, "sending second activation");
                self.outbox.push(Outgoing {
                    message,
                    reliability: Reliability::Reliable,
                });
            }
            Task::SpellCast(msg) => self.cast_spell(msg),
            Task::AnimVariables(msg) => self.apply_anim_variables(msg),
            Task::CustomPacket {
                packet_type,
                content,
            } => self.run_custom_handler(&packet_type, &content),
        }
        Ok(())
    }

    fn attempt_materialize(&mut self, task: MaterializeTask<Deferred>) {
        let target = task.target();
        let ready = self.sim.resolve(target).is_some()
            && !(matches!(task.action(), Deferred::FinishTeleport(_))
                && self.sim.is_physics_detached(target));
        match task.attempt(ready) {
            Attempt::Resolved { target, action } => self.apply_deferred(target, action),
            Attempt::Pending(task) => self.schedule(Wake::Update, Task::Materialize(task)),
            Attempt::Exhausted { target, attempts } => {
                let error = ReplicationError::UnresolvedEntity(target);
                tracing::error!(%error, attempts, "giving up on deferred update");
            }
        }
    }

    fn apply_deferred(&mut self, target: FormId, action: Deferred) {
        match action {
            Deferred::CreateProps(props) => self.apply_create_props(target, &props),
            Deferred::Property { name, value } => self.apply_direct_property(target, &name, &value),
            Deferred::FinishTeleport(transform) => {
                tracing::debug!(%target, "target re-attached, teleporting");
                self.sim.move_to(target, &transform);
            }
        }
    }

    fn apply_create_props(&mut self, target: FormId, props: &PropertyBag) {
        tracing::trace!(%target, props = props.len(), "applying initial state to existing object");
        match props.decode::<Inventory>("inventory") {
            Some(Ok(inventory)) => self.sim.apply_inventory(target, &inventory),
            Some(Err(error)) => tracing::error!(%target, %error, "inventory property is malformed"),
            None => {}
        }
        self.sim.set_open(target, props.flag("isOpen"));
        self.sim.set_harvested(target, props.flag("isHarvested"));
        if let Some(scale) = props.get("setNodeScale") {
            self.sim.set_node_scale(target, scale);
        }
        if let Some(texture_set) = props.get("setNodeTextureSet") {
            self.sim.set_node_texture_set(target, texture_set);
        }
        self.sim.set_disabled(target, props.flag("disabled"));

        if let Some(anim_event) = props.string("lastAnimation") {
            let attempts = self.config.animation_retry_attempts;
            self.play_animation_with_retry(target, anim_event.to_owned(), attempts);
        }

        if let Some(template) = props.string("displayName") {
            let name = match self.sim.base_name(target) {
                Some(original) => template.replace(ORIGINAL_NAME, &original),
                None => {
                    tracing::error!(%target, "no base name to substitute into display name");
                    template.to_owned()
                }
            };
            self.sim.set_display_name(target, &name);
        }
    }

    fn apply_direct_property(&mut self, target: FormId, name: &str, value: &Value) {
        match name {
            "inventory" => match Inventory::deserialize(value) {
                Ok(inventory) => self.sim.apply_inventory(target, &inventory),
                Err(error) => tracing::error!(%target, %error, "inventory property is malformed"),
            },
            "isOpen" => self.sim.set_open(target, is_truthy(value)),
            "isHarvested" => self.sim.set_harvested(target, is_truthy(value)),
            "disabled" => self.sim.set_disabled(target, is_truthy(value)),
            _ => tracing::trace!(%target, name, "property has no effect on existing objects"),
        }
    }

    /// Play `anim_event`, retrying on a timer while the graph rejects it.
    fn play_animation_with_retry(&mut self, target: FormId, anim_event: String, attempts: u32) {
        if self.sim.play_animation(target, &anim_event) {
            return;
        }
        let remaining = attempts.saturating_sub(1);
        if remaining == 0 {
            tracing::warn!(%target, %anim_event, "animation rejected, giving up");
            return;
        }
        let wake = Wake::after_secs(self.config.animation_retry_delay_secs);
        self.schedule(
            wake,
            Task::RetryAnimation {
                target,
                anim_event,
                remaining,
            },
        );
    }

    fn apply_change_values(&mut self, msg: ChangeValues) {
        let Some(actor) = self.target_handle(msg.idx, "changeValues") else {
            return;
        };
        if self.sim.resolve(actor) != Some(BaseType::Actor) {
            return;
        }
        let fractions = [
            ("health", &msg.data.health),
            ("stamina", &msg.data.stamina),
            ("magicka", &msg.data.magicka),
        ];
        for (name, value) in fractions {
            if let Some(fraction) = value.as_ref().and_then(Value::as_f64) {
                self.sim.set_actor_value_percentage(actor, name, fraction as f32);
            }
        }
    }

    fn apply_teleport(&mut self, msg: Teleport) {
        let Some(target) = self.target_handle(msg.idx, "teleport") else {
            tracing::warn!(remote = %msg.idx, "teleport target not loaded");
            return;
        };
        let transform = msg.transform();
        tracing::trace!(%target, pos = ?transform.pos, cell = %transform.world_or_cell, "teleporting");
        if self.sim.is_physics_detached(target) {
            self.sim.clear_physics_detached(target);
            self.defer_direct(target, Deferred::FinishTeleport(transform));
        } else {
            self.sim.move_to(target, &transform);
        }
    }

    fn reflect_death_state(
        &mut self,
        slot: usize,
        remote: RemoteIndex,
        refr_id: Option<FormId>,
        is_dead: bool,
    ) -> Result<(), ReplicationError> {
        if self.with_ids(|ids| ids.get(remote)) != Ok(slot) {
            tracing::debug!(%remote, slot, "form replaced before its death state applied");
            return Ok(());
        }
        let actor = match self.slot_handle(slot) {
            Some(actor) => Some(actor),
            None => match refr_id {
                Some(id) => self.local_id(id),
                None => None,
            },
        };
        let Some(actor) = actor else {
            tracing::trace!(%remote, "no live actor for death state");
            return Ok(());
        };
        match self.sim.apply_death_state(actor, is_dead) {
            Ok(()) => Ok(()),
            Err(SimError::RespawnNeeded) => {
                tracing::warn!(%actor, is_dead, "actor needs a respawn, deleting it");
                self.sim.disable_and_delete(actor);
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    fn show_race_menu(&mut self) {
        let Some(player) = self.sim.player() else {
            tracing::warn!("no player to open the race menu for");
            return;
        };
        self.sim.unequip_item(player, self.config.protective_item);
        self.sim.show_race_menu();
    }

    fn activate_container(&mut self, target: FormId) {
        let Some(local) = self.local_id(target) else {
            tracing::error!(remote = %target, "container to open not found");
            return;
        };
        let Some(player) = self.sim.player() else {
            return;
        };
        self.sim.activate(local, player);
        let watch = match self.sim.resolve(local) {
            Some(BaseType::Container) => ActivationWatch::ContainerMenu,
            Some(BaseType::Furniture) => ActivationWatch::Furniture,
            other => {
                tracing::trace!(%local, base_type = ?other, "activated object is not a container or furniture");
                return;
            }
        };
        tracing::trace!(%local, ?watch, "waiting for activation to take hold");
        let polls_left = self.config.menu_open_polls;
        self.schedule_watch(target, watch, false, polls_left);
    }

    fn schedule_watch(&mut self, target: FormId, watch: ActivationWatch, opened: bool, polls_left: u32) {
        let wake = Wake::after_secs(self.config.menu_poll_interval_secs);
        self.schedule(
            wake,
            Task::WatchActivation {
                target,
                watch,
                opened,
                polls_left,
            },
        );
    }

    /// Poll until the activation is seen in use and then released.
    fn watch_activation(&mut self, target: FormId, watch: ActivationWatch, opened: bool, polls_left: u32) {
        let active = match watch {
            ActivationWatch::ContainerMenu => self.sim.is_menu_open(Menu::Container),
            ActivationWatch::Furniture => self
                .sim
                .player()
                .and_then(|player| self.sim.furniture_of(player))
                .is_some(),
        };
        match (opened, active) {
            (_, true) => self.schedule_watch(target, watch, true, polls_left),
            (false, false) if polls_left <= 1 => {
                tracing::warn!(%target, ?watch, "activation never took hold");
            }
            (false, false) => self.schedule_watch(target, watch, false, polls_left - 1),
            (true, false) => {
                let delay = match watch {
                    ActivationWatch::ContainerMenu => 0.0,
                    ActivationWatch::Furniture => self.config.furniture_exit_delay_secs,
                };
                tracing::trace!(%target, ?watch, delay, "activation released");
                self.schedule(Wake::after_secs(delay), Task::SecondActivation { target });
            }
        }
    }

    fn cast_spell(&mut self, msg: SpellCast) {
        let Some(caster) = self.local_id(msg.caster) else {
            return;
        };
        if msg.interrupt_cast {
            self.sim
                .interrupt_cast(caster, msg.casting_source, &msg.actor_animation_variables);
            return;
        }
        let Some(spell) = self.sim.equipped_spell(caster, msg.casting_source) else {
            tracing::trace!(%caster, source = msg.casting_source, "nothing equipped to cast");
            return;
        };
        let target = self.local_id(msg.target).unwrap_or(FormId::NONE);
        self.sim.cast_spell(CastRequest {
            caster,
            casting_source: msg.casting_source,
            spell,
            target,
            aim_angle: msg.aim_angle,
            aim_heading: msg.aim_heading,
            variables: msg.actor_animation_variables,
        });
    }

    fn apply_anim_variables(&mut self, msg: UpdateAnimVariables) {
        let Some(actor) = self.local_id(msg.actor_remote_id) else {
            return;
        };
        if !self
            .sim
            .apply_anim_variables(actor, &msg.actor_animation_variables)
        {
            tracing::error!(%actor, "animation variables rejected");
        }
    }

    fn run_custom_handler(&mut self, packet_type: &str, content: &Map<String, Value>) {
        let Some(handler) = self.custom_handlers.get_mut(packet_type) else {
            return;
        };
        if let Some(reply) = handler.handle(content, &mut self.sim) {
            self.outbox.push(Outgoing {
                message: OutboundMessage::CustomPacket {
                    content_json_dump: reply.to_string(),
                },
                reliability: Reliability::Reliable,
            });
        }
    }
}
