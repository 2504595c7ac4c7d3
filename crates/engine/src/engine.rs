mod task;

use crate::bootstrap::{PlayerBootstrap, SpawnParams};
use crate::config::{ApplyPolicy, ReplicationConfig};
use crate::custom::{CustomPacketHandler, InvokeAnim};
use crate::error::ReplicationError;
use crate::materializer::DeferredMaterializer;
use crate::message::{
    ChangeValues, ConnectionEvent, CreateActor, CustomPacket, DeathStateContainer, DestroyActor,
    FormUpdate, HostTarget, Message, OpenContainer, Outgoing, SetInventory, SetRaceMenuOpen,
    SpellCast, Teleport, UpdateAnimVariables, UpdateProperty,
};
use formsync_common::{
    Animation, Appearance, Equipment, FormId, Inventory, Movement, RemoteIndex,
};
use formsync_kernel::{Form, IdentifierMap, Storage, WorldModel};
use formsync_scheduler::{Scheduler, SchedulerStats, Wake};
use formsync_sim::Simulation;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use task::{Deferred, Task};

/// Storage key of the [`WorldModel`].
pub const WORLD_MODEL_KEY: &str = "worldModel";
/// Storage key of the [`IdentifierMap`].
pub const ID_MANAGER_KEY: &str = "idManager";
/// Storage key of the hosted-object list (`Vec<FormId>`).
pub const HOSTED_KEY: &str = "hosted";
/// Storage key of the inventory kept on the player (`Option<Inventory>`).
pub const PLAYER_INVENTORY_KEY: &str = "pcInv";

/// Read-side stand-ins for storage entries of a foreign type.
static EMPTY_WORLD: WorldModel = WorldModel::new();
static EMPTY_IDS: IdentifierMap = IdentifierMap::new();

/// Consumes server messages and keeps the world model and the simulation in
/// step with them.
///
/// Inbound messages go through [`ReplicationEngine::handle`]; the host then
/// drives [`ReplicationEngine::tick`] once per frame and
/// [`ReplicationEngine::update`] on its coarser update event. Every
/// simulation side effect that can wait happens inside those pumps.
pub struct ReplicationEngine<S: Simulation> {
    config: ReplicationConfig,
    sim: S,
    storage: Storage,
    scheduler: Scheduler<Task>,
    materializer: DeferredMaterializer,
    bootstrap: PlayerBootstrap,
    custom_handlers: BTreeMap<String, Box<dyn CustomPacketHandler>>,
    outbox: Vec<Outgoing>,
    inventory_applied_at: Option<Duration>,
}

impl<S: Simulation> ReplicationEngine<S> {
    pub fn new(config: ReplicationConfig, sim: S) -> Self {
        Self::with_storage(config, sim, Storage::new())
    }

    /// Resume on top of storage that outlived a previous engine.
    pub fn with_storage(config: ReplicationConfig, sim: S, storage: Storage) -> Self {
        let mut engine = Self {
            materializer: DeferredMaterializer::new(config.materialize_attempts),
            bootstrap: PlayerBootstrap::new(&config),
            config,
            sim,
            storage,
            scheduler: Scheduler::new(),
            custom_handlers: BTreeMap::new(),
            outbox: Vec::new(),
            inventory_applied_at: None,
        };
        engine.storage.with_or_init(WORLD_MODEL_KEY, |_: &mut WorldModel| ());
        engine.storage.with_or_init(ID_MANAGER_KEY, |_: &mut IdentifierMap| ());
        engine.storage.with_or_init(HOSTED_KEY, |_: &mut Vec<FormId>| ());
        engine.register_custom_handler(Box::new(InvokeAnim));
        engine
    }

    /// Tear down, keeping the simulation and the storage.
    pub fn into_parts(self) -> (S, Storage) {
        (self.sim, self.storage)
    }

    /// Replaces any handler already registered for the same packet type.
    pub fn register_custom_handler(&mut self, handler: Box<dyn CustomPacketHandler>) {
        let packet_type = handler.packet_type().to_owned();
        tracing::debug!(%packet_type, "custom packet handler registered");
        self.custom_handlers.insert(packet_type, handler);
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn sim(&self) -> &S {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn world(&self) -> &WorldModel {
        self.storage
            .get::<WorldModel>(WORLD_MODEL_KEY)
            .unwrap_or(&EMPTY_WORLD)
    }

    pub fn ids(&self) -> &IdentifierMap {
        self.storage
            .get::<IdentifierMap>(ID_MANAGER_KEY)
            .unwrap_or(&EMPTY_IDS)
    }

    /// Objects this client currently simulates on behalf of the server.
    pub fn hosted(&self) -> &[FormId] {
        self.storage
            .get::<Vec<FormId>>(HOSTED_KEY)
            .map_or(&[], Vec::as_slice)
    }

    pub fn player_inventory(&self) -> Option<&Inventory> {
        self.storage
            .get::<Option<Inventory>>(PLAYER_INVENTORY_KEY)
            .and_then(Option::as_ref)
    }

    pub fn bootstrap(&self) -> &PlayerBootstrap {
        &self.bootstrap
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Take every message queued for the server since the last call.
    pub fn drain_outbound(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Apply one inbound message.
    ///
    /// Classified failures are logged and swallowed; an `Err` is an
    /// unclassified failure the host should surface.
    pub fn handle(&mut self, message: Message) -> Result<(), ReplicationError> {
        tracing::trace!(kind = message.kind(), "message received");
        match message {
            Message::CreateActor(msg) => self.on_create_actor(msg),
            Message::DestroyActor(msg) => self.on_destroy_actor(msg),
            Message::UpdateMovement(msg) => self.on_update_movement(msg),
            Message::UpdateAnimation(msg) => self.on_update_animation(msg),
            Message::UpdateEquipment(msg) => self.on_update_equipment(msg),
            Message::UpdateAppearance(msg) => self.on_update_appearance(msg),
            Message::ChangeValues(msg) => self.on_change_values(msg),
            Message::Teleport(msg) | Message::Teleport2(msg) => self.on_teleport(msg),
            Message::SetInventory(msg) => self.on_set_inventory(msg),
            Message::OpenContainer(msg) => self.on_open_container(msg),
            Message::SetRaceMenuOpen(msg) => self.on_set_race_menu_open(msg),
            Message::UpdateProperty(msg) => self.on_update_property(msg),
            Message::DeathStateContainer(msg) => self.on_death_state_container(msg),
            Message::HostStart(msg) => self.on_host_start(msg),
            Message::HostStop(msg) => self.on_host_stop(msg),
            Message::SpellCast(msg) => self.on_spell_cast(msg),
            Message::UpdateAnimVariables(msg) => self.on_update_anim_variables(msg),
            Message::CustomPacket(msg) => self.on_custom_packet(msg),
        }
    }

    pub fn on_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Accepted => {
                self.with_world(WorldModel::reset);
                self.with_ids(IdentifierMap::clear);
                self.bootstrap.reset();
                tracing::info!("connection accepted, replicated state cleared");
            }
            ConnectionEvent::Disconnected => tracing::info!("connection lost"),
        }
    }

    /// Per-frame pump: advances simulated time by `dt` and runs what is due.
    pub fn tick(&mut self, dt: Duration) -> Vec<ReplicationError> {
        let span = tracing::info_span!("replication_tick", dt_ms = dt.as_millis() as u64);
        let _enter = span.enter();
        let due = self.scheduler.tick(dt);
        self.run_due(due)
    }

    /// Update pump: runs continuations waiting for this update, then keeps
    /// the player's inventory applied.
    pub fn update(&mut self) -> Vec<ReplicationError> {
        let span = tracing::info_span!("replication_update");
        let _enter = span.enter();
        let due = self.scheduler.update();
        let errors = self.run_due(due);
        self.keep_player_inventory();
        errors
    }

    fn run_due(&mut self, due: Vec<Task>) -> Vec<ReplicationError> {
        let mut errors = Vec::new();
        for task in due {
            if let Err(error) = self.run(task) {
                tracing::error!(%error, "continuation failed");
                errors.push(error);
            }
        }
        errors
    }

    fn with_world<R>(&mut self, f: impl FnOnce(&mut WorldModel) -> R) -> R {
        self.storage.with_or_init(WORLD_MODEL_KEY, f)
    }

    fn with_ids<R>(&mut self, f: impl FnOnce(&mut IdentifierMap) -> R) -> R {
        self.storage.with_or_init(ID_MANAGER_KEY, f)
    }

    fn schedule(&mut self, wake: Wake, task: Task) {
        self.scheduler.schedule(wake, task);
    }

    fn defer_direct(&mut self, target: FormId, action: Deferred) {
        let task = self.materializer.request(target, action);
        self.schedule(Wake::Update, Task::Materialize(task));
    }

    /// Local slot of `remote`, or `None` after logging why the message is dropped.
    fn known_slot(&mut self, remote: RemoteIndex, context: &'static str) -> Option<usize> {
        match self.with_ids(|ids| ids.get(remote)) {
            Ok(slot) => Some(slot),
            Err(error) => {
                tracing::error!(context, %error, "dropping message");
                None
            }
        }
    }

    /// Like [`Self::known_slot`], but the slot must also hold a form.
    fn form_slot(&mut self, remote: RemoteIndex, context: &'static str) -> Option<usize> {
        let slot = self.known_slot(remote, context)?;
        if self.with_world(|world| world.get(slot).is_none()) {
            tracing::error!(context, %remote, slot, "form not found");
            return None;
        }
        Some(slot)
    }

    fn with_form(&mut self, remote: RemoteIndex, context: &'static str, f: impl FnOnce(&mut Form)) {
        let Some(slot) = self.form_slot(remote, context) else {
            return;
        };
        self.with_world(|world| {
            if let Some(form) = world.get_mut(slot) {
                f(form);
            }
        });
    }

    /// Live handle of the form in `slot`.
    fn slot_handle(&mut self, slot: usize) -> Option<FormId> {
        if self.with_world(|world| world.is_player_slot(slot)) {
            self.sim.player()
        } else {
            self.sim.form_view(slot)
        }
    }

    /// Live handle of the form addressed by `remote`; the player sentinel
    /// is the local player.
    fn target_handle(&mut self, remote: RemoteIndex, context: &'static str) -> Option<FormId> {
        if remote.is_player() {
            return self.sim.player();
        }
        let slot = self.form_slot(remote, context)?;
        self.slot_handle(slot)
    }

    /// Translate a server object id into the id of a live local object.
    fn local_id(&mut self, remote: FormId) -> Option<FormId> {
        if remote.is_none() {
            return None;
        }
        if !self.config.is_spawned_id(remote) {
            return self.sim.resolve(remote).map(|_| remote);
        }
        let (is_player, slot) =
            self.with_world(|world| (world.player_refr_id() == Some(remote), world.find_by_refr_id(remote)));
        if is_player {
            return self.sim.player();
        }
        self.sim.form_view(slot?)
    }

    fn on_create_actor(&mut self, msg: CreateActor) -> Result<(), ReplicationError> {
        let policy = self
            .config
            .policy_for(msg.refr_id, msg.base_record_type.as_deref());
        if let (ApplyPolicy::DirectApply, Some(target)) = (policy, msg.refr_id) {
            match msg.props {
                Some(props) => {
                    tracing::trace!(%target, "create applies to an existing object");
                    self.defer_direct(target, Deferred::CreateProps(props));
                }
                None => tracing::trace!(%target, "create without state for an existing object"),
            }
            return Ok(());
        }

        let mut late_props = Vec::with_capacity(msg.custom_props_json_dumps.len());
        for dump in &msg.custom_props_json_dumps {
            if let Some(value) = parse_dump("createActor", &dump.prop_value_json_dump)? {
                late_props.push((dump.prop_name.as_str(), value));
            } else {
                tracing::error!(prop = %dump.prop_name, refr_id = ?msg.refr_id, "custom property skipped");
            }
        }

        let slot = self.with_ids(|ids| ids.allocate(msg.idx))?;
        let mut form = Form::new(slot, msg.idx, msg.base_id);
        form.refr_id = msg.refr_id;
        form.base_record_type = msg.base_record_type.clone();
        form.movement = msg
            .refr_id
            .filter(|&id| self.config.is_spawned_id(id))
            .map(|_| Movement::standing(&msg.transform));
        form.appearance = msg.appearance.clone();
        form.equipment = msg.equipment.clone();
        form.is_dead = msg.is_dead;
        form.animation = msg.animation.clone();
        form.is_my_clone = msg.is_me;
        if let Some(props) = &msg.props {
            for (name, value) in props {
                form.set_property(name, value.clone());
            }
        }
        for (name, value) in late_props {
            form.set_property(name, value);
        }
        tracing::debug!(remote = %msg.idx, slot, refr_id = ?msg.refr_id, is_me = msg.is_me, "form created");

        let refr_id = msg.refr_id;
        let is_me = msg.is_me;
        self.with_world(|world| {
            world.set_form(slot, form);
            if is_me {
                world.set_player(slot, refr_id);
            }
        });
        if is_me {
            self.start_player_spawn(slot, &msg);
        }
        Ok(())
    }

    fn start_player_spawn(&mut self, slot: usize, msg: &CreateActor) {
        let props = msg.props.clone().unwrap_or_default();
        if props.flag("isRaceMenuOpen") {
            self.schedule_race_menu();
        }
        if props.flag("isDead") {
            self.schedule(
                Wake::Update,
                Task::ReflectDeathState {
                    slot,
                    remote: msg.idx,
                    refr_id: msg.refr_id,
                    is_dead: true,
                },
            );
        }
        let inventory = match props.decode::<Inventory>("inventory") {
            Some(Ok(inventory)) => Some(inventory),
            Some(Err(error)) => {
                tracing::error!(%error, "player inventory is malformed");
                None
            }
            None => None,
        };
        let params = SpawnParams {
            transform: msg.transform,
            appearance: msg.appearance.clone(),
            inventory,
            equipment: msg.equipment.clone(),
            props,
            game_hour: self.sim.game_hour(),
        };
        if let Some(task) = self.bootstrap.begin(params) {
            self.schedule(Wake::Update, Task::Bootstrap(task));
        }
    }

    fn on_destroy_actor(&mut self, msg: DestroyActor) -> Result<(), ReplicationError> {
        let Some(slot) = self.known_slot(msg.idx, "destroyActor") else {
            return Ok(());
        };
        let (trimmed, was_player) = self.with_world(|world| {
            world.clear_form(slot);
            let trimmed = world.trim();
            let was_player = world.is_player_slot(slot);
            if was_player {
                world.clear_player();
            }
            (trimmed, was_player)
        });
        self.with_ids(|ids| ids.free(msg.idx));
        tracing::debug!(remote = %msg.idx, slot, trimmed, "form destroyed");

        if was_player {
            tracing::info!("player form destroyed, leaving the world");
            self.bootstrap.reset();
            self.schedule(Wake::Update, Task::QuitToMainMenu);
        }
        Ok(())
    }

    fn on_update_movement(&mut self, msg: FormUpdate<Movement>) -> Result<(), ReplicationError> {
        self.with_form(msg.idx, "updateMovement", |form| form.apply_movement(msg.data));
        Ok(())
    }

    fn on_update_animation(&mut self, msg: FormUpdate<Animation>) -> Result<(), ReplicationError> {
        self.with_form(msg.idx, "updateAnimation", |form| form.animation = Some(msg.data));
        Ok(())
    }

    fn on_update_equipment(&mut self, msg: FormUpdate<Equipment>) -> Result<(), ReplicationError> {
        self.with_form(msg.idx, "updateEquipment", |form| form.equipment = Some(msg.data));
        Ok(())
    }

    fn on_update_appearance(
        &mut self,
        msg: FormUpdate<Option<Appearance>>,
    ) -> Result<(), ReplicationError> {
        let Some(slot) = self.form_slot(msg.idx, "updateAppearance") else {
            return Ok(());
        };
        let is_player = self.with_world(|world| {
            if let Some(form) = world.get_mut(slot) {
                form.apply_appearance(msg.data.clone());
            }
            world.is_player_slot(slot)
        });
        match &msg.data {
            Some(appearance) if is_player => {
                self.sim.apply_player_appearance(appearance);
                tracing::debug!("appearance applied to the player");
            }
            _ => {}
        }
        Ok(())
    }

    fn on_change_values(&mut self, msg: ChangeValues) -> Result<(), ReplicationError> {
        self.schedule(Wake::Update, Task::ChangeValues(msg));
        Ok(())
    }

    fn on_teleport(&mut self, msg: Teleport) -> Result<(), ReplicationError> {
        self.schedule(Wake::Update, Task::Teleport(msg));
        Ok(())
    }

    fn on_set_inventory(&mut self, msg: SetInventory) -> Result<(), ReplicationError> {
        let generation = self.bootstrap.bump_inventory_generation();
        tracing::debug!(generation, entries = msg.inventory.entries.len(), "player inventory received");
        self.schedule(Wake::Update, Task::StorePlayerInventory(msg.inventory));
        Ok(())
    }

    fn on_open_container(&mut self, msg: OpenContainer) -> Result<(), ReplicationError> {
        let wake = Wake::after_secs(self.config.open_container_delay_secs);
        self.schedule(wake, Task::OpenContainer { target: msg.target });
        Ok(())
    }

    fn on_set_race_menu_open(&mut self, msg: SetRaceMenuOpen) -> Result<(), ReplicationError> {
        if msg.open {
            self.schedule_race_menu();
        } else {
            tracing::warn!("closing the race menu is not supported");
        }
        Ok(())
    }

    fn schedule_race_menu(&mut self) {
        let wake = Wake::after_secs(self.config.race_menu_delay_secs);
        self.schedule(wake, Task::ShowRaceMenu);
    }

    fn on_update_property(&mut self, msg: UpdateProperty) -> Result<(), ReplicationError> {
        let Some(value) = property_value(&msg)? else {
            return Ok(());
        };
        let policy = self
            .config
            .policy_for(msg.refr_id, msg.base_record_type.as_deref());
        if let (ApplyPolicy::DirectApply, Some(target)) = (policy, msg.refr_id) {
            self.defer_direct(
                target,
                Deferred::Property {
                    name: msg.prop_name,
                    value,
                },
            );
            return Ok(());
        }
        let Some(slot) = self.form_slot(msg.idx, "updateProperty") else {
            return Ok(());
        };
        tracing::trace!(remote = %msg.idx, prop = %msg.prop_name, "property updated");
        self.with_world(|world| world.merge_property(slot, &msg.prop_name, value));
        Ok(())
    }

    fn on_death_state_container(&mut self, msg: DeathStateContainer) -> Result<(), ReplicationError> {
        let DeathStateContainer {
            t_is_dead,
            t_change_values,
            t_teleport,
        } = msg;
        let remote = t_is_dead.idx;
        let Some(slot) = self.form_slot(remote, "deathStateContainer") else {
            return Ok(());
        };
        if t_is_dead.prop_name != "isDead" {
            let error = ReplicationError::InvalidPayload(format!(
                "death state targets {:?} instead of isDead",
                t_is_dead.prop_name
            ));
            tracing::error!(%error, "dropping death state");
            return Ok(());
        }
        let Some(value) = property_value(&t_is_dead)? else {
            return Ok(());
        };
        let Some(is_dead) = value.as_bool() else {
            let error = ReplicationError::InvalidPayload(format!("death state {value} is not a boolean"));
            tracing::error!(%error, "dropping death state");
            return Ok(());
        };
        let refr_id = self.with_world(|world| world.get(slot).and_then(|form| form.refr_id));
        tracing::debug!(%remote, slot, is_dead, "death state received");

        if let Some(change_values) = t_change_values {
            self.schedule(Wake::Update, Task::ChangeValues(change_values));
        }
        self.schedule(Wake::Update, Task::UpdateProperty(t_is_dead));
        if let Some(teleport) = t_teleport {
            self.schedule(Wake::Update, Task::Teleport(teleport));
        }
        self.schedule(
            Wake::Update,
            Task::ReflectDeathState {
                slot,
                remote,
                refr_id,
                is_dead,
            },
        );
        Ok(())
    }

    fn on_host_start(&mut self, msg: HostTarget) -> Result<(), ReplicationError> {
        let count = self.storage.with_or_init(HOSTED_KEY, |hosted: &mut Vec<FormId>| {
            if !hosted.contains(&msg.target) {
                hosted.push(msg.target);
            }
            hosted.len()
        });
        tracing::debug!(target = %msg.target, hosted = count, "hosting started");
        Ok(())
    }

    fn on_host_stop(&mut self, msg: HostTarget) -> Result<(), ReplicationError> {
        let count = self.storage.with_or_init(HOSTED_KEY, |hosted: &mut Vec<FormId>| {
            hosted.retain(|&id| id != msg.target);
            hosted.len()
        });
        tracing::debug!(target = %msg.target, hosted = count, "hosting stopped");
        Ok(())
    }

    fn on_spell_cast(&mut self, msg: SpellCast) -> Result<(), ReplicationError> {
        self.schedule(Wake::Update, Task::SpellCast(msg));
        Ok(())
    }

    fn on_update_anim_variables(&mut self, msg: UpdateAnimVariables) -> Result<(), ReplicationError> {
        self.schedule(Wake::Update, Task::AnimVariables(msg));
        Ok(())
    }

    fn on_custom_packet(&mut self, msg: CustomPacket) -> Result<(), ReplicationError> {
        let Some(content) = parse_dump("customPacket", &msg.content_json_dump)? else {
            return Ok(());
        };
        let Value::Object(content) = content else {
            tracing::error!(raw = %msg.content_json_dump, "custom packet content is not an object");
            return Ok(());
        };
        let Some(packet_type) = content
            .get("customPacketType")
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            tracing::error!(raw = %msg.content_json_dump, "custom packet without customPacketType");
            return Ok(());
        };
        if !self.custom_handlers.contains_key(&packet_type) {
            tracing::trace!(%packet_type, "no handler for custom packet");
            return Ok(());
        }
        self.schedule(
            Wake::Update,
            Task::CustomPacket {
                packet_type,
                content,
            },
        );
        Ok(())
    }

    fn store_player_inventory(&mut self, inventory: Inventory, applied: bool) {
        self.storage
            .with_or_init(PLAYER_INVENTORY_KEY, |kept: &mut Option<Inventory>| *kept = Some(inventory));
        self.inventory_applied_at = applied.then(|| self.scheduler.now());
    }

    /// Re-apply the kept inventory to the player every few seconds, unless a
    /// menu that inventory changes would disturb is shown.
    fn keep_player_inventory(&mut self) {
        if self.sim.is_blocking_menu_shown() {
            return;
        }
        let now = self.scheduler.now();
        let interval = Duration::from_secs_f32(self.config.player_inventory_reapply_secs.max(0.0));
        if self
            .inventory_applied_at
            .is_some_and(|at| now.saturating_sub(at) <= interval)
        {
            return;
        }
        self.inventory_applied_at = Some(now);
        let Some(inventory) = self.player_inventory().cloned() else {
            return;
        };
        let Some(player) = self.sim.player() else {
            return;
        };
        tracing::debug!(entries = inventory.entries.len(), "applying kept player inventory");
        self.sim.apply_inventory(player, &inventory);
    }
}

/// Parse an embedded JSON dump. Syntax errors are logged and yield `None`;
/// any other failure is returned.
fn parse_dump(context: &'static str, raw: &str) -> Result<Option<Value>, ReplicationError> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(Some(value)),
        Err(source) if source.is_syntax() || source.is_eof() => {
            let error = ReplicationError::malformed(context, raw, source);
            tracing::error!(%error, "skipping malformed payload");
            Ok(None)
        }
        Err(source) => Err(ReplicationError::malformed(context, raw, source)),
    }
}

/// Value carried by a property update: the dump when present, else the
/// inline data (absent data is `null`).
fn property_value(msg: &UpdateProperty) -> Result<Option<Value>, ReplicationError> {
    match &msg.data_dump {
        Some(raw) => parse_dump("updateProperty", raw),
        None => Ok(Some(msg.data.clone().unwrap_or(Value::Null))),
    }
}
