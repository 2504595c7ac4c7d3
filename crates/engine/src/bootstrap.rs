//! Spawn sequence for the locally controlled actor.
//!
//! `Idle -> Spawning -> Converging -> Settled`. [`PlayerBootstrap::begin`]
//! captures the spawn parameters and hands back the entry step; each step
//! returns the follow-up steps it wants scheduled. Steps carry the spawn
//! cycle they belong to and do nothing once a newer cycle has started.

use crate::ReplicationConfig;
use formsync_common::{Appearance, Equipment, FormId, Inventory, PropertyBag, Transform};
use formsync_scheduler::Wake;
use formsync_sim::{GameTime, LoadRequest, Simulation};

/// Absolute actor values applied after spawning.
const BASE_VALUES: [&str; 9] = [
    "healRate",
    "healRateMult",
    "health",
    "magickaRate",
    "magickaRateMult",
    "magicka",
    "staminaRate",
    "staminaRateMult",
    "stamina",
];

/// Fraction properties, applied only when the matching base value is numeric.
const PERCENTAGE_VALUES: [(&str, &str); 3] = [
    ("healthPercentage", "health"),
    ("staminaPercentage", "stamina"),
    ("magickaPercentage", "magicka"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapPhase {
    #[default]
    Idle,
    /// Entry scheduled, world load not yet requested.
    Spawning,
    /// Moving the player towards the spawn point.
    Converging,
    Settled,
}

/// What the player is spawned with.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpawnParams {
    pub transform: Transform,
    pub appearance: Option<Appearance>,
    pub inventory: Option<Inventory>,
    pub equipment: Option<Equipment>,
    /// Actor values and learned spells.
    pub props: PropertyBag,
    pub game_hour: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    Enter,
    Converge { iteration: u32 },
    /// Inventory application captured at `generation`.
    ApplyInventory { generation: u64 },
    ApplyBaseValues,
}

/// A step bound to the spawn cycle that scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapTask {
    cycle: u64,
    step: BootstrapStep,
}

impl BootstrapTask {
    pub fn step(&self) -> BootstrapStep {
        self.step
    }
}

/// Result of running one step.
#[derive(Debug, Default)]
pub struct StepOutput {
    pub follow_ups: Vec<(Wake, BootstrapTask)>,
    /// Inventory that was just applied to the player and should be kept.
    pub applied_inventory: Option<Inventory>,
}

#[derive(Debug, Clone)]
pub struct PlayerBootstrap {
    phase: BootstrapPhase,
    cycle: u64,
    inventory_generation: u64,
    /// Inventory generation current when the spawn was requested.
    spawn_generation: u64,
    params: SpawnParams,
    convergence_radius: f32,
    convergence_interval: Wake,
    inventory_delays: Vec<Wake>,
    base_values_delay: Wake,
}

impl PlayerBootstrap {
    pub fn new(config: &ReplicationConfig) -> Self {
        Self {
            phase: BootstrapPhase::Idle,
            cycle: 0,
            inventory_generation: 0,
            spawn_generation: 0,
            params: SpawnParams::default(),
            convergence_radius: config.convergence_radius,
            convergence_interval: Wake::after_secs(config.convergence_interval_secs),
            inventory_delays: config
                .inventory_apply_delays_secs
                .iter()
                .map(|&secs| Wake::after_secs(secs))
                .collect(),
            base_values_delay: Wake::after_secs(config.base_values_delay_secs),
        }
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    /// True between `begin` and settling.
    pub fn is_running(&self) -> bool {
        matches!(self.phase, BootstrapPhase::Spawning | BootstrapPhase::Converging)
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn inventory_generation(&self) -> u64 {
        self.inventory_generation
    }

    /// Called for every inbound inventory message. Pending spawn-time
    /// inventory applications become stale.
    pub fn bump_inventory_generation(&mut self) -> u64 {
        self.inventory_generation += 1;
        self.inventory_generation
    }

    /// Start a spawn cycle. Returns the entry step to run on the next
    /// update, or `None` while a cycle is already running.
    pub fn begin(&mut self, params: SpawnParams) -> Option<BootstrapTask> {
        if self.is_running() {
            tracing::debug!(cycle = self.cycle, "spawn already running, ignoring");
            return None;
        }
        self.cycle += 1;
        self.phase = BootstrapPhase::Spawning;
        self.spawn_generation = self.inventory_generation;
        self.params = params;
        tracing::debug!(cycle = self.cycle, pos = ?self.params.transform.pos, "player spawn requested");
        Some(BootstrapTask {
            cycle: self.cycle,
            step: BootstrapStep::Enter,
        })
    }

    /// Abandon the current cycle; its pending steps become no-ops.
    pub fn reset(&mut self) {
        if self.phase != BootstrapPhase::Idle {
            tracing::debug!(cycle = self.cycle, phase = ?self.phase, "player spawn abandoned");
        }
        self.cycle += 1;
        self.phase = BootstrapPhase::Idle;
    }

    pub fn step<S: Simulation + ?Sized>(&mut self, task: BootstrapTask, sim: &mut S) -> StepOutput {
        if task.cycle != self.cycle {
            tracing::trace!(cycle = task.cycle, current = self.cycle, step = ?task.step, "stale spawn step");
            return StepOutput::default();
        }
        match task.step {
            BootstrapStep::Enter => self.enter(sim),
            BootstrapStep::Converge { iteration } => self.converge(iteration, sim),
            BootstrapStep::ApplyInventory { generation } => self.apply_inventory(generation, sim),
            BootstrapStep::ApplyBaseValues => {
                self.apply_base_values(sim);
                StepOutput::default()
            }
        }
    }

    fn task(&self, step: BootstrapStep) -> BootstrapTask {
        BootstrapTask {
            cycle: self.cycle,
            step,
        }
    }

    fn enter<S: Simulation + ?Sized>(&mut self, sim: &mut S) -> StepOutput {
        if self.phase != BootstrapPhase::Spawning {
            return StepOutput::default();
        }
        let transform = self.params.transform;
        tracing::info!(cell = %transform.world_or_cell, pos = ?transform.pos, "loading player into world");
        let load_order = sim.load_order();
        sim.load_world(LoadRequest {
            transform,
            appearance: self.params.appearance.clone(),
            load_order,
            time: GameTime::at_hour(self.params.game_hour),
        });
        if let Some(player) = sim.player() {
            sim.move_to(player, &transform);
        }
        if let Some(appearance) = &self.params.appearance {
            sim.apply_player_appearance(appearance);
        }
        self.phase = BootstrapPhase::Converging;

        let generation = self.spawn_generation;
        let mut follow_ups = vec![(
            self.convergence_interval,
            self.task(BootstrapStep::Converge { iteration: 1 }),
        )];
        follow_ups.extend(
            self.inventory_delays
                .iter()
                .map(|&wake| (wake, self.task(BootstrapStep::ApplyInventory { generation }))),
        );
        follow_ups.push((self.base_values_delay, self.task(BootstrapStep::ApplyBaseValues)));
        StepOutput {
            follow_ups,
            applied_inventory: None,
        }
    }

    fn converge<S: Simulation + ?Sized>(&mut self, iteration: u32, sim: &mut S) -> StepOutput {
        if self.phase != BootstrapPhase::Converging {
            return StepOutput::default();
        }
        let target = self.params.transform;
        let Some((player, pos)) = sim.player().and_then(|p| sim.position(p).map(|pos| (p, pos)))
        else {
            tracing::debug!(iteration, "player vanished while converging");
            self.phase = BootstrapPhase::Settled;
            return StepOutput::default();
        };
        let distance = Transform::planar_distance(pos, target.pos);
        if distance < self.convergence_radius {
            tracing::debug!(iteration, distance, "player reached spawn point");
            self.phase = BootstrapPhase::Settled;
            return StepOutput::default();
        }
        tracing::trace!(iteration, distance, "player still away from spawn point");
        sim.move_to(player, &target);
        StepOutput {
            follow_ups: vec![(
                self.convergence_interval,
                self.task(BootstrapStep::Converge {
                    iteration: iteration + 1,
                }),
            )],
            applied_inventory: None,
        }
    }

    fn apply_inventory<S: Simulation + ?Sized>(&mut self, generation: u64, sim: &mut S) -> StepOutput {
        let Some(player) = sim.player() else {
            tracing::debug!("no player to receive spawn inventory");
            return StepOutput::default();
        };
        if let Some(equipment) = &self.params.equipment {
            sim.apply_equipment(player, equipment);
        }
        if let Some(appearance) = &self.params.appearance {
            sim.apply_player_appearance(appearance);
        }
        if generation != self.inventory_generation {
            tracing::debug!(
                generation,
                current = self.inventory_generation,
                "skipping spawn inventory, a newer inventory arrived"
            );
            return StepOutput::default();
        }
        let Some(inventory) = &self.params.inventory else {
            return StepOutput::default();
        };
        sim.apply_inventory(player, inventory);
        StepOutput {
            follow_ups: Vec::new(),
            applied_inventory: Some(inventory.clone()),
        }
    }

    fn apply_base_values<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        let Some(player) = sim.player() else {
            return;
        };
        let props = &self.params.props;
        match props.decode::<Vec<FormId>>("learnedSpells") {
            Some(Ok(spells)) => {
                tracing::debug!(count = spells.len(), "replacing player spells");
                sim.replace_spells(player, &spells);
            }
            Some(Err(error)) => tracing::error!(%error, "learnedSpells is not a list of form ids"),
            None => {}
        }
        for name in BASE_VALUES {
            if let Some(value) = props.number(name) {
                sim.set_actor_value(player, name, value as f32);
            }
        }
        for (name, base) in PERCENTAGE_VALUES {
            if let (Some(fraction), Some(_)) = (props.number(name), props.number(base)) {
                sim.set_actor_value_percentage(player, base, fraction as f32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formsync_common::InventoryEntry;
    use formsync_sim::{HeadlessSimulation, SimCall};
    use glam::Vec3;
    use serde_json::json;

    const PLAYER: FormId = FormId(0x14);

    fn params(x: f32) -> SpawnParams {
        SpawnParams {
            transform: Transform {
                pos: Vec3::new(x, 0.0, 0.0),
                rot: Vec3::ZERO,
                world_or_cell: FormId(0x3c),
            },
            inventory: Some(Inventory {
                entries: vec![InventoryEntry {
                    base_id: FormId(0xf),
                    count: 100,
                    ..Default::default()
                }],
            }),
            game_hour: 9.0,
            ..SpawnParams::default()
        }
    }

    fn find(out: &StepOutput, step: BootstrapStep) -> Option<BootstrapTask> {
        out.follow_ups.iter().map(|(_, t)| *t).find(|t| t.step == step)
    }

    #[test]
    fn begin_is_ignored_while_running() {
        let mut b = PlayerBootstrap::new(&ReplicationConfig::default());
        assert!(b.begin(params(0.0)).is_some());
        assert_eq!(b.phase(), BootstrapPhase::Spawning);
        assert!(b.begin(params(10.0)).is_none());
    }

    #[test]
    fn enter_loads_world_and_schedules_follow_ups() {
        let mut b = PlayerBootstrap::new(&ReplicationConfig::default());
        let mut sim = HeadlessSimulation::new();
        sim.spawn_player(PLAYER, Vec3::ZERO);
        let enter = b.begin(params(5000.0)).unwrap();
        let out = b.step(enter, &mut sim);

        assert_eq!(b.phase(), BootstrapPhase::Converging);
        let SimCall::LoadWorld(load) = &sim.calls()[0] else {
            panic!("expected a world load first");
        };
        assert_eq!(load.time, GameTime::at_hour(9.0));
        assert_eq!(load.load_order, vec!["Skyrim.esm", "Update.esm"]);
        assert_eq!(out.follow_ups.len(), 4);
        assert_eq!(out.follow_ups[1].0, Wake::after_secs(1.0));
        assert_eq!(out.follow_ups[2].0, Wake::after_secs(1.3));
    }

    #[test]
    fn converges_within_radius() {
        let mut b = PlayerBootstrap::new(&ReplicationConfig::default());
        let mut sim = HeadlessSimulation::new().with_approach_step(1000.0);
        sim.spawn_player(PLAYER, Vec3::ZERO);
        let enter = b.begin(params(2500.0)).unwrap();
        let out = b.step(enter, &mut sim);
        let mut next = find(&out, BootstrapStep::Converge { iteration: 1 });
        let mut rounds = 0;
        while let Some(task) = next {
            rounds += 1;
            let out = b.step(task, &mut sim);
            next = out.follow_ups.first().map(|(_, t)| *t);
        }
        assert_eq!(b.phase(), BootstrapPhase::Settled);
        assert_eq!(rounds, 3);
    }

    #[test]
    fn converge_stops_when_player_vanishes() {
        let mut b = PlayerBootstrap::new(&ReplicationConfig::default());
        let mut sim = HeadlessSimulation::new();
        let enter = b.begin(params(2500.0)).unwrap();
        let out = b.step(enter, &mut sim);
        let converge = find(&out, BootstrapStep::Converge { iteration: 1 }).unwrap();
        assert!(b.step(converge, &mut sim).follow_ups.is_empty());
        assert_eq!(b.phase(), BootstrapPhase::Settled);
    }

    #[test]
    fn stale_generation_skips_inventory_but_not_equipment() {
        let mut b = PlayerBootstrap::new(&ReplicationConfig::default());
        let mut sim = HeadlessSimulation::new();
        sim.spawn_player(PLAYER, Vec3::ZERO);
        let mut p = params(0.0);
        p.equipment = Some(Equipment::default());
        let enter = b.begin(p).unwrap();
        let out = b.step(enter, &mut sim);
        let apply = find(&out, BootstrapStep::ApplyInventory { generation: 0 }).unwrap();

        b.bump_inventory_generation();
        let out = b.step(apply, &mut sim);
        assert!(out.applied_inventory.is_none());
        assert_eq!(sim.count(|c| matches!(c, SimCall::ApplyInventory { .. })), 0);
        assert_eq!(sim.count(|c| matches!(c, SimCall::ApplyEquipment { .. })), 1);
    }

    #[test]
    fn inventory_arriving_before_enter_invalidates_spawn_inventory() {
        let mut b = PlayerBootstrap::new(&ReplicationConfig::default());
        let mut sim = HeadlessSimulation::new();
        sim.spawn_player(PLAYER, Vec3::ZERO);
        let enter = b.begin(params(0.0)).unwrap();
        b.bump_inventory_generation();
        let out = b.step(enter, &mut sim);

        let applies: Vec<_> = out
            .follow_ups
            .iter()
            .filter(|(_, t)| matches!(t.step, BootstrapStep::ApplyInventory { .. }))
            .map(|(_, t)| *t)
            .collect();
        assert_eq!(applies.len(), 2);
        for apply in applies {
            assert_eq!(apply.step, BootstrapStep::ApplyInventory { generation: 0 });
            assert!(b.step(apply, &mut sim).applied_inventory.is_none());
        }
        assert_eq!(sim.count(|c| matches!(c, SimCall::ApplyInventory { .. })), 0);
    }

    #[test]
    fn base_values_need_numeric_base_for_percentages() {
        let mut b = PlayerBootstrap::new(&ReplicationConfig::default());
        let mut sim = HeadlessSimulation::new();
        sim.spawn_player(PLAYER, Vec3::ZERO);
        let mut p = params(0.0);
        p.props = serde_json::from_value(json!({
            "health": 250,
            "healthPercentage": 0.5,
            "staminaPercentage": 0.25,
            "learnedSpells": [0x12fcd, 0x12fcc],
        }))
        .unwrap();
        let enter = b.begin(p).unwrap();
        let out = b.step(enter, &mut sim);
        sim.take_calls();
        b.step(find(&out, BootstrapStep::ApplyBaseValues).unwrap(), &mut sim);

        assert_eq!(
            sim.calls(),
            &[
                SimCall::ReplaceSpells {
                    id: PLAYER,
                    spells: vec![FormId(0x12fcd), FormId(0x12fcc)],
                },
                SimCall::SetActorValue {
                    id: PLAYER,
                    name: "health".into(),
                    value: 250.0,
                },
                SimCall::SetActorValuePercentage {
                    id: PLAYER,
                    name: "health".into(),
                    fraction: 0.5,
                },
            ]
        );
    }

    #[test]
    fn reset_invalidates_pending_steps() {
        let mut b = PlayerBootstrap::new(&ReplicationConfig::default());
        let mut sim = HeadlessSimulation::new();
        let enter = b.begin(params(0.0)).unwrap();
        b.reset();
        assert!(b.step(enter, &mut sim).follow_ups.is_empty());
        assert!(sim.calls().is_empty());
        assert_eq!(b.phase(), BootstrapPhase::Idle);
    }
}
