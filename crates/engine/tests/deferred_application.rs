use std::time::Duration;

use formsync_common::{FormId, Inventory, InventoryEntry};
use formsync_engine::{
    BootstrapPhase, Message, ReplicationConfig, ReplicationEngine, ReplicationError,
};
use formsync_sim::{BaseType, HeadlessSimulation, SimCall, SimError, SimObject};
use glam::Vec3;
use serde_json::{Value, json};

const FRAME: Duration = Duration::from_millis(100);
const PLAYER: FormId = FormId(0x14);
const CHEST: FormId = FormId(0x0001_f00d);

fn msg(value: Value) -> Message {
    serde_json::from_value(value).unwrap()
}

fn engine_with(config: ReplicationConfig, sim: HeadlessSimulation) -> ReplicationEngine<HeadlessSimulation> {
    ReplicationEngine::new(config, sim)
}

fn engine() -> ReplicationEngine<HeadlessSimulation> {
    engine_with(ReplicationConfig::default(), HeadlessSimulation::new())
}

/// One frame: a tick of `FRAME` followed by an update. Errors are returned.
fn frame(e: &mut ReplicationEngine<HeadlessSimulation>) -> Vec<ReplicationError> {
    let mut errors = e.tick(FRAME);
    errors.extend(e.update());
    errors
}

fn run_for(e: &mut ReplicationEngine<HeadlessSimulation>, secs: f32) {
    let frames = (secs / FRAME.as_secs_f32()).round() as u32;
    for _ in 0..frames {
        assert!(frame(e).is_empty());
    }
}

fn inventory(base_id: u32, count: i32) -> Inventory {
    Inventory {
        entries: vec![InventoryEntry {
            base_id: FormId(base_id),
            count,
            ..Default::default()
        }],
    }
}

fn create_existing(refr_id: FormId, props: Value) -> Message {
    msg(json!({
        "t": "createActor",
        "idx": 40,
        "refrId": refr_id.0,
        "baseRecordType": "CONT",
        "transform": { "pos": [0.0, 0.0, 0.0], "rot": [0.0, 0.0, 0.0], "worldOrCell": 60 },
        "props": props
    }))
}

fn create_player(pos: [f32; 3], props: Value) -> Message {
    msg(json!({
        "t": "createActor",
        "idx": 0,
        "refrId": 0xff00_0000u32,
        "isMe": true,
        "transform": { "pos": pos, "rot": [0.0, 0.0, 0.0], "worldOrCell": 60 },
        "props": props
    }))
}

#[test]
fn container_state_applies_once_after_late_spawn() {
    let mut e = engine();
    e.handle(create_existing(
        CHEST,
        json!({
            "inventory": { "entries": [{ "baseId": 15, "count": 2 }] },
            "isOpen": true,
            "setNodeScale": 1.5
        }),
    ))
    .unwrap();
    assert!(e.world().is_empty());
    assert!(e.ids().is_empty());

    for _ in 0..10 {
        assert!(e.update().is_empty());
    }
    assert!(e.sim().calls().is_empty());

    e.sim_mut().spawn(CHEST, SimObject::new(BaseType::Container));
    for _ in 0..10 {
        assert!(e.update().is_empty());
    }
    assert_eq!(
        e.sim().calls(),
        &[
            SimCall::ApplyInventory { id: CHEST, inventory: inventory(15, 2) },
            SimCall::SetOpen { id: CHEST, open: true },
            SimCall::SetHarvested { id: CHEST, harvested: false },
            SimCall::SetNodeScale { id: CHEST, scale: json!(1.5) },
            SimCall::SetDisabled { id: CHEST, disabled: false },
        ]
    );
    assert!(e.world().is_empty());
}

#[test]
fn create_without_props_leaves_an_existing_object_alone() {
    let mut e = engine();
    e.sim_mut().spawn(CHEST, SimObject::new(BaseType::Container));
    e.handle(msg(json!({
        "t": "createActor",
        "idx": 40,
        "refrId": CHEST.0,
        "baseRecordType": "CONT",
        "transform": { "pos": [0.0, 0.0, 0.0], "rot": [0.0, 0.0, 0.0], "worldOrCell": 60 }
    })))
    .unwrap();
    assert!(e.update().is_empty());
    assert!(e.sim().calls().is_empty());
    assert!(e.world().is_empty());
}

#[test]
fn door_records_keep_a_slot() {
    let mut e = engine();
    e.handle(msg(json!({
        "t": "createActor", "idx": 3, "refrId": 0x0001_2345, "baseRecordType": "DOOR",
        "transform": { "pos": [0.0, 0.0, 0.0], "rot": [0.0, 0.0, 0.0], "worldOrCell": 60 },
        "props": { "isOpen": true }
    })))
    .unwrap();
    e.update();
    assert_eq!(e.world().form_count(), 1);
    assert!(e.world().get(0).unwrap().props.flag("isOpen"));
    assert!(e.sim().calls().is_empty());
}

#[test]
fn direct_property_waits_for_its_object() {
    let mut e = engine();
    e.handle(msg(json!({
        "t": "updateProperty", "idx": 40, "refrId": CHEST.0, "baseRecordType": "CONT",
        "propName": "isHarvested", "data": true
    })))
    .unwrap();
    e.update();
    assert!(e.sim().calls().is_empty());

    e.sim_mut().spawn(CHEST, SimObject::new(BaseType::Flora));
    e.update();
    e.update();
    assert_eq!(
        e.sim().calls(),
        &[SimCall::SetHarvested { id: CHEST, harvested: true }]
    );
}

#[test]
fn materialization_gives_up_after_its_budget() {
    let config = ReplicationConfig {
        materialize_attempts: 3,
        ..ReplicationConfig::default()
    };
    let mut e = engine_with(config, HeadlessSimulation::new());
    e.handle(create_existing(CHEST, json!({ "isOpen": true }))).unwrap();
    for _ in 0..3 {
        assert!(e.update().is_empty());
    }
    e.sim_mut().spawn(CHEST, SimObject::new(BaseType::Container));
    for _ in 0..5 {
        assert!(e.update().is_empty());
    }
    assert!(e.sim().calls().is_empty());
    assert_eq!(e.scheduler_stats().pending, 0);
}

#[test]
fn rejected_animation_is_retried_on_a_timer() {
    let mut e = engine();
    e.sim_mut().spawn(CHEST, SimObject::new(BaseType::Container));
    e.sim_mut().reject_animations(2);
    e.handle(create_existing(CHEST, json!({ "lastAnimation": "Open" }))).unwrap();
    run_for(&mut e, 5.0);

    let plays: Vec<bool> = e
        .sim()
        .calls()
        .iter()
        .filter_map(|c| match c {
            SimCall::PlayAnimation { accepted, .. } => Some(*accepted),
            _ => None,
        })
        .collect();
    assert_eq!(plays, vec![false, false, true]);
}

#[test]
fn animation_retry_is_bounded() {
    let mut e = engine();
    e.sim_mut().spawn(CHEST, SimObject::new(BaseType::Container));
    e.sim_mut().reject_animations(100);
    e.handle(create_existing(CHEST, json!({ "lastAnimation": "Open" }))).unwrap();
    run_for(&mut e, 30.0);
    assert_eq!(
        e.sim().count(|c| matches!(c, SimCall::PlayAnimation { .. })),
        e.config().animation_retry_attempts as usize
    );
}

#[test]
fn display_name_substitutes_the_base_name() {
    let mut e = engine();
    e.sim_mut()
        .spawn(CHEST, SimObject::new(BaseType::Container).named("Chest"));
    e.handle(create_existing(
        CHEST,
        json!({ "displayName": "Lydia's %original_name%" }),
    ))
    .unwrap();
    e.update();
    assert_eq!(
        e.sim().count(|c| *c
            == SimCall::SetDisplayName {
                id: CHEST,
                name: "Lydia's Chest".into(),
            }),
        1
    );
}

fn create_npc(e: &mut ReplicationEngine<HeadlessSimulation>, npc: FormId) {
    e.handle(msg(json!({
        "t": "createActor", "idx": 3, "refrId": 0xff00_0003u32,
        "transform": { "pos": [0.0, 0.0, 0.0], "rot": [0.0, 0.0, 0.0], "worldOrCell": 60 }
    })))
    .unwrap();
    e.sim_mut().spawn(npc, SimObject::new(BaseType::Actor));
    e.sim_mut().bind_view(0, npc);
}

fn death_state(is_dead: bool) -> Message {
    msg(json!({
        "t": "deathStateContainer",
        "tIsDead": { "idx": 3, "propName": "isDead", "data": is_dead },
        "tChangeValues": { "idx": 3, "data": { "health": 0.0 } }
    }))
}

#[test]
fn death_state_needing_respawn_deletes_the_actor() {
    let npc = FormId(0xff00_0003);
    let mut e = engine();
    create_npc(&mut e, npc);
    e.sim_mut().require_respawn(npc);
    e.handle(death_state(true)).unwrap();
    assert!(e.update().is_empty());

    assert!(e.world().get(0).unwrap().is_dead);
    let calls = e.sim().calls();
    assert_eq!(
        calls,
        &[
            SimCall::SetActorValuePercentage { id: npc, name: "health".into(), fraction: 0.0 },
            SimCall::ApplyDeathState { id: npc, is_dead: true },
            SimCall::DisableAndDelete(npc),
        ]
    );
    assert!(e.sim().object(npc).is_none());
}

#[test]
fn other_death_state_failures_are_reported() {
    let npc = FormId(0xff00_0003);
    let mut e = engine();
    create_npc(&mut e, npc);
    e.sim_mut().fail_death_state("ragdoll busy");
    e.handle(death_state(false)).unwrap();
    let errors = e.update();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ReplicationError::Sim(SimError::Failed(reason)) if reason == "ragdoll busy"
    ));
    assert_eq!(e.sim().count(|c| matches!(c, SimCall::DisableAndDelete(_))), 0);
}

#[test]
fn death_state_for_a_replaced_form_is_skipped() {
    let npc = FormId(0xff00_0003);
    let mut e = engine();
    create_npc(&mut e, npc);
    e.handle(death_state(true)).unwrap();
    e.handle(msg(json!({ "t": "destroyActor", "idx": 3 }))).unwrap();
    e.handle(msg(json!({
        "t": "createActor", "idx": 8, "refrId": 0xff00_0008u32,
        "transform": { "pos": [0.0, 0.0, 0.0], "rot": [0.0, 0.0, 0.0], "worldOrCell": 60 }
    })))
    .unwrap();
    assert!(e.update().is_empty());
    assert_eq!(e.sim().count(|c| matches!(c, SimCall::ApplyDeathState { .. })), 0);
}

#[test]
fn convergence_stops_inside_the_radius() {
    let mut sim = HeadlessSimulation::new().with_approach_step(1000.0);
    sim.spawn_player(PLAYER, Vec3::ZERO);
    let mut e = engine_with(ReplicationConfig::default(), sim);
    e.handle(create_player([5000.0, 0.0, 0.0], json!({}))).unwrap();
    e.update();
    assert_eq!(e.bootstrap().phase(), BootstrapPhase::Converging);

    let mut seconds = 0;
    while e.bootstrap().phase() == BootstrapPhase::Converging {
        assert!(seconds < 20, "convergence did not terminate");
        run_for(&mut e, 1.0);
        seconds += 1;
    }
    assert_eq!(e.bootstrap().phase(), BootstrapPhase::Settled);
    let pos = e.sim().object(PLAYER).unwrap().position;
    assert!(pos.truncate().distance(Vec3::new(5000.0, 0.0, 0.0).truncate()) < 256.0);
    assert_eq!(
        e.sim().count(|c| matches!(c, SimCall::MoveTo { id: PLAYER, .. })),
        5
    );
}

#[test]
fn convergence_keeps_going_while_far_away() {
    let mut sim = HeadlessSimulation::new().with_approach_step(0.0);
    sim.spawn_player(PLAYER, Vec3::ZERO);
    let mut e = engine_with(ReplicationConfig::default(), sim);
    e.handle(create_player([3000.0, 0.0, 0.0], json!({}))).unwrap();
    e.update();
    run_for(&mut e, 10.0);
    assert_eq!(e.bootstrap().phase(), BootstrapPhase::Converging);
    assert!(e.sim().count(|c| matches!(c, SimCall::MoveTo { .. })) >= 10);

    e.sim_mut().despawn(PLAYER);
    run_for(&mut e, 1.0);
    assert_eq!(e.bootstrap().phase(), BootstrapPhase::Settled);
}

#[test]
fn spawn_inventory_is_applied_when_nothing_newer_arrives() {
    let mut sim = HeadlessSimulation::new();
    sim.spawn_player(PLAYER, Vec3::ZERO);
    let mut e = engine_with(ReplicationConfig::default(), sim);
    e.handle(create_player(
        [0.0, 0.0, 0.0],
        json!({ "inventory": { "entries": [{ "baseId": 15, "count": 1 }] } }),
    ))
    .unwrap();
    run_for(&mut e, 1.5);
    let spawn_inventory = inventory(15, 1);
    assert_eq!(
        e.sim().count(|c| matches!(c, SimCall::ApplyInventory { inventory, .. } if *inventory == spawn_inventory)),
        2
    );
    assert_eq!(e.player_inventory(), Some(&spawn_inventory));
}

#[test]
fn inventory_sent_with_the_spawn_supersedes_spawn_inventory() {
    let mut sim = HeadlessSimulation::new();
    sim.spawn_player(PLAYER, Vec3::ZERO);
    let mut e = engine_with(ReplicationConfig::default(), sim);
    e.handle(create_player(
        [0.0, 0.0, 0.0],
        json!({ "inventory": { "entries": [{ "baseId": 15, "count": 1 }] } }),
    ))
    .unwrap();
    e.handle(msg(json!({
        "t": "setInventory",
        "inventory": { "entries": [{ "baseId": 16, "count": 4 }] }
    })))
    .unwrap();
    run_for(&mut e, 2.0);

    let spawn_inventory = inventory(15, 1);
    assert_eq!(
        e.sim().count(|c| matches!(c, SimCall::ApplyInventory { inventory, .. } if *inventory == spawn_inventory)),
        0
    );
    assert_eq!(e.player_inventory(), Some(&inventory(16, 4)));
}

#[test]
fn newer_inventory_suppresses_pending_spawn_inventory() {
    let mut sim = HeadlessSimulation::new();
    sim.spawn_player(PLAYER, Vec3::ZERO);
    let mut e = engine_with(ReplicationConfig::default(), sim);
    e.handle(create_player(
        [0.0, 0.0, 0.0],
        json!({ "inventory": { "entries": [{ "baseId": 15, "count": 1 }] } }),
    ))
    .unwrap();
    e.update();

    let newer = inventory(16, 4);
    e.handle(msg(json!({
        "t": "setInventory",
        "inventory": { "entries": [{ "baseId": 16, "count": 4 }] }
    })))
    .unwrap();
    run_for(&mut e, 2.0);

    let spawn_inventory = inventory(15, 1);
    assert_eq!(
        e.sim().count(|c| matches!(c, SimCall::ApplyInventory { inventory, .. } if *inventory == spawn_inventory)),
        0
    );
    assert_eq!(
        e.sim().count(|c| matches!(c, SimCall::ApplyInventory { inventory, .. } if *inventory == newer)),
        1
    );
    assert_eq!(e.player_inventory(), Some(&newer));
}
