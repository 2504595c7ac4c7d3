use formsync_common::FormId;
use serde::{Deserialize, Serialize};

/// How updates for a given object reach the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyPolicy {
    /// Mirror the object in a world-model slot; a view materializes it.
    SlotBacked,
    /// The object already exists in the simulation; apply changes to it directly.
    DirectApply,
}

/// Forces a policy for every object of one base record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordTypeOverride {
    pub record_type: String,
    pub policy: ApplyPolicy,
}

/// Replication tunables. Every field has a default, so a partial JSON
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicationConfig {
    /// Remote object ids below this are pre-existing simulation objects.
    pub direct_apply_threshold: u32,
    /// Checked before the threshold.
    pub record_type_overrides: Vec<RecordTypeOverride>,
    /// Update events a deferred application waits for its object.
    pub materialize_attempts: u32,
    pub animation_retry_attempts: u32,
    pub animation_retry_delay_secs: f32,
    /// Planar distance at which the spawning player counts as arrived.
    pub convergence_radius: f32,
    pub convergence_interval_secs: f32,
    /// Offsets from spawn at which inventory, equipment and appearance are applied.
    pub inventory_apply_delays_secs: Vec<f32>,
    pub base_values_delay_secs: f32,
    pub race_menu_delay_secs: f32,
    /// Worn item removed before the race menu opens.
    pub protective_item: FormId,
    pub open_container_delay_secs: f32,
    pub menu_poll_interval_secs: f32,
    pub furniture_exit_delay_secs: f32,
    /// Poll budget while waiting for a container or furniture to open.
    pub menu_open_polls: u32,
    pub player_inventory_reapply_secs: f32,
    /// Id the server uses for "the player" in outbound messages.
    pub player_form_id: FormId,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            direct_apply_threshold: 0xff00_0000,
            record_type_overrides: vec![RecordTypeOverride {
                record_type: "DOOR".to_owned(),
                policy: ApplyPolicy::SlotBacked,
            }],
            materialize_attempts: 120,
            animation_retry_attempts: 5,
            animation_retry_delay_secs: 2.0,
            convergence_radius: 256.0,
            convergence_interval_secs: 1.0,
            inventory_apply_delays_secs: vec![1.0, 1.3],
            base_values_delay_secs: 1.0,
            race_menu_delay_secs: 0.3,
            protective_item: FormId(0x0001_2e4d),
            open_container_delay_secs: 0.1,
            menu_poll_interval_secs: 0.1,
            furniture_exit_delay_secs: 1.0,
            menu_open_polls: 600,
            player_inventory_reapply_secs: 5.0,
            player_form_id: FormId(0x14),
        }
    }
}

impl ReplicationConfig {
    /// Policy for an object with remote id `refr_id` and base record type
    /// `record_type`. Objects without a remote id are always slot-backed.
    pub fn policy_for(&self, refr_id: Option<FormId>, record_type: Option<&str>) -> ApplyPolicy {
        let Some(refr_id) = refr_id.filter(|id| !id.is_none()) else {
            return ApplyPolicy::SlotBacked;
        };
        if let Some(forced) = record_type.and_then(|rt| {
            self.record_type_overrides
                .iter()
                .find(|o| o.record_type == rt)
        }) {
            return forced.policy;
        }
        if refr_id.0 < self.direct_apply_threshold {
            ApplyPolicy::DirectApply
        } else {
            ApplyPolicy::SlotBacked
        }
    }

    /// True for ids in the client-spawned (actor) range.
    pub fn is_spawned_id(&self, id: FormId) -> bool {
        id.0 >= self.direct_apply_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_ids_are_direct_apply() {
        let c = ReplicationConfig::default();
        assert_eq!(
            c.policy_for(Some(FormId(0x0001_f00d)), Some("CONT")),
            ApplyPolicy::DirectApply
        );
        assert_eq!(
            c.policy_for(Some(FormId(0xff00_0003)), Some("NPC_")),
            ApplyPolicy::SlotBacked
        );
    }

    #[test]
    fn missing_refr_id_is_slot_backed() {
        let c = ReplicationConfig::default();
        assert_eq!(c.policy_for(None, None), ApplyPolicy::SlotBacked);
        assert_eq!(c.policy_for(Some(FormId::NONE), None), ApplyPolicy::SlotBacked);
    }

    #[test]
    fn record_type_override_wins() {
        let c = ReplicationConfig::default();
        assert_eq!(
            c.policy_for(Some(FormId(0x0001_f00d)), Some("DOOR")),
            ApplyPolicy::SlotBacked
        );

        let c = ReplicationConfig {
            record_type_overrides: vec![RecordTypeOverride {
                record_type: "ACTI".into(),
                policy: ApplyPolicy::DirectApply,
            }],
            ..ReplicationConfig::default()
        };
        assert_eq!(
            c.policy_for(Some(FormId(0xff00_0001)), Some("ACTI")),
            ApplyPolicy::DirectApply
        );
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: ReplicationConfig =
            serde_json::from_str(r#"{ "directApplyThreshold": 4096, "materializeAttempts": 3 }"#)
                .unwrap();
        assert_eq!(c.direct_apply_threshold, 4096);
        assert_eq!(c.materialize_attempts, 3);
        assert_eq!(c.convergence_radius, 256.0);
        assert_eq!(c.inventory_apply_delays_secs, vec![1.0, 1.3]);
    }
}
