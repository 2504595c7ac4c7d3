use formsync_common::{FormId, RemoteIndex};
use formsync_kernel::{Form, IdentifierMap, WorldModel};

/// World model inspector for developer tooling.
///
/// Provides read-only queries against the replicated state for debugging
/// and replay output.
pub struct WorldInspector;

impl WorldInspector {
    /// Produce a summary of the world model and its identifier map.
    pub fn summary(world: &WorldModel, ids: &IdentifierMap) -> WorldSummary {
        WorldSummary {
            slots: world.len(),
            forms: world.form_count(),
            mapped_ids: ids.len(),
            player_slot: world.player_slot(),
            pending_events: world.events().len(),
        }
    }

    /// Details of the form in `slot`.
    pub fn inspect_form(world: &WorldModel, slot: usize) -> Option<FormInfo> {
        world.get(slot).map(FormInfo::from_form)
    }

    /// Occupied slots in slot order.
    pub fn list_forms(world: &WorldModel) -> Vec<usize> {
        world.forms().map(|form| form.slot).collect()
    }
}

/// Summary of the replicated state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSummary {
    /// Length of the slot sequence, empty slots included.
    pub slots: usize,
    pub forms: usize,
    pub mapped_ids: usize,
    pub player_slot: Option<usize>,
    pub pending_events: usize,
}

impl std::fmt::Display for WorldSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "World: slots={} forms={} ids={} events={}",
            self.slots, self.forms, self.mapped_ids, self.pending_events
        )?;
        match self.player_slot {
            Some(slot) => write!(f, " player=#{slot}"),
            None => f.write_str(" player=none"),
        }
    }
}

/// Detailed info about a single form.
#[derive(Debug, Clone, PartialEq)]
pub struct FormInfo {
    pub slot: usize,
    pub remote: RemoteIndex,
    pub refr_id: Option<FormId>,
    pub position: Option<[f32; 3]>,
    pub is_dead: bool,
    pub movement_changes: u64,
    pub appearance_changes: u64,
    pub props: Vec<String>,
}

impl FormInfo {
    fn from_form(form: &Form) -> Self {
        Self {
            slot: form.slot,
            remote: form.remote,
            refr_id: form.refr_id,
            position: form.movement.as_ref().map(|m| m.pos.to_array()),
            is_dead: form.is_dead,
            movement_changes: form.num_movement_changes,
            appearance_changes: form.num_appearance_changes,
            props: form.props.iter().map(|(name, _)| name.clone()).collect(),
        }
    }
}

impl std::fmt::Display for FormInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Form #{} remote={}", self.slot, self.remote)?;
        if let Some(refr_id) = self.refr_id {
            write!(f, " refr={refr_id}")?;
        }
        if let Some([x, y, z]) = self.position {
            write!(f, " pos=({x:.2}, {y:.2}, {z:.2})")?;
        }
        write!(
            f,
            " moves={} looks={}",
            self.movement_changes, self.appearance_changes
        )?;
        if self.is_dead {
            f.write_str(" dead")?;
        }
        if !self.props.is_empty() {
            write!(f, " props=[{}]", self.props.join(", "))?;
        }
        Ok(())
    }
}
