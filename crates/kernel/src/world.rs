use formsync_common::{
    Animation, Appearance, Equipment, FormId, Movement, PropertyBag, RemoteIndex, is_truthy,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record produced by every structural change to the world model.
///
/// Views that mirror forms into the simulation drain these to learn which
/// slots appeared or vanished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// A form was placed in `slot`.
    Created { slot: usize, remote: RemoteIndex },
    /// The form in `slot` was removed.
    Destroyed { slot: usize, remote: RemoteIndex },
    /// Every slot was cleared (reconnection).
    Reset,
}

/// Local record of one server-owned form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub slot: usize,
    pub remote: RemoteIndex,
    pub refr_id: Option<FormId>,
    pub base_id: FormId,
    pub base_record_type: Option<String>,
    pub movement: Option<Movement>,
    pub appearance: Option<Appearance>,
    pub equipment: Option<Equipment>,
    pub animation: Option<Animation>,
    pub is_dead: bool,
    /// Set on the record that represents the local player.
    pub is_my_clone: bool,
    pub num_movement_changes: u64,
    pub num_appearance_changes: u64,
    /// Extension data the typed fields don't cover.
    pub props: PropertyBag,
}

impl Form {
    pub fn new(slot: usize, remote: RemoteIndex, base_id: FormId) -> Self {
        Self {
            slot,
            remote,
            refr_id: None,
            base_id,
            base_record_type: None,
            movement: None,
            appearance: None,
            equipment: None,
            animation: None,
            is_dead: false,
            is_my_clone: false,
            num_movement_changes: 0,
            num_appearance_changes: 0,
            props: PropertyBag::new(),
        }
    }

    /// Overwrite movement and bump the movement counter.
    pub fn apply_movement(&mut self, movement: Movement) {
        self.movement = Some(movement);
        self.num_movement_changes += 1;
    }

    /// Overwrite (or clear) appearance and bump the appearance counter.
    pub fn apply_appearance(&mut self, appearance: Option<Appearance>) {
        self.appearance = appearance;
        self.num_appearance_changes += 1;
    }

    /// Set a named property. `isDead` lands on the typed death flag; every
    /// other name goes to the property bag.
    pub fn set_property(&mut self, name: &str, value: Value) {
        match name {
            "isDead" => self.is_dead = is_truthy(&value),
            _ => {
                self.props.insert(name, value);
            }
        }
    }
}

/// Sparse, slot-addressed store of forms plus the player pointer.
///
/// Uses a `Vec<Option<Form>>` so that slot numbers stay dense and stable.
/// The tail is always occupied: see [`WorldModel::trim`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldModel {
    forms: Vec<Option<Form>>,
    player_slot: Option<usize>,
    player_refr_id: Option<FormId>,
    #[serde(skip)]
    event_log: Vec<WorldEvent>,
}

impl WorldModel {
    pub const fn new() -> Self {
        Self {
            forms: Vec::new(),
            player_slot: None,
            player_refr_id: None,
            event_log: Vec::new(),
        }
    }

    /// Length of the slot sequence, gaps included.
    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// Number of occupied slots.
    pub fn form_count(&self) -> usize {
        self.forms.iter().filter(|f| f.is_some()).count()
    }

    pub fn get(&self, slot: usize) -> Option<&Form> {
        self.forms.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Form> {
        self.forms.get_mut(slot).and_then(Option::as_mut)
    }

    /// Iterate occupied slots in slot order.
    pub fn forms(&self) -> impl Iterator<Item = &Form> {
        self.forms.iter().flatten()
    }

    /// Grow the sequence so `slot` is addressable. New entries are empty.
    pub fn ensure_slot(&mut self, slot: usize) {
        if self.forms.len() <= slot {
            self.forms.resize_with(slot + 1, || None);
        }
    }

    /// Place a form in `slot`, growing the sequence if needed.
    pub fn set_form(&mut self, slot: usize, form: Form) {
        self.ensure_slot(slot);
        self.event_log.push(WorldEvent::Created {
            slot,
            remote: form.remote,
        });
        self.forms[slot] = Some(form);
    }

    /// Empty `slot` and return what it held. Does not trim.
    pub fn clear_form(&mut self, slot: usize) -> Option<Form> {
        let removed = self.forms.get_mut(slot).and_then(Option::take);
        if let Some(ref form) = removed {
            self.event_log.push(WorldEvent::Destroyed {
                slot,
                remote: form.remote,
            });
        }
        removed
    }

    /// Drop trailing empty slots. Returns how many were removed.
    ///
    /// Empty slots followed by an occupied one are left in place.
    pub fn trim(&mut self) -> usize {
        let before = self.forms.len();
        while let Some(None) = self.forms.last() {
            self.forms.pop();
        }
        before - self.forms.len()
    }

    /// Set an extension property on the form in `slot`.
    /// Returns false if the slot is empty.
    pub fn merge_property(&mut self, slot: usize, name: &str, value: Value) -> bool {
        match self.get_mut(slot) {
            Some(form) => {
                form.set_property(name, value);
                true
            }
            None => false,
        }
    }

    pub fn player_slot(&self) -> Option<usize> {
        self.player_slot
    }

    pub fn player_refr_id(&self) -> Option<FormId> {
        self.player_refr_id
    }

    pub fn set_player(&mut self, slot: usize, refr_id: Option<FormId>) {
        self.player_slot = Some(slot);
        self.player_refr_id = refr_id;
    }

    pub fn clear_player(&mut self) {
        self.player_slot = None;
        self.player_refr_id = None;
    }

    pub fn is_player_slot(&self, slot: usize) -> bool {
        self.player_slot == Some(slot)
    }

    /// Slot of the form whose remote object id is `refr_id`.
    pub fn find_by_refr_id(&self, refr_id: FormId) -> Option<usize> {
        self.forms()
            .find(|f| f.refr_id == Some(refr_id))
            .map(|f| f.slot)
    }

    /// Clear every slot and the player pointer.
    pub fn reset(&mut self) {
        self.forms.clear();
        self.clear_player();
        self.event_log.push(WorldEvent::Reset);
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    /// Read-only access to the event log.
    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }
}
