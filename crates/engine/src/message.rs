//! Wire shapes of the messages the engine consumes and produces.
//!
//! Inbound messages are internally tagged by `"t"`, with camelCase fields,
//! so a replay script is one JSON object per line.

use formsync_common::{
    AnimVariables, Animation, Appearance, Equipment, FormId, Inventory, Movement, PropertyBag,
    Reliability, RemoteIndex, Transform,
};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every message kind the engine accepts from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "camelCase")]
pub enum Message {
    CreateActor(CreateActor),
    DestroyActor(DestroyActor),
    UpdateMovement(FormUpdate<Movement>),
    UpdateAnimation(FormUpdate<Animation>),
    UpdateEquipment(FormUpdate<Equipment>),
    UpdateAppearance(FormUpdate<Option<Appearance>>),
    ChangeValues(ChangeValues),
    Teleport(Teleport),
    /// Older schema of [`Message::Teleport`]; handled the same way.
    Teleport2(Teleport),
    SetInventory(SetInventory),
    OpenContainer(OpenContainer),
    SetRaceMenuOpen(SetRaceMenuOpen),
    UpdateProperty(UpdateProperty),
    DeathStateContainer(DeathStateContainer),
    HostStart(HostTarget),
    HostStop(HostTarget),
    SpellCast(SpellCast),
    UpdateAnimVariables(UpdateAnimVariables),
    CustomPacket(CustomPacket),
}

impl Message {
    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::CreateActor(_) => "createActor",
            Message::DestroyActor(_) => "destroyActor",
            Message::UpdateMovement(_) => "updateMovement",
            Message::UpdateAnimation(_) => "updateAnimation",
            Message::UpdateEquipment(_) => "updateEquipment",
            Message::UpdateAppearance(_) => "updateAppearance",
            Message::ChangeValues(_) => "changeValues",
            Message::Teleport(_) => "teleport",
            Message::Teleport2(_) => "teleport2",
            Message::SetInventory(_) => "setInventory",
            Message::OpenContainer(_) => "openContainer",
            Message::SetRaceMenuOpen(_) => "setRaceMenuOpen",
            Message::UpdateProperty(_) => "updateProperty",
            Message::DeathStateContainer(_) => "deathStateContainer",
            Message::HostStart(_) => "hostStart",
            Message::HostStop(_) => "hostStop",
            Message::SpellCast(_) => "spellCast",
            Message::UpdateAnimVariables(_) => "updateAnimVariables",
            Message::CustomPacket(_) => "customPacket",
        }
    }
}

/// A custom property whose value arrives as serialized JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPropDump {
    pub prop_name: String,
    pub prop_value_json_dump: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActor {
    pub idx: RemoteIndex,
    pub refr_id: Option<FormId>,
    #[serde(default)]
    pub base_id: FormId,
    pub base_record_type: Option<String>,
    pub transform: Transform,
    #[serde(default)]
    pub is_me: bool,
    pub appearance: Option<Appearance>,
    pub equipment: Option<Equipment>,
    #[serde(default)]
    pub is_dead: bool,
    pub animation: Option<Animation>,
    pub props: Option<PropertyBag>,
    #[serde(default)]
    pub custom_props_json_dumps: Vec<CustomPropDump>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyActor {
    pub idx: RemoteIndex,
}

/// Component update addressed to one form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormUpdate<T> {
    pub idx: RemoteIndex,
    pub data: T,
}

/// Actor value fractions. Only numeric fields are applied.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueFractions {
    pub health: Option<Value>,
    pub stamina: Option<Value>,
    pub magicka: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeValues {
    #[serde(default)]
    pub idx: RemoteIndex,
    pub data: ValueFractions,
}

/// Without `idx` the teleport targets the local player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teleport {
    #[serde(default)]
    pub idx: RemoteIndex,
    pub pos: Vec3,
    pub rot: Vec3,
    pub world_or_cell: FormId,
}

impl Teleport {
    pub fn transform(&self) -> Transform {
        Transform {
            pos: self.pos,
            rot: self.rot,
            world_or_cell: self.world_or_cell,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetInventory {
    pub inventory: Inventory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenContainer {
    /// Remote id of the container or furniture.
    pub target: FormId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetRaceMenuOpen {
    pub open: bool,
}

/// Sets one named property. The value comes either inline in `data` or
/// serialized in `dataDump`; the dump wins when both are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProperty {
    pub idx: RemoteIndex,
    pub refr_id: Option<FormId>,
    pub base_record_type: Option<String>,
    pub prop_name: String,
    pub data: Option<Value>,
    pub data_dump: Option<String>,
}

/// Death or resurrection, bundled with the value and position changes that
/// must land alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeathStateContainer {
    pub t_is_dead: UpdateProperty,
    pub t_change_values: Option<ChangeValues>,
    pub t_teleport: Option<Teleport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTarget {
    pub target: FormId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellCast {
    pub caster: FormId,
    #[serde(default)]
    pub target: FormId,
    pub casting_source: u32,
    #[serde(default)]
    pub interrupt_cast: bool,
    #[serde(default)]
    pub aim_angle: f32,
    #[serde(default)]
    pub aim_heading: f32,
    #[serde(default)]
    pub actor_animation_variables: AnimVariables,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAnimVariables {
    pub actor_remote_id: FormId,
    pub actor_animation_variables: AnimVariables,
}

/// Extension payload; `contentJsonDump` is an object carrying a
/// `customPacketType` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPacket {
    pub content_json_dump: String,
}

/// Transport state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionEvent {
    /// A (re)connection was accepted; all replicated state is stale.
    Accepted,
    Disconnected,
}

/// Messages the engine asks the transport to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "camelCase")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    Activate {
        caster: FormId,
        target: FormId,
        is_second_activation: bool,
    },
    #[serde(rename_all = "camelCase")]
    CustomPacket { content_json_dump: String },
}

/// An outbound message plus its delivery class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outgoing {
    pub message: OutboundMessage,
    pub reliability: Reliability,
}
