//! Extension protocols carried inside `customPacket` messages.

use formsync_sim::Simulation;
use serde_json::{Map, Value};

/// Handles one `customPacketType`.
///
/// Runs on the update after the packet arrived. A returned object is sent
/// back to the server as a reliable custom packet.
pub trait CustomPacketHandler {
    fn packet_type(&self) -> &str;

    fn handle(&mut self, content: &Map<String, Value>, sim: &mut dyn Simulation) -> Option<Value>;
}

/// `invokeAnim`: play an animation event on the player and report whether
/// the graph accepted it.
#[derive(Debug, Default)]
pub struct InvokeAnim;

impl CustomPacketHandler for InvokeAnim {
    fn packet_type(&self) -> &str {
        "invokeAnim"
    }

    fn handle(&mut self, content: &Map<String, Value>, sim: &mut dyn Simulation) -> Option<Value> {
        let Some(anim_event) = content.get("animEventName").and_then(Value::as_str) else {
            tracing::error!(?content, "invokeAnim without a string animEventName");
            return None;
        };
        let request_id = content.get("requestId");
        if let Some(id) = request_id.filter(|id| !(id.is_string() || id.is_number())) {
            tracing::error!(?id, "invokeAnim requestId must be a string or a number");
            return None;
        }

        let result = match sim.player() {
            Some(player) => sim.play_animation(player, anim_event),
            None => false,
        };
        tracing::debug!(anim_event, result, "invokeAnim");

        let mut reply = Map::new();
        reply.insert("customPacketType".into(), Value::from("invokeAnimResult"));
        reply.insert("result".into(), Value::Bool(result));
        if let Some(id) = request_id {
            reply.insert("requestId".into(), id.clone());
        }
        Some(Value::Object(reply))
    }
}
