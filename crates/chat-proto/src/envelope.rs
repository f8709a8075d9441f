use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Sub-protocol token the group pub/sub service expects on the upgrade request.
pub const PUBSUB_SUBPROTOCOL: &str = "json.webpubsub.azure.v1";

/// Activity name given to server payloads that do not declare a `type`.
pub const DEFAULT_EVENT_NAME: &str = "progress";

/// Frames the client sends to the pub/sub service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlFrame {
    JoinGroup {
        group: String,
        #[serde(rename = "ackId")]
        ack_id: u64,
    },
}

impl ControlFrame {
    pub fn join_group(group: impl Into<String>, ack_id: u64) -> Self {
        ControlFrame::JoinGroup {
            group: group.into(),
            ack_id,
        }
    }
}

/// Inbound pub/sub frame. Service frames (acks, system events) carry no group
/// and are filtered out alongside frames for other groups.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GroupEnvelope {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl GroupEnvelope {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Payload addressed to `group`, if this frame is one and carries data.
    pub fn into_group_payload(self, group: &str) -> Option<Value> {
        if self.group.as_deref() != Some(group) {
            return None;
        }
        self.data.filter(is_truthy)
    }
}

/// Shapes a group payload into the activity-set envelope the chat client
/// expects. Payloads that already carry `activities` pass through untouched;
/// anything else becomes a single bot `event` activity wrapping the payload.
pub fn repackage(data: Value, now_ms: u64) -> Value {
    if data.get("activities").is_some_and(is_truthy) {
        return data;
    }

    let name = match data.get("type") {
        Some(kind) if is_truthy(kind) => kind.clone(),
        _ => Value::String(DEFAULT_EVENT_NAME.to_string()),
    };
    let mut activity = json!({
        "from": { "role": "bot" },
        "type": "event",
        "name": name,
        "timestamp": now_ms,
    });
    if let Some(id) = data.get("id").filter(|id| !id.is_null()) {
        activity["id"] = id.clone();
    }
    activity["value"] = data;

    json!({ "activities": [activity] })
}

/// Loose truthiness: null, false, zero and empty strings count as absent.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_group_frame_uses_wire_field_names() {
        let frame = serde_json::to_value(ControlFrame::join_group("thread-1", 42)).expect("json");
        assert_eq!(
            frame,
            json!({ "type": "joinGroup", "group": "thread-1", "ackId": 42 })
        );
    }

    #[test]
    fn filters_other_groups_and_service_frames() {
        let other = GroupEnvelope::parse(r#"{"type":"message","group":"b","data":{"x":1}}"#)
            .expect("frame");
        assert!(other.into_group_payload("a").is_none());

        let ack = GroupEnvelope::parse(r#"{"type":"ack","ackId":1,"success":true}"#)
            .expect("frame");
        assert!(ack.into_group_payload("a").is_none());

        let empty = GroupEnvelope::parse(r#"{"group":"a","data":""}"#).expect("frame");
        assert!(empty.into_group_payload("a").is_none());
    }

    #[test]
    fn activity_sets_pass_through() {
        let data = json!({ "activities": [{ "type": "message", "text": "hi" }], "watermark": "9" });
        assert_eq!(repackage(data.clone(), 1), data);
    }

    #[test]
    fn bare_payloads_become_progress_events() {
        let wrapped = repackage(json!({ "message": "thinking" }), 5);
        let activity = &wrapped["activities"][0];
        assert_eq!(activity["type"], "event");
        assert_eq!(activity["name"], "progress");
        assert_eq!(activity["from"]["role"], "bot");
        assert_eq!(activity["timestamp"], 5);
        assert_eq!(activity["value"]["message"], "thinking");
        assert!(activity.get("id").is_none());
    }

    #[test]
    fn payload_type_and_id_are_lifted() {
        let wrapped = repackage(json!({ "type": "step", "id": "s-2", "message": "m" }), 5);
        let activity = &wrapped["activities"][0];
        assert_eq!(activity["name"], "step");
        assert_eq!(activity["id"], "s-2");
    }
}
