use chat_proto::{Activity, ActivityType, Role};
use serde_json::Value;

/// Whether a card shows the complete reply or accumulated interim text that
/// will be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Interim,
    Final,
}

/// Display-ready record derived from an activity. Cards are built fresh for
/// every update; the inbound activity is never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub id: Option<String>,
    pub kind: ActivityType,
    pub role: Option<Role>,
    pub text: String,
    pub framing: Framing,
    pub metadata: CardMetadata,
    pub suggested_actions: Vec<String>,
}

impl Card {
    /// Bot message card showing the accumulated interim text under `id`.
    pub fn interim(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            kind: ActivityType::Message,
            role: Some(Role::Bot),
            text: text.into(),
            framing: Framing::Interim,
            metadata: CardMetadata::default(),
            suggested_actions: Vec::new(),
        }
    }

    pub fn from_activity(activity: &Activity) -> Self {
        Self {
            id: activity.id.clone(),
            kind: activity.kind,
            role: activity.role(),
            text: activity.text.clone().unwrap_or_default(),
            framing: Framing::Final,
            metadata: CardMetadata::from_activity(activity),
            suggested_actions: suggested_action_titles(activity),
        }
    }

    pub fn is_message(&self) -> bool {
        self.kind == ActivityType::Message
    }

    pub fn is_interim(&self) -> bool {
        self.framing == Framing::Interim
    }

    /// True once the render gate has stamped the expired sentinel role.
    pub fn is_marked_expired(&self) -> bool {
        self.role == Some(Role::Expired)
    }

    pub fn mark_expired(&mut self) {
        self.role = Some(Role::Expired);
    }
}

/// Plan, citations and responder details attached to a final reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardMetadata {
    pub steps: Vec<String>,
    pub citations: Vec<Value>,
    pub responder: Option<String>,
    pub other: Vec<(String, Value)>,
}

impl CardMetadata {
    pub fn from_activity(activity: &Activity) -> Self {
        let mut metadata = CardMetadata {
            steps: string_list(activity.extra.get("steps")),
            ..CardMetadata::default()
        };

        if let Some(map) = activity
            .entity("metadata")
            .and_then(|entity| entity.get("metadata"))
            .and_then(Value::as_object)
        {
            for (key, value) in map {
                match key.as_str() {
                    "steps" if metadata.steps.is_empty() => metadata.steps = string_list(Some(value)),
                    "steps" => {}
                    "citations" => metadata.citations.extend(array(value)),
                    "responder" => metadata.responder = value.as_str().map(str::to_string),
                    _ => metadata.other.push((key.clone(), value.clone())),
                }
            }
        }

        if let Some(citations) = activity
            .entity("citations")
            .and_then(|entity| entity.get("citations"))
        {
            metadata.citations.extend(array(citations));
        }

        metadata
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
            && self.citations.is_empty()
            && self.responder.is_none()
            && self.other.is_empty()
    }
}

fn array(value: &Value) -> Vec<Value> {
    value.as_array().cloned().unwrap_or_default()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn suggested_action_titles(activity: &Activity) -> Vec<String> {
    activity
        .suggested_actions
        .as_ref()
        .and_then(|actions| actions.get("actions"))
        .and_then(Value::as_array)
        .map(|actions| {
            actions
                .iter()
                .filter_map(|action| action.get("title").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn activity(value: Value) -> Activity {
        serde_json::from_value(value).expect("activity")
    }

    #[test]
    fn final_card_collects_metadata_entities() {
        let card = Card::from_activity(&activity(json!({
            "type": "message",
            "id": "m1",
            "from": { "role": "bot" },
            "text": "Done",
            "entities": [
                { "type": "metadata", "metadata": {
                    "steps": ["look up", "answer"],
                    "responder": "planner",
                    "response-type": "text"
                }},
                { "type": "citations", "citations": [{ "id": "c1" }] }
            ],
            "suggestedActions": { "actions": [{ "type": "imBack", "title": "More", "value": "More" }] }
        })));

        assert_eq!(card.framing, Framing::Final);
        assert_eq!(card.text, "Done");
        assert_eq!(card.metadata.steps, vec!["look up", "answer"]);
        assert_eq!(card.metadata.responder.as_deref(), Some("planner"));
        assert_eq!(card.metadata.citations, vec![json!({ "id": "c1" })]);
        assert_eq!(card.metadata.other.len(), 1);
        assert_eq!(card.suggested_actions, vec!["More"]);
    }

    #[test]
    fn top_level_steps_win_over_metadata_steps() {
        let card = Card::from_activity(&activity(json!({
            "type": "message",
            "steps": ["direct"],
            "entities": [{ "type": "metadata", "metadata": { "steps": ["nested"] } }]
        })));
        assert_eq!(card.metadata.steps, vec!["direct"]);
    }

    #[test]
    fn interim_cards_are_bot_messages() {
        let card = Card::interim("m1", "Hel");
        assert!(card.is_message());
        assert!(card.is_interim());
        assert_eq!(card.role, Some(Role::Bot));
        assert!(card.metadata.is_empty());
    }
}
