use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Activity kinds the chat surface distinguishes. Anything else is carried as
/// [`ActivityType::Other`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    Message,
    Event,
    Typing,
    ConversationUpdate,
    #[default]
    #[serde(other)]
    Other,
}

/// Sender role on an activity. `Expired` is the sentinel the render gate
/// stamps onto cards that must no longer be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
    Assistant,
    Expired,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelAccount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl ChannelAccount {
    pub fn with_role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }
}

/// A single conversational activity. Only the fields chatwire acts on are
/// typed; everything else round-trips through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type", default)]
    pub kind: ActivityType,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub from: ChannelAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speak: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Activity {
    pub fn role(&self) -> Option<Role> {
        self.from.role
    }

    /// Bot and assistant roles are treated alike by the classifier.
    pub fn is_from_bot(&self) -> bool {
        matches!(self.from.role, Some(Role::Bot | Role::Assistant))
    }

    pub fn is_message(&self) -> bool {
        self.kind == ActivityType::Message
    }

    pub fn is_event(&self) -> bool {
        self.kind == ActivityType::Event
    }

    /// `value.delta` of an interim fragment.
    pub fn delta_fragment(&self) -> Option<&str> {
        self.value_str("delta")
    }

    /// `value.message` of a progress/step notification.
    pub fn value_message(&self) -> Option<&str> {
        self.value_str("message")
    }

    fn value_str(&self, key: &str) -> Option<&str> {
        self.value
            .as_ref()
            .and_then(|value| value.get(key))
            .and_then(Value::as_str)
    }

    /// First entity whose `type` matches `kind`.
    pub fn entity(&self, kind: &str) -> Option<&Value> {
        self.entities
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|entity| entity.get("type").and_then(Value::as_str) == Some(kind))
    }

    /// Plain user message as posted by the local user.
    pub fn user_message(text: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            kind: ActivityType::Message,
            from: ChannelAccount {
                id: user_id,
                name: None,
                role: Some(Role::User),
            },
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// The `{ activities: [...], watermark }` payload the conversational client
/// consumes from its socket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivitySet {
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub watermark: Option<String>,
}

impl ActivitySet {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Accepts strings, numbers or null for identifier-like fields; the backend
/// is not consistent about which it sends.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
