use std::sync::OnceLock;

use chat_proto::{Activity, ActivityType, MetadataLevel};
use event_hub::{ChatEvent, SentimentReading};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::card::Card;
use crate::delta::DeltaMessage;

/// Event name the backend uses for streamed reply fragments.
pub const INTERIM_EVENT: &str = "interim";
pub const PROGRESS_EVENT: &str = "progress";
pub const STEP_EVENT: &str = "step";
pub const SENTIMENT_EVENT: &str = "sentiment";

/// Prefix the backend puts on step notices; not shown to the user.
pub const STEP_PREFIX: &str = "Executing step: ";

/// What the surface should do with one incoming activity.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Show the card, replacing any card with the same id. `superseded`
    /// names an interim message that was abandoned in favour of this one.
    Render {
        card: Card,
        superseded: Option<String>,
    },
    /// Show a typing indicator.
    Typing,
    /// Nothing to render.
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub dispatch: Dispatch,
    /// Presentation events to publish on the hub.
    pub events: Vec<ChatEvent>,
}

impl Classified {
    fn render(card: Card) -> Self {
        Self {
            dispatch: Dispatch::Render {
                card,
                superseded: None,
            },
            events: Vec::new(),
        }
    }

    fn ignore() -> Self {
        Self {
            dispatch: Dispatch::Ignore,
            events: Vec::new(),
        }
    }

    fn with_event(mut self, event: ChatEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Routes incoming activities: interim fragments into the accumulator,
/// progress/step/sentiment events to the hub, everything else straight to
/// rendering.
#[derive(Debug, Clone, Default)]
pub struct ActivityClassifier {
    metadata_level: MetadataLevel,
}

impl ActivityClassifier {
    pub fn new(metadata_level: MetadataLevel) -> Self {
        Self { metadata_level }
    }

    pub fn metadata_level(&self) -> MetadataLevel {
        self.metadata_level
    }

    pub fn set_metadata_level(&mut self, level: MetadataLevel) {
        self.metadata_level = level;
    }

    pub fn classify(&self, delta: &mut DeltaMessage, activity: &Activity) -> Classified {
        if activity.is_from_bot() && activity.is_event() {
            return self.classify_bot_event(delta, activity);
        }
        if activity.is_from_bot() && activity.is_message() {
            return Classified::render(Card::from_activity(activity))
                .with_event(ChatEvent::ClearProgress);
        }
        match activity.kind {
            ActivityType::Message => Classified::render(Card::from_activity(activity)),
            ActivityType::Typing => Classified {
                dispatch: Dispatch::Typing,
                events: Vec::new(),
            },
            _ => Classified::ignore(),
        }
    }

    /// The local user sent a message: abandon any in-flight interim text
    /// without marking it expired.
    pub fn user_sent(&self, delta: &mut DeltaMessage) -> ChatEvent {
        delta.reset();
        ChatEvent::ClearSteps
    }

    fn classify_bot_event(&self, delta: &mut DeltaMessage, activity: &Activity) -> Classified {
        match activity.name.as_deref() {
            Some(INTERIM_EVENT) => self.accumulate(delta, activity),
            Some(PROGRESS_EVENT) => {
                let typing = Classified {
                    dispatch: Dispatch::Typing,
                    events: Vec::new(),
                };
                match activity.value_message().filter(|message| !message.is_empty()) {
                    Some(message) => typing.with_event(ChatEvent::Progress(message.to_string())),
                    None => typing,
                }
            }
            Some(STEP_EVENT) => match activity.value_message().filter(|message| !message.is_empty()) {
                Some(message) => {
                    let step = message.strip_prefix(STEP_PREFIX).unwrap_or(message);
                    Classified::ignore().with_event(ChatEvent::Step(step.to_string()))
                }
                None => Classified::ignore(),
            },
            Some(SENTIMENT_EVENT) => match activity.value.as_ref().and_then(sentiment) {
                Some(reading) => Classified::ignore().with_event(ChatEvent::Sentiment(reading)),
                None => Classified::ignore(),
            },
            other => {
                debug!(target = "delta.classifier", name = ?other, "ignoring bot event");
                Classified::ignore()
            }
        }
    }

    fn accumulate(&self, delta: &mut DeltaMessage, activity: &Activity) -> Classified {
        let (Some(id), Some(fragment)) = (activity.id.as_deref(), activity.delta_fragment())
        else {
            debug!(
                target = "delta.classifier",
                id = ?activity.id,
                "interim event without id or delta text"
            );
            return Classified::ignore();
        };

        let mut superseded = None;
        if delta.is_empty() {
            delta.begin(id, fragment);
        } else if delta.id() == id {
            delta.add_delta(fragment);
        } else {
            // A new interim stream started before the previous one finished.
            debug!(
                target = "delta.classifier",
                previous = %delta.id(),
                next = %id,
                "interim stream superseded"
            );
            superseded = Some(delta.id().to_string());
            delta.set_expired();
            delta.reset();
            delta.begin(id, fragment);
        }

        if !delta.is_capturing() {
            return Classified::ignore();
        }

        let card = Card::interim(delta.id(), self.display_text(delta.full()));
        Classified {
            dispatch: Dispatch::Render { card, superseded },
            events: Vec::new(),
        }
    }

    fn display_text(&self, full: &str) -> String {
        if self.metadata_level.keeps_references() {
            return full.trim().to_string();
        }
        reference_marker().replace_all(full, "").trim().to_string()
    }
}

fn reference_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"\s?\[Ref:[^\]]*\]").expect("valid reference pattern"))
}

fn sentiment(value: &Value) -> Option<SentimentReading> {
    let label = ["label", "sentiment", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))?;
    Some(SentimentReading {
        label: label.to_string(),
        score: value.get("score").and_then(Value::as_f64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::Framing;
    use chat_proto::Role;
    use serde_json::json;

    fn interim(id: &str, fragment: &str) -> Activity {
        serde_json::from_value(json!({
            "type": "event",
            "name": "interim",
            "id": id,
            "from": { "role": "bot" },
            "value": { "delta": fragment }
        }))
        .expect("activity")
    }

    fn bot_event(name: &str, value: Value) -> Activity {
        serde_json::from_value(json!({
            "type": "event",
            "name": name,
            "from": { "role": "bot" },
            "value": value
        }))
        .expect("activity")
    }

    fn rendered(classified: Classified) -> (Card, Option<String>) {
        match classified.dispatch {
            Dispatch::Render { card, superseded } => (card, superseded),
            other => panic!("expected render, got {other:?}"),
        }
    }

    #[test]
    fn first_fragment_starts_capture() {
        let classifier = ActivityClassifier::default();
        let mut delta = DeltaMessage::new();
        let (card, superseded) = rendered(classifier.classify(&mut delta, &interim("m1", "Hi ")));

        assert!(delta.is_capturing());
        assert_eq!(delta.id(), "m1");
        assert_eq!(card.text, "Hi");
        assert_eq!(card.id.as_deref(), Some("m1"));
        assert_eq!(card.framing, Framing::Interim);
        assert!(superseded.is_none());
    }

    #[test]
    fn new_id_supersedes_unfinished_stream() {
        let classifier = ActivityClassifier::default();
        let mut delta = DeltaMessage::new();
        classifier.classify(&mut delta, &interim("A", "old"));
        let (card, superseded) = rendered(classifier.classify(&mut delta, &interim("B", "new")));

        assert!(delta.is_message_expired("A"));
        assert_eq!(superseded.as_deref(), Some("A"));
        assert_eq!(delta.id(), "B");
        assert_eq!(delta.full(), "new");
        assert_eq!(card.text, "new");
    }

    #[test]
    fn reference_markers_follow_metadata_level() {
        let mut classifier = ActivityClassifier::new(MetadataLevel::Summary);
        let mut delta = DeltaMessage::new();
        let (card, _) = rendered(
            classifier.classify(&mut delta, &interim("m1", "See the guide [Ref:doc-4]. ")),
        );
        assert_eq!(card.text, "See the guide.");

        classifier.set_metadata_level(MetadataLevel::Verbose);
        let (card, _) = rendered(classifier.classify(&mut delta, &interim("m1", "Done")));
        assert_eq!(card.text, "See the guide [Ref:doc-4]. Done");
    }

    #[test]
    fn inbound_activity_is_left_untouched() {
        let classifier = ActivityClassifier::default();
        let mut delta = DeltaMessage::new();
        let activity = interim("m1", "x");
        let before = activity.clone();
        classifier.classify(&mut delta, &activity);
        assert_eq!(activity, before);
    }

    #[test]
    fn progress_becomes_typing_and_hub_event() {
        let classifier = ActivityClassifier::default();
        let mut delta = DeltaMessage::new();
        let classified =
            classifier.classify(&mut delta, &bot_event("progress", json!({ "message": "Searching" })));
        assert_eq!(classified.dispatch, Dispatch::Typing);
        assert_eq!(classified.events, vec![ChatEvent::Progress("Searching".into())]);
        assert!(delta.is_empty());
    }

    #[test]
    fn step_prefix_is_stripped() {
        let classifier = ActivityClassifier::default();
        let mut delta = DeltaMessage::new();
        let classified = classifier.classify(
            &mut delta,
            &bot_event("step", json!({ "message": "Executing step: fetch orders" })),
        );
        assert_eq!(classified.dispatch, Dispatch::Ignore);
        assert_eq!(classified.events, vec![ChatEvent::Step("fetch orders".into())]);
    }

    #[test]
    fn sentiment_events_are_forwarded() {
        let classifier = ActivityClassifier::default();
        let mut delta = DeltaMessage::new();
        let classified = classifier.classify(
            &mut delta,
            &bot_event("sentiment", json!({ "label": "positive", "score": 0.9 })),
        );
        assert_eq!(
            classified.events,
            vec![ChatEvent::Sentiment(SentimentReading {
                label: "positive".into(),
                score: Some(0.9),
            })]
        );
    }

    #[test]
    fn final_bot_message_clears_progress() {
        let classifier = ActivityClassifier::default();
        let mut delta = DeltaMessage::new();
        let activity: Activity = serde_json::from_value(json!({
            "type": "message",
            "id": "m1",
            "from": { "role": "assistant" },
            "text": "All done"
        }))
        .expect("activity");

        let classified = classifier.classify(&mut delta, &activity);
        assert_eq!(classified.events, vec![ChatEvent::ClearProgress]);
        let (card, _) = rendered(classified);
        assert_eq!(card.framing, Framing::Final);
        assert_eq!(card.role, Some(Role::Assistant));
    }

    #[test]
    fn interim_without_delta_is_ignored() {
        let classifier = ActivityClassifier::default();
        let mut delta = DeltaMessage::new();
        let classified = classifier.classify(&mut delta, &bot_event("interim", json!({})));
        assert_eq!(classified.dispatch, Dispatch::Ignore);
        assert!(delta.is_empty());
    }

    #[test]
    fn user_send_resets_without_expiring() {
        let classifier = ActivityClassifier::default();
        let mut delta = DeltaMessage::new();
        classifier.classify(&mut delta, &interim("m1", "unfinished"));

        assert_eq!(classifier.user_sent(&mut delta), ChatEvent::ClearSteps);
        assert!(delta.is_empty());
        assert!(!delta.is_message_expired("m1"));
    }
}
