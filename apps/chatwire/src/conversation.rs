//! Conversational client side of the socket: turns activity sets into cards.

use std::collections::HashMap;
use std::sync::Arc;

use chat_proto::{Activity, ActivitySet, MetadataLevel};
use delta_stream::{admit, ActivityClassifier, Admission, Card, DeltaMessage, Dispatch};
use event_hub::{ChatEvent, EventHub};
use tracing::{debug, trace, warn};

/// Where cards end up.
pub trait Renderer: Send {
    /// Shows `card`, replacing a previously shown card with the same id.
    fn show(&mut self, card: &Card);
    fn retract(&mut self, id: &str);
    fn typing(&mut self);

    fn set_metadata_level(&mut self, _level: MetadataLevel) {}
}

/// Cards currently on screen, in arrival order. Cards with an id are updated
/// in place.
#[derive(Debug, Default)]
pub struct Transcript {
    cards: Vec<Card>,
    index: HashMap<String, usize>,
}

impl Transcript {
    pub fn upsert(&mut self, card: Card) {
        if let Some(id) = card.id.clone() {
            if let Some(&slot) = self.index.get(&id) {
                self.cards[slot] = card;
                return;
            }
            self.index.insert(id, self.cards.len());
        }
        self.cards.push(card);
    }

    pub fn get(&self, id: &str) -> Option<&Card> {
        self.index.get(id).map(|&slot| &self.cards[slot])
    }

    pub fn remove(&mut self, id: &str) -> Option<Card> {
        let slot = self.index.remove(id)?;
        let card = self.cards.remove(slot);
        for position in self.index.values_mut() {
            if *position > slot {
                *position -= 1;
            }
        }
        Some(card)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }
}

pub struct Conversation<R> {
    delta: DeltaMessage,
    classifier: ActivityClassifier,
    transcript: Transcript,
    renderer: R,
    hub: Arc<EventHub>,
    watermark: Option<String>,
}

impl<R: Renderer> Conversation<R> {
    pub fn new(metadata_level: MetadataLevel, renderer: R, hub: Arc<EventHub>) -> Self {
        Self {
            delta: DeltaMessage::new(),
            classifier: ActivityClassifier::new(metadata_level),
            transcript: Transcript::default(),
            renderer,
            hub,
            watermark: None,
        }
    }

    pub fn delta(&self) -> &DeltaMessage {
        &self.delta
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn watermark(&self) -> Option<&str> {
        self.watermark.as_deref()
    }

    pub fn set_metadata_level(&mut self, level: MetadataLevel) {
        self.classifier.set_metadata_level(level);
        self.renderer.set_metadata_level(level);
        self.hub.publish(ChatEvent::MetadataLevelChanged(level));
    }

    /// Handles one serialized activity set from the socket.
    pub fn handle_frame(&mut self, text: &str) {
        let set = match ActivitySet::parse(text) {
            Ok(set) => set,
            Err(err) => {
                warn!(target = "chatwire.conversation", error = %err, "dropping malformed activity set");
                return;
            }
        };
        if set.watermark.is_some() {
            self.watermark = set.watermark;
        }
        for activity in &set.activities {
            self.handle_activity(activity);
        }
    }

    pub fn handle_activity(&mut self, activity: &Activity) {
        let classified = self.classifier.classify(&mut self.delta, activity);
        for event in classified.events {
            self.hub.publish(event);
        }
        match classified.dispatch {
            Dispatch::Render { card, superseded } => {
                if let Some(previous) = superseded {
                    self.retire(&previous);
                }
                self.present(card);
            }
            Dispatch::Typing => self.renderer.typing(),
            Dispatch::Ignore => {}
        }
    }

    /// The local user is sending `text`; returns the activity to post.
    pub fn user_sent(&mut self, text: &str, user_id: Option<String>) -> Activity {
        let event = self.classifier.user_sent(&mut self.delta);
        self.hub.publish(event);
        let activity = Activity::user_message(text, user_id);
        self.transcript.upsert(Card::from_activity(&activity));
        activity
    }

    fn present(&mut self, mut card: Card) {
        match admit(&mut card, &mut self.delta) {
            Admission::Render => {
                self.renderer.show(&card);
                self.transcript.upsert(card);
            }
            Admission::Suppress => {
                trace!(target = "chatwire.conversation", id = ?card.id, "card suppressed");
                if let Some(id) = card.id.as_deref() {
                    if self.transcript.remove(id).is_some() {
                        self.renderer.retract(id);
                    }
                }
            }
        }
    }

    /// A newer interim stream replaced `id`. Interim text still on screen is
    /// run through the gate and retracted; a card that already carries the
    /// final reply stays.
    fn retire(&mut self, id: &str) {
        let Some(card) = self.transcript.get(id) else {
            self.delta.clear_expired(id);
            return;
        };
        if !card.is_interim() {
            debug!(target = "chatwire.conversation", id = %id, "superseded id already final");
            self.delta.clear_expired(id);
            return;
        }
        let mut card = card.clone();
        if !admit(&mut card, &mut self.delta).is_render() {
            self.transcript.remove(id);
            self.renderer.retract(id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use delta_stream::Framing;
    use event_hub::EventKind;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Rendered {
        Show(Option<String>, String, Framing),
        Retract(String),
        Typing,
    }

    #[derive(Default)]
    pub(crate) struct RecordingRenderer {
        pub log: Vec<Rendered>,
    }

    impl Renderer for RecordingRenderer {
        fn show(&mut self, card: &Card) {
            self.log
                .push(Rendered::Show(card.id.clone(), card.text.clone(), card.framing));
        }

        fn retract(&mut self, id: &str) {
            self.log.push(Rendered::Retract(id.to_string()));
        }

        fn typing(&mut self) {
            self.log.push(Rendered::Typing);
        }
    }

    fn conversation() -> Conversation<RecordingRenderer> {
        Conversation::new(
            MetadataLevel::Summary,
            RecordingRenderer::default(),
            Arc::new(EventHub::new()),
        )
    }

    fn interim_frame(id: &str, delta: &str) -> String {
        json!({ "activities": [{
            "type": "event",
            "name": "interim",
            "id": id,
            "from": { "role": "bot" },
            "value": { "delta": delta }
        }]})
        .to_string()
    }

    #[test]
    fn interim_updates_replace_one_card() {
        let mut convo = conversation();
        for fragment in ["Hel", "lo ", "world"] {
            convo.handle_frame(&interim_frame("m1", fragment));
        }

        assert_eq!(convo.transcript().len(), 1);
        let card = convo.transcript().get("m1").expect("card");
        assert_eq!(card.text, "Hello world");
        assert_eq!(card.framing, Framing::Interim);
        assert_eq!(
            convo.renderer().log.last(),
            Some(&Rendered::Show(Some("m1".into()), "Hello world".into(), Framing::Interim))
        );
    }

    #[test]
    fn superseded_interim_is_retracted_once() {
        let mut convo = conversation();
        convo.handle_frame(&interim_frame("m1", "partial"));
        convo.handle_frame(&interim_frame("m2", "fresh"));

        assert!(convo.transcript().get("m1").is_none());
        assert!(!convo.delta().is_message_expired("m1"));
        assert_eq!(convo.delta().id(), "m2");
        let retracts = convo
            .renderer()
            .log
            .iter()
            .filter(|entry| matches!(entry, Rendered::Retract(id) if id == "m1"))
            .count();
        assert_eq!(retracts, 1);
    }

    #[test]
    fn superseded_id_without_a_card_leaves_no_expiry_behind() {
        let mut convo = conversation();
        convo.handle_frame(&interim_frame("m1", "partial"));
        convo.transcript.remove("m1");
        convo.handle_frame(&interim_frame("m2", "fresh"));

        assert!(!convo.delta().is_message_expired("m1"));
        assert_eq!(convo.delta().expired_len(), 0);
        assert!(!convo
            .renderer()
            .log
            .iter()
            .any(|entry| matches!(entry, Rendered::Retract(id) if id == "m1")));
    }

    #[test]
    fn final_message_replaces_interim_and_clears_progress() {
        let mut convo = conversation();
        let mut clear = convo.hub.subscribe(EventKind::ClearProgress);
        convo.handle_frame(&interim_frame("m1", "Hel"));
        convo.handle_frame(
            &json!({ "activities": [{
                "type": "message", "id": "m1", "from": { "role": "bot" }, "text": "Hello!"
            }]})
            .to_string(),
        );

        let card = convo.transcript().get("m1").expect("card");
        assert_eq!(card.framing, Framing::Final);
        assert_eq!(card.text, "Hello!");
        assert_eq!(clear.try_recv(), Some(ChatEvent::ClearProgress));
    }

    #[test]
    fn final_cards_survive_a_later_stream() {
        let mut convo = conversation();
        convo.handle_frame(&interim_frame("m1", "Hel"));
        convo.handle_frame(
            &json!({ "activities": [{
                "type": "message", "id": "m1", "from": { "role": "bot" }, "text": "Hello"
            }]})
            .to_string(),
        );
        convo.handle_frame(&interim_frame("m2", "Next"));

        assert!(convo.transcript().get("m1").is_some());
        assert!(!convo.delta().is_message_expired("m1"));
    }

    #[test]
    fn user_send_resets_silently() {
        let mut convo = conversation();
        let mut steps = convo.hub.subscribe(EventKind::ClearSteps);
        convo.handle_frame(&interim_frame("m1", "partial"));

        let activity = convo.user_sent("next question", Some("u1".into()));
        assert_eq!(activity.text.as_deref(), Some("next question"));
        assert!(convo.delta().is_empty());
        assert!(!convo.delta().is_message_expired("m1"));
        assert_eq!(steps.try_recv(), Some(ChatEvent::ClearSteps));
    }

    #[test]
    fn progress_shows_typing_and_publishes() {
        let mut convo = conversation();
        let mut progress = convo.hub.subscribe(EventKind::Progress);
        convo.handle_frame(
            &json!({ "activities": [{
                "type": "event", "name": "progress", "from": { "role": "bot" },
                "value": { "message": "Looking up orders" }
            }], "watermark": 4 })
            .to_string(),
        );
        assert_eq!(convo.renderer().log, vec![Rendered::Typing]);
        assert_eq!(
            progress.try_recv(),
            Some(ChatEvent::Progress("Looking up orders".into()))
        );
        assert_eq!(convo.watermark(), Some("4"));
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let mut convo = conversation();
        convo.handle_frame("{not json");
        assert!(convo.transcript().is_empty());
        assert!(convo.renderer().log.is_empty());
    }

    #[test]
    fn transcript_remove_keeps_index_consistent() {
        let mut transcript = Transcript::default();
        transcript.upsert(Card::interim("a", "1"));
        transcript.upsert(Card::interim("b", "2"));
        transcript.upsert(Card::interim("c", "3"));
        transcript.remove("a");
        assert_eq!(transcript.get("c").map(|card| card.text.as_str()), Some("3"));
        transcript.upsert(Card::interim("c", "33"));
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.cards()[1].text, "33");
    }
}
