//! Render suppression.
//!
//! A renderer calls [`admit`] for every card before showing it. Cards for
//! superseded interim messages are stamped with the [`Role::Expired`]
//! sentinel and their identifier is dropped from the accumulator's expiry
//! history, so the next pass over the same card short-circuits on the
//! sentinel instead of consulting the accumulator again.
//!
//! [`Role::Expired`]: chat_proto::Role::Expired

use tracing::trace;

use crate::card::Card;
use crate::delta::DeltaMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Render,
    Suppress,
}

impl Admission {
    pub fn is_render(self) -> bool {
        self == Admission::Render
    }
}

/// Decides whether `card` may be shown. Mutates both arguments when the card
/// belongs to an expired message: the card is marked and the id is cleared
/// from `delta` exactly once.
pub fn admit(card: &mut Card, delta: &mut DeltaMessage) -> Admission {
    if card.is_marked_expired() {
        return Admission::Suppress;
    }
    if !card.is_message() {
        return Admission::Render;
    }
    let Some(id) = card.id.as_deref() else {
        return Admission::Render;
    };

    let current_expired = id == delta.id() && delta.is_expired();
    if current_expired || delta.is_message_expired(id) {
        let id = id.to_string();
        trace!(target = "delta.gate", id = %id, "suppressing expired card");
        card.mark_expired();
        delta.clear_expired(&id);
        return Admission::Suppress;
    }

    Admission::Render
}
