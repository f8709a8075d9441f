//! Shared primitives for chatwire.
//!
//! - [`activity`]: the conversational activity shapes exchanged with the chat
//!   surface (`{ activities: [...] }` sets, roles, activity kinds).
//! - [`envelope`]: the group pub/sub wire frames and the repackaging rules that
//!   turn them into activity sets.
//! - [`session`]: session-level domain values carried on the event hub.

pub mod activity;
pub mod envelope;
pub mod session;

pub use activity::{Activity, ActivitySet, ActivityType, ChannelAccount, Role};
pub use envelope::{ControlFrame, GroupEnvelope, PUBSUB_SUBPROTOCOL};
pub use session::{MetadataLevel, Orchestrator, ProtoError, UserState};

/// Milliseconds since the Unix epoch, as used for activity timestamps and ack ids.
pub fn now_millis() -> u64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or_default()
}
