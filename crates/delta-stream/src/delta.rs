use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeltaStatus {
    /// Nothing received for the current identifier.
    #[default]
    New,
    /// Fragments are being accumulated.
    Capturing,
    /// Superseded; the buffered text must not be shown again.
    Expired,
}

/// Running buffer for one coalesced bot message plus the history of
/// identifiers that were superseded.
///
/// Expiry history deliberately outlives [`DeltaMessage::reset`]: a renderer may
/// still hold a card for an old identifier after the buffer has moved on, and
/// it needs [`DeltaMessage::is_message_expired`] to recognise it.
#[derive(Debug, Clone, Default)]
pub struct DeltaMessage {
    id: String,
    delta: String,
    full: String,
    status: DeltaStatus,
    expired: HashSet<String>,
}

impl DeltaMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn delta(&self) -> &str {
        &self.delta
    }

    pub fn full(&self) -> &str {
        &self.full
    }

    pub fn status(&self) -> DeltaStatus {
        self.status
    }

    pub fn is_capturing(&self) -> bool {
        self.status == DeltaStatus::Capturing
    }

    /// True until a fragment has been added since the last reset.
    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    pub fn add_delta(&mut self, fragment: &str) {
        self.delta.push_str(fragment);
        self.full.push_str(fragment);
    }

    /// Starts accumulating a new message under `id` with its first fragment.
    pub fn begin(&mut self, id: impl Into<String>, fragment: &str) {
        self.add_delta(fragment);
        self.status = DeltaStatus::Capturing;
        self.id = id.into();
    }

    pub fn set_expired(&mut self) {
        self.status = DeltaStatus::Expired;
        self.expired.insert(self.id.clone());
    }

    pub fn is_expired(&self) -> bool {
        self.status == DeltaStatus::Expired || self.expired.contains(&self.id)
    }

    /// Expiry lookup for any identifier, independent of the current buffer.
    pub fn is_message_expired(&self, id: &str) -> bool {
        self.expired.contains(id)
    }

    /// Forgets `id` once the renderer has acted on its expiry.
    pub fn clear_expired(&mut self, id: &str) {
        self.expired.remove(id);
    }

    pub fn expired_len(&self) -> usize {
        self.expired.len()
    }

    /// Clears the buffer and identifier. Expiry history is kept.
    pub fn reset(&mut self) {
        self.id.clear();
        self.delta.clear();
        self.full.clear();
        self.status = DeltaStatus::New;
    }
}
