use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::pubsub::{AdapterCallbacks, AdapterOptions, PubSubAdapter};

pub type GenerationCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Builds one adapter per connection attempt for a single conversation.
///
/// All adapters from one factory share a reconnect flag: once the
/// conversation has started and any of them reports a socket error, every
/// later adapter is created as a reconnect and will not start the
/// conversation again. An error before the first open leaves it unset. Each adapter gets the next
/// generation number, which is passed to the callbacks so the owner can
/// ignore signals from superseded connections.
pub struct AdapterFactory {
    group: String,
    subscription_key: Option<String>,
    reconnecting: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    next_generation: AtomicU64,
    on_reconnect: GenerationCallback,
    on_start_conversation: GenerationCallback,
    on_input_ready: Option<GenerationCallback>,
}

impl AdapterFactory {
    pub fn new(
        group: impl Into<String>,
        subscription_key: Option<String>,
        on_reconnect: GenerationCallback,
        on_start_conversation: GenerationCallback,
    ) -> Self {
        Self {
            group: group.into(),
            subscription_key,
            reconnecting: Arc::new(AtomicBool::new(false)),
            started: Arc::new(AtomicBool::new(false)),
            next_generation: AtomicU64::new(1),
            on_reconnect,
            on_start_conversation,
            on_input_ready: None,
        }
    }

    pub fn with_input_ready(mut self, hook: GenerationCallback) -> Self {
        self.on_input_ready = Some(hook);
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn is_reconnect(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// True once an adapter of this factory has started the conversation.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Creates every later adapter as a reconnect, for connections that ended
    /// with a close instead of an error. No-op until the conversation has
    /// been started.
    pub fn mark_reconnecting(&self) {
        if self.is_started() {
            self.reconnecting.store(true, Ordering::SeqCst);
        }
    }

    pub fn create(&self, url: impl Into<String>) -> PubSubAdapter {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut callbacks = AdapterCallbacks::new(
            bind(&self.on_reconnect, generation),
            bind(&self.on_start_conversation, generation),
        );
        if let Some(hook) = &self.on_input_ready {
            callbacks = callbacks.with_input_ready(bind(hook, generation));
        }
        PubSubAdapter::with_state(
            AdapterOptions {
                url: url.into(),
                group: self.group.clone(),
                subscription_key: self.subscription_key.clone(),
            },
            callbacks,
            generation,
            Arc::clone(&self.reconnecting),
            Arc::clone(&self.started),
        )
    }
}

fn bind(callback: &GenerationCallback, generation: u64) -> Arc<dyn Fn() + Send + Sync> {
    let callback = Arc::clone(callback);
    Arc::new(move || callback(generation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::pubsub::tests::RecordingSink;
    use parking_lot::Mutex;

    fn recorder() -> (GenerationCallback, Arc<Mutex<Vec<u64>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let callback: GenerationCallback = Arc::new(move |generation: u64| sink.lock().push(generation));
        (callback, calls)
    }

    #[test]
    fn reconnect_flag_is_shared_across_adapters() {
        let (on_reconnect, reconnects) = recorder();
        let (on_start, starts) = recorder();
        let factory = AdapterFactory::new("T1", Some("key".into()), on_reconnect, on_start);

        let first = factory.create("ws://a");
        first.attach(Arc::new(RecordingSink::default()));
        first.dispatch_open();
        assert_eq!(*starts.lock(), vec![first.generation()]);

        first.dispatch_error("reset");
        assert!(factory.is_reconnect());
        assert_eq!(*reconnects.lock(), vec![first.generation()]);

        let second = factory.create("ws://a");
        assert!(second.is_reconnect());
        assert!(second.generation() > first.generation());
        assert_eq!(second.subscription_key(), Some("key"));
        second.attach(Arc::new(RecordingSink::default()));
        second.dispatch_open();
        assert_eq!(starts.lock().len(), 1);
    }

    #[test]
    fn failed_first_connect_still_starts_the_conversation() {
        let (on_reconnect, reconnects) = recorder();
        let (on_start, starts) = recorder();
        let factory = AdapterFactory::new("T1", None, on_reconnect, on_start);

        let first = factory.create("ws://a");
        first.dispatch_error("connection refused");
        assert_eq!(*reconnects.lock(), vec![first.generation()]);
        assert!(!factory.is_reconnect());
        assert!(!factory.is_started());

        factory.mark_reconnecting();
        let second = factory.create("ws://a");
        assert!(!second.is_reconnect());
        second.attach(Arc::new(RecordingSink::default()));
        second.dispatch_open();
        assert_eq!(*starts.lock(), vec![second.generation()]);
        assert!(factory.is_started());
    }

    #[test]
    fn input_ready_hook_receives_generation() {
        let (on_reconnect, _) = recorder();
        let (on_start, _) = recorder();
        let (on_ready, ready) = recorder();
        let factory =
            AdapterFactory::new("T1", None, on_reconnect, on_start).with_input_ready(on_ready);

        let adapter = factory.create("ws://a");
        adapter.attach(Arc::new(RecordingSink::default()));
        adapter.dispatch_open();
        assert_eq!(*ready.lock(), vec![adapter.generation()]);
    }

    #[test]
    fn closed_sessions_reopen_as_reconnects() {
        let (on_reconnect, reconnects) = recorder();
        let (on_start, starts) = recorder();
        let factory = AdapterFactory::new("T1", None, on_reconnect, on_start);

        let first = factory.create("ws://a");
        first.attach(Arc::new(RecordingSink::default()));
        first.dispatch_open();
        first.dispatch_close(Some(1000), "bye");
        assert!(!factory.is_reconnect());

        factory.mark_reconnecting();
        let second = factory.create("ws://a");
        second.attach(Arc::new(RecordingSink::default()));
        second.dispatch_open();
        assert_eq!(starts.lock().len(), 1);
        assert!(reconnects.lock().is_empty());
    }
}
