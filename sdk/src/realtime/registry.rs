//! Topic/listener bookkeeping.
//!
//! The registry maps composite keys to ordered listener lists. It is owned
//! exclusively by the realtime actor; all mutation flows through the actor's
//! mailbox, so the registry itself needs no synchronization.

use crate::realtime::key::{key_matches_topic, topic_of};
use crate::realtime::Message;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A listener callback. Invoked synchronously, in registration order, on the
/// actor task for every record whose topic matches the listener's key.
pub(crate) type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Returns the next process-unique listener id together with its registration
/// sequence number. Ids are never reused.
pub(crate) fn next_listener_id() -> (String, u64) {
    let seq = NEXT_LISTENER.fetch_add(1, Ordering::Relaxed);
    (format!("l-{seq}"), seq)
}

pub(crate) struct Listener {
    pub id: String,
    /// Registration sequence; orders delivery across all keys of one topic.
    pub seq: u64,
    pub callback: Callback,
}

/// Composite key -> ordered listeners. A key with no listeners is removed.
#[derive(Default)]
pub(crate) struct Registry {
    entries: BTreeMap<String, Vec<Listener>>,
}

impl Registry {
    /// Appends `listener` under `key`.
    pub(crate) fn add(&mut self, key: String, listener: Listener) {
        self.entries.entry(key).or_default().push(listener);
    }

    /// Removes every key equal to `topic` or carrying options for it.
    /// Returns whether anything was removed.
    pub(crate) fn remove_topic(&mut self, topic: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key_matches_topic(key, topic));
        self.entries.len() != before
    }

    /// Removes the single listener `id` from the key(s) matching `topic`,
    /// dropping any key whose list becomes empty. Returns whether a listener
    /// was removed.
    pub(crate) fn remove_listener(&mut self, topic: &str, id: &str) -> bool {
        let mut removed = false;
        self.entries.retain(|key, listeners| {
            if !key_matches_topic(key, topic) {
                return true;
            }
            let before = listeners.len();
            listeners.retain(|listener| listener.id != id);
            removed |= listeners.len() != before;
            !listeners.is_empty()
        });
        removed
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All current composite keys, in deterministic order.
    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Every listener registered under a key whose topic portion is `topic`,
    /// in registration order across keys.
    pub(crate) fn listeners_for_topic<'a>(&'a self, topic: &str) -> Vec<&'a Listener> {
        let mut listeners: Vec<&Listener> = self
            .entries
            .iter()
            .filter(|(key, _)| topic_of(key) == topic)
            .flat_map(|(_, listeners)| listeners.iter())
            .collect();
        listeners.sort_by_key(|listener| listener.seq);
        listeners
    }
}
