//! The subscription index: an immutable chat → watchers map, rebuilt from
//! registry snapshots and published by atomic pointer swap so ingestion
//! readers never observe a half-built index.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use keywatch_common::{ChatInfo, RequestSnapshot};

use crate::matcher::KeywordSet;

/// One active request watching a chat.
#[derive(Debug, Clone)]
pub struct Monitor {
    pub request_id: i64,
    pub subscriber_id: i64,
    pub keywords: KeywordSet,
}

/// Everything the engine knows about one watched chat.
#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub info: ChatInfo,
    /// Watchers in storage read order (ascending request id).
    pub monitors: Vec<Monitor>,
}

/// Chats to start/stop watching after a rebuild, relative to the previous
/// index. Sorted for determinism.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchDelta {
    pub to_watch: Vec<i64>,
    pub to_unwatch: Vec<i64>,
}

impl WatchDelta {
    pub fn is_empty(&self) -> bool {
        self.to_watch.is_empty() && self.to_unwatch.is_empty()
    }
}

/// Immutable point-in-time view of who watches what. A pure function of the
/// snapshot it was built from; never mutated in place.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    chats: HashMap<i64, ChatEntry>,
}

impl SubscriptionIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the next index from a registry snapshot and compute the watch
    /// delta against `self`. Pure: the only outputs are the returned pair.
    ///
    /// A chat appears in the next index iff some active request binds it,
    /// keyword set or not; an inert request still holds its chats watched.
    pub fn rebuild(&self, snapshot: &[RequestSnapshot]) -> (SubscriptionIndex, WatchDelta) {
        let mut chats: HashMap<i64, ChatEntry> = HashMap::new();

        for request in snapshot {
            let keywords = KeywordSet::new(&request.keywords);
            for chat in &request.chats {
                let entry = chats.entry(chat.chat_id).or_insert_with(|| ChatEntry {
                    info: chat.clone(),
                    monitors: Vec::new(),
                });
                entry.monitors.push(Monitor {
                    request_id: request.request_id,
                    subscriber_id: request.subscriber_id,
                    keywords: keywords.clone(),
                });
            }
        }

        let next = SubscriptionIndex { chats };

        let mut delta = WatchDelta::default();
        for &chat_id in next.chats.keys() {
            if !self.chats.contains_key(&chat_id) {
                delta.to_watch.push(chat_id);
            }
        }
        for &chat_id in self.chats.keys() {
            if !next.chats.contains_key(&chat_id) {
                delta.to_unwatch.push(chat_id);
            }
        }
        delta.to_watch.sort_unstable();
        delta.to_unwatch.sort_unstable();

        (next, delta)
    }

    /// Watchers of a chat; `None` when the chat is unwatched.
    pub fn lookup(&self, chat_id: i64) -> Option<&ChatEntry> {
        self.chats.get(&chat_id)
    }

    pub fn watched_count(&self) -> usize {
        self.chats.len()
    }

    /// Total (request, chat) watch edges across all chats.
    pub fn monitor_count(&self) -> usize {
        self.chats.values().map(|e| e.monitors.len()).sum()
    }

    pub fn watched_chats(&self) -> impl Iterator<Item = i64> + '_ {
        self.chats.keys().copied()
    }
}

/// Shared handle between the reconciler (writer) and the ingestion loop
/// (readers). Reads are lock-free; publishes swap the whole index at once.
pub struct IndexHandle {
    inner: ArcSwap<SubscriptionIndex>,
}

impl IndexHandle {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::new(Arc::new(SubscriptionIndex::empty())),
        }
    }

    /// Owned snapshot of the current index. Stays consistent even if a
    /// publish swaps in a newer one mid-use.
    pub fn load_full(&self) -> Arc<SubscriptionIndex> {
        self.inner.load_full()
    }

    /// Atomically replace the published index.
    pub fn publish(&self, index: SubscriptionIndex) {
        self.inner.store(Arc::new(index));
    }
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self::new()
    }
}
