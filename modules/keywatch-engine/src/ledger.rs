//! DedupLedger implementations that need no database.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use crate::traits::{DedupLedger, LedgerStats};

/// In-memory ledger for tests and ephemeral deployments. Gives the same
/// insert-if-absent atomicity as the durable ledger, scoped to one process.
#[derive(Default)]
pub struct MemoryLedger {
    seen: Mutex<HashMap<(i64, i64), Instant>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded messages, for test assertions.
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop records older than `retention`. Returns how many went.
    pub fn prune_older_than(&self, retention: Duration) -> usize {
        let mut seen = self.seen.lock().unwrap();
        let before = seen.len();
        seen.retain(|_, at| at.elapsed() < retention);
        before - seen.len()
    }
}

#[async_trait]
impl DedupLedger for MemoryLedger {
    async fn contains(&self, chat_id: i64, message_id: i64) -> Result<bool> {
        Ok(self.seen.lock().unwrap().contains_key(&(chat_id, message_id)))
    }

    async fn insert_if_absent(&self, chat_id: i64, message_id: i64) -> Result<bool> {
        let mut seen = self.seen.lock().unwrap();
        match seen.entry((chat_id, message_id)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Ok(true)
            }
        }
    }

    async fn stats(&self) -> Result<LedgerStats> {
        let seen = self.seen.lock().unwrap();
        let day = Duration::from_secs(24 * 60 * 60);
        let last_24h = seen.values().filter(|at| at.elapsed() < day).count();
        Ok(LedgerStats {
            total: seen.len() as i64,
            last_24h: last_24h as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_is_first_writer_wins() {
        let ledger = MemoryLedger::new();
        assert!(ledger.insert_if_absent(-10, 1).await.unwrap());
        assert!(!ledger.insert_if_absent(-10, 1).await.unwrap());
        assert!(ledger.contains(-10, 1).await.unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn same_message_id_in_other_chat_is_distinct() {
        let ledger = MemoryLedger::new();
        assert!(ledger.insert_if_absent(-10, 1).await.unwrap());
        assert!(ledger.insert_if_absent(-20, 1).await.unwrap());
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn stats_count_recent_inserts() {
        let ledger = MemoryLedger::new();
        ledger.insert_if_absent(-10, 1).await.unwrap();
        ledger.insert_if_absent(-10, 2).await.unwrap();
        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.last_24h, 2);
    }

    #[tokio::test]
    async fn prune_keeps_fresh_records() {
        let ledger = MemoryLedger::new();
        ledger.insert_if_absent(-10, 1).await.unwrap();
        assert_eq!(ledger.prune_older_than(Duration::from_secs(60)), 0);
        assert_eq!(ledger.prune_older_than(Duration::ZERO), 1);
        assert!(ledger.is_empty());
    }
}
