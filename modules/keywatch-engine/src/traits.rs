//! Trait seams between the engine and its collaborators.

use anyhow::Result;
use async_trait::async_trait;

use keywatch_common::{ForwardError, RequestSnapshot};

use crate::dispatch::Delivery;

/// Control and delivery surface of the chat transport.
///
/// The real client lives outside this workspace; tests use the recording
/// fake in the engine's integration harness. Event delivery is not part of
/// the trait; the transport side pushes `MessageEvent`s into the runtime's
/// event sink.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Start receiving events for a chat.
    async fn watch(&self, chat_id: i64) -> Result<()>;

    /// Stop receiving events for a chat.
    async fn unwatch(&self, chat_id: i64) -> Result<()>;

    /// Forward a matched message to a subscriber.
    async fn forward(&self, delivery: &Delivery) -> Result<(), ForwardError>;

    /// Post a reply into the source chat. Used only by auto-reply.
    async fn reply(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), ForwardError>;
}

/// Read side of the registry, consumed by the reconciler.
///
/// Implemented by `RegistryStore` (postgres) and scripted sources in tests.
#[async_trait]
pub trait RegistryReader: Send + Sync {
    /// All currently active requests with their keyword sets and chat
    /// bindings, read as one consistent snapshot, ordered by request id.
    async fn active_requests(&self) -> Result<Vec<RequestSnapshot>>;
}

/// Processed-message counts for the heartbeat log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerStats {
    pub total: i64,
    pub last_24h: i64,
}

/// The processed-message ledger: the sole authority on "already handled".
///
/// Implemented by `ProcessedLedger` (postgres) and `MemoryLedger` (tests,
/// ephemeral runs). `insert_if_absent` must be atomic: two concurrent
/// inserts of one (chat_id, message_id) pair must yield exactly one `true`.
#[async_trait]
pub trait DedupLedger: Send + Sync {
    async fn contains(&self, chat_id: i64, message_id: i64) -> Result<bool>;

    /// Record a message as processed. Returns `true` when this call created
    /// the record, `false` when it already existed.
    async fn insert_if_absent(&self, chat_id: i64, message_id: i64) -> Result<bool>;

    async fn stats(&self) -> Result<LedgerStats>;
}
