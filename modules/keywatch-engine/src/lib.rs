//! Keyword monitoring engine: maintains the subscription index, consumes
//! the message feed, and fans matched messages out to subscribers.
//!
//! The engine is transport- and storage-agnostic. Hosts supply a
//! [`ChatTransport`], a [`RegistryReader`], and a [`DedupLedger`], then call
//! [`MonitorRuntime::spawn`]. The transport side pushes [`MessageEvent`]s
//! into the sink returned by [`MonitorRuntime::event_sink`]; command-side
//! collaborators nudge the reconciler through [`WakeHandle`] after writing
//! to the registry.
//!
//! [`MessageEvent`]: keywatch_common::MessageEvent

pub mod dispatch;
pub mod index;
pub mod ingest;
pub mod ledger;
pub mod matcher;
pub mod reconciler;
pub mod reply;
pub mod runtime;
pub mod traits;

pub use dispatch::{Delivery, DispatchOutcome, Dispatcher};
pub use index::{IndexHandle, Monitor, SubscriptionIndex, WatchDelta};
pub use ledger::MemoryLedger;
pub use matcher::KeywordSet;
pub use reconciler::{Reconciler, WakeHandle};
pub use runtime::{MonitorRuntime, MonitorStats, RuntimeOptions, StatsSnapshot};
pub use traits::{ChatTransport, DedupLedger, LedgerStats, RegistryReader};
