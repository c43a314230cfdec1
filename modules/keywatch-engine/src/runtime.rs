//! Assembles the monitoring runtime: reconciler, ingest router, heartbeat.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use keywatch_common::{AutoReplyConfig, MessageEvent, MonitorConfig};

use crate::dispatch::Dispatcher;
use crate::index::IndexHandle;
use crate::ingest::{IngestContext, IngestRouter};
use crate::reconciler::{Reconciler, WakeHandle};
use crate::reply::ReplyScheduler;
use crate::traits::{ChatTransport, DedupLedger, RegistryReader};

/// Engine knobs a host passes to `MonitorRuntime::spawn`.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub reconcile_interval: Duration,
    pub dispatch_max_attempts: u32,
    pub heartbeat_interval: Duration,
    pub auto_reply: Option<AutoReplyConfig>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30),
            dispatch_max_attempts: 3,
            heartbeat_interval: Duration::from_secs(300),
            auto_reply: None,
        }
    }
}

impl From<&MonitorConfig> for RuntimeOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            reconcile_interval: config.reconcile_interval,
            dispatch_max_attempts: config.dispatch_max_attempts,
            heartbeat_interval: config.heartbeat_interval,
            auto_reply: config.auto_reply.clone(),
        }
    }
}

/// Cross-task counters, logged by the heartbeat and readable by hosts.
#[derive(Default)]
pub struct MonitorStats {
    events: AtomicU64,
    duplicates: AtomicU64,
    matched: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Plain copy of the counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub events: u64,
    pub duplicates: u64,
    pub matched: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl MonitorStats {
    pub(crate) fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_match(&self) {
        self.matched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "events={} duplicates={} matched={} delivered={} failed={}",
            self.events, self.duplicates, self.matched, self.delivered, self.failed
        )
    }
}

/// Handle to a running monitor. The engine's entire control surface: the
/// event sink the transport feeds, the reconciler wake signal, and shutdown.
pub struct MonitorRuntime {
    wake: WakeHandle,
    events: mpsc::UnboundedSender<MessageEvent>,
    index: Arc<IndexHandle>,
    stats: Arc<MonitorStats>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorRuntime {
    /// Spawn the reconciler, ingest router, and heartbeat loops.
    pub fn spawn(
        registry: Arc<dyn RegistryReader>,
        transport: Arc<dyn ChatTransport>,
        ledger: Arc<dyn DedupLedger>,
        options: RuntimeOptions,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let index = Arc::new(IndexHandle::new());
        let stats = Arc::new(MonitorStats::default());

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&transport),
            options.dispatch_max_attempts,
            shutdown_rx.clone(),
        ));
        let replies = options.auto_reply.map(|config| {
            Arc::new(ReplyScheduler::new(
                Arc::clone(&transport),
                config,
                shutdown_rx.clone(),
            ))
        });

        let reconciler = Reconciler::new(
            registry,
            transport,
            Arc::clone(&index),
            options.reconcile_interval,
        );
        let wake = reconciler.wake_handle();

        let router = IngestRouter::new(
            event_rx,
            Arc::new(IngestContext {
                index: Arc::clone(&index),
                ledger: Arc::clone(&ledger),
                dispatcher,
                replies,
                stats: Arc::clone(&stats),
                shutdown: shutdown_rx.clone(),
            }),
        );

        let tasks = vec![
            tokio::spawn(reconciler.run(shutdown_rx.clone())),
            tokio::spawn(router.run()),
            tokio::spawn(heartbeat_loop(
                options.heartbeat_interval,
                Arc::clone(&index),
                ledger,
                Arc::clone(&stats),
                shutdown_rx,
            )),
        ];

        Self {
            wake,
            events: event_tx,
            index,
            stats,
            shutdown: shutdown_tx,
            tasks,
        }
    }

    /// Sink the transport side pushes `MessageEvent`s into.
    pub fn event_sink(&self) -> mpsc::UnboundedSender<MessageEvent> {
        self.events.clone()
    }

    /// Wake signal for the command collaborator.
    pub fn wake_handle(&self) -> WakeHandle {
        self.wake.clone()
    }

    /// The published index, for hosts that want to inspect the watched set.
    pub fn index(&self) -> Arc<IndexHandle> {
        Arc::clone(&self.index)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal shutdown and wait for the loops to stop. In-flight rate-limit
    /// waits are interrupted; their deliveries end as failed.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!(stats = %self.stats.snapshot(), "monitor stopped");
    }
}

/// Periodic liveness log: watched set, counters, ledger totals.
async fn heartbeat_loop(
    interval: Duration,
    index: Arc<IndexHandle>,
    ledger: Arc<dyn DedupLedger>,
    stats: Arc<MonitorStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => return,
        }

        let index = index.load_full();
        let snapshot = stats.snapshot();
        match ledger.stats().await {
            Ok(ledger_stats) => info!(
                watched_chats = index.watched_count(),
                monitors = index.monitor_count(),
                events = snapshot.events,
                duplicates = snapshot.duplicates,
                matched = snapshot.matched,
                delivered = snapshot.delivered,
                failed = snapshot.failed,
                processed_total = ledger_stats.total,
                processed_24h = ledger_stats.last_24h,
                "heartbeat"
            ),
            Err(e) => warn!(error = %e, "heartbeat ledger stats failed"),
        }
    }
}
