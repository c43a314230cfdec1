//! Keeps the subscription index synchronized with the registry without
//! blocking message processing.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::index::{IndexHandle, WatchDelta};
use crate::traits::{ChatTransport, RegistryReader};

/// Cap on in-flight watch/unwatch calls per pass.
const SUBSCRIBE_CONCURRENCY: usize = 8;

/// Periodic + wake-triggered index rebuild. The previous index stays
/// authoritative for readers until the atomic publish at the end of a pass.
pub struct Reconciler {
    registry: Arc<dyn RegistryReader>,
    transport: Arc<dyn ChatTransport>,
    index: Arc<IndexHandle>,
    interval: Duration,
    wake: Arc<Notify>,
}

/// Cloneable wake signal. The command collaborator calls `wake()` right
/// after persisting a registry change so it takes effect without waiting
/// for the next tick.
#[derive(Clone)]
pub struct WakeHandle {
    wake: Arc<Notify>,
}

impl WakeHandle {
    pub fn wake(&self) {
        self.wake.notify_one();
    }
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn RegistryReader>,
        transport: Arc<dyn ChatTransport>,
        index: Arc<IndexHandle>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            index,
            interval,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            wake: Arc::clone(&self.wake),
        }
    }

    /// Run until shutdown. The first pass runs immediately so monitoring
    /// starts without waiting a full interval. A wake arriving during a
    /// pass is not lost; it triggers the next pass at once.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "reconciler started");
        loop {
            self.reconcile_once().await;
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.wake.notified() => {
                    debug!("wake signal, reconciling early");
                }
                _ = shutdown.changed() => {
                    info!("reconciler stopped");
                    return;
                }
            }
        }
    }

    /// One pass: snapshot read → rebuild → apply watch delta → publish.
    /// A failed read leaves the previous index in force until the next pass.
    pub async fn reconcile_once(&self) {
        let snapshot = match self.registry.active_requests().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "registry read failed, keeping previous index");
                return;
            }
        };

        let current = self.index.load_full();
        let (next, delta) = current.rebuild(&snapshot);

        if !delta.is_empty() {
            info!(
                watch = delta.to_watch.len(),
                unwatch = delta.to_unwatch.len(),
                "applying watch delta"
            );
            self.apply_delta(&delta).await;
        }

        let chats = next.watched_count();
        let monitors = next.monitor_count();
        self.index.publish(next);
        debug!(
            requests = snapshot.len(),
            chats,
            monitors,
            "index published"
        );
    }

    /// Unwatch first, then watch, a few chats at a time. Per-chat transport
    /// failures are logged and skipped; the pass still publishes.
    async fn apply_delta(&self, delta: &WatchDelta) {
        stream::iter(delta.to_unwatch.iter().copied())
            .for_each_concurrent(SUBSCRIBE_CONCURRENCY, |chat_id| async move {
                if let Err(e) = self.transport.unwatch(chat_id).await {
                    warn!(error = %e, chat_id, "unwatch failed");
                }
            })
            .await;

        stream::iter(delta.to_watch.iter().copied())
            .for_each_concurrent(SUBSCRIBE_CONCURRENCY, |chat_id| async move {
                if let Err(e) = self.transport.watch(chat_id).await {
                    warn!(error = %e, chat_id, "watch failed");
                }
            })
            .await;
    }
}
