//! Optional auto-reply into the source chat after a successful delivery.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, warn};

use keywatch_common::AutoReplyConfig;

use crate::traits::ChatTransport;

/// Schedules at most one reply per physical message, after a random delay.
/// Several subscribers matching the same message share the guard, so the
/// source chat sees a single reply. Failures are logged, never retried.
pub struct ReplyScheduler {
    transport: Arc<dyn ChatTransport>,
    config: AutoReplyConfig,
    shutdown: watch::Receiver<bool>,
    /// (chat_id, message_id) pairs already scheduled, kept for the process
    /// lifetime. The dedup ledger guarantees each message is dispatched
    /// from one evaluation only, so this set grows with matched messages.
    scheduled: Mutex<HashSet<(i64, i64)>>,
}

impl ReplyScheduler {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        config: AutoReplyConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            config,
            shutdown,
            scheduled: Mutex::new(HashSet::new()),
        }
    }

    /// Schedule a reply for (chat, message) unless one is already scheduled.
    pub fn schedule(self: &Arc<Self>, chat_id: i64, message_id: i64) {
        let newly_scheduled = self.scheduled.lock().unwrap().insert((chat_id, message_id));
        if !newly_scheduled {
            return;
        }

        let delay = self.random_delay();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = this.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
            match this
                .transport
                .reply(chat_id, message_id, &this.config.text)
                .await
            {
                Ok(()) => {
                    debug!(chat_id, message_id, delay_ms = delay.as_millis() as u64, "auto-reply sent")
                }
                Err(e) => warn!(error = %e, chat_id, message_id, "auto-reply failed"),
            }
        });
    }

    fn random_delay(&self) -> Duration {
        let min = self.config.min_delay;
        let max = self.config.max_delay.max(min);
        if max == min {
            return min;
        }
        let span_ms = (max - min).as_millis() as u64;
        min + Duration::from_millis(rand::rng().random_range(0..=span_ms))
    }
}
