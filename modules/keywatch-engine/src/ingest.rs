//! Event ingestion: the sole consumer of the transport feed.
//!
//! A router fans events out to one lightweight worker per chat, so a stalled
//! ledger write or a burst in one chat never delays another chat's events,
//! while events within a chat keep their arrival order. Dispatch is handed
//! off to spawned tasks and never blocks ingestion.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use keywatch_common::{message_link, MessageEvent};

use crate::dispatch::{Delivery, DispatchOutcome, Dispatcher};
use crate::index::IndexHandle;
use crate::reply::ReplyScheduler;
use crate::runtime::MonitorStats;
use crate::traits::DedupLedger;

/// Shared dependencies for per-chat workers and dispatch tasks.
pub(crate) struct IngestContext {
    pub index: Arc<IndexHandle>,
    pub ledger: Arc<dyn DedupLedger>,
    pub dispatcher: Arc<Dispatcher>,
    pub replies: Option<Arc<ReplyScheduler>>,
    pub stats: Arc<MonitorStats>,
    pub shutdown: watch::Receiver<bool>,
}

/// Owns the transport feed and the per-chat worker map.
pub struct IngestRouter {
    events: mpsc::UnboundedReceiver<MessageEvent>,
    workers: HashMap<i64, mpsc::UnboundedSender<MessageEvent>>,
    ctx: Arc<IngestContext>,
}

impl IngestRouter {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<MessageEvent>,
        ctx: Arc<IngestContext>,
    ) -> Self {
        Self {
            events,
            workers: HashMap::new(),
            ctx,
        }
    }

    /// Run until the feed closes or shutdown is signalled. Queued events
    /// still in per-chat channels at shutdown are dropped.
    pub async fn run(mut self) {
        let mut shutdown = self.ctx.shutdown.clone();
        loop {
            tokio::select! {
                maybe = self.events.recv() => {
                    let Some(event) = maybe else {
                        debug!("event feed closed, ingest router stopping");
                        return;
                    };
                    self.route(event);
                }
                _ = shutdown.changed() => {
                    info!("ingest router stopped");
                    return;
                }
            }
        }
    }

    /// Hand an event to its chat's worker, spawning the worker on first use.
    /// Per-chat queues are unbounded so the router never blocks on one
    /// chat's backlog; the transport feed is the only backpressure point.
    fn route(&mut self, event: MessageEvent) {
        self.ctx.stats.record_event();
        let chat_id = event.chat_id;
        let sender = self.workers.entry(chat_id).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(chat_worker(chat_id, rx, Arc::clone(&self.ctx)));
            tx
        });
        if sender.send(event).is_err() {
            // Worker exited early (shutdown race); nothing to do with the
            // event, but clear the stale sender.
            self.workers.remove(&chat_id);
        }
    }
}

/// Processes one chat's events strictly in arrival order.
async fn chat_worker(
    chat_id: i64,
    mut events: mpsc::UnboundedReceiver<MessageEvent>,
    ctx: Arc<IngestContext>,
) {
    let mut shutdown = ctx.shutdown.clone();
    debug!(chat_id, "chat worker started");
    loop {
        tokio::select! {
            maybe = events.recv() => {
                let Some(event) = maybe else {
                    debug!(chat_id, "chat worker stopping");
                    return;
                };
                process_event(&ctx, event).await;
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// One event through the pipeline: ledger fast-path check, index lookup,
/// matching, durable dedup record, dispatch fan-out.
async fn process_event(ctx: &IngestContext, event: MessageEvent) {
    // Fast path: already handled by an earlier evaluation.
    match ctx.ledger.contains(event.chat_id, event.message_id).await {
        Ok(true) => {
            debug!(
                chat_id = event.chat_id,
                message_id = event.message_id,
                "already processed, discarding"
            );
            ctx.stats.record_duplicate();
            return;
        }
        Ok(false) => {}
        Err(e) => {
            // The insert below is the authoritative guard; a failed read
            // only costs the fast path.
            warn!(
                error = %e,
                chat_id = event.chat_id,
                message_id = event.message_id,
                "ledger lookup failed"
            );
        }
    }

    // An unwatched chat's message is discarded before any evaluation, so it
    // never enters the ledger either.
    let index = ctx.index.load_full();
    let Some(entry) = index.lookup(event.chat_id) else {
        debug!(chat_id = event.chat_id, "chat not watched, discarding");
        return;
    };

    let lowered = event.text.as_deref().unwrap_or("").to_lowercase();
    let mut matches: Vec<(i64, i64, Vec<String>)> = Vec::new();
    for monitor in &entry.monitors {
        let matched = monitor.keywords.matched_terms(&lowered);
        if !matched.is_empty() {
            matches.push((
                monitor.request_id,
                monitor.subscriber_id,
                matched.into_iter().map(str::to_string).collect(),
            ));
        }
    }

    // Durable record before any dispatch. Losing the race means a concurrent
    // evaluation of this same message won and owns the fan-out.
    match ctx
        .ledger
        .insert_if_absent(event.chat_id, event.message_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            debug!(
                chat_id = event.chat_id,
                message_id = event.message_id,
                "lost dedup race, discarding"
            );
            ctx.stats.record_duplicate();
            return;
        }
        Err(e) => {
            // Without a durable record a crash could double-send; dropping
            // the message is the chosen side of that trade.
            error!(
                error = %e,
                chat_id = event.chat_id,
                message_id = event.message_id,
                "ledger write failed, dropping message without dispatch"
            );
            return;
        }
    }

    if matches.is_empty() {
        return;
    }

    let link = message_link(&entry.info, event.message_id);
    debug!(
        chat_id = event.chat_id,
        message_id = event.message_id,
        matches = matches.len(),
        "dispatching"
    );

    for (request_id, subscriber_id, matched_keywords) in matches {
        ctx.stats.record_match();
        let delivery = Delivery {
            subscriber_id,
            request_id,
            event: event.clone(),
            chat: entry.info.clone(),
            matched_keywords,
            source_link: link.clone(),
        };
        let dispatcher = Arc::clone(&ctx.dispatcher);
        let replies = ctx.replies.clone();
        let stats = Arc::clone(&ctx.stats);
        tokio::spawn(async move {
            match dispatcher.deliver(&delivery).await {
                DispatchOutcome::Delivered { .. } => {
                    stats.record_delivered();
                    if let Some(replies) = replies {
                        replies.schedule(delivery.event.chat_id, delivery.event.message_id);
                    }
                }
                DispatchOutcome::Failed { .. } => stats.record_failed(),
            }
        });
    }
}
