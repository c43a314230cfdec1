//! Delivery of matched messages, with rate-limit-aware retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use keywatch_common::{ChatInfo, ForwardError, MessageEvent};

use crate::traits::ChatTransport;

/// One delivery job: a matched message bound for one subscriber, carrying
/// everything the transport needs to render the notification.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subscriber_id: i64,
    pub request_id: i64,
    pub event: MessageEvent,
    pub chat: ChatInfo,
    /// Keywords that matched, for the notification and the log.
    pub matched_keywords: Vec<String>,
    /// Canonical link to the source message, when one can be built.
    pub source_link: Option<String>,
}

/// Terminal state of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

/// Non-terminal states a dispatch moves through. Waiting is entered only on
/// a rate-limit signal and only while attempts remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Pending,
    Sending { attempt: u32 },
    Waiting { attempt: u32, delay: Duration },
}

/// Drives deliveries to a terminal state, one spawned task per delivery.
/// A rate-limit wait suspends only its own task.
pub struct Dispatcher {
    transport: Arc<dyn ChatTransport>,
    max_attempts: u32,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        max_attempts: u32,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            max_attempts: max_attempts.max(1),
            shutdown,
        }
    }

    /// Deliver one matched message to one subscriber.
    ///
    /// Rate-limit signals re-enter Sending after the transport-reported
    /// wait, bounded by the attempt budget. Every other error is terminal:
    /// logged for this (message, subscriber) pair, never retried.
    pub async fn deliver(&self, delivery: &Delivery) -> DispatchOutcome {
        let mut state = SendState::Pending;
        loop {
            state = match state {
                SendState::Pending => SendState::Sending { attempt: 1 },

                SendState::Sending { attempt } => match self.transport.forward(delivery).await {
                    Ok(()) => {
                        info!(
                            subscriber_id = delivery.subscriber_id,
                            request_id = delivery.request_id,
                            chat_id = delivery.event.chat_id,
                            message_id = delivery.event.message_id,
                            keywords = ?delivery.matched_keywords,
                            attempts = attempt,
                            "delivered"
                        );
                        return DispatchOutcome::Delivered { attempts: attempt };
                    }
                    Err(ForwardError::RateLimited { retry_after }) => {
                        if attempt >= self.max_attempts {
                            warn!(
                                subscriber_id = delivery.subscriber_id,
                                chat_id = delivery.event.chat_id,
                                message_id = delivery.event.message_id,
                                attempts = attempt,
                                "rate limited with no attempts left, giving up"
                            );
                            return DispatchOutcome::Failed {
                                attempts: attempt,
                                reason: format!("rate limited after {attempt} attempts"),
                            };
                        }
                        warn!(
                            subscriber_id = delivery.subscriber_id,
                            chat_id = delivery.event.chat_id,
                            message_id = delivery.event.message_id,
                            wait_secs = retry_after.as_secs(),
                            attempt,
                            "rate limited, waiting before retry"
                        );
                        SendState::Waiting {
                            attempt,
                            delay: retry_after,
                        }
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            kind = e.kind(),
                            subscriber_id = delivery.subscriber_id,
                            request_id = delivery.request_id,
                            chat_id = delivery.event.chat_id,
                            message_id = delivery.event.message_id,
                            "delivery failed, not retrying"
                        );
                        return DispatchOutcome::Failed {
                            attempts: attempt,
                            reason: e.to_string(),
                        };
                    }
                },

                SendState::Waiting { attempt, delay } => {
                    let mut shutdown = self.shutdown.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => SendState::Sending { attempt: attempt + 1 },
                        _ = shutdown.changed() => {
                            warn!(
                                subscriber_id = delivery.subscriber_id,
                                chat_id = delivery.event.chat_id,
                                message_id = delivery.event.message_id,
                                "shutdown during rate-limit wait, abandoning delivery"
                            );
                            return DispatchOutcome::Failed {
                                attempts: attempt,
                                reason: "shutdown during rate-limit wait".to_string(),
                            };
                        }
                    }
                }
            };
        }
    }
}
