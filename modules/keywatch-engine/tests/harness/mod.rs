//! Test harness for engine integration tests.
//!
//! Fakes both edges of the engine: a scripted registry on the read side and
//! a recording transport on the delivery side. Events enter through the
//! runtime's sink, exactly as the real transport feed would push them.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use keywatch_common::{ChatInfo, ForwardError, MessageEvent, RequestSnapshot};
use keywatch_engine::dispatch::Delivery;
use keywatch_engine::{
    ChatTransport, DedupLedger, MemoryLedger, MonitorRuntime, RegistryReader, RuntimeOptions,
};

// --- ScriptedRegistry ---

/// Registry fake with a settable snapshot and a failure switch.
#[derive(Default)]
pub struct ScriptedRegistry {
    snapshot: Mutex<Vec<RequestSnapshot>>,
    failing: AtomicBool,
    reads: AtomicUsize,
}

impl ScriptedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_snapshot(&self, requests: Vec<RequestSnapshot>) {
        *self.snapshot.lock().unwrap() = requests;
    }

    /// While failing, every read errors as if the database were down.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryReader for ScriptedRegistry {
    async fn active_requests(&self) -> Result<Vec<RequestSnapshot>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("registry offline");
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

// --- FakeTransport ---

/// One successful `forward` call, as the transport saw it.
#[derive(Debug, Clone)]
pub struct ForwardRecord {
    pub subscriber_id: i64,
    pub request_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub matched_keywords: Vec<String>,
    pub source_link: Option<String>,
}

/// Transport fake that records every call and can be scripted to fail
/// `forward` per subscriber.
#[derive(Default)]
pub struct FakeTransport {
    watched: Mutex<BTreeSet<i64>>,
    watch_calls: Mutex<Vec<i64>>,
    unwatch_calls: Mutex<Vec<i64>>,
    forward_attempts: AtomicUsize,
    forwards: Mutex<Vec<ForwardRecord>>,
    replies: Mutex<Vec<(i64, i64, String)>>,
    scripted: Mutex<HashMap<i64, VecDeque<ForwardError>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue errors for a subscriber's next `forward` calls. Once the queue
    /// drains, calls for that subscriber succeed again.
    pub fn script_forward_errors(&self, subscriber_id: i64, errors: Vec<ForwardError>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(subscriber_id)
            .or_default()
            .extend(errors);
    }

    /// Chats currently watched, ascending.
    pub fn watched(&self) -> Vec<i64> {
        self.watched.lock().unwrap().iter().copied().collect()
    }

    pub fn watch_calls(&self) -> Vec<i64> {
        self.watch_calls.lock().unwrap().clone()
    }

    pub fn unwatch_calls(&self) -> Vec<i64> {
        self.unwatch_calls.lock().unwrap().clone()
    }

    /// Every `forward` call, including scripted failures.
    pub fn forward_attempts(&self) -> usize {
        self.forward_attempts.load(Ordering::SeqCst)
    }

    /// Successful forwards only.
    pub fn forwards(&self) -> Vec<ForwardRecord> {
        self.forwards.lock().unwrap().clone()
    }

    pub fn forward_count(&self) -> usize {
        self.forwards.lock().unwrap().len()
    }

    pub fn replies(&self) -> Vec<(i64, i64, String)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn watch(&self, chat_id: i64) -> Result<()> {
        self.watch_calls.lock().unwrap().push(chat_id);
        self.watched.lock().unwrap().insert(chat_id);
        Ok(())
    }

    async fn unwatch(&self, chat_id: i64) -> Result<()> {
        self.unwatch_calls.lock().unwrap().push(chat_id);
        self.watched.lock().unwrap().remove(&chat_id);
        Ok(())
    }

    async fn forward(&self, delivery: &Delivery) -> Result<(), ForwardError> {
        self.forward_attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&delivery.subscriber_id)
            .and_then(|queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }
        self.forwards.lock().unwrap().push(ForwardRecord {
            subscriber_id: delivery.subscriber_id,
            request_id: delivery.request_id,
            chat_id: delivery.event.chat_id,
            message_id: delivery.event.message_id,
            matched_keywords: delivery.matched_keywords.clone(),
            source_link: delivery.source_link.clone(),
        });
        Ok(())
    }

    async fn reply(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), ForwardError> {
        self.replies
            .lock()
            .unwrap()
            .push((chat_id, message_id, text.to_string()));
        Ok(())
    }
}

// --- TestMonitor ---

/// A running engine wired to the fakes, plus direct access to all of them.
pub struct TestMonitor {
    pub registry: Arc<ScriptedRegistry>,
    pub transport: Arc<FakeTransport>,
    pub ledger: Arc<MemoryLedger>,
    pub runtime: MonitorRuntime,
}

/// Long enough that neither the reconcile interval nor the heartbeat fires
/// during a test; passes happen only at spawn and on explicit wake.
fn quiet_options() -> RuntimeOptions {
    RuntimeOptions {
        reconcile_interval: Duration::from_secs(3600),
        heartbeat_interval: Duration::from_secs(3600),
        ..RuntimeOptions::default()
    }
}

impl TestMonitor {
    /// Spawn the engine over the given snapshot and wait for the initial
    /// reconcile pass to converge.
    pub async fn start(requests: Vec<RequestSnapshot>) -> Self {
        Self::start_with(requests, quiet_options()).await
    }

    pub async fn start_with(requests: Vec<RequestSnapshot>, options: RuntimeOptions) -> Self {
        let registry = Arc::new(ScriptedRegistry::new());
        registry.set_snapshot(requests.clone());
        let transport = Arc::new(FakeTransport::new());
        let ledger = Arc::new(MemoryLedger::new());
        let runtime = MonitorRuntime::spawn(
            Arc::clone(&registry) as Arc<dyn RegistryReader>,
            Arc::clone(&transport) as Arc<dyn ChatTransport>,
            Arc::clone(&ledger) as Arc<dyn DedupLedger>,
            options,
        );

        let monitor = Self {
            registry,
            transport,
            ledger,
            runtime,
        };
        let expected = watched_union(&requests);
        let registry = Arc::clone(&monitor.registry);
        let transport = Arc::clone(&monitor.transport);
        wait_until("initial reconcile", move || {
            registry.read_count() >= 1 && transport.watched() == expected
        })
        .await;
        monitor
    }

    /// Swap the registry snapshot, wake the reconciler, and wait for the
    /// watched set to converge.
    pub async fn apply(&self, requests: Vec<RequestSnapshot>) {
        let expected = watched_union(&requests);
        let reads_before = self.registry.read_count();
        self.registry.set_snapshot(requests);
        self.runtime.wake_handle().wake();

        let registry = Arc::clone(&self.registry);
        let transport = Arc::clone(&self.transport);
        wait_until("reconcile after wake", move || {
            registry.read_count() > reads_before && transport.watched() == expected
        })
        .await;
    }

    /// Push one event into the feed, as the transport side would.
    pub fn send(&self, event: MessageEvent) {
        self.runtime
            .event_sink()
            .send(event)
            .expect("event sink closed");
    }
}

fn watched_union(requests: &[RequestSnapshot]) -> Vec<i64> {
    let mut chats = BTreeSet::new();
    for request in requests {
        for chat in &request.chats {
            chats.insert(chat.chat_id);
        }
    }
    chats.into_iter().collect()
}

// --- Builders ---

pub fn request(
    request_id: i64,
    subscriber_id: i64,
    keywords: &[&str],
    chat_ids: &[i64],
) -> RequestSnapshot {
    RequestSnapshot {
        request_id,
        subscriber_id,
        title: Some(format!("request {request_id}")),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        chats: chat_ids.iter().map(|&chat_id| chat(chat_id)).collect(),
    }
}

pub fn chat(chat_id: i64) -> ChatInfo {
    ChatInfo {
        chat_id,
        handle: None,
        title: Some(format!("chat {chat_id}")),
    }
}

pub fn event(chat_id: i64, message_id: i64, text: &str) -> MessageEvent {
    MessageEvent {
        chat_id,
        message_id,
        text: Some(text.to_string()),
        sender: Some("tester".to_string()),
        sent_at: Utc::now(),
    }
}

// --- Waiting ---

/// Poll `check` until it passes or two seconds elapse.
pub async fn wait_until<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Give in-flight workers time to finish, then re-run `check`. For
/// asserting that something did *not* happen.
pub async fn settle_and_check(what: &str, check: impl Fn() -> bool) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(check(), "expected after settling: {what}");
}
