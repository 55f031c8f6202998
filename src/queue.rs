//! TelegramQueue (C8): ingress arbitration, rate limiting, subscriber fan-out.
//!
//! Two internal channels. The ingress channel carries both directions,
//! intermixed; a single consumer task drains it forever, pushing outgoing
//! telegrams onward to a second, rate-limited channel and fanning incoming
//! telegrams out to matching subscribers. `InternalGroupAddress` traffic
//! never touches the interface or the rate limiter: it goes straight to the
//! device-layer hook.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::address::{Destination, GroupAddress};
use crate::cemi::CemiHandler;
use crate::config::StackConfig;
use crate::error::Result;
use crate::filter::AddressFilter;
use crate::interface::CemiTransport;
use crate::telegram::{Telegram, TelegramDirection};

/// Ingress channel items are telegrams, or a stop sentinel carrying the
/// channel the caller awaits completion on.
enum QueueItem {
    Telegram(Telegram),
    Stop(oneshot::Sender<()>),
}

type SubscriberCallback = Box<dyn Fn(&Telegram) + Send + Sync>;

/// Opaque handle returned by [`TelegramQueue::subscribe`], used to remove
/// the subscription later via [`TelegramQueue::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Which group telegrams a subscription fires for: patterns and explicit
/// addresses are combined by OR; an empty filter (the default) matches
/// every group/internal destination.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    patterns: Vec<AddressFilter>,
    addresses: Vec<GroupAddress>,
}

impl SubscriptionFilter {
    /// Matches every group and internal destination.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: AddressFilter) -> Self {
        self.patterns.push(pattern);
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: GroupAddress) -> Self {
        self.addresses.push(address);
        self
    }

    fn matches(&self, destination: &Destination) -> bool {
        if self.patterns.is_empty() && self.addresses.is_empty() {
            return true;
        }
        match destination {
            Destination::Group(g) => self.addresses.contains(g) || self.patterns.iter().any(|p| p.matches(*g)),
            Destination::Internal(tag) => self.patterns.iter().any(|p| p.matches_internal(tag)),
            Destination::Individual(_) => false,
        }
    }
}

/// Forwarding point towards the out-of-scope device abstraction layer.
/// Every telegram the queue handles reaches `process` after subscriber
/// callbacks run. The default is a no-op so the queue is usable standalone.
pub trait DeviceSink: Send + Sync {
    fn process(&self, telegram: &Telegram);
}

struct NoopDeviceSink;

impl DeviceSink for NoopDeviceSink {
    fn process(&self, _telegram: &Telegram) {}
}

struct Subscription {
    id: SubscriptionId,
    filter: SubscriptionFilter,
    match_outgoing: bool,
    callback: SubscriberCallback,
}

#[derive(Default)]
struct Subscribers {
    entries: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl Subscribers {
    fn add(&self, filter: SubscriptionFilter, match_outgoing: bool, callback: SubscriberCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().expect("subscriber registry mutex poisoned").push(Subscription {
            id,
            filter,
            match_outgoing,
            callback,
        });
        id
    }

    fn remove(&self, id: SubscriptionId) {
        self.entries.lock().expect("subscriber registry mutex poisoned").retain(|s| s.id != id);
    }

    fn notify(&self, telegram: &Telegram) {
        let entries = self.entries.lock().expect("subscriber registry mutex poisoned");
        for subscription in entries.iter() {
            if matches!(telegram.direction, TelegramDirection::Outgoing) && !subscription.match_outgoing {
                continue;
            }
            if !subscription.filter.matches(&telegram.destination) {
                continue;
            }
            if let Err(payload) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (subscription.callback)(telegram)))
            {
                tracing::error!(?payload, "subscriber callback panicked, swallowing");
            }
        }
    }
}

/// Arbitrates outgoing traffic and fans incoming traffic out to subscribers.
pub struct TelegramQueue {
    ingress: mpsc::Sender<QueueItem>,
    subscribers: Arc<Subscribers>,
}

impl std::fmt::Debug for TelegramQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramQueue").finish_non_exhaustive()
    }
}

/// Ingress channel capacity; `enqueue` suspends once this many telegrams are
/// queued but not yet consumed.
const INGRESS_CAPACITY: usize = 256;
/// Rate-limited outgoing channel capacity.
const OUTGOING_CAPACITY: usize = 64;

impl TelegramQueue {
    #[must_use]
    pub fn new<T: CemiTransport + Send + Sync + 'static>(handler: Arc<CemiHandler<T>>, config: StackConfig) -> Arc<Self> {
        Self::with_device_sink(handler, config, Arc::new(NoopDeviceSink))
    }

    /// Like [`TelegramQueue::new`], but telegrams are forwarded to `device_sink`
    /// instead of the no-op default after subscriber callbacks run.
    #[must_use]
    pub fn with_device_sink<T: CemiTransport + Send + Sync + 'static>(
        handler: Arc<CemiHandler<T>>,
        config: StackConfig,
        device_sink: Arc<dyn DeviceSink>,
    ) -> Arc<Self> {
        let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_CAPACITY);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let subscribers = Arc::new(Subscribers::default());

        let rate_limiter = tokio::spawn(run_rate_limiter(handler, outgoing_rx, config.rate_limit));
        tokio::spawn(run_consumer(ingress_rx, outgoing_tx, Arc::clone(&subscribers), device_sink, rate_limiter));

        Arc::new(Self {
            ingress: ingress_tx,
            subscribers,
        })
    }

    /// Register a callback invoked for every incoming telegram matching
    /// `filter`. Set `match_outgoing` to also observe telegrams this stack
    /// itself sends.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        match_outgoing: bool,
        callback: impl Fn(&Telegram) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribers.add(filter, match_outgoing, Box::new(callback))
    }

    /// Remove a previously registered subscription. A no-op if already
    /// removed.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(id);
    }

    /// Enqueue a telegram, suspending if the ingress channel is full.
    pub async fn enqueue(&self, telegram: Telegram) -> Result<()> {
        self.ingress
            .send(QueueItem::Telegram(telegram))
            .await
            .map_err(|_| crate::error::KnxError::communication("telegram queue consumer has stopped", true))
    }

    /// Cooperative shutdown: drains whatever is already queued, waits for
    /// the rate-limited outgoing channel to empty, then returns.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.ingress.send(QueueItem::Stop(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_consumer(
    mut ingress_rx: mpsc::Receiver<QueueItem>,
    outgoing_tx: mpsc::Sender<Telegram>,
    subscribers: Arc<Subscribers>,
    device_sink: Arc<dyn DeviceSink>,
    rate_limiter: tokio::task::JoinHandle<()>,
) {
    while let Some(item) = ingress_rx.recv().await {
        match item {
            QueueItem::Telegram(telegram) => dispatch_one(telegram, &outgoing_tx, &subscribers, &device_sink).await,
            QueueItem::Stop(done) => {
                drop(outgoing_tx);
                let _ = rate_limiter.await;
                let _ = done.send(());
                return;
            }
        }
    }
}

async fn dispatch_one(
    telegram: Telegram,
    outgoing_tx: &mpsc::Sender<Telegram>,
    subscribers: &Arc<Subscribers>,
    device_sink: &Arc<dyn DeviceSink>,
) {
    subscribers.notify(&telegram);
    match telegram.direction {
        TelegramDirection::Outgoing => {
            if matches!(telegram.destination, Destination::Internal(_)) {
                device_sink.process(&telegram);
                return;
            }
            if outgoing_tx.send(telegram).await.is_err() {
                tracing::error!("outgoing channel closed while queue still running");
            }
        }
        TelegramDirection::Incoming => device_sink.process(&telegram),
    }
}

async fn run_rate_limiter<T: CemiTransport + Send + Sync + 'static>(
    handler: Arc<CemiHandler<T>>,
    mut outgoing_rx: mpsc::Receiver<Telegram>,
    rate_limit: u16,
) {
    let interval = (rate_limit != 0).then(|| Duration::from_secs_f64(1.0 / f64::from(rate_limit)));
    while let Some(telegram) = outgoing_rx.recv().await {
        if let Err(err) = handler.send_telegram(telegram).await {
            if err.should_log() {
                tracing::warn!(error = %err, "outgoing telegram dispatch failed");
            }
        }
        if let Some(interval) = interval {
            tokio::time::sleep(interval).await;
        }
    }
}
