//! Broadcast hub: typed fan-out of market data to subscriber callbacks.
//!
//! The hub owns one [`SpmcRing`] of [`MarketData`] and a table of
//! subscribers. Each subscriber gets its own reader, its own consumer
//! thread, and a [`DataType`] filter; records whose tag does not match are
//! skipped before the callback is ever invoked.
//!
//! # Threading
//!
//! [`publish`](MarketDataHub::publish) is wait-free and never touches the
//! subscriber table, so it does not contend with subscribe/unsubscribe.
//! It is single-producer **by convention**: drive it from one thread only
//! (debug builds assert this). Subscribe, unsubscribe and
//! [`stop_all`](MarketDataHub::stop_all) serialise on one internal mutex
//! that the consumer fast path never takes.
//!
//! Consumer threads poll their reader and sleep for about a microsecond
//! when the ring is idle, so an idle subscriber does not peg a core. For
//! a busy-spin consumer, attach a raw [`Reader`] to the ring directly and
//! poll it in a loop.
//!
//! # Callback contract
//!
//! Callbacks run on the subscriber's consumer thread, never on the
//! producer's. The record reference passed to a callback points at a copy
//! on the consumer's stack and is valid only for the duration of the
//! call; copy the record out to keep it. A callback must not call
//! [`unsubscribe`](MarketDataHub::unsubscribe) or
//! [`stop_all`](MarketDataHub::stop_all) for its **own** subscription:
//! those joins wait for the callback to return, so the thread would
//! deadlock on itself. Managing *other* subscriptions from a callback is
//! fine. A callback that panics is caught and logged, the offending
//! record is dropped, and the consumer keeps running.
//!
//! Cancellation is cooperative: the running flag is checked between
//! records, so a callback already executing is allowed to finish. There
//! is no way to abort a stuck callback; its `unsubscribe` will block
//! until the callback returns.

use crate::market_data::{BookL1, DataType, Kline, MarketData, Trade};
use crate::spmc_ring::{Reader, SpmcRing, Writer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Ring depth used by [`MarketDataHub`] unless overridden; bounds how far
/// a slow subscriber may fall behind before it starts losing records.
pub const DEFAULT_RING_CAPACITY: usize = 512;

/// Idle-consumer nap between polls of an empty ring.
const IDLE_SLEEP: Duration = Duration::from_micros(1);

/// Handle identifying one subscription.
///
/// Ids are allocated from a monotonic counter and never reused for the
/// lifetime of the hub, so a stale id can never address a newer
/// subscriber.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Subscriber {
    filter: DataType,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Fan-out service over one broadcast ring of [`MarketData`].
///
/// `N` is the ring depth (power of two, checked at compile time). The
/// unparameterised type uses [`DEFAULT_RING_CAPACITY`].
///
/// Dropping the hub stops and joins every consumer thread.
pub struct MarketDataHub<const N: usize = DEFAULT_RING_CAPACITY> {
    ring: Arc<SpmcRing<MarketData, N>>,
    writer: Writer<MarketData, N>,
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    #[cfg(debug_assertions)]
    publishing: AtomicBool,
}

impl<const N: usize> MarketDataHub<N> {
    pub fn new() -> Self {
        let ring = SpmcRing::new();
        let writer = ring.writer();
        Self {
            ring,
            writer,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            #[cfg(debug_assertions)]
            publishing: AtomicBool::new(false),
        }
    }

    /// Publishes one record to every current subscriber.
    ///
    /// Wait-free and infallible; a subscriber that cannot keep up is
    /// lapped, not waited for. Single-producer by convention: call from
    /// one thread only (asserted in debug builds).
    #[inline]
    pub fn publish(&self, data: MarketData) {
        #[cfg(debug_assertions)]
        assert!(
            !self.publishing.swap(true, Ordering::Acquire),
            "publish driven from two threads at once",
        );
        self.writer.send(data);
        #[cfg(debug_assertions)]
        self.publishing.store(false, Ordering::Release);
    }

    #[inline]
    pub fn publish_kline(&self, kline: Kline) {
        self.publish(MarketData::Kline(kline));
    }

    #[inline]
    pub fn publish_trade(&self, trade: Trade) {
        self.publish(MarketData::Trade(trade));
    }

    #[inline]
    pub fn publish_book_l1(&self, book: BookL1) {
        self.publish(MarketData::BookL1(book));
    }

    /// Registers `callback` for records whose tag equals `filter` and
    /// starts its consumer thread.
    ///
    /// The subscription's horizon is fixed before this call returns:
    /// every record published after `subscribe` is observed (or counted
    /// as lapped), and nothing published before it is ever delivered.
    /// The consumer thread is running by the time the id is handed back.
    pub fn subscribe(
        &self,
        filter: DataType,
        callback: impl FnMut(DataType, &MarketData) + Send + 'static,
    ) -> SubscriberId {
        let mut subscribers = self.subscribers.lock();

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let running = Arc::new(AtomicBool::new(true));
        let reader = self.ring.reader();

        let thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(format!("md-sub-{id}"))
                .spawn(move || consumer_loop(reader, filter, callback, running))
                .expect("failed to spawn consumer thread")
        };

        subscribers.insert(
            id,
            Subscriber {
                filter,
                running,
                thread: Some(thread),
            },
        );
        info!(%id, ?filter, "subscriber attached");
        id
    }

    /// Stops the subscription and joins its consumer thread.
    ///
    /// Blocks until the consumer has exited; after this returns the
    /// callback will never be invoked again. Unknown ids are an
    /// idempotent no-op, so double-unsubscribing is harmless.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.lock();
        let Some(mut subscriber) = subscribers.remove(&id) else {
            debug!(%id, "unsubscribe for unknown id ignored");
            return;
        };
        subscriber.running.store(false, Ordering::SeqCst);
        join_consumer(id, &mut subscriber);
        info!(%id, filter = ?subscriber.filter, "subscriber detached");
    }

    /// Stops every subscription and joins all consumer threads.
    ///
    /// All running flags are cleared before the first join, so the
    /// consumers wind down in parallel. Safe to call on a hub that never
    /// published; called automatically on drop.
    pub fn stop_all(&self) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        for subscriber in subscribers.values() {
            subscriber.running.store(false, Ordering::SeqCst);
        }
        let stopped = subscribers.len();
        for (id, mut subscriber) in subscribers.drain() {
            join_consumer(id, &mut subscriber);
        }
        info!(stopped, "all subscribers stopped");
    }

    /// Number of live subscriptions. Observational only.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<const N: usize> Default for MarketDataHub<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Drop for MarketDataHub<N> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn join_consumer(id: SubscriberId, subscriber: &mut Subscriber) {
    if let Some(thread) = subscriber.thread.take() {
        if thread.join().is_err() {
            error!(%id, "consumer thread terminated abnormally");
        }
    }
}

fn consumer_loop<const N: usize>(
    mut reader: Reader<MarketData, N>,
    filter: DataType,
    mut callback: impl FnMut(DataType, &MarketData),
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        let Some(data) = reader.read() else {
            thread::sleep(IDLE_SLEEP);
            continue;
        };
        let tag = data.data_type();
        if tag != filter {
            continue;
        }
        // `data` is this thread's own copy; the reference handed to the
        // callback dies with the call.
        if catch_unwind(AssertUnwindSafe(|| callback(tag, &data))).is_err() {
            error!(?tag, "subscriber callback panicked; record dropped");
        }
    }
}
