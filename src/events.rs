//! Correction event bus
//!
//! Single-topic, in-process pub/sub for winner corrections. Dispatch is
//! synchronous and in subscription order. A panicking subscriber is
//! isolated: the panic is caught, reported to the error sink, and the
//! remaining subscribers still receive the event. No buffering and no
//! backpressure; handlers must be quick or schedule their own work.

use crate::models::CorrectionEvent;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

pub type CorrectionHandler = Arc<dyn Fn(&CorrectionEvent) + Send + Sync>;

/// Side channel for subscriber failures. Receives the event that was being
/// dispatched and a description of the panic.
pub type ErrorSink = Arc<dyn Fn(&CorrectionEvent, &str) + Send + Sync>;

struct Subscriber {
    id: u64,
    handler: CorrectionHandler,
}

struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    error_sink: Mutex<ErrorSink>,
    next_id: AtomicU64,
}

/// Detach capability returned by [`CorrectionBus::subscribe`]. Dropping the
/// handle without calling [`Subscription::unsubscribe`] leaves the
/// subscription live.
pub struct Subscription {
    inner: Weak<BusInner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribers.lock().retain(|s| s.id != self.id);
        }
    }
}

pub struct CorrectionBus {
    inner: Arc<BusInner>,
}

impl Default for CorrectionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrectionBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                error_sink: Mutex::new(default_error_sink()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Replace the subscriber-failure side channel.
    pub fn set_error_sink(&self, sink: ErrorSink) {
        *self.inner.error_sink.lock() = sink;
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&CorrectionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Dispatch an event to every subscriber in subscription order.
    ///
    /// The subscriber list is snapshotted before dispatch so handlers may
    /// subscribe or unsubscribe while a publish is in flight.
    pub fn publish(&self, event: &CorrectionEvent) {
        let snapshot: Vec<CorrectionHandler> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let detail = panic_message(payload.as_ref());
                warn!(
                    symbol = %event.symbol,
                    timestamp = event.timestamp,
                    detail = %detail,
                    "correction subscriber panicked"
                );
                let sink = {
                    let guard = self.inner.error_sink.lock();
                    Arc::clone(&*guard)
                };
                sink(event, &detail);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn clear_all(&self) {
        self.inner.subscribers.lock().clear();
    }
}

fn default_error_sink() -> ErrorSink {
    Arc::new(|event, detail| {
        let rendered =
            serde_json::to_string(event).unwrap_or_else(|_| format!("{event:?}"));
        eprintln!("correction subscriber failed: {detail}; event={rendered}");
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
