//! Async request/result correlation
//!
//! A caller registers interest in a key (usually a command name) and waits;
//! an independent delivery path (an MQTT subscription, the scheduler's
//! ad-hoc path) hands results in by key. Every request pending under the key
//! receives the delivery; a request that already has a result keeps its
//! first one. Deliveries nobody waits for are dropped and counted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CorrelationError;

/// Lower bound for the poll interval of `await_result`
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Number of pending requests that took the payload
    Delivered(usize),
    /// No request was waiting under the key
    Dropped,
}

/// One caller's outstanding ask
#[derive(Debug)]
pub struct PendingRequest<T> {
    id: u64,
    result: Mutex<Option<T>>,
    notify: Notify,
}

impl<T: Clone> PendingRequest<T> {
    fn new(id: u64) -> Self {
        Self {
            id,
            result: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Store `payload` unless a result is already present
    fn fulfil(&self, payload: T) -> bool {
        let mut slot = self.result.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(payload);
        drop(slot);
        self.notify.notify_one();
        true
    }

    fn result(&self) -> Option<T> {
        self.result.lock().clone()
    }

    pub fn is_done(&self) -> bool {
        self.result.lock().is_some()
    }
}

struct Inner<T> {
    pending: DashMap<String, Vec<Arc<PendingRequest<T>>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

/// Registry of pending requests, shared by cloning
pub struct Correlator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Correlator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Correlator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("keys", &self.inner.pending.len())
            .field("dropped", &self.inner.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Clone> Default for Correlator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Correlator<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a pending request under `key`
    ///
    /// The request stays registered until the handle is dropped, so register
    /// before sending anything that could produce the result.
    pub fn register(&self, key: impl Into<String>) -> RequestHandle<T> {
        let key = key.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Arc::new(PendingRequest::new(id));
        self.inner
            .pending
            .entry(key.clone())
            .or_default()
            .push(Arc::clone(&request));
        debug!("Registered request {} for {}", id, key);

        RequestHandle {
            key,
            request,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Wait until `handle` has a result, `timeout` elapses or `cancel` fires
    ///
    /// Wakes on delivery and additionally re-checks every `poll_interval`.
    pub async fn await_result(
        &self,
        handle: &RequestHandle<T>,
        poll_interval: Duration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<T, CorrelationError> {
        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Some(result) = handle.request.result() {
                return Ok(result);
            }

            tokio::select! {
                _ = handle.request.notify.notified() => {},
                _ = ticker.tick() => {},
                _ = tokio::time::sleep_until(deadline) => {
                    return handle.request.result().ok_or_else(|| CorrelationError::TimedOut {
                        key: handle.key.clone(),
                        after: timeout,
                    });
                },
                _ = cancel.cancelled() => {
                    return Err(CorrelationError::Cancelled {
                        key: handle.key.clone(),
                    });
                },
            }
        }
    }

    /// Hand `payload` to every request pending under `key`
    pub fn deliver(&self, key: &str, payload: T) -> DeliveryOutcome {
        // Snapshot so no shard lock is held while waking waiters
        let requests: Vec<Arc<PendingRequest<T>>> = self
            .inner
            .pending
            .get(key)
            .map(|list| list.value().clone())
            .unwrap_or_default();

        let delivered = requests
            .iter()
            .filter(|request| request.fulfil(payload.clone()))
            .count();

        if delivered == 0 {
            let total = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            info!(
                "Dropped delivery for {}: no pending request ({} dropped so far)",
                key, total
            );
            DeliveryOutcome::Dropped
        } else {
            debug!("Delivered {} to {} pending request(s)", key, delivered);
            DeliveryOutcome::Delivered(delivered)
        }
    }

    /// Total number of registered, not yet dropped handles
    pub fn pending_count(&self) -> usize {
        self.inner
            .pending
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Caller side of a pending request; dropping it unregisters the request
pub struct RequestHandle<T> {
    key: String,
    request: Arc<PendingRequest<T>>,
    inner: Arc<Inner<T>>,
}

impl<T> RequestHandle<T> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T: Clone> RequestHandle<T> {
    pub fn is_done(&self) -> bool {
        self.request.is_done()
    }
}

impl<T> Drop for RequestHandle<T> {
    fn drop(&mut self) {
        let id = self.request.id;
        if let Some(mut list) = self.inner.pending.get_mut(&self.key) {
            list.retain(|request| request.id != id);
        }
        self.inner
            .pending
            .remove_if(&self.key, |_, list| list.is_empty());
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_deliver_then_await() {
        let correlator: Correlator<String> = Correlator::new();
        let handle = correlator.register("QMOD");
        assert_eq!(correlator.pending_count(), 1);

        let outcome = correlator.deliver("QMOD", "B".to_string());
        assert_eq!(outcome, DeliveryOutcome::Delivered(1));
        assert!(handle.is_done());

        let result = correlator
            .await_result(
                &handle,
                Duration::from_millis(10),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result, "B");
    }

    #[test]
    fn test_first_result_is_kept() {
        let correlator: Correlator<u32> = Correlator::new();
        let handle = correlator.register("SOC");
        assert_eq!(correlator.deliver("SOC", 1), DeliveryOutcome::Delivered(1));
        // Already satisfied, so nothing takes the second payload
        assert_eq!(correlator.deliver("SOC", 2), DeliveryOutcome::Dropped);
        assert_eq!(handle.request.result(), Some(1));
        assert_eq!(correlator.dropped_count(), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let correlator: Correlator<u32> = Correlator::new();
        let first = correlator.register("QPIGS");
        let second = correlator.register("QPIGS");
        assert_eq!(correlator.pending_count(), 2);

        drop(first);
        assert_eq!(correlator.pending_count(), 1);
        drop(second);
        assert_eq!(correlator.pending_count(), 0);
        assert!(correlator.inner.pending.get("QPIGS").is_none());
    }

    #[test]
    fn test_keys_are_independent() {
        let correlator: Correlator<u32> = Correlator::new();
        let handle = correlator.register("QPIGS");
        assert_eq!(correlator.deliver("QPIRI", 7), DeliveryOutcome::Dropped);
        assert!(!handle.is_done());
        assert_eq!(handle.key(), "QPIGS");
    }

    #[test]
    #[traced_test]
    fn test_dropped_delivery_is_logged() {
        let correlator: Correlator<u32> = Correlator::new();
        correlator.deliver("QMOD", 1);
        correlator.deliver("QMOD", 2);
        assert_eq!(correlator.dropped_count(), 2);
        assert!(logs_contain("Dropped delivery for QMOD: no pending request (2 dropped so far)"));
    }
}
