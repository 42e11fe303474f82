//! Bounded single-producer/multi-consumer buffer between the feed client
//! and the aggregator (spec.md §4.2). Capacity ~500; on overflow the
//! producer drops the oldest entry rather than blocking or rejecting the
//! newest one, favoring freshness over completeness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::model::MarketEvent;

/// Shared counters exposed for `/health` and metrics (spec.md §4.2, §7).
#[derive(Debug, Default)]
pub struct TickQueueStats {
    pub dropped: AtomicU64,
    pub enqueued: AtomicU64,
}

struct Inner {
    buf: std::collections::VecDeque<MarketEvent>,
    capacity: usize,
}

/// A ring-buffer-backed bounded queue. Cheap to clone; all clones share the
/// same underlying buffer and stats.
#[derive(Clone)]
pub struct TickQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<tokio::sync::Notify>,
    pub stats: Arc<TickQueueStats>,
}

impl TickQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                buf: std::collections::VecDeque::with_capacity(capacity),
                capacity,
            })),
            notify: Arc::new(tokio::sync::Notify::new()),
            stats: Arc::new(TickQueueStats::default()),
        }
    }

    /// Push an event, dropping the oldest queued event if at capacity.
    pub async fn push(&self, event: MarketEvent) {
        let mut inner = self.inner.lock().await;
        if inner.buf.len() >= inner.capacity {
            inner.buf.pop_front();
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
        inner.buf.push_back(event);
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        drop(inner);
        self.notify.notify_one();
    }

    /// Pop the oldest event, waiting for one to arrive if the queue is empty.
    pub async fn pop(&self) -> MarketEvent {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(event) = inner.buf.pop_front() {
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.buf.len()
    }

    /// Drain up to `max` pending events without blocking — used during
    /// graceful shutdown's bounded grace period (spec.md §5).
    pub async fn drain(&self, max: usize) -> Vec<MarketEvent> {
        let mut inner = self.inner.lock().await;
        let n = inner.buf.len().min(max);
        inner.buf.drain(..n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Symbol, Trade};
    use chrono::Utc;

    fn trade(sym: &str) -> MarketEvent {
        MarketEvent::Trade(Trade {
            symbol: Symbol::new(sym).unwrap(),
            price: 1.0,
            size: 1,
            event_time: Utc::now(),
            conditions: vec![],
            exchange: None,
            tape: None,
        })
    }

    #[tokio::test]
    async fn pushes_and_pops_in_order() {
        let q = TickQueue::new(4);
        q.push(trade("AAPL")).await;
        q.push(trade("MSFT")).await;
        let a = q.pop().await;
        assert_eq!(a.symbol().as_str(), "AAPL");
        let b = q.pop().await;
        assert_eq!(b.symbol().as_str(), "MSFT");
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts_it() {
        let q = TickQueue::new(2);
        q.push(trade("A")).await;
        q.push(trade("B")).await;
        q.push(trade("C")).await;
        assert_eq!(q.stats.dropped.load(Ordering::Relaxed), 1);
        let first = q.pop().await;
        assert_eq!(first.symbol().as_str(), "B");
        let second = q.pop().await;
        assert_eq!(second.symbol().as_str(), "C");
    }

    #[tokio::test]
    async fn drain_bounds_by_max_and_preserves_order() {
        let q = TickQueue::new(8);
        for s in ["A", "B", "C"] {
            q.push(trade(s)).await;
        }
        let drained = q.drain(2).await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].symbol().as_str(), "A");
        assert_eq!(q.len().await, 1);
    }
}
