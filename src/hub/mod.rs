//! SSE fan-out hub (spec.md §4.8): copies aggregator updates to every
//! per-connection queue registered for a symbol, applying the
//! initial-snapshot/delta/slow-consumer policy at enqueue time rather than
//! leaving it to the sender loop.

pub mod news;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::aggregator::UpdateSink;
use crate::model::{Bar, Symbol};

const DEFAULT_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct OhlcvFrame {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl From<&Bar> for OhlcvFrame {
    fn from(b: &Bar) -> Self {
        Self {
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            volume: b.volume,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandleFrame {
    pub symbol: String,
    pub candles: BTreeMap<String, OhlcvFrame>,
    pub is_initial: bool,
    pub update_timestamp: chrono::DateTime<Utc>,
}

impl CandleFrame {
    fn new(symbol: &Symbol, bars: &[Bar], is_initial: bool) -> Self {
        let candles = bars
            .iter()
            .map(|b| (b.bucket_start.to_rfc3339(), OhlcvFrame::from(b)))
            .collect();
        Self {
            symbol: symbol.as_str().to_owned(),
            candles,
            is_initial,
            update_timestamp: Utc::now(),
        }
    }

    pub fn to_sse_event(&self) -> String {
        let body = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {body}\n\n")
    }
}

struct ClientQueueInner {
    buf: VecDeque<CandleFrame>,
    initialized: bool,
    capacity: usize,
}

/// Per-connection bounded queue implementing the policy from spec.md §4.8:
/// an `is_initial` snapshot always replaces whatever is pending; deltas
/// arriving before the snapshot are dropped; once full, the oldest delta is
/// evicted to make room for the newest.
pub struct ClientQueue {
    inner: Mutex<ClientQueueInner>,
    notify: Notify,
}

impl ClientQueue {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ClientQueueInner {
                buf: VecDeque::with_capacity(capacity),
                initialized: false,
                capacity,
            }),
            notify: Notify::new(),
        })
    }

    async fn push(&self, frame: CandleFrame) {
        let mut inner = self.inner.lock().await;
        if frame.is_initial {
            inner.buf.clear();
            inner.buf.push_back(frame);
            inner.initialized = true;
        } else if !inner.initialized {
            return;
        } else {
            if inner.buf.len() >= inner.capacity {
                inner.buf.pop_front();
            }
            inner.buf.push_back(frame);
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Waits for and returns the next frame, for the sender loop.
    pub async fn recv(&self) -> CandleFrame {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(frame) = inner.buf.pop_front() {
                    return frame;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Per-(symbol, connection) registry plus the `on_update` fan-out.
pub struct Hub {
    routes: DashMap<Symbol, DashMap<Uuid, Arc<ClientQueue>>>,
    queue_capacity: usize,
}

impl Hub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            routes: DashMap::new(),
            queue_capacity: if queue_capacity == 0 {
                DEFAULT_QUEUE_CAPACITY
            } else {
                queue_capacity
            },
        }
    }

    /// Register a new SSE connection for `symbol`, returning its queue and
    /// a token used to unregister on disconnect.
    pub fn register(&self, symbol: &Symbol) -> (Uuid, Arc<ClientQueue>) {
        let conn_id = Uuid::new_v4();
        let queue = ClientQueue::new(self.queue_capacity);
        self.routes
            .entry(symbol.clone())
            .or_default()
            .insert(conn_id, queue.clone());
        (conn_id, queue)
    }

    pub fn unregister(&self, symbol: &Symbol, conn_id: Uuid) {
        if let Some(conns) = self.routes.get(symbol) {
            conns.remove(&conn_id);
        }
    }

    /// Push an `is_initial=true` snapshot to exactly one newly registered
    /// connection. `on_update`'s own initial emission only reaches whichever
    /// connections happen to be registered at the time `ensure_handler`
    /// resolves, which is never true for a connection registering against
    /// an already-active symbol — every new connection needs its own
    /// snapshot delivered this way regardless of what other connections
    /// have already seen.
    pub async fn send_initial(&self, symbol: &Symbol, conn_id: Uuid, candles: Vec<Bar>) {
        if let Some(conns) = self.routes.get(symbol) {
            if let Some(queue) = conns.get(&conn_id) {
                queue.push(CandleFrame::new(symbol, &candles, true)).await;
            }
        }
    }
}

#[async_trait]
impl UpdateSink for Hub {
    async fn on_update(&self, symbol: &Symbol, candles: Vec<Bar>, is_initial: bool) {
        let Some(conns) = self.routes.get(symbol) else {
            return;
        };
        let frame = CandleFrame::new(symbol, &candles, is_initial);
        for entry in conns.iter() {
            entry.value().push(frame.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sym() -> Symbol {
        Symbol::new("AAPL").unwrap()
    }

    fn bar(minute: i64) -> Bar {
        Bar {
            bucket_start: Utc.timestamp_opt(minute * 60, 0).single().unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1,
            trade_count: None,
            vwap: None,
        }
    }

    #[tokio::test]
    async fn delta_before_initial_is_dropped() {
        let q = ClientQueue::new(10);
        q.push(CandleFrame::new(&sym(), &[bar(1)], false)).await;
        q.push(CandleFrame::new(&sym(), &[bar(1)], true)).await;

        let frame = q.recv().await;
        assert!(frame.is_initial);
    }

    #[tokio::test]
    async fn initial_replaces_pending_delta() {
        let q = ClientQueue::new(10);
        q.push(CandleFrame::new(&sym(), &[bar(1)], true)).await;
        q.push(CandleFrame::new(&sym(), &[bar(2)], true)).await;

        let frame = q.recv().await;
        assert_eq!(frame.candles.len(), 1);
        let (_, ohlcv) = frame.candles.iter().next().unwrap();
        assert_eq!(ohlcv.open, 1.0);
    }

    #[tokio::test]
    async fn full_queue_evicts_oldest_delta_not_newest() {
        let q = ClientQueue::new(2);
        q.push(CandleFrame::new(&sym(), &[bar(0)], true)).await;
        q.push(CandleFrame::new(&sym(), &[bar(1)], false)).await;
        q.push(CandleFrame::new(&sym(), &[bar(2)], false)).await;
        q.push(CandleFrame::new(&sym(), &[bar(3)], false)).await;

        // capacity 2: initial snapshot then room for exactly one delta after
        // the oldest delta is evicted.
        let first = q.recv().await;
        assert!(first.is_initial);
        let second = q.recv().await;
        assert_eq!(
            second.candles.keys().next().cloned(),
            Some(bar(3).bucket_start.to_rfc3339())
        );
    }

    #[tokio::test]
    async fn hub_fanout_delivers_to_all_registered_connections() {
        let hub = Hub::new(10);
        let symbol = sym();
        let (_, q1) = hub.register(&symbol);
        let (_, q2) = hub.register(&symbol);

        hub.on_update(&symbol, vec![bar(0)], true).await;

        assert!(q1.recv().await.is_initial);
        assert!(q2.recv().await.is_initial);
    }

    #[tokio::test]
    async fn unregister_stops_future_delivery() {
        let hub = Hub::new(10);
        let symbol = sym();
        let (conn_id, _q) = hub.register(&symbol);
        hub.unregister(&symbol, conn_id);

        // No registered connections left; on_update must not panic and
        // must not deliver anywhere.
        hub.on_update(&symbol, vec![bar(0)], true).await;
    }
}
