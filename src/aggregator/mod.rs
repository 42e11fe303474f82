//! Owns the per-symbol candle builders and the single consumer loop that
//! drains the tick queue (spec.md §4.3). The builders map is protected by a
//! plain mutex held only across lookups/inserts, never across I/O — the
//! backfill fetch and store writes that `ensure_handler` performs always
//! happen with the lock released.

pub mod builder;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::sync::Notify;

use crate::backfill::HistoricalBackfillClient;
use crate::model::{Bar, MarketEvent, Symbol};
use crate::queue::TickQueue;
use crate::store::CandleNewsStore;
use crate::utils::errors::CoreError;

use builder::{CandleBuilder, FoldOutcome};

/// Emits aggregator output to whatever is downstream — the SSE hub in
/// production, a recording stub in tests (spec.md §9, "callback graph →
/// capability sets").
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn on_update(&self, symbol: &Symbol, candles: Vec<Bar>, is_initial: bool);
}

/// The idempotent "make this symbol live" operation (spec.md §4.3).
#[async_trait]
pub trait HandlerFactory: Send + Sync {
    async fn ensure_handler(&self, symbol: &Symbol) -> Result<(), CoreError>;
}

enum BuilderState {
    /// Backfill is in flight; waiters park on the notify until it resolves.
    Pending(Arc<Notify>),
    Ready(CandleBuilder),
}

pub struct Aggregator {
    builders: Mutex<HashMap<Symbol, BuilderState>>,
    store: Arc<CandleNewsStore>,
    backfill: Arc<HistoricalBackfillClient>,
    sink: Arc<dyn UpdateSink>,
}

impl Aggregator {
    pub fn new(
        store: Arc<CandleNewsStore>,
        backfill: Arc<HistoricalBackfillClient>,
        sink: Arc<dyn UpdateSink>,
    ) -> Self {
        Self {
            builders: Mutex::new(HashMap::new()),
            store,
            backfill,
            sink,
        }
    }

    /// The aggregator's single logical consumer loop. Only trade events
    /// fold into candles; quotes and upstream bars pass through the queue
    /// but are not aggregated (spec.md §3, §4.3).
    pub async fn run(self: Arc<Self>, queue: TickQueue) {
        loop {
            match queue.pop().await {
                MarketEvent::Trade(t) => {
                    if let Err(e) = self.ingest_trade(&t.symbol, t.price, t.size, t.event_time).await {
                        error!("aggregator: failed to ingest trade for {}: {e}", t.symbol);
                    }
                }
                MarketEvent::Quote(_) | MarketEvent::Bar(_) => {}
            }
        }
    }

    async fn ingest_trade(
        &self,
        symbol: &Symbol,
        price: f64,
        size: u64,
        event_time: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), CoreError> {
        self.ensure_handler(symbol).await?;

        let mut builders = self.builders.lock().expect("builders mutex poisoned");
        let state = builders
            .get_mut(symbol)
            .expect("ensure_handler just installed this entry");
        let Some(b) = (match state {
            BuilderState::Ready(b) => Some(b),
            BuilderState::Pending(_) => None,
        }) else {
            // ensure_handler resolved the Notify only after swapping in Ready,
            // so this should be unreachable; skip defensively rather than panic.
            warn!("aggregator: builder for {symbol} still pending after ensure_handler");
            return Ok(());
        };

        let outcome = b.process_trade(price, size, event_time);
        if matches!(outcome, FoldOutcome::RejectedLate | FoldOutcome::RejectedFuture) {
            debug!("aggregator: rejected tick for {symbol}: {outcome:?}");
            return Ok(());
        }
        let delta = b.last_two();
        // On a transition the predecessor in `delta` just finalized; on a
        // plain continuation there's nothing new to persist yet.
        let finalized_bar = matches!(outcome, FoldOutcome::Transitioned)
            .then(|| delta.first().copied())
            .flatten();
        drop(builders);

        if let Some(bar) = finalized_bar {
            if let Err(e) = self.store.upsert_candle(symbol, &bar) {
                warn!("aggregator: store write failed for {symbol}, retrying once: {e}");
                if let Err(e) = self.store.upsert_candle(symbol, &bar) {
                    error!("aggregator: store write failed for {symbol} after retry, in-memory state stays authoritative: {e}");
                }
            }
        }

        self.sink.on_update(symbol, delta, false).await;
        Ok(())
    }

    /// The current full in-memory series for `symbol`, for `/api/snapshot`
    /// (spec.md §6). Empty if the symbol has no builder yet.
    pub fn snapshot(&self, symbol: &Symbol) -> Vec<Bar> {
        let builders = self.builders.lock().expect("builders mutex poisoned");
        match builders.get(symbol) {
            Some(BuilderState::Ready(b)) => b.full_series(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl HandlerFactory for Aggregator {
    async fn ensure_handler(&self, symbol: &Symbol) -> Result<(), CoreError> {
        let notify = {
            let mut builders = self.builders.lock().expect("builders mutex poisoned");
            match builders.get(symbol) {
                Some(BuilderState::Ready(_)) => return Ok(()),
                Some(BuilderState::Pending(n)) => Some(n.clone()),
                None => {
                    builders.insert(symbol.clone(), BuilderState::Pending(Arc::new(Notify::new())));
                    None
                }
            }
        };

        if let Some(notify) = notify {
            notify.notified().await;
            return Ok(());
        }

        let bars = match self.backfill.fetch_default_window(symbol).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!("aggregator: backfill failed for {symbol}, starting empty: {e}");
                Vec::new()
            }
        };

        if !bars.is_empty() {
            if let Err(e) = self.store.bulk_upsert_candles(symbol, &bars) {
                warn!("aggregator: bulk upsert failed for {symbol}, retrying once: {e}");
                if let Err(e) = self.store.bulk_upsert_candles(symbol, &bars) {
                    error!("aggregator: bulk upsert failed for {symbol} after retry, in-memory state stays authoritative: {e}");
                }
            }
        }

        let mut builder = CandleBuilder::new();
        builder.load_historical(bars);
        let full_series = builder.full_series();

        let notify = {
            let mut builders = self.builders.lock().expect("builders mutex poisoned");
            let notify = match builders.get(symbol) {
                Some(BuilderState::Pending(n)) => n.clone(),
                _ => Arc::new(Notify::new()),
            };
            builders.insert(symbol.clone(), BuilderState::Ready(builder));
            notify
        };
        notify.notify_waiters();

        self.sink.on_update(symbol, full_series, true).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingSink {
        events: AsyncMutex<Vec<(Symbol, bool, usize)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                events: AsyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl UpdateSink for RecordingSink {
        async fn on_update(&self, symbol: &Symbol, candles: Vec<Bar>, is_initial: bool) {
            self.events
                .lock()
                .await
                .push((symbol.clone(), is_initial, candles.len()));
        }
    }

    fn settings_for_test() -> crate::config::settings::Settings {
        crate::config::settings::Settings {
            http_listen_addr: ":0".into(),
            upstream_ws_url: "wss://example.invalid".into(),
            upstream_ws_key: "k".into(),
            upstream_ws_secret: "s".into(),
            upstream_rest_url: "https://example.invalid".into(),
            backfill_lookback_minutes: 1440,
            tick_queue_capacity: 500,
            sse_queue_capacity: 10,
            max_concurrent_symbols: 500,
            reconnect_min_ms: 1000,
            reconnect_max_ms: 30000,
            store_path: ":memory:".into(),
            database_url: "postgres://unused".into(),
            auth_jwks_url: "https://example.invalid/jwks".into(),
            auth_hs256_secret: Some("dev".into()),
        }
    }

    #[tokio::test]
    async fn ensure_handler_is_idempotent_across_concurrent_callers() {
        let store = Arc::new(CandleNewsStore::open_in_memory().unwrap());
        let backfill = Arc::new(HistoricalBackfillClient::new(&settings_for_test()));
        let sink = Arc::new(RecordingSink::new());
        let agg = Arc::new(Aggregator::new(store, backfill, sink.clone()));

        let symbol = Symbol::new("AAPL").unwrap();
        // fetch_default_window will error (unreachable host); ensure_handler
        // must still resolve with an empty series rather than propagate.
        let a = agg.clone();
        let sa = symbol.clone();
        let b = agg.clone();
        let sb = symbol.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { a.ensure_handler(&sa).await }),
            tokio::spawn(async move { b.ensure_handler(&sb).await }),
        );
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();

        let events = sink.events.lock().await;
        let initial_count = events.iter().filter(|(s, init, _)| s == &symbol && *init).count();
        assert_eq!(initial_count, 1);
    }

    #[tokio::test]
    async fn ingest_trade_emits_delta_after_ensure_handler() {
        let store = Arc::new(CandleNewsStore::open_in_memory().unwrap());
        let backfill = Arc::new(HistoricalBackfillClient::new(&settings_for_test()));
        let sink = Arc::new(RecordingSink::new());
        let agg = Aggregator::new(store, backfill, sink.clone());

        let symbol = Symbol::new("MSFT").unwrap();
        agg.ingest_trade(&symbol, 100.0, 10, Utc::now()).await.unwrap();

        let events = sink.events.lock().await;
        assert!(events.iter().any(|(s, init, _)| s == &symbol && *init));
        assert!(events.iter().any(|(s, init, _)| s == &symbol && !*init));
    }
}
