use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::symbol::Symbol;

/// A single trade print from the upstream feed. Append-only; never mutated
/// after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: Symbol,
    pub price: f64,
    pub size: u64,
    pub event_time: DateTime<Utc>,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub exchange: Option<String>,
    pub tape: Option<String>,
}

/// A quote print — carried through the wire protocol but not folded into
/// candles (trades are the only aggregation input per spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub bid_price: f64,
    pub bid_size: u64,
    pub ask_price: f64,
    pub ask_size: u64,
    pub event_time: DateTime<Utc>,
}

/// An upstream-provided bar, used for the `bars` channel (distinct from a
/// locally-aggregated `Bar` — this is pass-through data we don't fold).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamBar {
    pub symbol: Symbol,
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// One item pulled off the tick queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketEvent {
    Trade(Trade),
    Quote(Quote),
    Bar(UpstreamBar),
}

impl MarketEvent {
    pub fn symbol(&self) -> &Symbol {
        match self {
            MarketEvent::Trade(t) => &t.symbol,
            MarketEvent::Quote(q) => &q.symbol,
            MarketEvent::Bar(b) => &b.symbol,
        }
    }
}
