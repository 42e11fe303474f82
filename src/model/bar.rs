use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::symbol::Symbol;

/// Truncate a timestamp down to the start of its UTC minute.
pub fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp() - ts.timestamp().rem_euclid(60);
    Utc.timestamp_opt(secs, 0).single().expect("valid minute boundary")
}

/// One minute-aligned OHLCV aggregate for a symbol.
///
/// Invariants (enforced by [`Bar::new`] and every mutator in
/// `CandleBuilder`): `low <= open, close <= high`, `low <= high`,
/// `volume >= 0`, `bucket_start` minute-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub trade_count: Option<u64>,
    pub vwap: Option<f64>,
}

impl Bar {
    /// Build the first bar in a bucket from a single trade.
    pub fn opening(bucket_start: DateTime<Utc>, price: f64, size: u64) -> Self {
        debug_assert_eq!(bucket_start, floor_to_minute(bucket_start));
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
            trade_count: Some(1),
            vwap: None,
        }
    }

    /// Fold one more trade into this bucket.
    pub fn fold(&mut self, price: f64, size: u64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
        self.trade_count = Some(self.trade_count.unwrap_or(0) + 1);
    }

    pub fn bucket_end(&self) -> DateTime<Utc> {
        self.bucket_start + Duration::minutes(1)
    }

    /// True when OHLC ordering holds — used in store/test assertions,
    /// never to reject data at ingest (the builder can't produce a
    /// violating bar by construction).
    pub fn is_valid(&self) -> bool {
        self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
            && self.low <= self.high
    }

    pub fn symbol_key(&self, symbol: &Symbol) -> (Symbol, DateTime<Utc>) {
        (symbol.clone(), self.bucket_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_aligns_to_minute_boundary() {
        let t = Utc.with_ymd_and_hms(2025, 10, 11, 14, 31, 0).unwrap();
        assert_eq!(floor_to_minute(t), t);
    }

    #[test]
    fn floor_one_ns_before_boundary_is_previous_minute() {
        let boundary = Utc.with_ymd_and_hms(2025, 10, 11, 14, 31, 0).unwrap();
        let one_ns_before = boundary - Duration::nanoseconds(1);
        let prev = Utc.with_ymd_and_hms(2025, 10, 11, 14, 30, 0).unwrap();
        assert_eq!(floor_to_minute(one_ns_before), prev);
    }

    #[test]
    fn opening_bar_is_flat_and_valid() {
        let t = floor_to_minute(Utc::now());
        let bar = Bar::opening(t, 150.0, 10);
        assert_eq!(bar.open, 150.0);
        assert_eq!(bar.high, 150.0);
        assert_eq!(bar.low, 150.0);
        assert_eq!(bar.close, 150.0);
        assert_eq!(bar.volume, 10);
        assert!(bar.is_valid());
    }

    #[test]
    fn fold_tracks_high_low_close_and_volume() {
        let t = floor_to_minute(Utc::now());
        let mut bar = Bar::opening(t, 150.0, 10);
        bar.fold(150.5, 5);
        bar.fold(149.9, 8);
        assert_eq!(bar.high, 150.5);
        assert_eq!(bar.low, 149.9);
        assert_eq!(bar.close, 149.9);
        assert_eq!(bar.volume, 23);
        assert!(bar.is_valid());
    }

    #[test]
    fn zero_size_trade_moves_close_but_not_volume() {
        let t = floor_to_minute(Utc::now());
        let mut bar = Bar::opening(t, 150.0, 10);
        bar.fold(151.0, 0);
        assert_eq!(bar.close, 151.0);
        assert_eq!(bar.high, 151.0);
        assert_eq!(bar.volume, 10);
    }
}
