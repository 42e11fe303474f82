//! Per-symbol candle builder (spec.md §4.4). Owns an ordered map of
//! finalized buckets plus a distinguished current bucket; only the current
//! bucket is mutable.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::model::{floor_to_minute, Bar};

/// Result of folding one trade into the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// The trade extended the current bucket (or started the first one).
    Continued,
    /// The trade opened a new bucket; the previous one is now finalized and
    /// should be persisted by the caller (spec.md §4.3 step 3).
    Transitioned,
    /// The trade landed before `current` and was rejected (spec.md §4.4).
    RejectedLate,
    /// The trade's timestamp is more than 1 minute in the future relative
    /// to wall clock (clock-skew guard).
    RejectedFuture,
}

pub struct CandleBuilder {
    ohlcv: BTreeMap<DateTime<Utc>, Bar>,
    current: Option<DateTime<Utc>>,
    pub late_ticks: u64,
    pub future_ticks: u64,
}

impl CandleBuilder {
    pub fn new() -> Self {
        Self {
            ohlcv: BTreeMap::new(),
            current: None,
            late_ticks: 0,
            future_ticks: 0,
        }
    }

    pub fn current_bucket(&self) -> Option<DateTime<Utc>> {
        self.current
    }

    pub fn get(&self, bucket_start: DateTime<Utc>) -> Option<&Bar> {
        self.ohlcv.get(&bucket_start)
    }

    /// The full in-memory series, oldest first — the `is_initial=true`
    /// payload (spec.md §4.3).
    pub fn full_series(&self) -> Vec<Bar> {
        self.ohlcv.values().copied().collect()
    }

    /// The current bucket and its immediate predecessor — the
    /// `is_initial=false` delta payload (spec.md §4.3).
    pub fn last_two(&self) -> Vec<Bar> {
        self.ohlcv.values().rev().take(2).rev().copied().collect()
    }

    /// Fold one trade into the series (spec.md §4.4).
    pub fn process_trade(&mut self, price: f64, size: u64, event_time: DateTime<Utc>) -> FoldOutcome {
        if event_time > Utc::now() + Duration::minutes(1) {
            self.future_ticks += 1;
            return FoldOutcome::RejectedFuture;
        }

        let bucket = floor_to_minute(event_time);

        match self.current {
            None => {
                self.current = Some(bucket);
                self.ohlcv.insert(bucket, Bar::opening(bucket, price, size));
                FoldOutcome::Continued
            }
            Some(current) if bucket > current => {
                // The previous bucket is now immutable; entry already
                // reflects its final state, nothing more to write.
                self.current = Some(bucket);
                self.ohlcv.insert(bucket, Bar::opening(bucket, price, size));
                FoldOutcome::Transitioned
            }
            Some(current) if bucket == current => {
                self.ohlcv
                    .get_mut(&current)
                    .expect("current bucket always has an entry")
                    .fold(price, size);
                FoldOutcome::Continued
            }
            Some(_) => {
                self.late_ticks += 1;
                FoldOutcome::RejectedLate
            }
        }
    }

    /// Merge backfilled history in (spec.md §4.4): a bucket the builder has
    /// never seen is inserted as-is; a bucket the builder already has —
    /// finalized or current — is left untouched. Local data always wins.
    pub fn load_historical(&mut self, bars: impl IntoIterator<Item = Bar>) {
        for bar in bars {
            self.ohlcv.entry(bar.bucket_start).or_insert(bar);
        }
    }
}

impl Default for CandleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        let now = Utc::now();
        Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), h, m, s)
            .single()
            .unwrap()
    }

    use chrono::Datelike;

    #[test]
    fn scenario_a_first_subscription_empty_history() {
        let mut b = CandleBuilder::new();
        assert_eq!(b.process_trade(150.00, 10, at(14, 30, 15)), FoldOutcome::Continued);
        assert_eq!(b.process_trade(150.50, 5, at(14, 30, 45)), FoldOutcome::Continued);
        assert_eq!(b.process_trade(149.90, 8, at(14, 31, 2)), FoldOutcome::Transitioned);

        let first = b.get(floor_to_minute(at(14, 30, 0))).unwrap();
        assert_eq!(first.open, 150.00);
        assert_eq!(first.high, 150.50);
        assert_eq!(first.low, 150.00);
        assert_eq!(first.close, 150.50);
        assert_eq!(first.volume, 15);

        let second = b.get(floor_to_minute(at(14, 31, 0))).unwrap();
        assert_eq!(second.open, 149.90);
        assert_eq!(second.volume, 8);
    }

    #[test]
    fn late_tick_does_not_mutate_past_bucket() {
        let mut b = CandleBuilder::new();
        b.process_trade(100.0, 1, at(10, 0, 0));
        b.process_trade(101.0, 1, at(10, 1, 0));
        let before = *b.get(floor_to_minute(at(10, 0, 0))).unwrap();

        let outcome = b.process_trade(999.0, 1, at(10, 0, 30));
        assert_eq!(outcome, FoldOutcome::RejectedLate);
        assert_eq!(b.late_ticks, 1);
        let after = *b.get(floor_to_minute(at(10, 0, 0))).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn future_tick_beyond_skew_guard_is_rejected() {
        let mut b = CandleBuilder::new();
        let far_future = Utc::now() + Duration::hours(1);
        let outcome = b.process_trade(1.0, 1, far_future);
        assert_eq!(outcome, FoldOutcome::RejectedFuture);
        assert_eq!(b.future_ticks, 1);
        assert!(b.current_bucket().is_none());
    }

    #[test]
    fn zero_size_trade_counts_toward_ohlc_not_volume() {
        let mut b = CandleBuilder::new();
        b.process_trade(100.0, 10, at(9, 0, 0));
        b.process_trade(105.0, 0, at(9, 0, 30));
        let bar = b.get(floor_to_minute(at(9, 0, 0))).unwrap();
        assert_eq!(bar.close, 105.0);
        assert_eq!(bar.high, 105.0);
        assert_eq!(bar.volume, 10);
    }

    #[test]
    fn scenario_c_backfill_merge_local_wins() {
        let mut b = CandleBuilder::new();
        // Seed the local (current) bucket at 14:30 directly via a trade.
        b.process_trade(150.0, 100, at(14, 30, 0));
        // Advance past it so 14:30 becomes finalized, current moves to 14:31.
        b.process_trade(150.0, 1, at(14, 31, 0));

        let local_1430 = *b.get(floor_to_minute(at(14, 30, 0))).unwrap();

        let backfilled_1430 = Bar {
            bucket_start: floor_to_minute(at(14, 30, 0)),
            open: 149.9,
            high: 151.1,
            low: 149.0,
            close: 150.4,
            volume: 130,
            trade_count: None,
            vwap: None,
        };
        let backfilled_1429 = Bar {
            bucket_start: floor_to_minute(at(14, 29, 0)),
            open: 148.0,
            high: 148.5,
            low: 147.5,
            close: 148.2,
            volume: 50,
            trade_count: None,
            vwap: None,
        };
        b.load_historical([backfilled_1430, backfilled_1429]);

        assert_eq!(*b.get(floor_to_minute(at(14, 30, 0))).unwrap(), local_1430);
        assert_eq!(
            b.get(floor_to_minute(at(14, 29, 0))).unwrap().open,
            148.0
        );
    }

    #[test]
    fn load_historical_is_noop_on_existing_bucket() {
        let mut b = CandleBuilder::new();
        b.process_trade(10.0, 1, at(1, 0, 0));
        let before = *b.get(floor_to_minute(at(1, 0, 0))).unwrap();
        let conflicting = Bar {
            bucket_start: floor_to_minute(at(1, 0, 0)),
            open: 999.0,
            high: 999.0,
            low: 999.0,
            close: 999.0,
            volume: 999,
            trade_count: None,
            vwap: None,
        };
        b.load_historical([conflicting]);
        assert_eq!(*b.get(floor_to_minute(at(1, 0, 0))).unwrap(), before);
    }

    #[test]
    fn last_two_returns_current_and_predecessor() {
        let mut b = CandleBuilder::new();
        b.process_trade(1.0, 1, at(2, 0, 0));
        b.process_trade(1.0, 1, at(2, 1, 0));
        b.process_trade(1.0, 1, at(2, 2, 0));
        let last_two = b.last_two();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].bucket_start, floor_to_minute(at(2, 1, 0)));
        assert_eq!(last_two[1].bucket_start, floor_to_minute(at(2, 2, 0)));
    }

    #[test]
    fn monotonic_trade_sequence_equals_groupby_minute_fold() {
        let mut b = CandleBuilder::new();
        let trades = [
            (100.0, 1u64, at(5, 0, 10)),
            (101.0, 2, at(5, 0, 40)),
            (99.0, 3, at(5, 1, 5)),
            (102.0, 1, at(5, 1, 50)),
            (102.0, 1, at(5, 2, 0)),
        ];
        for (p, s, t) in trades {
            b.process_trade(p, s, t);
        }
        let m0 = b.get(floor_to_minute(at(5, 0, 0))).unwrap();
        assert_eq!((m0.open, m0.high, m0.low, m0.close, m0.volume), (100.0, 101.0, 100.0, 101.0, 3));
        let m1 = b.get(floor_to_minute(at(5, 1, 0))).unwrap();
        assert_eq!((m1.open, m1.high, m1.low, m1.close, m1.volume), (99.0, 102.0, 99.0, 102.0, 4));
        let m2 = b.get(floor_to_minute(at(5, 2, 0))).unwrap();
        assert_eq!((m2.open, m2.high, m2.low, m2.close, m2.volume), (102.0, 102.0, 102.0, 102.0, 1));
    }
}
