//! Embedded candle & news store (spec.md §4.7). Backed by a single SQLite
//! file via `rusqlite`; every query runs on the blocking pool since SQLite
//! has no async driver, mirroring how the reference candle retriever wraps
//! its `Connection` in `spawn_blocking`.

use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::model::{Bar, NewsItem, Symbol};
use crate::utils::errors::StoreError;

pub struct CandleNewsStore {
    conn: Mutex<Connection>,
}

impl CandleNewsStore {
    /// Open (or create) the store at `path` and run schema migration.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS candles (
                symbol       TEXT    NOT NULL,
                bucket_start INTEGER NOT NULL,
                open         REAL    NOT NULL,
                high         REAL    NOT NULL,
                low          REAL    NOT NULL,
                close        REAL    NOT NULL,
                volume       INTEGER NOT NULL,
                trade_count  INTEGER,
                vwap         REAL,
                PRIMARY KEY (symbol, bucket_start)
            );
            CREATE TABLE IF NOT EXISTS news (
                id             TEXT    PRIMARY KEY,
                published_at   INTEGER NOT NULL,
                headline       TEXT    NOT NULL,
                summary        TEXT,
                source         TEXT    NOT NULL,
                url            TEXT,
                symbols        TEXT    NOT NULL,
                sentiment_score REAL,
                sentiment_label TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_news_published_at ON news(published_at);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    /// Checkpoint the WAL (a no-op outside WAL mode) so every write this
    /// process has committed is durable on disk before exit (spec.md §5).
    /// Every write here already runs as its own committed statement or
    /// transaction, so there is no separate buffer to flush — this is the
    /// honest equivalent for a SQLite-backed store.
    pub fn flush(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Idempotent last-write-wins upsert of one bar (spec.md §4.7).
    pub fn upsert_candle(&self, symbol: &Symbol, bar: &Bar) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        upsert_one(&conn, symbol, bar)
    }

    /// Upsert a batch of bars inside a single transaction — used after a
    /// backfill fetch completes (spec.md §4.3 step 2).
    pub fn bulk_upsert_candles(&self, symbol: &Symbol, bars: &[Bar]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        for bar in bars {
            upsert_one(&tx, symbol, bar)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Read bars for `symbol` in `[from, to]`, oldest first.
    pub fn read_range(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT bucket_start, open, high, low, close, volume, trade_count, vwap
             FROM candles
             WHERE symbol = ?1 AND bucket_start >= ?2 AND bucket_start <= ?3
             ORDER BY bucket_start ASC",
        )?;
        let rows = stmt.query_map(
            params![symbol.as_str(), from.timestamp(), to.timestamp()],
            row_to_bar,
        )?;
        let mut bars = Vec::new();
        for row in rows {
            bars.push(row?);
        }
        Ok(bars)
    }

    /// Insert a news item, idempotent on `id` (`INSERT OR IGNORE`).
    pub fn insert_news(&self, item: &NewsItem) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let symbols_csv = item
            .symbols
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        conn.execute(
            "INSERT OR IGNORE INTO news (
                id, published_at, headline, summary, source, url, symbols,
                sentiment_score, sentiment_label
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.id.to_string(),
                item.published_at.timestamp(),
                item.headline,
                item.summary,
                item.source,
                item.url,
                symbols_csv,
                item.sentiment_score,
                item.sentiment_label,
            ],
        )?;
        Ok(())
    }

    /// Fill in the sentiment fields for a news item that was inserted
    /// without one. Safe to call more than once with the same values.
    pub fn update_news_sentiment(
        &self,
        id: Uuid,
        score: f64,
        label: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE news SET sentiment_score = ?1, sentiment_label = ?2 WHERE id = ?3",
            params![score, label, id.to_string()],
        )?;
        Ok(())
    }

    pub fn news_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<NewsItem>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, published_at, headline, summary, source, url, symbols,
                    sentiment_score, sentiment_label
             FROM news
             WHERE published_at >= ?1
             ORDER BY published_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since.timestamp(), limit as i64], row_to_news)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    #[allow(dead_code)]
    pub fn news_by_id(&self, id: Uuid) -> Result<Option<NewsItem>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT id, published_at, headline, summary, source, url, symbols,
                    sentiment_score, sentiment_label
             FROM news WHERE id = ?1",
            params![id.to_string()],
            row_to_news,
        )
        .optional()
        .map_err(StoreError::from)
    }
}

fn upsert_one(conn: &Connection, symbol: &Symbol, bar: &Bar) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO candles (
            symbol, bucket_start, open, high, low, close, volume, trade_count, vwap
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(symbol, bucket_start) DO UPDATE SET
            open = excluded.open,
            high = excluded.high,
            low = excluded.low,
            close = excluded.close,
            volume = excluded.volume,
            trade_count = excluded.trade_count,
            vwap = excluded.vwap",
        params![
            symbol.as_str(),
            bar.bucket_start.timestamp(),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume as i64,
            bar.trade_count.map(|c| c as i64),
            bar.vwap,
        ],
    )?;
    Ok(())
}

fn row_to_bar(row: &rusqlite::Row) -> rusqlite::Result<Bar> {
    let bucket_secs: i64 = row.get(0)?;
    let volume: i64 = row.get(5)?;
    let trade_count: Option<i64> = row.get(6)?;
    Ok(Bar {
        bucket_start: Utc.timestamp_opt(bucket_secs, 0).single().unwrap(),
        open: row.get(1)?,
        high: row.get(2)?,
        low: row.get(3)?,
        close: row.get(4)?,
        volume: volume as u64,
        trade_count: trade_count.map(|c| c as u64),
        vwap: row.get(7)?,
    })
}

fn row_to_news(row: &rusqlite::Row) -> rusqlite::Result<NewsItem> {
    let id_str: String = row.get(0)?;
    let published_secs: i64 = row.get(1)?;
    let symbols_csv: String = row.get(6)?;
    let symbols = symbols_csv
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| Symbol::new(s).ok())
        .collect();
    Ok(NewsItem {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        symbols,
        headline: row.get(2)?,
        summary: row.get(3)?,
        source: row.get(4)?,
        url: row.get(5)?,
        published_at: Utc.timestamp_opt(published_secs, 0).single().unwrap(),
        sentiment_score: row.get(7)?,
        sentiment_label: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn bar(minute: i64) -> Bar {
        Bar {
            bucket_start: Utc.timestamp_opt(minute * 60, 0).single().unwrap(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10,
            trade_count: Some(3),
            vwap: None,
        }
    }

    #[test]
    fn upsert_then_read_range_roundtrips() {
        let store = CandleNewsStore::open_in_memory().unwrap();
        let s = sym("AAPL");
        store.upsert_candle(&s, &bar(100)).unwrap();
        store.upsert_candle(&s, &bar(101)).unwrap();

        let from = Utc.timestamp_opt(0, 0).single().unwrap();
        let to = Utc::now() + Duration::days(1);
        let bars = store.read_range(&s, from, to).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].bucket_start, bar(100).bucket_start);
    }

    #[test]
    fn upsert_is_idempotent_last_write_wins() {
        let store = CandleNewsStore::open_in_memory().unwrap();
        let s = sym("MSFT");
        store.upsert_candle(&s, &bar(5)).unwrap();
        let mut updated = bar(5);
        updated.close = 999.0;
        store.upsert_candle(&s, &updated).unwrap();

        let from = Utc.timestamp_opt(0, 0).single().unwrap();
        let to = Utc::now() + Duration::days(1);
        let bars = store.read_range(&s, from, to).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 999.0);
    }

    #[test]
    fn bulk_upsert_is_transactional() {
        let store = CandleNewsStore::open_in_memory().unwrap();
        let s = sym("TSLA");
        let bars: Vec<Bar> = (0..5).map(bar).collect();
        store.bulk_upsert_candles(&s, &bars).unwrap();

        let from = Utc.timestamp_opt(0, 0).single().unwrap();
        let to = Utc::now() + Duration::days(1);
        assert_eq!(store.read_range(&s, from, to).unwrap().len(), 5);
    }

    #[test]
    fn news_insert_is_idempotent_on_id() {
        let store = CandleNewsStore::open_in_memory().unwrap();
        let item = NewsItem {
            id: Uuid::new_v4(),
            symbols: vec![sym("AAPL")],
            headline: "headline".into(),
            summary: None,
            source: "wire".into(),
            url: None,
            published_at: Utc::now(),
            sentiment_score: None,
            sentiment_label: None,
        };
        store.insert_news(&item).unwrap();
        store.insert_news(&item).unwrap();

        let since = Utc::now() - Duration::days(1);
        let items = store.news_since(since, 10).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn sentiment_update_is_safe_to_reapply() {
        let store = CandleNewsStore::open_in_memory().unwrap();
        let item = NewsItem {
            id: Uuid::new_v4(),
            symbols: vec![sym("AAPL")],
            headline: "headline".into(),
            summary: None,
            source: "wire".into(),
            url: None,
            published_at: Utc::now(),
            sentiment_score: None,
            sentiment_label: None,
        };
        store.insert_news(&item).unwrap();
        store.update_news_sentiment(item.id, 0.8, "positive").unwrap();
        store.update_news_sentiment(item.id, 0.8, "positive").unwrap();

        let fetched = store.news_by_id(item.id).unwrap().unwrap();
        assert_eq!(fetched.sentiment_score, Some(0.8));
        assert_eq!(fetched.sentiment_label.as_deref(), Some("positive"));
    }
}
