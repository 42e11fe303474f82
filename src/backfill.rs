//! Historical backfill client (spec.md §4.3, §4.6). Fetches the last N
//! minutes of bars from the upstream REST API when a symbol's builder is
//! first created, so a new subscriber doesn't start on an empty chart.

use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::settings::Settings;
use crate::model::{Bar, Symbol};
use crate::utils::errors::ApiError;

const MAX_ATTEMPTS: u32 = 3;

pub struct HistoricalBackfillClient {
    http: Client,
    base_url: String,
    lookback_minutes: i64,
}

/// Row-oriented shape (one object per bar). Most providers answer this way.
#[derive(Debug, Deserialize)]
struct RowBar {
    #[serde(rename = "t")]
    time: i64,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: u64,
}

/// Column-oriented shape some providers answer with instead — parallel
/// arrays rather than an array of objects.
#[derive(Debug, Deserialize, Default)]
struct ColumnBars {
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BarsResponse {
    Rows(Vec<RowBar>),
    Columns(ColumnBars),
}

impl HistoricalBackfillClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: Client::new(),
            base_url: settings.upstream_rest_url.clone(),
            lookback_minutes: settings.backfill_lookback_minutes,
        }
    }

    /// Fetch the default window for `symbol`: `end = now`,
    /// `start = end - lookback`, capped at one bar per minute of lookback.
    pub async fn fetch_default_window(&self, symbol: &Symbol) -> Result<Vec<Bar>, ApiError> {
        let end = Utc::now();
        let start = end - Duration::minutes(self.lookback_minutes);
        self.fetch_range(symbol, start, end).await
    }

    pub async fn fetch_range(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ApiError> {
        let limit = self.lookback_minutes.max(1);
        let url = format!(
            "{}/v2/bars?symbol={}&start={}&end={}&limit={}",
            self.base_url,
            symbol.as_str(),
            start.to_rfc3339(),
            end.to_rfc3339(),
            limit
        );

        let mut attempt = 0u32;
        let backoff_policy = ExponentialBackoff::default();
        let body = retry(backoff_policy, || {
            attempt += 1;
            let url = url.clone();
            let http = self.http.clone();
            async move {
                let resp = http.get(&url).send().await.map_err(|e| {
                    backoff::Error::transient(ApiError::from(e))
                })?;

                let status = resp.status();
                if status.is_server_error() {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(backoff::Error::permanent(ApiError::Other(format!(
                            "upstream 5xx after {attempt} attempts: {status}"
                        ))));
                    }
                    return Err(backoff::Error::transient(ApiError::Other(format!(
                        "upstream 5xx: {status}"
                    ))));
                }
                if status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(backoff::Error::transient(ApiError::Other(
                        "rate limited".into(),
                    )));
                }
                if !status.is_success() {
                    // 4xx other than 429 is fatal for this call; the
                    // aggregator treats a failed backfill as non-fatal and
                    // starts the builder with an empty history instead.
                    return Err(backoff::Error::permanent(ApiError::Other(format!(
                        "upstream {status}"
                    ))));
                }

                resp.text().await.map_err(|e| backoff::Error::permanent(ApiError::from(e)))
            }
        })
        .await?;

        let parsed: BarsResponse = serde_json::from_str(&body)?;
        Ok(normalize(parsed, start, end))
    }
}

fn normalize(resp: BarsResponse, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Bar> {
    let raw: Vec<(i64, f64, f64, f64, f64, u64)> = match resp {
        BarsResponse::Rows(rows) => rows
            .into_iter()
            .map(|r| (r.time, r.open, r.high, r.low, r.close, r.volume))
            .collect(),
        BarsResponse::Columns(c) => {
            let n = c.t.len();
            (0..n)
                .map(|i| {
                    (
                        c.t[i],
                        *c.o.get(i).unwrap_or(&0.0),
                        *c.h.get(i).unwrap_or(&0.0),
                        *c.l.get(i).unwrap_or(&0.0),
                        *c.c.get(i).unwrap_or(&0.0),
                        c.v.get(i).copied().unwrap_or(0),
                    )
                })
                .collect()
        }
    };

    raw.into_iter()
        .filter_map(|(t, o, h, l, c, v)| {
            let bucket_start = Utc.timestamp_opt(t, 0).single()?;
            if bucket_start < start || bucket_start > end {
                return None;
            }
            Some(Bar {
                bucket_start,
                open: o,
                high: h,
                low: l,
                close: c,
                volume: v,
                trade_count: None,
                vwap: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn normalize_rows_drops_out_of_window_bars() {
        let now = Utc::now();
        let start = now - ChronoDuration::minutes(10);
        let end = now;
        let resp = BarsResponse::Rows(vec![
            RowBar {
                time: (start - ChronoDuration::minutes(5)).timestamp(),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1,
            },
            RowBar {
                time: (start + ChronoDuration::minutes(1)).timestamp(),
                open: 2.0,
                high: 2.0,
                low: 2.0,
                close: 2.0,
                volume: 2,
            },
        ]);
        let bars = normalize(resp, start, end);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, 2.0);
    }

    #[test]
    fn normalize_columns_zips_parallel_arrays() {
        let now = Utc::now();
        let start = now - ChronoDuration::minutes(10);
        let end = now;
        let t = (start + ChronoDuration::minutes(1)).timestamp();
        let resp = BarsResponse::Columns(ColumnBars {
            t: vec![t],
            o: vec![10.0],
            h: vec![11.0],
            l: vec![9.0],
            c: vec![10.5],
            v: vec![100],
        });
        let bars = normalize(resp, start, end);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].high, 11.0);
        assert_eq!(bars[0].volume, 100);
    }
}
