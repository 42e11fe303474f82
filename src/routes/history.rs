//! `GET /api/tradingview/history` (spec.md §6): historical bars in UDF
//! column format. Only the `1`-minute resolution is backed by this store.

use actix_web::{get, web, HttpResponse, Scope};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Core;
use crate::middleware::auth::AuthedUser;
use crate::model::Symbol;
use crate::utils::errors::CoreError;

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    symbol: String,
    from_ts: i64,
    to_ts: i64,
    resolution: String,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    s: &'static str,
    t: Vec<i64>,
    o: Vec<f64>,
    h: Vec<f64>,
    l: Vec<f64>,
    c: Vec<f64>,
    v: Vec<u64>,
}

impl HistoryResponse {
    fn no_data() -> Self {
        Self {
            s: "no_data",
            t: vec![],
            o: vec![],
            h: vec![],
            l: vec![],
            c: vec![],
            v: vec![],
        }
    }
}

#[get("/tradingview/history")]
async fn history(query: web::Query<HistoryQuery>, _user: AuthedUser, core: web::Data<Core>) -> Result<HttpResponse, CoreError> {
    if query.resolution != "1" {
        return Err(CoreError::InvalidRequest(format!("unsupported resolution {:?}", query.resolution)));
    }
    let symbol = Symbol::new(&query.symbol).map_err(|e| CoreError::InvalidRequest(e.to_string()))?;

    let from = Utc
        .timestamp_opt(query.from_ts, 0)
        .single()
        .ok_or_else(|| CoreError::InvalidRequest("invalid from_ts".into()))?;
    let to = Utc
        .timestamp_opt(query.to_ts, 0)
        .single()
        .ok_or_else(|| CoreError::InvalidRequest("invalid to_ts".into()))?;

    let bars = core.store.read_range(&symbol, from, to)?;
    if bars.is_empty() {
        return Ok(HttpResponse::Ok().json(HistoryResponse::no_data()));
    }

    let mut resp = HistoryResponse {
        s: "ok",
        t: Vec::with_capacity(bars.len()),
        o: Vec::with_capacity(bars.len()),
        h: Vec::with_capacity(bars.len()),
        l: Vec::with_capacity(bars.len()),
        c: Vec::with_capacity(bars.len()),
        v: Vec::with_capacity(bars.len()),
    };
    for bar in bars {
        resp.t.push(bar.bucket_start.timestamp());
        resp.o.push(bar.open);
        resp.h.push(bar.high);
        resp.l.push(bar.low);
        resp.c.push(bar.close);
        resp.v.push(bar.volume);
    }
    Ok(HttpResponse::Ok().json(resp))
}

pub fn history_scope() -> Scope {
    web::scope("/api").service(history)
}
