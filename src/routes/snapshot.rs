//! `GET /api/snapshot/{symbol}` (spec.md §6): the current in-memory series,
//! backfilling the symbol on demand if no builder exists yet.

use std::collections::BTreeMap;

use actix_web::{get, web, HttpResponse, Scope};
use serde::Serialize;

use crate::aggregator::HandlerFactory;
use crate::core::Core;
use crate::hub::OhlcvFrame;
use crate::middleware::auth::AuthedUser;
use crate::model::Symbol;
use crate::utils::errors::CoreError;

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    symbol: String,
    candles: BTreeMap<String, OhlcvFrame>,
}

#[get("/snapshot/{symbol}")]
async fn snapshot(path: web::Path<String>, _user: AuthedUser, core: web::Data<Core>) -> Result<HttpResponse, CoreError> {
    let symbol = Symbol::new(path.into_inner()).map_err(|e| CoreError::InvalidRequest(e.to_string()))?;
    core.aggregator.ensure_handler(&symbol).await?;

    let candles = core
        .aggregator
        .snapshot(&symbol)
        .iter()
        .map(|b| (b.bucket_start.to_rfc3339(), OhlcvFrame::from(b)))
        .collect();

    Ok(HttpResponse::Ok().json(SnapshotResponse {
        symbol: symbol.as_str().to_owned(),
        candles,
    }))
}

pub fn snapshot_scope() -> Scope {
    web::scope("/api").service(snapshot)
}
