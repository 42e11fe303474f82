//! Watchlist and live-attach endpoints (spec.md §4.5, §6).

use actix_web::{delete, get, web, HttpResponse, Scope};
use serde::Serialize;
use serde_json::json;

use crate::core::Core;
use crate::middleware::auth::AuthedUser;
use crate::model::Symbol;
use crate::utils::errors::CoreError;

fn parse_symbol(raw: &str) -> Result<Symbol, CoreError> {
    Symbol::new(raw).map_err(|e| CoreError::InvalidRequest(e.to_string()))
}

#[get("/subscribe/{symbol}")]
async fn subscribe(path: web::Path<String>, user: AuthedUser, core: web::Data<Core>) -> Result<HttpResponse, CoreError> {
    let symbol = parse_symbol(&path)?;
    let became_active = core.subscriptions.add_permanent(user.0, &symbol).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": if became_active { "subscribed" } else { "already" },
        "symbol": symbol.as_str(),
        "subscriber_count": core.subscriptions.subscriber_count(&symbol),
    })))
}

#[delete("/subscribe/{symbol}")]
async fn unsubscribe(path: web::Path<String>, user: AuthedUser, core: web::Data<Core>) -> Result<HttpResponse, CoreError> {
    let symbol = parse_symbol(&path)?;
    let was_active = core.subscriptions.remove_permanent(user.0, &symbol).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": if was_active { "unsubscribed" } else { "not_subscribed" },
        "symbol": symbol.as_str(),
        "remaining_subscribers": core.subscriptions.subscriber_count(&symbol),
    })))
}

#[derive(Debug, Serialize)]
struct SubscriptionsResponse {
    symbols: Vec<String>,
    count: usize,
}

#[get("/subscriptions")]
async fn list_subscriptions(user: AuthedUser, core: web::Data<Core>) -> Result<HttpResponse, CoreError> {
    let symbols = core.subscriptions.list_permanent(user.0).await?;
    let symbols: Vec<String> = symbols.iter().map(|s| s.as_str().to_owned()).collect();
    Ok(HttpResponse::Ok().json(SubscriptionsResponse {
        count: symbols.len(),
        symbols,
    }))
}

/// Idempotent pre-warm: makes sure the symbol's upstream subscription and
/// candle builder are live, without the connection lifecycle an SSE stream
/// would own. Calls `prewarm` rather than `attach_live` — this endpoint has
/// no connection whose drop could ever pair with a `detach_live`, so it
/// must not touch the live-count refcounter at all.
#[get("/ws_manager/{symbol}")]
async fn ws_manager(path: web::Path<String>, _user: AuthedUser, core: web::Data<Core>) -> Result<HttpResponse, CoreError> {
    let symbol = parse_symbol(&path)?;
    core.subscriptions.prewarm(&symbol).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "subscribed",
        "symbol": symbol.as_str(),
        "message": "live feed active",
    })))
}

pub fn subscribe_scope() -> Scope {
    web::scope("/api").service(subscribe).service(unsubscribe).service(list_subscriptions)
}

pub fn ws_manager_scope() -> Scope {
    web::scope("").service(ws_manager)
}
