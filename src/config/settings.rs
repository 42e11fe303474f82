use dotenv::dotenv;
use std::env;

/// Process-wide configuration, populated from the environment at startup
/// (spec.md §6). Mirrors the teacher's flat `Settings` + `env::var(...)
/// .map_err(...)` shape.
#[derive(Debug, Clone)]
pub struct Settings {
    pub http_listen_addr: String,

    pub upstream_ws_url: String,
    pub upstream_ws_key: String,
    pub upstream_ws_secret: String,
    pub upstream_rest_url: String,

    pub backfill_lookback_minutes: i64,
    pub tick_queue_capacity: usize,
    pub sse_queue_capacity: usize,
    pub max_concurrent_symbols: usize,

    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,

    pub store_path: String,
    pub database_url: String,

    pub auth_jwks_url: String,
    pub auth_hs256_secret: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok(); // loads `.env` file automatically

        let http_listen_addr =
            env::var("HTTP_LISTEN_ADDR").unwrap_or_else(|_| ":8001".to_string());

        let upstream_ws_url = env::var("UPSTREAM_WS_URL").map_err(|_| "UPSTREAM_WS_URL missing")?;
        let upstream_ws_key = env::var("UPSTREAM_WS_KEY").map_err(|_| "UPSTREAM_WS_KEY missing")?;
        let upstream_ws_secret =
            env::var("UPSTREAM_WS_SECRET").map_err(|_| "UPSTREAM_WS_SECRET missing")?;
        let upstream_rest_url =
            env::var("UPSTREAM_REST_URL").map_err(|_| "UPSTREAM_REST_URL missing")?;

        let backfill_lookback_minutes = env_or("BACKFILL_LOOKBACK_MINUTES", 1440)?;
        let tick_queue_capacity = env_or("TICK_QUEUE_CAPACITY", 500usize)?;
        let sse_queue_capacity = env_or("SSE_QUEUE_CAPACITY", 10usize)?;
        let max_concurrent_symbols = env_or("MAX_CONCURRENT_SYMBOLS", 500usize)?;

        let reconnect_min_ms = env_or("RECONNECT_MIN_MS", 1000u64)?;
        let reconnect_max_ms = env_or("RECONNECT_MAX_MS", 30000u64)?;

        let store_path = env::var("STORE_PATH").unwrap_or_else(|_| "./data/market.db".to_string());
        let database_url = env::var("DATABASE_URL").map_err(|_| "DATABASE_URL missing")?;

        let auth_jwks_url = env::var("AUTH_JWKS_URL").map_err(|_| "AUTH_JWKS_URL missing")?;
        let auth_hs256_secret = env::var("AUTH_HS256_SECRET").ok();

        Ok(Self {
            http_listen_addr,
            upstream_ws_url,
            upstream_ws_key,
            upstream_ws_secret,
            upstream_rest_url,
            backfill_lookback_minutes,
            tick_queue_capacity,
            sse_queue_capacity,
            max_concurrent_symbols,
            reconnect_min_ms,
            reconnect_max_ms,
            store_path,
            database_url,
            auth_jwks_url,
            auth_hs256_secret,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| format!("{key} invalid: {e}").into()),
        Err(_) => Ok(default),
    }
}
