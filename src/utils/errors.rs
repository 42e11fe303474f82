// src/utils/errors.rs

use std::{error::Error, fmt};

use tungstenite::Error as WsError;

/// Errors coming from external API calls (HTTP, JSON, WS, etc).
#[derive(Debug)]
pub enum ApiError {
    Http(reqwest::Error),
    Json(serde_json::Error),
    WebSocket(WsError),
    Other(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Http(e) => write!(f, "HTTP error: {}", e),
            ApiError::Json(e) => write!(f, "JSON error: {}", e),
            ApiError::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            ApiError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ApiError::Http(e) => Some(e),
            ApiError::Json(e) => Some(e),
            ApiError::WebSocket(e) => Some(e),
            ApiError::Other(_) => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Http(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Json(err)
    }
}

impl From<WsError> for ApiError {
    fn from(err: WsError) -> Self {
        ApiError::WebSocket(err)
    }
}

/// Errors from the upstream feed client (spec.md §4.1, §7). Transport
/// errors are retried by the caller; `Unauthorized` is fatal for the
/// process.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("transport error: {0}")]
    Transport(#[from] WsError),
    #[error("upstream rejected authentication")]
    Unauthorized,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("no frame received within ping timeout")]
    PingTimeout,
}

/// Errors from the candle/news store (spec.md §4.7, §7).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("pool error: {0}")]
    Pool(String),
}

/// Errors from the subscription manager (spec.md §4.5).
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("db: {0}")]
    Db(#[from] sqlx::Error),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("too many concurrent symbols (limit {limit})")]
    SymbolLimitExceeded { limit: usize },
    #[error("unknown symbol {0}")]
    NotSubscribed(String),
}

/// Top-level error for anything surfaced across a `Core` boundary — each
/// HTTP route maps this to the taxonomy in spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Subscription(SubscriptionError::Db(e))
    }
}

impl actix_web::ResponseError for CoreError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            CoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoreError::NotFound => StatusCode::NOT_FOUND,
            CoreError::Subscription(SubscriptionError::SymbolLimitExceeded { .. }) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        let status = self.status_code();
        let label = status.canonical_reason().unwrap_or("error");
        actix_web::HttpResponse::build(status).json(crate::utils::types::ErrorBody::new(label, self.to_string()))
    }
}
