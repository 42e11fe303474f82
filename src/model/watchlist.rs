use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::symbol::Symbol;

/// A persisted row of `user_subscriptions`. Uniqueness on `(user_id, symbol)`;
/// removal is a soft delete via `active = false` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WatchlistEntry {
    pub user_id: Uuid,
    pub symbol_raw: String,
    pub subscribed_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub active: bool,
}

impl WatchlistEntry {
    pub fn symbol(&self) -> Symbol {
        Symbol::new(&self.symbol_raw).expect("stored symbol was validated on insert")
    }
}
