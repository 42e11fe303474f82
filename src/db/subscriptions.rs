//! Postgres-backed `user_subscriptions` queries (spec.md §3, §6). Follows
//! the compile-time-checked `query_as!` style used throughout this crate's
//! other query modules.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::WatchlistEntry;

/// Upsert an active watchlist row. Returns the row as it stands after the
/// write so the caller can tell a fresh insert from a reactivation.
pub async fn upsert_active(
    pool: &PgPool,
    user_id: Uuid,
    symbol: &str,
) -> sqlx::Result<WatchlistEntry> {
    let now = Utc::now();
    sqlx::query_as!(
        WatchlistEntry,
        r#"
        INSERT INTO user_subscriptions (user_id, symbol_raw, subscribed_at, last_active_at, active)
        VALUES ($1, $2, $3, $3, true)
        ON CONFLICT (user_id, symbol_raw) DO UPDATE
            SET active = true, last_active_at = $3
        RETURNING user_id, symbol_raw, subscribed_at, last_active_at, active
        "#,
        user_id,
        symbol,
        now,
    )
    .fetch_one(pool)
    .await
}

/// Soft-delete a watchlist row. Returns `true` if a row was actually active
/// before this call (i.e. this call made a real transition).
pub async fn deactivate(pool: &PgPool, user_id: Uuid, symbol: &str) -> sqlx::Result<bool> {
    let result = sqlx::query!(
        r#"
        UPDATE user_subscriptions
        SET active = false, last_active_at = $3
        WHERE user_id = $1 AND symbol_raw = $2 AND active = true
        "#,
        user_id,
        symbol,
        Utc::now(),
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_active_for_user(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Vec<WatchlistEntry>> {
    sqlx::query_as!(
        WatchlistEntry,
        r#"
        SELECT user_id, symbol_raw, subscribed_at, last_active_at, active
        FROM user_subscriptions
        WHERE user_id = $1 AND active = true
        ORDER BY symbol_raw
        "#,
        user_id,
    )
    .fetch_all(pool)
    .await
}

/// All active rows across all users — used by `rehydrate_on_start` (spec.md
/// §4.5) to rebuild in-memory counts after a restart.
pub async fn list_all_active(pool: &PgPool) -> sqlx::Result<Vec<WatchlistEntry>> {
    sqlx::query_as!(
        WatchlistEntry,
        r#"
        SELECT user_id, symbol_raw, subscribed_at, last_active_at, active
        FROM user_subscriptions
        WHERE active = true
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn count_active_subscribers(pool: &PgPool, symbol: &str) -> sqlx::Result<i64> {
    let row = sqlx::query!(
        r#"
        SELECT COUNT(*) AS "count!" FROM user_subscriptions
        WHERE symbol_raw = $1 AND active = true
        "#,
        symbol,
    )
    .fetch_one(pool)
    .await?;
    Ok(row.count)
}
