//! Per-principal store quota gate.
//!
//! The check is admission-time only. Two racing submissions can both pass
//! with one slot left; the unique constraints on domain and namespace keep
//! the registry consistent, so the race is tolerated.

use eyre::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;

pub async fn store_count(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    db::count_stores_for_user(pool, user_id).await
}

/// True if the principal may create one more store.
pub async fn check_quota(pool: &PgPool, user_id: Uuid, quota_limit: i32) -> Result<bool> {
    Ok(store_count(pool, user_id).await? < quota_limit as i64)
}
