//! Registry: the durable record of users, stores, audit entries, and
//! rate-limit counters. The only module that writes to the database; the
//! API and worker request mutations through the functions here.

use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

pub mod models;

pub use models::*;

use crate::types::StoreStatus;

/// Insert failures where the distinction matters to the caller: a unique
/// constraint violation on email, domain, or namespace maps to 409.
#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("unique constraint violation")]
    UniqueViolation,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

fn classify_insert(e: sqlx::Error) -> InsertError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => InsertError::UniqueViolation,
        _ => InsertError::Database(e),
    }
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Look up a user by email, case-insensitively.
pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
    sqlx::query_as::<_, User>(
        r#"SELECT id, email, hashed_password, store_quota, created_at, updated_at
           FROM users WHERE LOWER(email) = LOWER($1)"#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to find user by email")
}

pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>> {
    sqlx::query_as::<_, User>(
        r#"SELECT id, email, hashed_password, store_quota, created_at, updated_at
           FROM users WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to find user by id")
}

/// Insert a new user. A duplicate email surfaces as `UniqueViolation`.
pub async fn insert_user(
    pool: &PgPool,
    email: &str,
    hashed_password: &str,
) -> Result<User, InsertError> {
    sqlx::query_as::<_, User>(
        r#"INSERT INTO users (id, email, hashed_password)
           VALUES ($1, $2, $3)
           RETURNING id, email, hashed_password, store_quota, created_at, updated_at"#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(hashed_password)
    .fetch_one(pool)
    .await
    .map_err(classify_insert)
}

const STORE_COLUMNS: &str = "id, user_id, name, domain, namespace, status, helm_release_name, \
     admin_username, admin_password, error_message, created_at, updated_at, ready_at";

pub async fn find_store_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Store>> {
    sqlx::query_as::<_, Store>(&format!(
        "SELECT {} FROM stores WHERE id = $1",
        STORE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to find store by id")
}

pub async fn find_store_by_domain(pool: &PgPool, domain: &str) -> Result<Option<Store>> {
    sqlx::query_as::<_, Store>(&format!(
        "SELECT {} FROM stores WHERE domain = $1",
        STORE_COLUMNS
    ))
    .bind(domain)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to find store by domain")
}

/// Look up a store only if it is owned by the given principal.
pub async fn find_store_owned(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
) -> Result<Option<Store>> {
    sqlx::query_as::<_, Store>(&format!(
        "SELECT {} FROM stores WHERE id = $1 AND user_id = $2",
        STORE_COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to find owned store")
}

pub async fn list_stores_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Store>> {
    sqlx::query_as::<_, Store>(&format!(
        "SELECT {} FROM stores WHERE user_id = $1 ORDER BY created_at",
        STORE_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list stores for user")
}

pub async fn count_stores_for_user(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM stores WHERE user_id = $1"#)
        .bind(user_id)
        .fetch_one(pool)
        .await
        .wrap_err("Failed to count stores for user")?;
    Ok(row.0)
}

/// Insert a new store in Pending state. A duplicate domain or namespace
/// surfaces as `UniqueViolation`.
pub async fn insert_store(pool: &PgPool, store: &NewStore) -> Result<Store, InsertError> {
    sqlx::query_as::<_, Store>(&format!(
        "INSERT INTO stores (id, user_id, name, domain, namespace, status, helm_release_name)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {}",
        STORE_COLUMNS
    ))
    .bind(store.id)
    .bind(store.user_id)
    .bind(&store.name)
    .bind(&store.domain)
    .bind(&store.namespace)
    .bind(StoreStatus::Pending.as_str())
    .bind(&store.helm_release_name)
    .fetch_one(pool)
    .await
    .map_err(classify_insert)
}

pub async fn set_store_status(pool: &PgPool, id: Uuid, status: StoreStatus) -> Result<()> {
    sqlx::query(r#"UPDATE stores SET status = $1, updated_at = NOW() WHERE id = $2"#)
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await
        .wrap_err_with(|| format!("Failed to update store {} status to {}", id, status))?;
    Ok(())
}

/// Backfill the canonical namespace and release name on a store row.
pub async fn update_store_namespace_release(
    pool: &PgPool,
    id: Uuid,
    namespace: &str,
    helm_release_name: &str,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE stores SET namespace = $1, helm_release_name = $2, updated_at = NOW()
           WHERE id = $3"#,
    )
    .bind(namespace)
    .bind(helm_release_name)
    .bind(id)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to update store {} namespace/release", id))?;
    Ok(())
}

/// Commit a successful provision: Ready status, admin credentials, ready_at.
pub async fn mark_store_ready(
    pool: &PgPool,
    id: Uuid,
    admin_username: &str,
    admin_password: &str,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE stores
           SET status = $1, admin_username = $2, admin_password = $3,
               ready_at = NOW(), updated_at = NOW()
           WHERE id = $4"#,
    )
    .bind(StoreStatus::Ready.as_str())
    .bind(admin_username)
    .bind(admin_password)
    .bind(id)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to mark store {} ready", id))?;
    Ok(())
}

/// Record a terminal provisioning failure. Runs on a fresh connection from
/// the pool, so it succeeds even when the failing attempt's statements did
/// not.
pub async fn mark_store_error(pool: &PgPool, id: Uuid, error_message: &str) -> Result<()> {
    sqlx::query(
        r#"UPDATE stores SET status = $1, error_message = $2, updated_at = NOW()
           WHERE id = $3"#,
    )
    .bind(StoreStatus::Error.as_str())
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to mark store {} errored", id))?;
    Ok(())
}

pub async fn delete_store(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query(r#"DELETE FROM stores WHERE id = $1"#)
        .bind(id)
        .execute(pool)
        .await
        .wrap_err_with(|| format!("Failed to delete store {}", id))?;
    Ok(())
}

/// Append an audit entry. Best-effort from the caller's point of view, but
/// failures are surfaced so they get logged.
pub async fn insert_audit(pool: &PgPool, entry: &NewAuditEntry) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO audit_logs (user_id, action, resource_type, resource_id, details, ip_address)
           VALUES ($1, $2, $3, $4, $5, $6::inet)"#,
    )
    .bind(entry.user_id)
    .bind(&entry.action)
    .bind(&entry.resource_type)
    .bind(entry.resource_id)
    .bind(&entry.details)
    .bind(&entry.ip_address)
    .execute(pool)
    .await
    .wrap_err("Failed to insert audit entry")?;
    Ok(())
}

/// Atomically bump the rate counter for `(user, endpoint, window_start)`
/// and return the post-increment count. Concurrent requests for the same
/// triple serialize on the row, so the window never over-admits.
pub async fn bump_rate_counter(
    pool: &PgPool,
    user_id: Uuid,
    endpoint: &str,
    window_start: DateTime<Utc>,
) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        r#"INSERT INTO rate_limits (user_id, endpoint, window_start, request_count)
           VALUES ($1, $2, $3, 1)
           ON CONFLICT (user_id, endpoint, window_start)
           DO UPDATE SET request_count = rate_limits.request_count + 1
           RETURNING request_count"#,
    )
    .bind(user_id)
    .bind(endpoint)
    .bind(window_start)
    .fetch_one(pool)
    .await
    .wrap_err("Failed to bump rate counter")?;
    Ok(row.0)
}
