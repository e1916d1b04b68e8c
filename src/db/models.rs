use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered principal. Owns zero or more stores.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub hashed_password: String,
    pub store_quota: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A provisioned (or provisioning) WooCommerce storefront.
///
/// `status` holds the capitalized string form of `StoreStatus`. `namespace`
/// and `helm_release_name` are both `store-<id>` by construction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Store {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub domain: String,
    pub namespace: String,
    pub status: String,
    pub helm_release_name: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
}

/// For inserting new stores. Status always starts at Pending.
#[derive(Debug, Clone)]
pub struct NewStore {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub domain: String,
    pub namespace: String,
    pub helm_release_name: String,
}

/// Append-only audit trail entry
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
}
