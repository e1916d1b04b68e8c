//! Store submission, listing, inspection, deletion, and health.

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use std::net::SocketAddr;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{ApiError, FieldErrors};
use super::extract::CurrentUser;
use super::schemas::{
    CreateStoreRequest, StoreDetailsResponse, StoreHealthResponse, StoreResponse,
};
use super::AppState;
use crate::db::{self, NewAuditEntry, NewStore, Store, User};
use crate::kube_client::KubeClient;
use crate::metrics;
use crate::quota;
use crate::rate_limit;
use crate::types::{self, StoreStatus};
use crate::worker::Task;

/// Rate limit for store submissions: 1 per principal per 60s window
const CREATE_STORE_ENDPOINT: &str = "POST /stores";
const CREATE_STORE_LIMIT: i32 = 1;
const CREATE_STORE_WINDOW_SECS: i64 = 60;

/// Resolve a store for the caller, distinguishing "not found" (404) from
/// "found but not owned" (403).
async fn store_for_user(
    state: &AppState,
    store_id: Uuid,
    user: &User,
) -> Result<Store, ApiError> {
    if let Some(store) = db::find_store_owned(&state.db, store_id, user.id).await? {
        return Ok(store);
    }
    if db::find_store_by_id(&state.db, store_id).await?.is_none() {
        return Err(ApiError::NotFound {
            detail: "Store not found".to_string(),
        });
    }
    Err(ApiError::Forbidden)
}

async fn audit(state: &AppState, entry: NewAuditEntry) {
    // The audit trail is best-effort; a failed write must not fail the call
    if let Err(e) = db::insert_audit(&state.db, &entry).await {
        warn!(error = %e, action = %entry.action, "failed to write audit entry");
    }
}

pub async fn create_store(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CreateStoreRequest>,
) -> Result<(StatusCode, Json<StoreResponse>), ApiError> {
    let decision = rate_limit::check_rate_limit(
        &state.db,
        user.id,
        CREATE_STORE_ENDPOINT,
        CREATE_STORE_LIMIT,
        CREATE_STORE_WINDOW_SECS,
    )
    .await?;
    if !decision.allowed {
        return Err(ApiError::RateLimited {
            retry_after: decision.retry_after,
        });
    }

    let slug = request.name.as_str();
    if !types::valid_slug(slug) {
        let mut field_errors = FieldErrors::new();
        field_errors.insert(
            "name".to_string(),
            vec!["Name must be 3-63 lowercase alphanumeric characters or hyphens".to_string()],
        );
        return Err(ApiError::Validation { field_errors });
    }

    let domain = state.cfg.routing.canonical_domain(slug);
    if let Some(requested) = &request.domain {
        if requested != &domain {
            return Err(ApiError::BadRequest {
                detail: format!("Domain must be {} for nip.io routing", domain),
            });
        }
    }

    if !quota::check_quota(&state.db, user.id, user.store_quota).await? {
        metrics::STORES_SUBMITTED_TOTAL
            .with_label_values(&["quota_exceeded"])
            .inc();
        return Err(ApiError::QuotaExceeded);
    }

    if db::find_store_by_domain(&state.db, &domain).await?.is_some() {
        return Err(ApiError::Conflict {
            detail: "Domain already in use".to_string(),
        });
    }

    let store_id = Uuid::new_v4();
    let canonical = types::canonical_namespace(store_id);
    let new_store = NewStore {
        id: store_id,
        user_id: user.id,
        name: slug.to_string(),
        domain,
        namespace: canonical.clone(),
        helm_release_name: canonical,
    };

    let store = match db::insert_store(&state.db, &new_store).await {
        Ok(store) => store,
        Err(db::InsertError::UniqueViolation) => {
            // Lost the race with a concurrent submission for the same domain
            return Err(ApiError::Conflict {
                detail: "Domain already in use".to_string(),
            });
        }
        Err(db::InsertError::Database(e)) => return Err(ApiError::internal(e)),
    };

    state
        .queue
        .enqueue(&Task::ProvisionStore { store_id: store.id })
        .await?;

    audit(
        &state,
        NewAuditEntry {
            user_id: Some(user.id),
            action: "create_store".to_string(),
            resource_type: Some("store".to_string()),
            resource_id: Some(store.id),
            details: None,
            ip_address: Some(addr.ip().to_string()),
        },
    )
    .await;

    metrics::STORES_SUBMITTED_TOTAL
        .with_label_values(&["accepted"])
        .inc();
    info!(store_id = %store.id, domain = %store.domain, "store submission accepted");

    Ok((StatusCode::ACCEPTED, Json(StoreResponse::from_store(&store))))
}

pub async fn list_stores(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<StoreResponse>>, ApiError> {
    let stores = db::list_stores_for_user(&state.db, user.id).await?;
    Ok(Json(stores.iter().map(StoreResponse::from_store).collect()))
}

pub async fn get_store(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(store_id): Path<Uuid>,
) -> Result<Json<StoreDetailsResponse>, ApiError> {
    let store = store_for_user(&state, store_id, &user).await?;
    Ok(Json(StoreDetailsResponse::from_store(&store)))
}

pub async fn delete_store(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    CurrentUser(user): CurrentUser,
    Path(store_id): Path<Uuid>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let store = store_for_user(&state, store_id, &user).await?;

    db::set_store_status(&state.db, store.id, StoreStatus::Deleting).await?;

    state
        .queue
        .enqueue(&Task::DeleteStore { store_id: store.id })
        .await?;

    audit(
        &state,
        NewAuditEntry {
            user_id: Some(user.id),
            action: "delete_store".to_string(),
            resource_type: Some("store".to_string()),
            resource_id: Some(store.id),
            details: None,
            ip_address: Some(addr.ip().to_string()),
        },
    )
    .await;

    info!(store_id = %store.id, "store deletion accepted");
    Ok((StatusCode::ACCEPTED, Json(json!({"status": "deleting"}))))
}

pub async fn store_health(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(store_id): Path<Uuid>,
) -> Result<Json<StoreHealthResponse>, ApiError> {
    let store = store_for_user(&state, store_id, &user).await?;

    let kube = KubeClient::connect(state.cfg.cluster.kubeconfig_path.as_deref()).await?;
    let wordpress = kube.get_pod_status(&store.namespace, "app=wordpress").await?;
    let mysql = kube.get_pod_status(&store.namespace, "app=mysql").await?;

    let wordpress_ready = !wordpress.is_empty() && wordpress.iter().all(|p| p.ready);
    let mysql_ready = !mysql.is_empty() && mysql.iter().all(|p| p.ready);
    let healthy = wordpress_ready && mysql_ready;

    Ok(Json(StoreHealthResponse {
        healthy,
        wordpress_ready,
        mysql_ready,
        details: (!healthy).then(|| "One or more pods not ready".to_string()),
    }))
}
