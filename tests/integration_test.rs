//! Integration tests for the registry and broker layers
//!
//! Run with: cargo test --test integration_test -- --nocapture
//!
//! Prerequisites:
//! - DATABASE_URL pointing at a disposable Postgres database
//! - REDIS_URL pointing at a Redis instance (queue tests only)
//!
//! Tests skip themselves when the corresponding variable is absent.

use shopyard::db::{self, NewAuditEntry, NewStore};
use shopyard::quota;
use shopyard::rate_limit;
use shopyard::types::{canonical_namespace, StoreStatus};
use shopyard::worker::{Task, TaskQueue};
use sqlx::PgPool;
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = match db::create_pool(&url).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("skipping: database unavailable: {e:#}");
            return None;
        }
    };
    db::run_migrations(&pool).await.ok()?;
    Some(pool)
}

async fn create_test_user(pool: &PgPool) -> db::User {
    let email = format!("user-{}@test.example", Uuid::new_v4());
    db::insert_user(pool, &email, "$argon2id$fake$digest")
        .await
        .expect("insert user")
}

fn new_store(user_id: Uuid, slug: &str) -> NewStore {
    let id = Uuid::new_v4();
    let canonical = canonical_namespace(id);
    NewStore {
        id,
        user_id,
        name: slug.to_string(),
        domain: format!("{}-{}.127.0.0.1.nip.io", slug, id),
        namespace: canonical.clone(),
        helm_release_name: canonical,
    }
}

#[tokio::test]
async fn test_duplicate_email_rejected() {
    let Some(pool) = test_pool().await else { return };

    let email = format!("dup-{}@test.example", Uuid::new_v4());
    db::insert_user(&pool, &email, "digest").await.unwrap();

    // Same email, different case: still a conflict
    let err = db::insert_user(&pool, &email.to_uppercase(), "digest")
        .await
        .unwrap_err();
    assert!(matches!(err, db::InsertError::UniqueViolation));
}

#[tokio::test]
async fn test_find_user_by_email_case_insensitive() {
    let Some(pool) = test_pool().await else { return };

    let user = create_test_user(&pool).await;
    let found = db::find_user_by_email(&pool, &user.email.to_uppercase())
        .await
        .unwrap()
        .expect("user found");
    assert_eq!(found.id, user.id);
    assert_eq!(found.store_quota, 5);
}

#[tokio::test]
async fn test_store_insert_starts_pending() {
    let Some(pool) = test_pool().await else { return };

    let user = create_test_user(&pool).await;
    let store = db::insert_store(&pool, &new_store(user.id, "shop1"))
        .await
        .unwrap();

    assert_eq!(store.status, StoreStatus::Pending.as_str());
    assert!(store.admin_password.is_none());
    assert!(store.ready_at.is_none());
    assert!(store.error_message.is_none());
    assert_eq!(store.namespace, format!("store-{}", store.id));
    assert_eq!(store.helm_release_name, store.namespace);
}

#[tokio::test]
async fn test_duplicate_domain_rejected() {
    let Some(pool) = test_pool().await else { return };

    let user = create_test_user(&pool).await;
    let mut first = new_store(user.id, "shop1");
    first.domain = format!("dup-{}.127.0.0.1.nip.io", Uuid::new_v4());
    db::insert_store(&pool, &first).await.unwrap();

    let mut second = new_store(user.id, "shop2");
    second.domain = first.domain.clone();
    let err = db::insert_store(&pool, &second).await.unwrap_err();
    assert!(matches!(err, db::InsertError::UniqueViolation));
}

#[tokio::test]
async fn test_ownership_lookup() {
    let Some(pool) = test_pool().await else { return };

    let owner = create_test_user(&pool).await;
    let other = create_test_user(&pool).await;
    let store = db::insert_store(&pool, &new_store(owner.id, "shop1"))
        .await
        .unwrap();

    assert!(db::find_store_owned(&pool, store.id, owner.id)
        .await
        .unwrap()
        .is_some());
    // Wrong principal: invisible through the owned lookup, visible by id
    assert!(db::find_store_owned(&pool, store.id, other.id)
        .await
        .unwrap()
        .is_none());
    assert!(db::find_store_by_id(&pool, store.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_quota_gate() {
    let Some(pool) = test_pool().await else { return };

    let user = create_test_user(&pool).await;
    assert!(quota::check_quota(&pool, user.id, 2).await.unwrap());

    db::insert_store(&pool, &new_store(user.id, "shop1"))
        .await
        .unwrap();
    assert!(quota::check_quota(&pool, user.id, 2).await.unwrap());

    db::insert_store(&pool, &new_store(user.id, "shop2"))
        .await
        .unwrap();
    assert!(!quota::check_quota(&pool, user.id, 2).await.unwrap());
    assert_eq!(db::count_stores_for_user(&pool, user.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_status_transitions() {
    let Some(pool) = test_pool().await else { return };

    let user = create_test_user(&pool).await;
    let store = db::insert_store(&pool, &new_store(user.id, "shop1"))
        .await
        .unwrap();

    db::mark_store_ready(&pool, store.id, "admin", "s3cret").await.unwrap();
    let ready = db::find_store_by_id(&pool, store.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ready.status, StoreStatus::Ready.as_str());
    assert_eq!(ready.admin_username.as_deref(), Some("admin"));
    assert_eq!(ready.admin_password.as_deref(), Some("s3cret"));
    assert!(ready.ready_at.is_some());

    db::set_store_status(&pool, store.id, StoreStatus::Deleting)
        .await
        .unwrap();
    let deleting = db::find_store_by_id(&pool, store.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deleting.status, StoreStatus::Deleting.as_str());

    db::delete_store(&pool, store.id).await.unwrap();
    assert!(db::find_store_by_id(&pool, store.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_error_state_records_message() {
    let Some(pool) = test_pool().await else { return };

    let user = create_test_user(&pool).await;
    let store = db::insert_store(&pool, &new_store(user.id, "shop1"))
        .await
        .unwrap();

    db::mark_store_error(&pool, store.id, "Helm command timed out after 1300s")
        .await
        .unwrap();
    let errored = db::find_store_by_id(&pool, store.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(errored.status, StoreStatus::Error.as_str());
    assert_eq!(
        errored.error_message.as_deref(),
        Some("Helm command timed out after 1300s")
    );
}

#[tokio::test]
async fn test_rate_limit_admits_at_most_limit_per_window() {
    let Some(pool) = test_pool().await else { return };

    let user = create_test_user(&pool).await;
    // Large window so the test never straddles a boundary
    let endpoint = format!("TEST /stores {}", Uuid::new_v4());

    let mut admitted = 0;
    for _ in 0..5 {
        let decision = rate_limit::check_rate_limit(&pool, user.id, &endpoint, 2, 3600)
            .await
            .unwrap();
        if decision.allowed {
            admitted += 1;
        } else {
            assert!(decision.retry_after >= 1);
            assert!(decision.retry_after <= 3600);
        }
    }
    assert_eq!(admitted, 2);
}

#[tokio::test]
async fn test_rate_limit_concurrent_requests() {
    let Some(pool) = test_pool().await else { return };

    let user = create_test_user(&pool).await;
    let endpoint = format!("TEST concurrent {}", Uuid::new_v4());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let endpoint = endpoint.clone();
        let user_id = user.id;
        handles.push(tokio::spawn(async move {
            rate_limit::check_rate_limit(&pool, user_id, &endpoint, 3, 3600)
                .await
                .unwrap()
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap().allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 3);
}

#[tokio::test]
async fn test_audit_entry_insert() {
    let Some(pool) = test_pool().await else { return };

    let user = create_test_user(&pool).await;
    db::insert_audit(
        &pool,
        &NewAuditEntry {
            user_id: Some(user.id),
            action: "create_store".to_string(),
            resource_type: Some("store".to_string()),
            resource_id: Some(Uuid::new_v4()),
            details: Some(serde_json::json!({"source": "test"})),
            ip_address: Some("127.0.0.1".to_string()),
        },
    )
    .await
    .unwrap();

    // Actor deletion must not break the trail (FK SET NULL)
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user.id)
        .execute(&pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_queue_roundtrip() {
    let Some(url) = std::env::var("REDIS_URL").ok() else {
        return;
    };
    let Ok(queue) = TaskQueue::connect(&url).await else {
        eprintln!("skipping: redis unavailable");
        return;
    };

    // Drain anything a previous run left behind
    queue.recover().await.unwrap();
    while let Some(stale) = queue.next().await.unwrap() {
        queue.ack(&stale).await.unwrap();
    }

    let task = Task::ProvisionStore {
        store_id: Uuid::new_v4(),
    };
    queue.enqueue(&task).await.unwrap();

    let delivery = queue.next().await.unwrap().expect("task delivered");
    let decoded: Task = serde_json::from_str(&delivery.payload).unwrap();
    assert_eq!(decoded, task);

    // Unacked payload sits in the processing list; recover re-queues it
    let recovered = queue.recover().await.unwrap();
    assert_eq!(recovered, 1);

    let redelivery = queue.next().await.unwrap().expect("task redelivered");
    assert_eq!(redelivery.payload, delivery.payload);
    queue.ack(&redelivery).await.unwrap();

    // Acked for good: nothing left to recover or deliver
    assert_eq!(queue.recover().await.unwrap(), 0);
    assert!(queue.next().await.unwrap().is_none());
}
