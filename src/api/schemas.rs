//! Request and response bodies for the admission API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Store;
use crate::types::{url_scheme, StoreStatus};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateStoreRequest {
    pub name: String,
    /// Optional; when present it must equal the canonical domain derived
    /// from the slug.
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StoreResponse {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl StoreResponse {
    pub fn from_store(store: &Store) -> Self {
        let url = if store.status == StoreStatus::Ready.as_str() {
            Some(format!("{}://{}", url_scheme(&store.domain), store.domain))
        } else {
            None
        };
        Self {
            id: store.id,
            name: store.name.clone(),
            domain: store.domain.clone(),
            status: store.status.clone(),
            created_at: store.created_at,
            url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StoreDetailsResponse {
    #[serde(flatten)]
    pub store: StoreResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
}

impl StoreDetailsResponse {
    pub fn from_store(store: &Store) -> Self {
        let ready = store.status == StoreStatus::Ready.as_str();
        let admin_url = ready.then(|| {
            format!(
                "{}://{}/wp-admin",
                url_scheme(&store.domain),
                store.domain
            )
        });
        Self {
            store: StoreResponse::from_store(store),
            admin_url,
            admin_username: ready.then(|| store.admin_username.clone()).flatten(),
            admin_password: ready.then(|| store.admin_password.clone()).flatten(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub healthy: bool,
    pub wordpress_ready: bool,
    pub mysql_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(status: StoreStatus) -> Store {
        let id = Uuid::new_v4();
        Store {
            id,
            user_id: Uuid::new_v4(),
            name: "shop1".to_string(),
            domain: "shop1.127.0.0.1.nip.io".to_string(),
            namespace: format!("store-{}", id),
            status: status.as_str().to_string(),
            helm_release_name: format!("store-{}", id),
            admin_username: Some("admin".to_string()),
            admin_password: Some("secret".to_string()),
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            ready_at: None,
        }
    }

    #[test]
    fn test_url_only_when_ready() {
        let pending = StoreResponse::from_store(&store(StoreStatus::Pending));
        assert!(pending.url.is_none());

        let ready = StoreResponse::from_store(&store(StoreStatus::Ready));
        assert_eq!(ready.url.as_deref(), Some("https://shop1.127.0.0.1.nip.io"));
    }

    #[test]
    fn test_local_domain_gets_http_url() {
        let mut s = store(StoreStatus::Ready);
        s.domain = "shop1.localtest.me".to_string();
        let response = StoreResponse::from_store(&s);
        assert_eq!(response.url.as_deref(), Some("http://shop1.localtest.me"));
    }

    #[test]
    fn test_details_hide_credentials_until_ready() {
        let pending = StoreDetailsResponse::from_store(&store(StoreStatus::Pending));
        assert!(pending.admin_url.is_none());
        assert!(pending.admin_username.is_none());
        assert!(pending.admin_password.is_none());

        let ready = StoreDetailsResponse::from_store(&store(StoreStatus::Ready));
        assert_eq!(
            ready.admin_url.as_deref(),
            Some("https://shop1.127.0.0.1.nip.io/wp-admin")
        );
        assert_eq!(ready.admin_username.as_deref(), Some("admin"));
        assert_eq!(ready.admin_password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_token_response_type() {
        let token = TokenResponse::new("abc".to_string());
        assert_eq!(token.token_type, "bearer");
    }
}
