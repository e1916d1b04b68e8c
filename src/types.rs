use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a store. Persisted as the capitalized string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreStatus {
    Pending,
    Ready,
    Error,
    Deleting,
}

impl StoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreStatus::Pending => "Pending",
            StoreStatus::Ready => "Ready",
            StoreStatus::Error => "Error",
            StoreStatus::Deleting => "Deleting",
        }
    }
}

impl std::fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoreStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(StoreStatus::Pending),
            "Ready" => Ok(StoreStatus::Ready),
            "Error" => Ok(StoreStatus::Error),
            "Deleting" => Ok(StoreStatus::Deleting),
            other => Err(format!("unknown store status: {}", other)),
        }
    }
}

/// Canonical namespace for a store. Doubles as the Helm release name.
pub fn canonical_namespace(store_id: Uuid) -> String {
    format!("store-{}", store_id)
}

/// URL scheme for a store domain. Local development domains are served
/// over plain http; everything else gets https.
pub fn url_scheme(domain: &str) -> &'static str {
    if domain.ends_with(".localtest.me") || domain.ends_with(".localhost") {
        "http"
    } else {
        "https"
    }
}

/// Store slugs become DNS labels and must stay within RFC 1123 limits.
pub fn valid_slug(name: &str) -> bool {
    (3..=63).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            StoreStatus::Pending,
            StoreStatus::Ready,
            StoreStatus::Error,
            StoreStatus::Deleting,
        ] {
            assert_eq!(StoreStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(StoreStatus::from_str("pending").is_err());
        assert!(StoreStatus::from_str("").is_err());
    }

    #[test]
    fn test_canonical_namespace() {
        let id = Uuid::new_v4();
        let ns = canonical_namespace(id);
        assert!(ns.starts_with("store-"));
        assert!(ns.contains(&id.to_string()));
    }

    #[test]
    fn test_url_scheme() {
        assert_eq!(url_scheme("shop1.localtest.me"), "http");
        assert_eq!(url_scheme("shop1.my.localhost"), "http");
        assert_eq!(url_scheme("shop1.127.0.0.1.nip.io"), "https");
        assert_eq!(url_scheme("shop.example.com"), "https");
    }

    #[test]
    fn test_valid_slug() {
        assert!(valid_slug("shop1"));
        assert!(valid_slug("my-shop-2"));
        assert!(valid_slug("abc"));
        assert!(!valid_slug("ab"));
        assert!(!valid_slug("Shop1"));
        assert!(!valid_slug("shop_1"));
        assert!(!valid_slug("shop.1"));
        assert!(!valid_slug(&"a".repeat(64)));
        assert!(valid_slug(&"a".repeat(63)));
    }
}
