//! Chart values assembly: static chart defaults merged with the per-store
//! dynamic overlay (generated secrets, domain, salts, TLS policy).
//!
//! Every invocation generates fresh secrets. A retried provision therefore
//! pushes new credentials through the `upgrade --install` path; consistent,
//! but operators should know the admin password can rotate across retries.

use eyre::{Result, WrapErr};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::config::{ClusterConfig, RoutingConfig};
use crate::db::Store;

/// Domains served by wildcard-IP DNS or local resolvers cannot carry a real
/// certificate; TLS is forced off for them regardless of configuration.
const TLS_EXEMPT_SUFFIXES: [&str; 4] = [".localtest.me", ".localhost", ".nip.io", ".sslip.io"];

/// Assembled values tree plus the secrets the registry needs back.
#[derive(Debug, Clone)]
pub struct StoreValues {
    pub values: Value,
    pub admin_password: String,
}

fn random_string(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn tls_enabled_for(domain: &str, configured: bool) -> bool {
    if TLS_EXEMPT_SUFFIXES
        .iter()
        .any(|suffix| domain.ends_with(suffix))
    {
        return false;
    }
    configured
}

/// Load the chart's base values: `values-<profile>.yaml`, falling back to
/// `values.yaml`. An empty file yields an empty map.
fn load_base_values(chart_path: &Path, profile: &str) -> Result<Value> {
    let candidate = chart_path.join(format!("values-{}.yaml", profile));
    let fallback = chart_path.join("values.yaml");
    let path = if candidate.exists() { candidate } else { fallback };

    let raw = std::fs::read_to_string(&path)
        .wrap_err_with(|| format!("Failed to read chart values {}", path.display()))?;
    let parsed: Value = serde_yaml::from_str(&raw)
        .wrap_err_with(|| format!("Failed to parse chart values {}", path.display()))?;

    Ok(match parsed {
        Value::Null => Value::Object(Map::new()),
        other => other,
    })
}

/// Deep-merge `overlay` into `base`: nested mappings merge recursively,
/// everything else is replaced wholesale by the overlay.
fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn build_overlay(store: &Store, cluster: &ClusterConfig, routing: &RoutingConfig) -> StoreValues {
    let root_password = random_string(32);
    let mysql_password = random_string(32);
    let admin_password = random_string(32);

    let salts = json!({
        "authKey": random_string(64),
        "secureAuthKey": random_string(64),
        "loggedInKey": random_string(64),
        "nonceKey": random_string(64),
        "authSalt": random_string(64),
        "secureAuthSalt": random_string(64),
        "loggedInSalt": random_string(64),
        "nonceSalt": random_string(64),
    });

    let tls_enabled = tls_enabled_for(&store.domain, routing.tls_enabled);
    let scheme = if tls_enabled { "https" } else { "http" };

    let values = json!({
        "storeName": store.name,
        "storeId": store.id.to_string(),
        "domain": store.domain,
        "namespace": { "name": store.namespace },
        "mysql": {
            "rootPassword": root_password,
            "database": "woocommerce",
            "user": "woocommerce",
            "password": mysql_password,
        },
        "wordpress": {
            "adminUser": "admin",
            "adminPassword": admin_password,
            "adminEmail": "admin@example.com",
            "siteTitle": store.name,
            "siteUrl": format!("{}://{}", scheme, store.domain),
            "salts": salts,
        },
        "ingress": {
            "className": cluster.ingress_class_name,
            "tls": { "enabled": tls_enabled },
        },
    });

    StoreValues {
        values,
        admin_password,
    }
}

/// Assemble the full values tree for a store.
pub fn assemble(
    store: &Store,
    cluster: &ClusterConfig,
    routing: &RoutingConfig,
) -> Result<StoreValues> {
    let base = load_base_values(&cluster.helm_chart_path, &cluster.values_profile)?;
    let overlay = build_overlay(store, cluster, routing);
    Ok(StoreValues {
        values: deep_merge(base, overlay.values),
        admin_password: overlay.admin_password,
    })
}

/// Write the values tree to a uniquely-named temp file. Helm accepts JSON
/// values files. The file is removed when the handle drops, so keep it
/// alive for the duration of the install.
pub fn write_values_file(values: &Value) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("store-values-")
        .suffix(".json")
        .tempfile()
        .wrap_err("Failed to create values temp file")?;
    let body = serde_json::to_vec(values).wrap_err("Failed to serialize values")?;
    file.write_all(&body)
        .wrap_err("Failed to write values temp file")?;
    file.flush().wrap_err("Failed to flush values temp file")?;
    Ok(file)
}
