//! Shopyard: a control plane that provisions isolated WooCommerce
//! storefronts on a Kubernetes cluster.
//!
//! Two processes share this library: the admission API
//! (`shopyard-api`) validates, records, and enqueues work; the
//! provisioning worker (`shopyard-worker`) consumes the queue and drives
//! Helm and the Kubernetes API. The registry (Postgres) is the single
//! source of truth for store state.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod helm;
pub mod kube_client;
pub mod metrics;
pub mod quota;
pub mod rate_limit;
pub mod types;
pub mod values;
pub mod worker;
