//! Provisioning worker: consumes tasks from the broker and drives stores
//! through their lifecycle against Helm and the Kubernetes API.
//!
//! One task runs at a time per worker process; additional workers scale
//! horizontally. Both task kinds are idempotent: redelivery after a crash
//! must tolerate partial prior progress (namespace exists, release
//! installed, job already complete, row already gone).

use eyre::{eyre, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod queue;
pub mod retry;
pub mod tasks;

pub use queue::{Delivery, TaskQueue};
pub use retry::{classify_error, ErrorClass};
pub use tasks::Task;

use crate::config::Config;
use crate::db;
use crate::helm::{HelmClient, HelmError};
use crate::kube_client::{self, KubeClient};
use crate::metrics;
use crate::types::{self, StoreStatus};
use crate::values;

/// Name of the chart's first-run setup job
const INSTALL_JOB_NAME: &str = "woocommerce-install";
/// Deadline for all wordpress/mysql pods to report ready after install
const POD_READY_TIMEOUT_SECS: u64 = 600;
const POD_POLL_SECS: u64 = 10;
/// Back-off after a broker poll failure
const QUEUE_ERROR_BACKOFF_SECS: u64 = 5;

pub struct Worker {
    cfg: Arc<Config>,
    db: PgPool,
    queue: TaskQueue,
    helm: HelmClient,
    kube: KubeClient,
}

impl Worker {
    pub async fn new(cfg: Arc<Config>, db: PgPool, queue: TaskQueue) -> Result<Self> {
        let kube = KubeClient::connect(cfg.cluster.kubeconfig_path.as_deref()).await?;
        Ok(Self {
            cfg,
            db,
            queue,
            helm: HelmClient::new(),
            kube,
        })
    }

    /// Consume tasks until shutdown. Broker errors back off and retry
    /// rather than killing the process.
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let recovered = self.queue.recover().await?;
        if recovered > 0 {
            info!(recovered, "re-queued tasks stranded by a previous worker");
        }
        metrics::UP.set(1.0);
        info!("worker started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping worker");
                    return Ok(());
                }
                next = self.queue.next() => match next {
                    Ok(Some(delivery)) => self.handle(delivery).await,
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "Failed to poll task queue, backing off");
                        tokio::time::sleep(Duration::from_secs(QUEUE_ERROR_BACKOFF_SECS)).await;
                    }
                }
            }
        }
    }

    /// Execute one delivery with retries, then acknowledge it. Terminal
    /// provisioning failures record the Error state; terminal deletion
    /// failures leave the row in Deleting for an operator.
    async fn handle(&self, delivery: Delivery) {
        let task: Task = match serde_json::from_str(&delivery.payload) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, payload = %delivery.payload, "Discarding unparseable task");
                self.ack(&delivery).await;
                return;
            }
        };

        let max_retries = self.cfg.worker.retry_attempts;
        let delay = Duration::from_secs(self.cfg.worker.retry_delay_secs);
        let mut attempt = 0u32;

        let result = loop {
            let outcome = match task {
                Task::ProvisionStore { store_id } => self.provision_store(store_id).await,
                Task::DeleteStore { store_id } => self.delete_store(store_id).await,
            };
            match outcome {
                Ok(()) => break Ok(()),
                Err(e) if attempt < max_retries => {
                    attempt += 1;
                    let class = classify_error(&e.to_string());
                    metrics::TASK_RETRIES_TOTAL
                        .with_label_values(&[task.kind()])
                        .inc();
                    warn!(
                        task = task.kind(),
                        store_id = %task.store_id(),
                        attempt,
                        max_retries,
                        ?class,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Task attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = result {
            match task {
                Task::ProvisionStore { store_id } => {
                    error!(store_id = %store_id, error = %e, "Provisioning failed, recording Error state");
                    // The failing attempt's statements are gone; the Error
                    // write runs on a fresh connection from the pool.
                    if let Err(write_err) =
                        db::mark_store_error(&self.db, store_id, &e.to_string()).await
                    {
                        error!(store_id = %store_id, error = %write_err, "Failed to record store Error state");
                    }
                    metrics::PROVISIONS_TOTAL.with_label_values(&["error"]).inc();
                }
                Task::DeleteStore { store_id } => {
                    error!(store_id = %store_id, error = %e, "Deletion failed, store left in Deleting");
                    metrics::DELETIONS_TOTAL.with_label_values(&["error"]).inc();
                }
            }
        }

        self.ack(&delivery).await;
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            error!(error = %e, "Failed to acknowledge task");
        }
    }

    /// Drive one store from Pending to Ready.
    async fn provision_store(&self, store_id: Uuid) -> Result<()> {
        info!(store_id = %store_id, "provision start");
        let Some(mut store) = db::find_store_by_id(&self.db, store_id).await? else {
            info!(store_id = %store_id, "provision: store missing, nothing to do");
            return Ok(());
        };
        // Idempotent redelivery
        if store.status == StoreStatus::Ready.as_str() {
            info!(store_id = %store_id, "provision: store already ready");
            return Ok(());
        }

        if store.namespace.is_empty() || store.helm_release_name.is_empty() {
            let canonical = types::canonical_namespace(store.id);
            if store.namespace.is_empty() {
                store.namespace = canonical.clone();
            }
            if store.helm_release_name.is_empty() {
                store.helm_release_name = canonical;
            }
            db::update_store_namespace_release(
                &self.db,
                store.id,
                &store.namespace,
                &store.helm_release_name,
            )
            .await?;
        }

        let assembled = values::assemble(&store, &self.cfg.cluster, &self.cfg.routing)?;
        // Holds the temp file open until the install finishes
        let values_file = values::write_values_file(&assembled.values)?;
        let values_path = values_file.path().to_string_lossy().to_string();
        let chart_path = self.cfg.cluster.helm_chart_path.to_string_lossy().to_string();

        info!(namespace = %store.namespace, "ensuring namespace");
        self.kube.ensure_namespace(&store.namespace).await?;

        info!(
            release = %store.helm_release_name,
            chart = %chart_path,
            namespace = %store.namespace,
            "helm install start"
        );
        let timer = Instant::now();
        self.helm
            .install(&store.helm_release_name, &chart_path, &store.namespace, &values_path)
            .await?;
        metrics::HELM_INSTALL_DURATION_SECONDS.observe(timer.elapsed().as_secs_f64());
        info!(release = %store.helm_release_name, "helm install complete");

        self.kube
            .wait_for_job_completion(
                &store.namespace,
                INSTALL_JOB_NAME,
                kube_client::JOB_WAIT_TIMEOUT_SECS,
                kube_client::JOB_BACKOFF_LIMIT,
            )
            .await?;

        self.wait_for_store_pods(&store.namespace).await?;

        db::mark_store_ready(&self.db, store.id, "admin", &assembled.admin_password).await?;
        metrics::PROVISIONS_TOTAL.with_label_values(&["ready"]).inc();
        info!(store_id = %store.id, domain = %store.domain, "store ready");
        Ok(())
    }

    /// Require every wordpress and mysql pod ready, with at least one of
    /// each, before declaring the store Ready.
    async fn wait_for_store_pods(&self, namespace: &str) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(POD_READY_TIMEOUT_SECS);
        loop {
            let wordpress = self.kube.get_pod_status(namespace, "app=wordpress").await?;
            let mysql = self.kube.get_pod_status(namespace, "app=mysql").await?;
            let ready = !wordpress.is_empty()
                && !mysql.is_empty()
                && wordpress.iter().chain(mysql.iter()).all(|p| p.ready);
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(eyre!("Pods not ready"));
            }
            tokio::time::sleep(Duration::from_secs(POD_POLL_SECS)).await;
        }
    }

    /// Tear a store down and remove its row. Tolerates "already gone" at
    /// every step.
    async fn delete_store(&self, store_id: Uuid) -> Result<()> {
        info!(store_id = %store_id, "delete start");
        let Some(store) = db::find_store_by_id(&self.db, store_id).await? else {
            info!(store_id = %store_id, "delete: store missing, nothing to do");
            return Ok(());
        };

        info!(release = %store.helm_release_name, namespace = %store.namespace, "helm uninstall");
        match self
            .helm
            .uninstall(&store.helm_release_name, &store.namespace)
            .await
        {
            Ok(()) => {}
            Err(ref e) if is_release_not_found(e) => {
                warn!(release = %store.helm_release_name, "release already gone, continuing teardown");
            }
            Err(e) => return Err(e.into()),
        }

        info!(namespace = %store.namespace, "deleting namespace");
        self.kube.delete_namespace(&store.namespace).await?;
        self.kube
            .wait_for_namespace_deletion(
                &store.namespace,
                kube_client::NAMESPACE_DELETE_TIMEOUT_SECS,
            )
            .await?;

        db::delete_store(&self.db, store.id).await?;
        metrics::DELETIONS_TOTAL.with_label_values(&["done"]).inc();
        info!(store_id = %store_id, "store removed");
        Ok(())
    }
}

/// Helm reports a missing release as a failure; for teardown that just
/// means there is nothing to uninstall.
fn is_release_not_found(err: &HelmError) -> bool {
    matches!(err, HelmError::Failed { stderr } if stderr.to_lowercase().contains("release: not found"))
}
