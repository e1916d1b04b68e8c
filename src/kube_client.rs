//! Kubernetes driver: namespace lifecycle, pod readiness, install job wait.

use eyre::{eyre, Result, WrapErr};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll cadence while waiting on namespace deletion
const NAMESPACE_POLL_SECS: u64 = 5;
/// Poll cadence while waiting on the install job
const JOB_POLL_SECS: u64 = 10;
/// How long a job may be absent before pod readiness is probed as an
/// alternative completion signal
const JOB_ABSENT_PROBE_SECS: u64 = 180;

pub const NAMESPACE_DELETE_TIMEOUT_SECS: u64 = 600;
pub const JOB_WAIT_TIMEOUT_SECS: u64 = 900;
pub const JOB_BACKOFF_LIMIT: i32 = 5;

/// Readiness of a single pod: ready iff every container status reports ready.
#[derive(Debug, Clone)]
pub struct PodStatus {
    pub name: String,
    pub ready: bool,
}

#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    /// Connect using an explicit kubeconfig when configured, otherwise the
    /// inferred config (default kubeconfig, then in-cluster credentials).
    pub async fn connect(kubeconfig_path: Option<&Path>) -> Result<Self> {
        let config = match kubeconfig_path {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .wrap_err_with(|| format!("Failed to read kubeconfig {}", path.display()))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .wrap_err("Failed to build Kubernetes config from kubeconfig")?
            }
            None => Config::infer()
                .await
                .wrap_err("Failed to infer Kubernetes config")?,
        };
        let client = Client::try_from(config).wrap_err("Failed to build Kubernetes client")?;
        Ok(Self { client })
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        match self.namespaces().get(namespace).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e).wrap_err_with(|| format!("Failed to read namespace {}", namespace)),
        }
    }

    /// Idempotent create: an already-existing namespace is not an error.
    pub async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let body = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        match self.namespaces().create(&PostParams::default(), &body).await {
            Ok(_) => {
                info!(namespace, "namespace created");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(namespace, "namespace already exists");
                Ok(())
            }
            Err(e) => Err(e).wrap_err_with(|| format!("Failed to create namespace {}", namespace)),
        }
    }

    /// Idempotent delete: an already-absent namespace is not an error.
    pub async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        match self
            .namespaces()
            .delete(namespace, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e).wrap_err_with(|| format!("Failed to delete namespace {}", namespace)),
        }
    }

    /// Poll until the namespace is gone. Namespace finalizers can hold
    /// deletion for a while, hence the generous default timeout.
    pub async fn wait_for_namespace_deletion(
        &self,
        namespace: &str,
        timeout_secs: u64,
    ) -> Result<()> {
        let mut waited = 0u64;
        while waited < timeout_secs {
            if !self.namespace_exists(namespace).await? {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(NAMESPACE_POLL_SECS)).await;
            waited += NAMESPACE_POLL_SECS;
        }
        Err(eyre!("Namespace {} deletion timed out", namespace))
    }

    /// Readiness of every pod matching the label selector.
    pub async fn get_pod_status(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodStatus>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .wrap_err_with(|| format!("Failed to list pods in {}", namespace))?;

        Ok(pods
            .items
            .iter()
            .map(|pod| {
                let name = pod.metadata.name.clone().unwrap_or_default();
                let ready = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.container_statuses.as_ref())
                    .map(|statuses| !statuses.is_empty() && statuses.iter().all(|cs| cs.ready))
                    .unwrap_or(false);
                PodStatus { name, ready }
            })
            .collect())
    }

    /// Wait for the chart's install job to complete.
    ///
    /// The job may never be observed at all: some charts garbage-collect a
    /// completed job before the first poll lands. Three signals count as
    /// success: succeeded >= 1, job deleted after we saw it, or the job
    /// absent for over three minutes while a WordPress pod is Running and
    /// ready. Do not simplify this to job-only polling.
    pub async fn wait_for_job_completion(
        &self,
        namespace: &str,
        job_name: &str,
        timeout_secs: u64,
        backoff_limit: i32,
    ) -> Result<()> {
        info!(namespace, job = job_name, "waiting for install job");
        let mut waited = 0u64;
        let mut seen_job = false;

        while waited < timeout_secs {
            match self.jobs(namespace).get(job_name).await {
                Ok(job) => {
                    if !seen_job {
                        info!(job = job_name, "install job found");
                    }
                    seen_job = true;

                    let status = job.status.unwrap_or_default();
                    let succeeded = status.succeeded.unwrap_or(0);
                    let failed = status.failed.unwrap_or(0);
                    debug!(job = job_name, succeeded, failed, waited, "job status");

                    if succeeded >= 1 {
                        info!(job = job_name, waited, "install job complete");
                        return Ok(());
                    }
                    if failed >= backoff_limit {
                        return Err(eyre!("Job {} failed", job_name));
                    }
                }
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    if seen_job {
                        info!(job = job_name, "install job deleted after completion");
                        return Ok(());
                    }
                    // Not created yet, or completed and garbage-collected
                    // before we ever saw it.
                    if waited > JOB_ABSENT_PROBE_SECS && self.is_wordpress_ready(namespace).await {
                        info!(
                            job = job_name,
                            waited, "install job absent but WordPress is ready, assuming complete"
                        );
                        return Ok(());
                    }
                    if waited % 30 == 0 {
                        debug!(job = job_name, waited, "install job not yet created");
                    }
                }
                Err(e) => {
                    return Err(e)
                        .wrap_err_with(|| format!("Failed to read job {} status", job_name));
                }
            }

            tokio::time::sleep(Duration::from_secs(JOB_POLL_SECS)).await;
            waited += JOB_POLL_SECS;
        }

        Err(eyre!("Job {} timed out", job_name))
    }

    /// Alternative completion signal: any Running WordPress pod with a
    /// ready container.
    async fn is_wordpress_ready(&self, namespace: &str) -> bool {
        let pods = match self
            .pods(namespace)
            .list(&ListParams::default().labels("app=wordpress"))
            .await
        {
            Ok(pods) => pods,
            Err(e) => {
                warn!(error = %e, "WordPress readiness probe failed");
                return false;
            }
        };

        pods.items.iter().any(|pod| {
            let running = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running");
            let any_ready = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref())
                .is_some_and(|statuses| statuses.iter().any(|cs| cs.ready));
            running && any_ready
        })
    }
}
