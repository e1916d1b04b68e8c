//! Helm CLI driver.
//!
//! Invokes the external `helm` binary as a child process in its own process
//! group. `helm --wait` forks watcher children, and killing only the parent
//! leaves them orphaned, so timeout enforcement signals the whole group:
//! SIGTERM first, SIGKILL after a short grace window.
//!
//! Stdout is discarded for install/uninstall; stderr is drained on a
//! dedicated task so a chatty helm cannot fill the pipe buffer and stall
//! the child.

use serde::Deserialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, error, info};

const HELM_BIN: &str = "helm";

/// Wall-clock ceiling for `helm upgrade --install --wait`, enforced
/// independently of helm's own `--timeout 20m`.
const INSTALL_TIMEOUT_SECS: u64 = 1300;
const UNINSTALL_TIMEOUT_SECS: u64 = 300;
const LIST_TIMEOUT_SECS: u64 = 60;
/// Grace between SIGTERM and SIGKILL on timeout
const KILL_GRACE_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum HelmError {
    #[error("Helm command timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },
    #[error("{stderr}")]
    Failed { stderr: String },
    #[error("Failed to spawn helm: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of `helm list -o json`
#[derive(Debug, Clone, Deserialize)]
pub struct HelmRelease {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub chart: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HelmClient;

impl HelmClient {
    pub fn new() -> Self {
        HelmClient
    }

    /// Install or upgrade a release, waiting for workloads to settle.
    pub async fn install(
        &self,
        release_name: &str,
        chart_path: &str,
        namespace: &str,
        values_path: &str,
    ) -> Result<(), HelmError> {
        self.run(
            &[
                "upgrade",
                "--install",
                release_name,
                chart_path,
                "-n",
                namespace,
                "-f",
                values_path,
                "--wait",
                "--timeout",
                "20m",
            ],
            INSTALL_TIMEOUT_SECS,
            false,
        )
        .await?;
        Ok(())
    }

    /// Uninstall a release. A missing release is a failure here; the worker
    /// decides whether that matters.
    pub async fn uninstall(&self, release_name: &str, namespace: &str) -> Result<(), HelmError> {
        self.run(
            &["uninstall", release_name, "-n", namespace],
            UNINSTALL_TIMEOUT_SECS,
            false,
        )
        .await?;
        Ok(())
    }

    /// List releases in a namespace. Malformed JSON yields an empty list.
    pub async fn list_releases(&self, namespace: &str) -> Result<Vec<HelmRelease>, HelmError> {
        let output = self
            .run(
                &["list", "-n", namespace, "-o", "json"],
                LIST_TIMEOUT_SECS,
                true,
            )
            .await?;
        Ok(parse_releases(&output))
    }

    async fn run(
        &self,
        args: &[&str],
        timeout_secs: u64,
        capture_stdout: bool,
    ) -> Result<String, HelmError> {
        let rendered = format!("{} {}", HELM_BIN, args.join(" "));
        info!(command = %rendered, "helm command start");
        let start = Instant::now();

        let mut cmd = std::process::Command::new(HELM_BIN);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(if capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped());

        // New process group so a timeout kill reaps helm's own children too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = tokio::process::Command::from(cmd).spawn()?;
        let pid = child.id();
        debug!(?pid, "helm subprocess spawned");

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut collected: Vec<String> = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if collected.len() < 5 {
                        let head: String = line.chars().take(200).collect();
                        info!(line = %head, "helm stderr");
                    }
                    collected.push(line);
                }
            }
            collected
        });

        let stdout_task = if capture_stdout {
            let stdout = child.stdout.take();
            Some(tokio::spawn(async move {
                let mut buf = String::new();
                if let Some(mut stdout) = stdout {
                    let _ = stdout.read_to_string(&mut buf).await;
                }
                buf
            }))
        } else {
            None
        };

        let wait = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await;
        let status = match wait {
            Ok(result) => result?,
            Err(_) => {
                let elapsed_secs = start.elapsed().as_secs();
                error!(
                    command = %rendered,
                    elapsed_secs,
                    ?pid,
                    "helm command timed out, killing process group"
                );
                kill_process_group(pid, &mut child).await;
                let _ = stderr_task.await;
                return Err(HelmError::Timeout { elapsed_secs });
            }
        };

        let stderr_body = stderr_task.await.unwrap_or_default().join("\n");
        let stdout_body = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let detail = stderr_body.trim();
            error!(
                command = %rendered,
                code = status.code(),
                stderr = %detail.chars().take(500).collect::<String>(),
                "helm command failed"
            );
            return Err(HelmError::Failed {
                stderr: if detail.is_empty() {
                    "Helm command failed".to_string()
                } else {
                    detail.to_string()
                },
            });
        }

        info!(
            command = %rendered,
            elapsed_secs = start.elapsed().as_secs(),
            "helm command complete"
        );
        Ok(stdout_body)
    }
}

fn parse_releases(output: &str) -> Vec<HelmRelease> {
    serde_json::from_str(output).unwrap_or_default()
}

/// SIGTERM the child's process group, escalate to SIGKILL after a grace
/// window, and reap the child.
async fn kill_process_group(pid: Option<u32>, child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
        if tokio::time::timeout(Duration::from_secs(KILL_GRACE_SECS), child.wait())
            .await
            .is_err()
        {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
            let _ = child.wait().await;
        }
        return;
    }

    #[cfg(not(unix))]
    let _ = pid;
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_releases() {
        let output = r#"[
            {"name":"store-abc","namespace":"store-abc","revision":"1",
             "updated":"2026-07-01 10:00:00.000000 +0000 UTC","status":"deployed",
             "chart":"woocommerce-store-0.1.0","app_version":"6.5"}
        ]"#;
        let releases = parse_releases(output);
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].name, "store-abc");
        assert_eq!(releases[0].status.as_deref(), Some("deployed"));
    }

    #[test]
    fn test_parse_releases_malformed_json_is_empty() {
        assert!(parse_releases("not json").is_empty());
        assert!(parse_releases("").is_empty());
        assert!(parse_releases("{\"name\":\"x\"}").is_empty());
    }

    #[test]
    fn test_parse_releases_empty_array() {
        assert!(parse_releases("[]").is_empty());
    }
}
