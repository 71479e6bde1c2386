//! Helm CLI Adapter
//!
//! Drives releases through the `helm` binary as a subprocess. Every call is
//! bounded by a timeout; failures are classified from Helm's stderr so the
//! orchestrator can tell a wait timeout from an execution error.

use crate::domain::ports::{ReleaseManager, ReleaseOutcome, ReleaseSpec};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Helm adapter
#[derive(Debug, Clone)]
pub struct HelmConfig {
    /// Helm executable
    pub binary: PathBuf,
    /// Kubeconfig context, if not the current one
    pub kube_context: Option<String>,
    /// Bound for commands that do not wait on workloads
    pub command_timeout: Duration,
    /// Extra time granted on top of `--timeout` before the process is killed
    pub wait_grace: Duration,
    /// Fail with `ChartNotFound` before invoking Helm on a missing local chart
    pub verify_chart_path: bool,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("helm"),
            kube_context: None,
            command_timeout: Duration::from_secs(30),
            wait_grace: Duration::from_secs(30),
            verify_chart_path: true,
        }
    }
}

// =============================================================================
// Helm CLI
// =============================================================================

/// `helm status -o json` (subset)
#[derive(Debug, Deserialize)]
struct ReleaseStatusJson {
    version: u32,
}

/// Release manager backed by the Helm CLI
pub struct HelmCli {
    config: HelmConfig,
}

impl HelmCli {
    pub fn new(config: HelmConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args).kill_on_drop(true);
        if let Some(context) = &self.config.kube_context {
            cmd.arg("--kube-context").arg(context);
        }
        cmd
    }

    /// Run Helm with a hard deadline. `Ok(None)` means the deadline passed.
    async fn run(&self, args: &[String], deadline: Duration) -> Result<Option<Output>> {
        debug!("helm {}", args.join(" "));
        let mut cmd = self.command(args);

        match tokio::time::timeout(deadline, cmd.output()).await {
            Ok(Ok(output)) => Ok(Some(output)),
            Ok(Err(e)) => Err(Error::HelmExecution {
                operation: args.first().cloned().unwrap_or_default(),
                release: String::new(),
                detail: format!("failed to run {}: {}", self.config.binary.display(), e),
            }),
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl ReleaseManager for HelmCli {
    #[instrument(skip(self, spec), fields(release = %spec.release, namespace = %spec.namespace))]
    async fn upgrade_install(&self, spec: &ReleaseSpec) -> Result<ReleaseOutcome> {
        if self.config.verify_chart_path && !spec.chart.exists() {
            return Err(Error::ChartNotFound {
                chart: spec.chart.display().to_string(),
            });
        }

        info!("Installing release {} from {}", spec.release, spec.chart.display());

        let output = self
            .run(&spec.to_args(), spec.timeout + self.config.wait_grace)
            .await?
            .ok_or_else(|| Error::Timeout {
                operation: "upgrade".to_string(),
                release: spec.release.clone(),
                duration: spec.timeout,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(
                "upgrade",
                &spec.release,
                &spec.namespace,
                &stderr,
                spec.timeout,
            ));
        }

        Ok(ReleaseOutcome {
            release: spec.release.clone(),
            namespace: spec.namespace.clone(),
            revision: parse_revision(&stdout),
            output: stdout,
        })
    }

    #[instrument(skip(self))]
    async fn uninstall(&self, release: &str, namespace: &str) -> Result<ReleaseOutcome> {
        info!("Uninstalling release {} from {}", release, namespace);

        let args = vec![
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        let output = self
            .run(&args, self.config.command_timeout)
            .await?
            .ok_or_else(|| Error::Timeout {
                operation: "uninstall".to_string(),
                release: release.to_string(),
                duration: self.config.command_timeout,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(
                "uninstall",
                release,
                namespace,
                &stderr,
                self.config.command_timeout,
            ));
        }

        Ok(ReleaseOutcome {
            release: release.to_string(),
            namespace: namespace.to_string(),
            revision: None,
            output: String::from_utf8_lossy(&output.stdout).to_string(),
        })
    }

    async fn revision(&self, release: &str, namespace: &str) -> Result<Option<u32>> {
        let args = vec![
            "status".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let Some(output) = self.run(&args, self.config.command_timeout).await? else {
            warn!("helm status for {} timed out", release);
            return Ok(None);
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return match classify_failure("status", release, namespace, &stderr, self.config.command_timeout) {
                Error::ReleaseNotFound { .. } => Ok(None),
                other => Err(other),
            };
        }

        let status: ReleaseStatusJson = serde_json::from_slice(&output.stdout)?;
        Ok(Some(status.version))
    }

    async fn health_check(&self) -> Result<bool> {
        let args = vec!["version".to_string(), "--short".to_string()];
        Ok(self
            .run(&args, self.config.command_timeout)
            .await?
            .map_or(false, |output| output.status.success()))
    }

    fn manager_name(&self) -> &str {
        "helm"
    }
}

/// Map Helm's stderr to an error variant
fn classify_failure(
    operation: &str,
    release: &str,
    namespace: &str,
    stderr: &str,
    timeout: Duration,
) -> Error {
    let detail = stderr.trim();
    let lower = detail.to_lowercase();

    if lower.contains("timed out waiting for the condition")
        || lower.contains("context deadline exceeded")
    {
        Error::Timeout {
            operation: operation.to_string(),
            release: release.to_string(),
            duration: timeout,
        }
    } else if lower.contains("release: not found") || lower.contains("release not found") {
        Error::ReleaseNotFound {
            release: release.to_string(),
            namespace: namespace.to_string(),
        }
    } else if lower.contains("path") && lower.contains("not found") {
        Error::ChartNotFound {
            chart: detail.to_string(),
        }
    } else {
        Error::HelmExecution {
            operation: operation.to_string(),
            release: release.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Revision from `helm upgrade` output (`REVISION: 3`)
fn parse_revision(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("REVISION:"))
        .and_then(|rev| rev.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    const TIMEOUT: Duration = Duration::from_secs(300);

    #[test]
    fn test_classify_wait_timeout() {
        let err = classify_failure(
            "upgrade",
            "acme-data-lake",
            "acme-dev",
            "Error: UPGRADE FAILED: timed out waiting for the condition",
            TIMEOUT,
        );
        assert_matches!(err, Error::Timeout { duration, .. } if duration == TIMEOUT);
    }

    #[test]
    fn test_classify_release_not_found() {
        let err = classify_failure(
            "uninstall",
            "acme-spark",
            "acme-dev",
            "Error: uninstall: Release not loaded: acme-spark: release: not found",
            TIMEOUT,
        );
        assert_matches!(err, Error::ReleaseNotFound { release, .. } if release == "acme-spark");
    }

    #[test]
    fn test_classify_chart_and_generic_failures() {
        let err = classify_failure(
            "upgrade",
            "acme-minio",
            "acme-dev",
            "Error: path \"charts/minio\" not found",
            TIMEOUT,
        );
        assert_matches!(err, Error::ChartNotFound { .. });

        let err = classify_failure(
            "upgrade",
            "acme-minio",
            "acme-dev",
            "Error: INSTALLATION FAILED: rendered manifests contain a resource that already exists",
            TIMEOUT,
        );
        assert_matches!(err, Error::HelmExecution { operation, .. } if operation == "upgrade");
    }

    #[test]
    fn test_parse_revision() {
        let stdout = "Release \"acme-minio\" has been upgraded. Happy Helming!\nNAME: acme-minio\nNAMESPACE: acme-dev\nSTATUS: deployed\nREVISION: 4\n";
        assert_eq!(parse_revision(stdout), Some(4));
        assert_eq!(parse_revision("no revision here"), None);
    }

    #[tokio::test]
    async fn test_missing_chart_fails_before_exec() {
        let helm = HelmCli::new(HelmConfig {
            binary: PathBuf::from("/nonexistent/helm"),
            ..Default::default()
        });
        let spec = ReleaseSpec {
            release: "acme-minio".into(),
            namespace: "acme-dev".into(),
            module: "minio".into(),
            chart: PathBuf::from("/nonexistent/charts/minio"),
            values_files: vec![],
            set_values: BTreeMap::new(),
            timeout: TIMEOUT,
            namespace_labels: BTreeMap::new(),
        };
        assert_matches!(
            helm.upgrade_install(&spec).await,
            Err(Error::ChartNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_health_check_without_binary() {
        let helm = HelmCli::new(HelmConfig {
            binary: PathBuf::from("/nonexistent/helm"),
            ..Default::default()
        });
        assert_matches!(helm.health_check().await, Err(Error::HelmExecution { .. }));
    }
}
