//! Domain Ports - Core trait definitions for spandak8s
//!
//! These traits define the boundaries between the lifecycle logic and the
//! two external systems it drives: the Helm release manager and the
//! Kubernetes API. Adapters implement these traits to provide concrete
//! functionality.

use crate::domain::types::{PodCounts, ResourceClass, TenantNamespace, WorkloadSummary};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Helm Release Types
// =============================================================================

/// A fully resolved `helm upgrade --install` invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    /// Release name
    pub release: String,
    /// Target namespace
    pub namespace: String,
    /// Module being installed
    pub module: String,
    /// Chart location
    pub chart: PathBuf,
    /// Values files, applied in order (later files win)
    pub values_files: Vec<PathBuf>,
    /// `--set` overrides, applied after all values files
    pub set_values: BTreeMap<String, String>,
    /// Wait budget for all workloads to become ready
    pub timeout: Duration,
    /// Labels put on the namespace if Helm has to create it
    pub namespace_labels: BTreeMap<String, String>,
}

impl ReleaseSpec {
    /// Render as Helm CLI arguments (without the binary)
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            self.release.clone(),
            self.chart.display().to_string(),
            "--namespace".to_string(),
            self.namespace.clone(),
            "--create-namespace".to_string(),
        ];

        for file in &self.values_files {
            args.push("--values".to_string());
            args.push(file.display().to_string());
        }

        for (key, value) in &self.set_values {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, escape_set_value(value)));
        }

        args.push("--wait".to_string());
        args.push("--timeout".to_string());
        args.push(format!("{}s", self.timeout.as_secs()));
        args
    }
}

/// Escape a `--set` value so Helm reads it as one literal scalar.
/// Unescaped, `,` starts a new assignment and a leading `{` starts a list.
pub fn escape_set_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',' | '=' | '[' | '{') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Check a `--set` key: dotted path segments, list indexes and `\.` for
/// literal dots. Anything Helm would split on is rejected.
pub fn validate_set_key(key: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidIdentifier {
        field: "value key".to_string(),
        value: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("must not be empty"));
    }
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                chars.next();
            }
            c if c.is_ascii_alphanumeric() => {}
            '.' | '-' | '_' | '/' | '[' | ']' => {}
            other => return Err(invalid(&format!("character '{}' is not allowed", other))),
        }
    }
    if key.starts_with('.') || key.ends_with('.') || key.contains("..") {
        return Err(invalid("empty path segment"));
    }
    Ok(())
}

/// Result of a successful Helm action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOutcome {
    pub release: String,
    pub namespace: String,
    /// Release revision after the action, when Helm reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,
    /// Raw Helm output
    #[serde(default)]
    pub output: String,
}

// =============================================================================
// Release Manager Port
// =============================================================================

/// Port for Helm release operations
#[async_trait]
pub trait ReleaseManager: Send + Sync {
    /// Install or upgrade a release and wait for it to become ready
    async fn upgrade_install(&self, spec: &ReleaseSpec) -> Result<ReleaseOutcome>;

    /// Uninstall a release
    async fn uninstall(&self, release: &str, namespace: &str) -> Result<ReleaseOutcome>;

    /// Current revision of a release, `None` when it does not exist
    async fn revision(&self, release: &str, namespace: &str) -> Result<Option<u32>>;

    /// Check that Helm is usable
    async fn health_check(&self) -> Result<bool>;

    /// Get manager name
    fn manager_name(&self) -> &str;
}

// =============================================================================
// Cluster Inspector Port
// =============================================================================

/// Port for Kubernetes API operations
#[async_trait]
pub trait ClusterInspector: Send + Sync {
    /// Create the namespace if it does not exist. Returns true if created.
    async fn ensure_namespace(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<bool>;

    /// Check whether a namespace exists
    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    /// List Deployments and StatefulSets in `namespace` matching `selector`
    async fn list_workloads(&self, namespace: &str, selector: &str)
        -> Result<Vec<WorkloadSummary>>;

    /// Count pods in `namespace` matching `selector`
    async fn count_pods(&self, namespace: &str, selector: &str) -> Result<PodCounts>;

    /// Namespaces labelled as tenant namespaces
    async fn list_tenant_namespaces(&self) -> Result<Vec<TenantNamespace>>;

    /// Delete all objects of `class` in `namespace` matching `selector`.
    /// Returns the number of objects deleted.
    async fn delete_resources(
        &self,
        namespace: &str,
        class: ResourceClass,
        selector: &str,
    ) -> Result<usize>;

    /// Check API server connectivity
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ReleaseManagerRef = Arc<dyn ReleaseManager>;
pub type ClusterInspectorRef = Arc<dyn ClusterInspector>;
