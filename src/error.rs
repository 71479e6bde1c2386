//! Error types for spandak8s
//!
//! Provides the error taxonomy shared by the catalog, the resolvers, the
//! deployment driver, the reconciler and the lifecycle orchestrator. Every
//! error can be classified into the [`Phase`] it occurred in so callers can
//! tell "module unknown" apart from "cluster unreachable" apart from
//! "deploy timed out but may still succeed".

use crate::domain::{DeploymentTarget, ModuleStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Unified error type
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Catalog Errors
    // =========================================================================
    #[error("Catalog parse error ({source_name}): {reason}")]
    CatalogParse { source_name: String, reason: String },

    #[error("Module not found: {module}")]
    ModuleNotFound { module: String },

    #[error("Module {module} has unsatisfied dependencies: {}", missing.join(", "))]
    DependencyUnsatisfied { module: String, missing: Vec<String> },

    #[error("Module {module} conflicts with {conflicts_with}")]
    Conflict { module: String, conflicts_with: String },

    // =========================================================================
    // Resolver Errors
    // =========================================================================
    #[error("Unknown resource tier: {tier}")]
    UnknownTier { tier: String },

    #[error("Invalid {field} identifier '{value}': {reason}")]
    InvalidIdentifier {
        field: String,
        value: String,
        reason: String,
    },

    // =========================================================================
    // Helm Errors
    // =========================================================================
    #[error("Helm chart not found: {chart}")]
    ChartNotFound { chart: String },

    #[error("Helm {operation} failed for release {release}: {detail}")]
    HelmExecution {
        operation: String,
        release: String,
        detail: String,
    },

    #[error("Helm {operation} for release {release} timed out after {}s", duration.as_secs())]
    Timeout {
        operation: String,
        release: String,
        duration: Duration,
    },

    #[error("Helm release not found: {release} in namespace {namespace}")]
    ReleaseNotFound { release: String, namespace: String },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes cluster unreachable: {0}")]
    ClusterUnreachable(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cleanup of {class} failed: {reason}")]
    Cleanup { class: String, reason: String },

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("API request validation failed: {0}")]
    ApiValidation(String),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Phase of a lifecycle operation in which an error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Catalog, identifier, tier or dependency checks. No side effects yet.
    Validation,
    /// Helm install/uninstall invocation
    Execution,
    /// Waiting for workloads to report ready
    DeployWait,
    /// Talking to the Kubernetes API
    ClusterQuery,
    /// Secondary resource cleanup after uninstall
    Cleanup,
    Internal,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Validation => write!(f, "validation"),
            Phase::Execution => write!(f, "execution"),
            Phase::DeployWait => write!(f, "deploy-wait"),
            Phase::ClusterQuery => write!(f, "cluster-query"),
            Phase::Cleanup => write!(f, "cleanup"),
            Phase::Internal => write!(f, "internal"),
        }
    }
}

impl Error {
    /// Phase this error belongs to
    pub fn phase(&self) -> Phase {
        match self {
            Error::CatalogParse { .. }
            | Error::ModuleNotFound { .. }
            | Error::DependencyUnsatisfied { .. }
            | Error::Conflict { .. }
            | Error::UnknownTier { .. }
            | Error::InvalidIdentifier { .. }
            | Error::ApiValidation(_)
            | Error::Configuration(_) => Phase::Validation,

            Error::ChartNotFound { .. }
            | Error::HelmExecution { .. }
            | Error::ReleaseNotFound { .. } => Phase::Execution,

            Error::Timeout { operation, .. } if is_deploy_operation(operation) => {
                Phase::DeployWait
            }
            Error::Timeout { .. } => Phase::Execution,

            Error::ClusterUnreachable(_) | Error::Kube(_) => Phase::ClusterQuery,

            Error::Cleanup { .. } => Phase::Cleanup,

            _ => Phase::Internal,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self.phase() {
            Phase::Validation => false,
            Phase::Execution => matches!(self, Error::HelmExecution { .. }),
            _ => true,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ClusterUnreachable(_) | Error::Kube(_) | Error::Timeout { .. } | Error::Http(_)
        )
    }

    /// HTTP status used when this error crosses the API boundary
    pub fn status_code(&self) -> u16 {
        match self {
            Error::ModuleNotFound { .. }
            | Error::ReleaseNotFound { .. }
            | Error::ChartNotFound { .. } => 404,
            Error::DependencyUnsatisfied { .. } | Error::Conflict { .. } => 409,
            Error::UnknownTier { .. }
            | Error::InvalidIdentifier { .. }
            | Error::ApiValidation(_) => 400,
            Error::Timeout { .. } => 504,
            Error::ClusterUnreachable(_) => 503,
            Error::Api { status, .. } => *status,
            _ => 500,
        }
    }

    /// Short machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal_error",
            Error::Configuration(_) => "configuration_error",
            Error::CatalogParse { .. } => "catalog_parse_error",
            Error::ModuleNotFound { .. } => "module_not_found",
            Error::DependencyUnsatisfied { .. } => "dependency_unsatisfied",
            Error::Conflict { .. } => "conflict",
            Error::UnknownTier { .. } => "unknown_tier",
            Error::InvalidIdentifier { .. } => "invalid_identifier",
            Error::ChartNotFound { .. } => "chart_not_found",
            Error::HelmExecution { .. } => "helm_execution_error",
            Error::Timeout { .. } => "timeout",
            Error::ReleaseNotFound { .. } => "release_not_found",
            Error::ClusterUnreachable(_) => "cluster_unreachable",
            Error::Kube(_) => "kubernetes_error",
            Error::Cleanup { .. } => "cleanup_failed",
            Error::ApiValidation(_) => "invalid_request",
            Error::Api { .. } => "api_error",
            Error::Http(_) => "http_error",
            Error::Yaml(_) => "yaml_error",
            Error::JsonParse(_) => "json_error",
            Error::Io(_) => "io_error",
        }
    }
}

/// Helm actions that wait on workloads
fn is_deploy_operation(operation: &str) -> bool {
    matches!(operation, "upgrade" | "install")
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a lifecycle operation, carrying the last status the
/// reconciler could observe after the failure.
#[derive(Error, Debug)]
#[error("{phase} phase failed: {source}")]
pub struct OperationError {
    pub phase: Phase,
    #[source]
    pub source: Error,
    pub last_status: Option<ModuleStatus>,
    /// Target the operation was resolved to, when the identifiers were valid
    pub target: Option<DeploymentTarget>,
}

impl OperationError {
    pub fn new(source: Error, last_status: Option<ModuleStatus>) -> Self {
        Self {
            phase: source.phase(),
            source,
            last_status,
            target: None,
        }
    }

    /// Attach the resolved target unless one is already set
    pub fn with_target(mut self, target: Option<DeploymentTarget>) -> Self {
        if self.target.is_none() {
            self.target = target;
        }
        self
    }
}

impl From<Error> for OperationError {
    fn from(source: Error) -> Self {
        Self::new(source, None)
    }
}
