//! Deployment Driver
//!
//! Executes Helm actions for a resolved deployment target: namespace
//! preparation, `upgrade --install` with layered values, uninstall and the
//! cleanup policy. The driver never rolls back; failures are surfaced as-is
//! and the reconciler reports what is left in the cluster.

use crate::catalog::ModuleDefinition;
use crate::domain::labels;
use crate::domain::ports::{ClusterInspectorRef, ReleaseManagerRef, ReleaseSpec};
use crate::domain::{CleanupPolicy, DeploymentTarget, ResourceClass, ResourceEnvelope};
use crate::error::{Error, Result};
use crate::metrics::LifecycleMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Value trees the driver injects; caller overrides under them are dropped
pub const RESERVED_VALUE_ROOTS: [&str; 2] = ["tenant", "module"];

fn is_reserved_key(key: &str) -> bool {
    let root = key.split(|c| c == '.' || c == '[').next().unwrap_or(key);
    RESERVED_VALUE_ROOTS.contains(&root)
}

/// Default wait budget for workloads to become ready
pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(300);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the deployment driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Wait budget when the request does not specify one
    pub default_timeout: Duration,
    /// Pass the tier envelope as `tenant.resources.*`
    pub inject_resource_values: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_DEPLOY_TIMEOUT,
            inject_resource_values: true,
        }
    }
}

// =============================================================================
// Deploy Plan & Results
// =============================================================================

/// Everything the driver needs to install one module
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub target: DeploymentTarget,
    pub tier: String,
    pub chart: PathBuf,
    /// Module default values file
    pub base_values: Option<PathBuf>,
    /// Tier overlay (or the default values file when no overlay exists)
    pub overlay: Option<PathBuf>,
    pub envelope: ResourceEnvelope,
    /// Catalog `--set` values
    pub helm_values: BTreeMap<String, String>,
    /// Caller-supplied `--set` values
    pub overrides: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl DeployPlan {
    pub fn new(
        target: DeploymentTarget,
        module: &ModuleDefinition,
        tier: &str,
        envelope: ResourceEnvelope,
        overlay: Option<PathBuf>,
    ) -> Self {
        Self {
            target: target.with_tier(tier),
            tier: tier.to_string(),
            chart: module.chart_path.clone(),
            base_values: module.values_file.clone(),
            overlay,
            envelope,
            helm_values: module
                .helm_values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
            overrides: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Values files in application order, without duplicates
    pub fn values_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.base_values.iter().cloned().collect();
        if let Some(overlay) = &self.overlay {
            if !files.contains(overlay) {
                files.push(overlay.clone());
            }
        }
        files
    }
}

/// Outcome of a successful deploy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub namespace: String,
    pub release_name: String,
    pub tier: String,
    pub namespace_created: bool,
    pub values_files: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,
    pub duration_ms: u64,
}

/// A secondary resource class that could not be removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupFailure {
    pub class: ResourceClass,
    pub error: String,
}

/// Outcome of an undeploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndeployResult {
    pub namespace: String,
    pub release_name: String,
    /// False when the release was already gone (forced disable)
    pub release_removed: bool,
    pub policy: CleanupPolicy,
    /// Objects deleted per resource class
    pub deleted: BTreeMap<ResourceClass, usize>,
    pub residual_cleanup_failures: Vec<CleanupFailure>,
}

// =============================================================================
// Deployment Driver
// =============================================================================

/// Drives Helm and cleanup for one target at a time
pub struct DeploymentDriver {
    config: DriverConfig,
    releases: ReleaseManagerRef,
    cluster: ClusterInspectorRef,
    metrics: Option<LifecycleMetrics>,
}

impl DeploymentDriver {
    pub fn new(
        config: DriverConfig,
        releases: ReleaseManagerRef,
        cluster: ClusterInspectorRef,
    ) -> Self {
        Self {
            config,
            releases,
            cluster,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: LifecycleMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record_helm(&self, action: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_helm(action, success);
        }
    }

    /// Labels a tenant namespace is created with
    pub fn namespace_labels(target: &DeploymentTarget) -> BTreeMap<String, String> {
        let mut ns_labels = BTreeMap::new();
        ns_labels.insert(labels::TENANT.to_string(), target.tenant.clone());
        ns_labels.insert(labels::ENVIRONMENT.to_string(), target.environment.clone());
        ns_labels.insert(
            labels::MANAGED_BY.to_string(),
            labels::MANAGED_BY_SPANDA.to_string(),
        );
        ns_labels
    }

    /// The Helm invocation for a plan
    pub fn release_spec(&self, plan: &DeployPlan) -> ReleaseSpec {
        let target = &plan.target;
        let mut set_values = plan.helm_values.clone();
        for (key, value) in &plan.overrides {
            if is_reserved_key(key) {
                warn!("Ignoring override {} for {}: reserved for injected values", key, target);
                continue;
            }
            set_values.insert(key.clone(), value.clone());
        }

        if self.config.inject_resource_values {
            set_values.insert("tenant.resources.cpu".into(), plan.envelope.cpu.clone());
            set_values.insert("tenant.resources.memory".into(), plan.envelope.memory.clone());
            set_values.insert("tenant.resources.storage".into(), plan.envelope.storage.clone());
        }

        // injected values always win
        set_values.insert("tenant.name".into(), target.tenant.clone());
        set_values.insert("tenant.tier".into(), plan.tier.clone());
        set_values.insert("tenant.environment".into(), target.environment.clone());
        set_values.insert("module.name".into(), target.module.clone());

        ReleaseSpec {
            release: target.release_name.clone(),
            namespace: target.namespace.clone(),
            module: target.module.clone(),
            chart: plan.chart.clone(),
            values_files: plan.values_files(),
            set_values,
            timeout: plan.timeout.unwrap_or(self.config.default_timeout),
            namespace_labels: Self::namespace_labels(target),
        }
    }

    /// Install or upgrade the module and wait for readiness
    #[instrument(skip(self, plan), fields(target = %plan.target))]
    pub async fn deploy(&self, plan: &DeployPlan) -> Result<DeployResult> {
        let started = Instant::now();
        let target = &plan.target;

        let namespace_created = self
            .cluster
            .ensure_namespace(&target.namespace, &Self::namespace_labels(target))
            .await?;

        let spec = self.release_spec(plan);
        info!(
            "Deploying {} (tier {}, timeout {}s)",
            target,
            plan.tier,
            spec.timeout.as_secs()
        );

        let outcome = self.releases.upgrade_install(&spec).await;
        self.record_helm("upgrade", outcome.is_ok());
        let outcome = outcome?;

        Ok(DeployResult {
            namespace: target.namespace.clone(),
            release_name: target.release_name.clone(),
            tier: plan.tier.clone(),
            namespace_created,
            values_files: spec.values_files,
            revision: outcome.revision,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Uninstall the release, then apply the cleanup policy. Cleanup
    /// failures are collected into the result. With `tolerate_missing`, a
    /// missing release does not stop the cleanup.
    #[instrument(skip_all, fields(target = %target, policy = %policy))]
    pub async fn undeploy(
        &self,
        target: &DeploymentTarget,
        policy: CleanupPolicy,
        tolerate_missing: bool,
    ) -> Result<UndeployResult> {
        let uninstalled = self
            .releases
            .uninstall(&target.release_name, &target.namespace)
            .await;
        self.record_helm("uninstall", uninstalled.is_ok());

        let release_removed = match uninstalled {
            Ok(_) => true,
            Err(Error::ReleaseNotFound { .. }) if tolerate_missing => {
                warn!("Release {} not found, continuing with cleanup", target);
                false
            }
            Err(e) => return Err(e),
        };

        let mut deleted = BTreeMap::new();
        let mut residual_cleanup_failures = Vec::new();

        for class in policy.resource_classes() {
            match self
                .cluster
                .delete_resources(&target.namespace, class, &target.label_selector)
                .await
            {
                Ok(count) => {
                    deleted.insert(class, count);
                }
                Err(e) => {
                    warn!("Cleanup of {} for {} failed: {}", class, target, e);
                    residual_cleanup_failures.push(CleanupFailure {
                        class,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Undeployed {} ({} classes cleaned, {} failures)",
            target,
            deleted.len(),
            residual_cleanup_failures.len()
        );

        Ok(UndeployResult {
            namespace: target.namespace.clone(),
            release_name: target.release_name.clone(),
            release_removed,
            policy,
            deleted,
            residual_cleanup_failures,
        })
    }
}
