//! Lifecycle Orchestrator
//!
//! Composes the catalog, the resolvers, the deployment driver and the
//! reconciler into the `enable` / `disable` / `status` operations:
//! - Validates requests before touching the cluster
//! - Short-circuits no-op requests from a fresh status query
//! - Executes Helm through the driver and applies the cleanup policy
//! - Re-queries the cluster to confirm the outcome
//!
//! The orchestrator keeps no state between calls. Lifecycle state is
//! inferred from the cluster at the start of every operation, so any number
//! of instances can run side by side. Two concurrent operations on the same
//! release are not serialized here; Helm's own release locking is the only
//! guard.

use crate::catalog::{CatalogSnapshot, CatalogStore, ModuleDefinition};
use crate::controlplane::backends::Backends;
use crate::controlplane::driver::{
    CleanupFailure, DeployPlan, DeployResult, DeploymentDriver, DriverConfig, UndeployResult,
};
use crate::controlplane::identity::IdentityResolver;
use crate::controlplane::reconciler::{Reconciler, TenantSummary};
use crate::controlplane::tier::TierResolver;
use crate::domain::labels;
use crate::domain::ports::validate_set_key;
use crate::domain::{
    CleanupPolicy, DeploymentTarget, LifecycleState, ModuleStatus, ResourceClass, ResourceTier,
};
use crate::error::{OperationError, Phase, Result};
use crate::metrics::LifecycleMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of a lifecycle operation
pub type OperationResult<T> = std::result::Result<T, OperationError>;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deployment driver settings
    pub driver: DriverConfig,
    /// Tier used when a request names none
    pub default_tier: String,
    /// Require dependencies to be deployed (and conflicts absent) in the
    /// target namespace before enabling a module
    pub enforce_dependencies: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            driver: DriverConfig::default(),
            default_tier: "bronze".to_string(),
            enforce_dependencies: true,
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Enable,
    Disable,
    Status,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Enable => write!(f, "enable"),
            Operation::Disable => write!(f, "disable"),
            Operation::Status => write!(f, "status"),
        }
    }
}

/// Enable a module for a tenant environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableRequest {
    pub tenant: String,
    pub environment: String,
    pub module: String,
    #[serde(default)]
    pub tier: Option<String>,
    /// Extra `--set` values
    #[serde(default)]
    pub config_overrides: BTreeMap<String, String>,
    /// Run Helm even if the module is already deployed and healthy
    #[serde(default)]
    pub reapply: bool,
    /// Wait budget override, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Disable a module for a tenant environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisableRequest {
    pub tenant: String,
    pub environment: String,
    pub module: String,
    #[serde(default)]
    pub cleanup: CleanupPolicy,
    /// Skip the absent short-circuit and the confirmation gate; tolerate a
    /// missing release so leftover resources are still cleaned
    #[serde(default)]
    pub force: bool,
    /// The caller has confirmed the removal
    #[serde(default)]
    pub confirmed: bool,
}

/// Request shape accepted at the API boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRequest {
    pub operation: Operation,
    pub tenant: String,
    pub environment: String,
    pub module: String,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub cleanup_policy: Option<CleanupPolicy>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub reapply: bool,
    #[serde(default)]
    pub config_overrides: BTreeMap<String, String>,
}

// =============================================================================
// Reports
// =============================================================================

/// What an operation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleOutcome {
    Deployed,
    NoopAlreadyDeployed,
    Undeployed,
    NoopAlreadyAbsent,
    ConfirmationRequired,
    Observed,
}

impl LifecycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Deployed => "deployed",
            LifecycleOutcome::NoopAlreadyDeployed => "noop_already_deployed",
            LifecycleOutcome::Undeployed => "undeployed",
            LifecycleOutcome::NoopAlreadyAbsent => "noop_already_absent",
            LifecycleOutcome::ConfirmationRequired => "confirmation_required",
            LifecycleOutcome::Observed => "observed",
        }
    }
}

/// Identity and replica details of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetails {
    pub namespace: String,
    pub release_name: String,
    pub ready_replicas: i32,
    pub desired_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub residual_cleanup_failures: Option<Vec<CleanupFailure>>,
}

/// Result of a lifecycle operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleReport {
    pub operation: Operation,
    pub outcome: LifecycleOutcome,
    pub success: bool,
    pub state: LifecycleState,
    pub message: String,
    pub details: ReportDetails,
    pub requires_confirmation: bool,
    /// Status observed after the operation
    pub status: ModuleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeployResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undeploy: Option<UndeployResult>,
}

impl LifecycleReport {
    fn new(
        operation: Operation,
        outcome: LifecycleOutcome,
        state: LifecycleState,
        message: String,
        status: ModuleStatus,
    ) -> Self {
        Self {
            operation,
            outcome,
            success: outcome != LifecycleOutcome::ConfirmationRequired
                && state != LifecycleState::Failed,
            state,
            message,
            details: ReportDetails {
                namespace: status.namespace.clone(),
                release_name: status.release_name.clone(),
                ready_replicas: status.ready_replicas,
                desired_replicas: status.desired_replicas,
                residual_cleanup_failures: None,
            },
            requires_confirmation: outcome == LifecycleOutcome::ConfirmationRequired,
            status,
            deploy: None,
            undeploy: None,
        }
    }
}

/// A failed lifecycle operation, in the report shape plus error fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    pub success: bool,
    pub state: LifecycleState,
    pub message: String,
    pub details: ReportDetails,
    /// Machine-readable error code
    pub error: String,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<ModuleStatus>,
}

impl LifecycleFailure {
    /// Details come from the last observed status, else from the resolved
    /// target with zero replicas
    pub fn new(operation: Option<Operation>, error: &OperationError) -> Self {
        let details = match (&error.last_status, &error.target) {
            (Some(status), _) => ReportDetails {
                namespace: status.namespace.clone(),
                release_name: status.release_name.clone(),
                ready_replicas: status.ready_replicas,
                desired_replicas: status.desired_replicas,
                residual_cleanup_failures: None,
            },
            (None, target) => ReportDetails {
                namespace: target.as_ref().map(|t| t.namespace.clone()).unwrap_or_default(),
                release_name: target
                    .as_ref()
                    .map(|t| t.release_name.clone())
                    .unwrap_or_default(),
                ready_replicas: 0,
                desired_replicas: 0,
                residual_cleanup_failures: None,
            },
        };

        Self {
            operation,
            success: false,
            state: LifecycleState::Failed,
            message: error.source.to_string(),
            details,
            error: error.source.code().to_string(),
            phase: error.phase,
            last_status: error.last_status.clone(),
        }
    }
}

/// Module statuses of one tenant environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub environment: String,
    pub namespace: String,
    pub modules: Vec<ModuleStatus>,
}

/// Module statuses across a tenant's environments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    pub tenant: String,
    pub environments: Vec<EnvironmentStatus>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Stateless coordinator for module lifecycle operations
pub struct LifecycleOrchestrator {
    config: OrchestratorConfig,
    catalog: Arc<CatalogStore>,
    identity: IdentityResolver,
    reconciler: Reconciler,
    driver: DeploymentDriver,
    backends: Backends,
    metrics: Option<LifecycleMetrics>,
}

impl LifecycleOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: OrchestratorConfig,
        catalog: Arc<CatalogStore>,
        backends: Backends,
        metrics: Option<LifecycleMetrics>,
    ) -> Arc<Self> {
        let mut driver = DeploymentDriver::new(
            config.driver.clone(),
            backends.releases.clone(),
            backends.cluster.clone(),
        );
        if let Some(metrics) = &metrics {
            driver = driver.with_metrics(metrics.clone());
        }

        Arc::new(Self {
            config,
            catalog,
            identity: IdentityResolver::new(),
            reconciler: Reconciler::new(backends.cluster.clone(), backends.releases.clone()),
            driver,
            backends,
            metrics,
        })
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Tiers of the active catalog
    pub fn tiers(&self) -> Vec<ResourceTier> {
        TierResolver::new(self.catalog.snapshot()).tiers()
    }

    /// Whether Helm and the cluster are usable
    pub async fn health_check(&self) -> Result<(bool, bool)> {
        let helm = self.backends.releases.health_check().await.unwrap_or(false);
        let cluster = self.backends.cluster.health_check().await?;
        Ok((helm, cluster))
    }

    fn record(&self, operation: Operation, outcome: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(&operation.to_string(), outcome, started.elapsed());
        }
    }

    fn finish(&self, report: LifecycleReport, started: Instant) -> LifecycleReport {
        self.record(report.operation, report.outcome.as_str(), started);
        info!(
            "{} {}: {} ({})",
            report.operation, report.details.release_name, report.outcome.as_str(), report.state
        );
        report
    }

    fn fail(&self, operation: Operation, error: OperationError, started: Instant) -> OperationError {
        self.record(operation, "failed", started);
        warn!("{} failed in {} phase: {}", operation, error.phase, error.source);
        error
    }

    fn advance(&self, target: &DeploymentTarget, from: LifecycleState, to: LifecycleState) {
        if from.can_transition_to(to) {
            debug!("{}: {} -> {}", target, from, to);
        } else {
            warn!("{}: unexpected transition {} -> {}", target, from, to);
        }
    }

    /// Canonical target of a request, `None` when an identifier is invalid
    fn request_target(
        &self,
        tenant: &str,
        environment: &str,
        module: &str,
    ) -> Option<DeploymentTarget> {
        self.identity
            .target(tenant, environment, module, &labels::module_selector(module))
            .ok()
    }

    /// Target for a module, using the catalog selector when the module is
    /// known and the canonical selector otherwise
    fn target_for(
        &self,
        snapshot: &CatalogSnapshot,
        tenant: &str,
        environment: &str,
        module: &str,
    ) -> Result<DeploymentTarget> {
        let selector = snapshot
            .get(module)
            .map(|def| def.label_selector.clone())
            .unwrap_or_else(|_| labels::module_selector(module));
        self.identity.target(tenant, environment, module, &selector)
    }

    // =========================================================================
    // Enable
    // =========================================================================

    /// Enable a module
    pub async fn enable(&self, request: EnableRequest) -> OperationResult<LifecycleReport> {
        let started = Instant::now();
        let target = self.request_target(&request.tenant, &request.environment, &request.module);
        self.enable_inner(request, started)
            .await
            .map(|report| self.finish(report, started))
            .map_err(|e| self.fail(Operation::Enable, e.with_target(target), started))
    }

    async fn enable_inner(
        &self,
        request: EnableRequest,
        started: Instant,
    ) -> OperationResult<LifecycleReport> {
        let snapshot = self.catalog.snapshot();
        let tiers = TierResolver::new(snapshot.clone());

        // 1. Validation, no side effects
        let module: &ModuleDefinition = snapshot.get(&request.module)?;
        let tier = request
            .tier
            .clone()
            .unwrap_or_else(|| self.config.default_tier.clone());
        let envelope = tiers.envelope_for(module, &tier)?;
        for key in request.config_overrides.keys() {
            validate_set_key(key)?;
        }
        let target = self.identity.target(
            &request.tenant,
            &request.environment,
            &module.name,
            &module.label_selector,
        )?;

        // 2. Idempotency gate
        let current = self.reconciler.status_of(&target).await?;
        let observed = LifecycleState::observed(&current);
        if current.deployed && current.healthy && !request.reapply {
            let message = format!(
                "Module {} is already deployed and healthy in {}",
                module.name, target.namespace
            );
            return Ok(LifecycleReport::new(
                Operation::Enable,
                LifecycleOutcome::NoopAlreadyDeployed,
                LifecycleState::Deployed,
                message,
                current,
            ));
        }

        if self.config.enforce_dependencies {
            let deployed = self.reconciler.deployed_modules(&target.namespace).await?;
            snapshot.validate_addition(&deployed, &module.name)?;
        }

        // 3. Values selection
        let overlay = tiers.values_overlay_for(module, &tier)?;
        let plan = DeployPlan::new(target.clone(), module, &tier, envelope, overlay)
            .with_overrides(request.config_overrides.clone())
            .with_timeout(request.timeout_secs.map(Duration::from_secs));

        // 4. Deploy
        self.advance(&target, observed, LifecycleState::Deploying);
        let deployed = match self.driver.deploy(&plan).await {
            Ok(result) => result,
            Err(e) => {
                self.advance(&target, LifecycleState::Deploying, LifecycleState::Failed);
                let last_status = self.reconciler.status_of(&target).await.ok();
                return Err(OperationError::new(e, last_status).with_target(Some(target)));
            }
        };

        // 5. Confirm
        let confirmed = self.reconciler.status_of(&target).await?;
        let (state, message) = if confirmed.deployed {
            (
                LifecycleState::Deployed,
                format!(
                    "Module {} deployed to {} with tier {} ({}/{} replicas ready) in {}ms",
                    module.name,
                    target.namespace,
                    tier,
                    confirmed.ready_replicas,
                    confirmed.desired_replicas,
                    started.elapsed().as_millis()
                ),
            )
        } else {
            (
                LifecycleState::Deploying,
                format!(
                    "Release {} installed in {}; no workloads observed yet",
                    target.release_name, target.namespace
                ),
            )
        };
        self.advance(&target, LifecycleState::Deploying, state);

        let mut report = LifecycleReport::new(
            Operation::Enable,
            LifecycleOutcome::Deployed,
            state,
            message,
            confirmed,
        );
        report.deploy = Some(deployed);
        Ok(report)
    }

    // =========================================================================
    // Disable
    // =========================================================================

    /// Disable a module
    pub async fn disable(&self, request: DisableRequest) -> OperationResult<LifecycleReport> {
        let started = Instant::now();
        let target = self.request_target(&request.tenant, &request.environment, &request.module);
        self.disable_inner(request)
            .await
            .map(|report| self.finish(report, started))
            .map_err(|e| self.fail(Operation::Disable, e.with_target(target), started))
    }

    async fn disable_inner(&self, request: DisableRequest) -> OperationResult<LifecycleReport> {
        let snapshot = self.catalog.snapshot();
        let target = self.target_for(
            &snapshot,
            &request.tenant,
            &request.environment,
            &request.module,
        )?;

        // 1. Absent short-circuit
        let current = self.reconciler.status_of(&target).await?;
        let observed = LifecycleState::observed(&current);
        if !current.deployed && !request.force {
            let message = format!(
                "Module {} is not deployed in {}",
                request.module, target.namespace
            );
            return Ok(LifecycleReport::new(
                Operation::Disable,
                LifecycleOutcome::NoopAlreadyAbsent,
                LifecycleState::Absent,
                message,
                current,
            ));
        }

        // 2. Confirmation gate
        if !request.force && !request.confirmed {
            let mut message = format!(
                "Disabling {} in {} requires confirmation",
                request.module, target.namespace
            );
            if request.cleanup.deletes(ResourceClass::PersistentVolumeClaims) {
                message.push_str("; persistent volume claims will be deleted");
            }
            return Ok(LifecycleReport::new(
                Operation::Disable,
                LifecycleOutcome::ConfirmationRequired,
                observed,
                message,
                current,
            ));
        }

        // 3. Undeploy
        self.advance(&target, observed, LifecycleState::Undeploying);
        let undeployed = match self
            .driver
            .undeploy(&target, request.cleanup, request.force)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.advance(&target, LifecycleState::Undeploying, LifecycleState::Failed);
                let last_status = self.reconciler.status_of(&target).await.ok();
                return Err(OperationError::new(e, last_status).with_target(Some(target)));
            }
        };

        // 4. Confirm
        let after = self.reconciler.status_of(&target).await?;
        let state = if after.deployed {
            LifecycleState::Undeploying
        } else {
            LifecycleState::Absent
        };
        self.advance(&target, LifecycleState::Undeploying, state);

        let failures = undeployed.residual_cleanup_failures.clone();
        let mut message = format!(
            "Module {} removed from {} (cleanup: {})",
            request.module, target.namespace, request.cleanup
        );
        if !failures.is_empty() {
            message.push_str(&format!("; {} cleanup step(s) failed", failures.len()));
        }

        let mut report = LifecycleReport::new(
            Operation::Disable,
            LifecycleOutcome::Undeployed,
            state,
            message,
            after,
        );
        if !failures.is_empty() {
            report.details.residual_cleanup_failures = Some(failures);
        }
        report.undeploy = Some(undeployed);
        Ok(report)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Live status of a module
    pub async fn status(
        &self,
        tenant: &str,
        environment: &str,
        module: &str,
    ) -> OperationResult<ModuleStatus> {
        let snapshot = self.catalog.snapshot();
        let target = self.target_for(&snapshot, tenant, environment, module)?;
        self.reconciler
            .status_of(&target)
            .await
            .map_err(|e| OperationError::from(e).with_target(Some(target)))
    }

    /// Status of every module deployed for a tenant
    pub async fn tenant_status(&self, tenant: &str) -> OperationResult<TenantStatus> {
        self.identity.validate_tenant(tenant)?;
        let snapshot = self.catalog.snapshot();
        let summaries = self.reconciler.tenants(Some(tenant)).await?;

        let mut environments = Vec::new();
        for env in summaries.into_iter().flat_map(|s| s.environments) {
            let mut modules = Vec::with_capacity(env.modules.len());
            for module in &env.modules {
                let target = self.target_for(&snapshot, tenant, &env.environment, module)?;
                modules.push(self.reconciler.status_of(&target).await?);
            }
            environments.push(EnvironmentStatus {
                environment: env.environment,
                namespace: env.namespace,
                modules,
            });
        }

        Ok(TenantStatus {
            tenant: tenant.to_string(),
            environments,
        })
    }

    /// All tenants and the modules deployed for them
    pub async fn tenants(&self) -> OperationResult<Vec<TenantSummary>> {
        Ok(self.reconciler.tenants(None).await?)
    }

    /// Dispatch an API-shaped request
    pub async fn execute(&self, request: LifecycleRequest) -> OperationResult<LifecycleReport> {
        match request.operation {
            Operation::Enable => {
                self.enable(EnableRequest {
                    tenant: request.tenant,
                    environment: request.environment,
                    module: request.module,
                    tier: request.tier,
                    config_overrides: request.config_overrides,
                    reapply: request.reapply,
                    timeout_secs: None,
                })
                .await
            }
            Operation::Disable => {
                self.disable(DisableRequest {
                    tenant: request.tenant,
                    environment: request.environment,
                    module: request.module,
                    cleanup: request.cleanup_policy.unwrap_or_default(),
                    force: request.force,
                    confirmed: request.confirmed,
                })
                .await
            }
            Operation::Status => {
                let status = self
                    .status(&request.tenant, &request.environment, &request.module)
                    .await?;
                let state = LifecycleState::observed(&status);
                let message = format!(
                    "Module {} is {} in {}",
                    request.module, status.phase, status.namespace
                );
                Ok(LifecycleReport::new(
                    Operation::Status,
                    LifecycleOutcome::Observed,
                    state,
                    message,
                    status,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{
        BackendFactory, InMemoryCluster, InstallBehavior, SimulatedHelm,
    };
    use crate::domain::WorkloadPhase;
    use crate::error::{Error, Phase};
    use assert_matches::assert_matches;
    use std::path::{Path, PathBuf};

    const CATALOG: &str = r#"
modules:
  - name: data-lake
    category: data-storage
    chart_path: data-lake
    values_file: values.yaml
    values_files:
      bronze: values-bronze.yaml
  - name: minio
    category: data-storage
    chart_path: minio
  - name: spark
    category: compute
    chart_path: spark
    dependencies: [minio]
  - name: ceph
    category: data-storage
    chart_path: ceph
    conflicts: [minio]
"#;

    struct Fixture {
        orchestrator: Arc<LifecycleOrchestrator>,
        cluster: Arc<InMemoryCluster>,
        helm: Arc<SimulatedHelm>,
        metrics: LifecycleMetrics,
    }

    fn fixture() -> Fixture {
        let snapshot = CatalogSnapshot::from_yaml(CATALOG, "test", Path::new("/charts")).unwrap();
        let (backends, cluster, helm) = BackendFactory::standalone();
        let metrics = LifecycleMetrics::new().unwrap();
        let orchestrator = LifecycleOrchestrator::new(
            OrchestratorConfig::default(),
            CatalogStore::from_snapshot(snapshot),
            backends,
            Some(metrics.clone()),
        );
        Fixture {
            orchestrator,
            cluster,
            helm,
            metrics,
        }
    }

    fn enable(module: &str, tier: &str) -> EnableRequest {
        EnableRequest {
            tenant: "acme".into(),
            environment: "dev".into(),
            module: module.into(),
            tier: Some(tier.into()),
            ..Default::default()
        }
    }

    fn disable(module: &str, cleanup: CleanupPolicy) -> DisableRequest {
        DisableRequest {
            tenant: "acme".into(),
            environment: "dev".into(),
            module: module.into(),
            cleanup,
            force: false,
            confirmed: true,
        }
    }

    #[tokio::test]
    async fn test_enable_twice_is_noop() {
        let f = fixture();
        f.helm.set_behavior("minio", InstallBehavior::Ready { replicas: 2 });

        let first = f.orchestrator.enable(enable("minio", "standard")).await.unwrap();
        assert_eq!(first.outcome, LifecycleOutcome::Deployed);
        assert!(first.success);

        let second = f.orchestrator.enable(enable("minio", "standard")).await.unwrap();
        assert_eq!(second.outcome, LifecycleOutcome::NoopAlreadyDeployed);
        assert!(second.success);
        assert_eq!(f.helm.install_count(), 1);
        assert_eq!(f.metrics.operation_count("enable", "noop_already_deployed"), 1);

        let mut reapply = enable("minio", "standard");
        reapply.reapply = true;
        f.orchestrator.enable(reapply).await.unwrap();
        assert_eq!(f.helm.install_count(), 2);
    }

    #[tokio::test]
    async fn test_acme_data_lake_bronze() {
        let f = fixture();
        f.helm.set_behavior("data-lake", InstallBehavior::Pending);

        let report = f.orchestrator.enable(enable("data-lake", "bronze")).await.unwrap();
        assert_eq!(report.details.namespace, "acme-dev");
        assert_eq!(report.details.release_name, "acme-data-lake");

        let installs = f.helm.installs();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].namespace, "acme-dev");
        assert_eq!(installs[0].release, "acme-data-lake");
        assert_eq!(
            installs[0].values_files.last(),
            Some(&PathBuf::from("/charts/data-lake/values-bronze.yaml"))
        );
        assert_eq!(installs[0].set_values["tenant.tier"], "bronze");

        // deploy in progress: nothing matched yet
        let status = f.orchestrator.status("acme", "dev", "data-lake").await.unwrap();
        assert!(!status.deployed);
        assert_eq!(status.phase, WorkloadPhase::Absent);

        f.cluster.add_module_deployment("acme-dev", "data-lake", 3, 3);
        let status = f.orchestrator.status("acme", "dev", "data-lake").await.unwrap();
        assert!(status.deployed);
        assert!(status.healthy);
        assert_eq!((status.ready_replicas, status.desired_replicas), (3, 3));
    }

    #[tokio::test]
    async fn test_deploy_timeout_is_reported() {
        let f = fixture();
        f.helm.set_behavior("minio", InstallBehavior::NeverReady { replicas: 3 });

        let err = f
            .orchestrator
            .enable(enable("minio", "bronze"))
            .await
            .unwrap_err();
        assert_eq!(err.phase, Phase::DeployWait);
        assert_matches!(err.source, Error::Timeout { .. });
        assert!(err.last_status.is_some());
        assert_eq!(f.metrics.operation_count("enable", "failed"), 1);
    }

    #[tokio::test]
    async fn test_helm_failure_carries_last_status() {
        let f = fixture();
        f.helm.set_behavior(
            "minio",
            InstallBehavior::Fail {
                detail: "chart requires kubeVersion >=1.30".into(),
            },
        );
        let err = f
            .orchestrator
            .enable(enable("minio", "bronze"))
            .await
            .unwrap_err();
        assert_eq!(err.phase, Phase::Execution);
        assert_matches!(err.last_status, Some(status) if !status.deployed);
    }

    #[tokio::test]
    async fn test_validation_errors_have_no_side_effects() {
        let f = fixture();

        let err = f.orchestrator.enable(enable("kafka", "bronze")).await.unwrap_err();
        assert_matches!(err.source, Error::ModuleNotFound { .. });
        assert_eq!(err.phase, Phase::Validation);

        let err = f.orchestrator.enable(enable("minio", "gold")).await.unwrap_err();
        assert_matches!(err.source, Error::UnknownTier { .. });

        let mut bad_tenant = enable("minio", "bronze");
        bad_tenant.tenant = "Acme".into();
        let err = f.orchestrator.enable(bad_tenant).await.unwrap_err();
        assert_matches!(err.source, Error::InvalidIdentifier { .. });

        let mut bad_key = enable("minio", "bronze");
        bad_key
            .config_overrides
            .insert("a,tenant.name".into(), "evil".into());
        let err = f.orchestrator.enable(bad_key).await.unwrap_err();
        assert_matches!(err.source, Error::InvalidIdentifier { ref field, .. } if field == "value key");
        assert_eq!(err.phase, Phase::Validation);

        assert_eq!(f.helm.install_count(), 0);
        assert!(f.cluster.namespace_labels("acme-dev").is_none());
    }

    #[tokio::test]
    async fn test_dependency_and_conflict_gate() {
        let f = fixture();

        let err = f.orchestrator.enable(enable("spark", "bronze")).await.unwrap_err();
        assert_matches!(
            err.source,
            Error::DependencyUnsatisfied { ref missing, .. } if missing == &vec!["minio".to_string()]
        );
        assert_eq!(err.phase, Phase::Validation);
        assert_eq!(f.helm.install_count(), 0);

        f.orchestrator.enable(enable("minio", "bronze")).await.unwrap();
        f.orchestrator.enable(enable("spark", "bronze")).await.unwrap();

        let err = f.orchestrator.enable(enable("ceph", "bronze")).await.unwrap_err();
        assert_matches!(err.source, Error::Conflict { .. });
        assert_eq!(f.helm.install_count(), 2);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let f = fixture();
        f.helm.set_behavior("minio", InstallBehavior::Ready { replicas: 3 });

        f.orchestrator.enable(enable("minio", "standard")).await.unwrap();
        let status = f.orchestrator.status("acme", "dev", "minio").await.unwrap();
        assert!(status.deployed);
        assert_eq!(status.ready_replicas, status.desired_replicas);
        assert_eq!(status.release_revision, Some(1));

        let report = f
            .orchestrator
            .disable(disable("minio", CleanupPolicy::default()))
            .await
            .unwrap();
        assert_eq!(report.outcome, LifecycleOutcome::Undeployed);
        assert_eq!(report.state, LifecycleState::Absent);

        let status = f.orchestrator.status("acme", "dev", "minio").await.unwrap();
        assert!(!status.deployed);
    }

    async fn cleanup_with(policy: CleanupPolicy) -> Fixture {
        let f = fixture();
        f.orchestrator.enable(enable("minio", "bronze")).await.unwrap();
        f.cluster.add_resource(
            "acme-dev",
            ResourceClass::RoleBindings,
            [(labels::MODULE.to_string(), "minio".to_string())]
                .into_iter()
                .collect(),
        );
        f.orchestrator.disable(disable("minio", policy)).await.unwrap();
        f
    }

    #[tokio::test]
    async fn test_cleanup_policy_matrix() {
        let count = |f: &Fixture, class| f.cluster.resource_count("acme-dev", class);

        let f = cleanup_with(CleanupPolicy::DEFAULT_REMOVE_DATA).await;
        assert_eq!(count(&f, ResourceClass::PersistentVolumeClaims), 0);
        assert_eq!(count(&f, ResourceClass::Secrets), 1);
        assert_eq!(count(&f, ResourceClass::RoleBindings), 1);

        let f = cleanup_with(CleanupPolicy::KEEP_DATA).await;
        assert_eq!(count(&f, ResourceClass::PersistentVolumeClaims), 1);
        assert_eq!(count(&f, ResourceClass::Secrets), 1);

        let f = cleanup_with(CleanupPolicy::new(true, true)).await;
        assert_eq!(count(&f, ResourceClass::PersistentVolumeClaims), 1);
        assert_eq!(count(&f, ResourceClass::Secrets), 0);
        assert_eq!(count(&f, ResourceClass::RoleBindings), 0);

        let f = cleanup_with(CleanupPolicy::COMPLETE_CLEANUP).await;
        for class in [
            ResourceClass::PersistentVolumeClaims,
            ResourceClass::Secrets,
            ResourceClass::ServiceAccounts,
            ResourceClass::RoleBindings,
        ] {
            assert_eq!(count(&f, class), 0, "{} should be deleted", class);
        }
        // namespace survives
        assert!(f.cluster.namespace_labels("acme-dev").is_some());
    }

    #[tokio::test]
    async fn test_residual_cleanup_failures_are_reported() {
        let f = fixture();
        f.orchestrator.enable(enable("minio", "bronze")).await.unwrap();
        f.cluster.fail_cleanup(ResourceClass::NetworkPolicies, "networkpolicies is forbidden");

        let report = f
            .orchestrator
            .disable(disable("minio", CleanupPolicy::COMPLETE_CLEANUP))
            .await
            .unwrap();
        assert!(report.success);
        let failures = report.details.residual_cleanup_failures.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].class, ResourceClass::NetworkPolicies);
    }

    #[tokio::test]
    async fn test_disable_absent_and_confirmation() {
        let f = fixture();
        let report = f
            .orchestrator
            .disable(disable("minio", CleanupPolicy::default()))
            .await
            .unwrap();
        assert_eq!(report.outcome, LifecycleOutcome::NoopAlreadyAbsent);

        f.orchestrator.enable(enable("minio", "bronze")).await.unwrap();
        let mut unconfirmed = disable("minio", CleanupPolicy::default());
        unconfirmed.confirmed = false;
        let report = f.orchestrator.disable(unconfirmed).await.unwrap();
        assert!(report.requires_confirmation);
        assert!(!report.success);
        assert!(report.message.contains("persistent volume claims"));
        assert!(f.helm.has_release("acme-minio", "acme-dev"));
        assert!(f.cluster.deletions().is_empty());
    }

    #[tokio::test]
    async fn test_forced_disable_cleans_leftovers() {
        let f = fixture();
        f.cluster.add_namespace("acme-dev", BTreeMap::new());
        f.cluster.add_resource(
            "acme-dev",
            ResourceClass::PersistentVolumeClaims,
            [(labels::MODULE.to_string(), "minio".to_string())]
                .into_iter()
                .collect(),
        );

        let mut forced = disable("minio", CleanupPolicy::default());
        forced.force = true;
        forced.confirmed = false;
        let report = f.orchestrator.disable(forced).await.unwrap();
        assert_eq!(report.outcome, LifecycleOutcome::Undeployed);
        assert!(!report.undeploy.unwrap().release_removed);
        assert_eq!(
            f.cluster.resource_count("acme-dev", ResourceClass::PersistentVolumeClaims),
            0
        );
    }

    #[tokio::test]
    async fn test_unreachable_cluster() {
        let f = fixture();
        f.cluster.set_reachable(false);

        let err = f.orchestrator.status("acme", "dev", "minio").await.unwrap_err();
        assert_eq!(err.phase, Phase::ClusterQuery);
        assert_matches!(err.source, Error::ClusterUnreachable(_));

        let err = f.orchestrator.enable(enable("minio", "bronze")).await.unwrap_err();
        assert_eq!(err.phase, Phase::ClusterQuery);
        assert_eq!(f.helm.install_count(), 0);
    }

    #[tokio::test]
    async fn test_tenant_status() {
        let f = fixture();
        f.orchestrator.enable(enable("minio", "bronze")).await.unwrap();
        let mut prod = enable("minio", "premium");
        prod.environment = "prod".into();
        f.orchestrator.enable(prod).await.unwrap();

        let status = f.orchestrator.tenant_status("acme").await.unwrap();
        assert_eq!(status.environments.len(), 2);
        assert_eq!(status.environments[0].environment, "dev");
        assert_eq!(status.environments[0].modules[0].module, "minio");

        let tenants = f.orchestrator.tenants().await.unwrap();
        assert_eq!(tenants.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_api_request() {
        let f = fixture();
        let request: LifecycleRequest = serde_json::from_str(
            r#"{"operation":"enable","tenant":"acme","environment":"dev","module":"minio","tier":"standard"}"#,
        )
        .unwrap();
        let report = f.orchestrator.execute(request).await.unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["state"], "Deployed");
        assert_eq!(json["details"]["releaseName"], "acme-minio");
        assert!(json["details"].get("residualCleanupFailures").is_none());

        let request: LifecycleRequest = serde_json::from_str(
            r#"{"operation":"status","tenant":"acme","environment":"dev","module":"minio"}"#,
        )
        .unwrap();
        let report = f.orchestrator.execute(request).await.unwrap();
        assert_eq!(report.outcome, LifecycleOutcome::Observed);
        assert_eq!(report.state, LifecycleState::Deployed);
    }
}
