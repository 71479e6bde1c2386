//! Domain value types for module lifecycle management
//!
//! Everything here is either derived on demand (targets, statuses) or a
//! small value object attached to a request (cleanup policy). Nothing in
//! this module is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Deployment Target
// =============================================================================

/// Where a module lands for a given tenant and environment.
///
/// Built by [`crate::controlplane::IdentityResolver`]; `namespace` and
/// `release_name` are pure functions of the inputs and are recomputed for
/// every request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTarget {
    pub tenant: String,
    pub environment: String,
    pub module: String,
    /// Tier requested for the deployment (absent for status/undeploy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// `{tenant}-{environment}`
    pub namespace: String,
    /// `{tenant}-{module}`
    pub release_name: String,
    /// Label selector matching the module's workloads
    pub label_selector: String,
}

impl DeploymentTarget {
    /// Copy of this target bound to a tier
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

impl std::fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.release_name)
    }
}

// =============================================================================
// Resource Tiers
// =============================================================================

/// Resource envelope applied through a tier (Kubernetes quantities)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ResourceEnvelope {
    /// CPU limit, e.g. "10"
    pub cpu: String,
    /// Memory limit, e.g. "20Gi"
    pub memory: String,
    /// Storage limit, e.g. "100Gi"
    pub storage: String,
}

impl ResourceEnvelope {
    pub fn new(cpu: &str, memory: &str, storage: &str) -> Self {
        Self {
            cpu: cpu.to_string(),
            memory: memory.to_string(),
            storage: storage.to_string(),
        }
    }
}

/// A named resource tier (bronze, standard, premium, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTier {
    pub name: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub storage_limit: String,
}

impl ResourceTier {
    pub fn from_envelope(name: impl Into<String>, envelope: &ResourceEnvelope) -> Self {
        Self {
            name: name.into(),
            cpu_limit: envelope.cpu.clone(),
            memory_limit: envelope.memory.clone(),
            storage_limit: envelope.storage.clone(),
        }
    }

    pub fn envelope(&self) -> ResourceEnvelope {
        ResourceEnvelope {
            cpu: self.cpu_limit.clone(),
            memory: self.memory_limit.clone(),
            storage: self.storage_limit.clone(),
        }
    }
}

// =============================================================================
// Workloads
// =============================================================================

/// Kind of workload object a module runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "Deployment"),
            WorkloadKind::StatefulSet => write!(f, "StatefulSet"),
        }
    }
}

/// Replica counts of one matched workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSummary {
    pub kind: WorkloadKind,
    pub name: String,
    /// Value of the module label, if present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub ready_replicas: i32,
    pub desired_replicas: i32,
}

impl WorkloadSummary {
    pub fn is_ready(&self) -> bool {
        self.ready_replicas == self.desired_replicas
    }
}

/// Pod counts for a module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodCounts {
    pub total: u32,
    pub running: u32,
}

/// Classification of the matched workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadPhase {
    /// No workload matched the module selector
    Absent,
    /// At least one workload matched and all are fully ready
    Healthy,
    /// Some matched workloads are not fully ready
    Degraded,
}

impl WorkloadPhase {
    /// Classify a set of matched workloads
    pub fn classify(workloads: &[WorkloadSummary]) -> Self {
        if workloads.is_empty() {
            WorkloadPhase::Absent
        } else if workloads.iter().all(WorkloadSummary::is_ready) {
            WorkloadPhase::Healthy
        } else {
            WorkloadPhase::Degraded
        }
    }
}

impl std::fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadPhase::Absent => write!(f, "absent"),
            WorkloadPhase::Healthy => write!(f, "healthy"),
            WorkloadPhase::Degraded => write!(f, "degraded"),
        }
    }
}

// =============================================================================
// Module Status
// =============================================================================

/// Snapshot of a module's live state in one namespace.
///
/// Only valid at `observed_at`; the cluster is the source of truth and may
/// change immediately afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    pub module: String,
    pub namespace: String,
    pub release_name: String,
    pub deployed: bool,
    pub healthy: bool,
    pub phase: WorkloadPhase,
    pub ready_replicas: i32,
    pub desired_replicas: i32,
    pub pods: PodCounts,
    pub workloads: Vec<WorkloadSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_revision: Option<u32>,
    pub observed_at: DateTime<Utc>,
}

impl ModuleStatus {
    /// Build a status from the workloads matched for `target`
    pub fn from_workloads(
        target: &DeploymentTarget,
        workloads: Vec<WorkloadSummary>,
        pods: PodCounts,
        release_revision: Option<u32>,
    ) -> Self {
        let phase = WorkloadPhase::classify(&workloads);
        let ready_replicas = workloads.iter().map(|w| w.ready_replicas).sum();
        let desired_replicas = workloads.iter().map(|w| w.desired_replicas).sum();

        Self {
            module: target.module.clone(),
            namespace: target.namespace.clone(),
            release_name: target.release_name.clone(),
            deployed: phase != WorkloadPhase::Absent,
            healthy: phase == WorkloadPhase::Healthy,
            phase,
            ready_replicas,
            desired_replicas,
            pods,
            workloads,
            release_revision,
            observed_at: Utc::now(),
        }
    }

    /// Status of a module with nothing in the cluster
    pub fn absent(target: &DeploymentTarget) -> Self {
        Self::from_workloads(target, Vec::new(), PodCounts::default(), None)
    }
}

// =============================================================================
// Cleanup Policy
// =============================================================================

/// Secondary resource classes removed alongside a Helm release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceClass {
    PersistentVolumeClaims,
    Secrets,
    ServiceAccounts,
    Roles,
    RoleBindings,
    NetworkPolicies,
    Ingresses,
    Jobs,
    CustomResources,
}

impl ResourceClass {
    /// Classes only removed under complete cleanup
    pub const SECONDARY: [ResourceClass; 8] = [
        ResourceClass::Secrets,
        ResourceClass::ServiceAccounts,
        ResourceClass::Roles,
        ResourceClass::RoleBindings,
        ResourceClass::NetworkPolicies,
        ResourceClass::Ingresses,
        ResourceClass::Jobs,
        ResourceClass::CustomResources,
    ];

    pub fn is_persistent_data(&self) -> bool {
        matches!(self, ResourceClass::PersistentVolumeClaims)
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceClass::PersistentVolumeClaims => "persistentvolumeclaims",
            ResourceClass::Secrets => "secrets",
            ResourceClass::ServiceAccounts => "serviceaccounts",
            ResourceClass::Roles => "roles",
            ResourceClass::RoleBindings => "rolebindings",
            ResourceClass::NetworkPolicies => "networkpolicies",
            ResourceClass::Ingresses => "ingresses",
            ResourceClass::Jobs => "jobs",
            ResourceClass::CustomResources => "customresources",
        };
        write!(f, "{}", name)
    }
}

/// What survives a module removal.
///
/// The default removes persistent data. `keep_data` always wins over
/// `complete_cleanup` for PVCs.
/// Deserializes from the flags object or from a policy name
/// (`KeepData`, `complete-cleanup`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "CleanupPolicyRepr")]
pub struct CleanupPolicy {
    #[serde(default)]
    pub keep_data: bool,
    #[serde(default)]
    pub complete_cleanup: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CleanupPolicyRepr {
    Named(String),
    Flags(CleanupFlags),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupFlags {
    #[serde(default)]
    keep_data: bool,
    #[serde(default)]
    complete_cleanup: bool,
}

impl TryFrom<CleanupPolicyRepr> for CleanupPolicy {
    type Error = String;

    fn try_from(repr: CleanupPolicyRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            CleanupPolicyRepr::Named(name) => name.parse(),
            CleanupPolicyRepr::Flags(flags) => {
                Ok(CleanupPolicy::new(flags.keep_data, flags.complete_cleanup))
            }
        }
    }
}

impl std::str::FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "default" | "defaultremovedata" | "removedata" => Ok(CleanupPolicy::DEFAULT_REMOVE_DATA),
            "keepdata" => Ok(CleanupPolicy::KEEP_DATA),
            "completecleanup" => Ok(CleanupPolicy::COMPLETE_CLEANUP),
            "keepdata+completecleanup" => Ok(CleanupPolicy::new(true, true)),
            _ => Err(format!("unknown cleanup policy: {}", name)),
        }
    }
}

impl CleanupPolicy {
    pub const DEFAULT_REMOVE_DATA: CleanupPolicy = CleanupPolicy {
        keep_data: false,
        complete_cleanup: false,
    };

    pub const KEEP_DATA: CleanupPolicy = CleanupPolicy {
        keep_data: true,
        complete_cleanup: false,
    };

    pub const COMPLETE_CLEANUP: CleanupPolicy = CleanupPolicy {
        keep_data: false,
        complete_cleanup: true,
    };

    pub fn new(keep_data: bool, complete_cleanup: bool) -> Self {
        Self {
            keep_data,
            complete_cleanup,
        }
    }

    pub fn deletes(&self, class: ResourceClass) -> bool {
        if class.is_persistent_data() {
            !self.keep_data
        } else {
            self.complete_cleanup
        }
    }

    /// Resource classes to delete, in deletion order
    pub fn resource_classes(&self) -> Vec<ResourceClass> {
        std::iter::once(ResourceClass::PersistentVolumeClaims)
            .chain(ResourceClass::SECONDARY)
            .filter(|class| self.deletes(*class))
            .collect()
    }
}

impl std::fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.keep_data, self.complete_cleanup) {
            (false, false) => write!(f, "default-remove-data"),
            (true, false) => write!(f, "keep-data"),
            (false, true) => write!(f, "complete-cleanup"),
            (true, true) => write!(f, "keep-data+complete-cleanup"),
        }
    }
}

// =============================================================================
// Lifecycle State
// =============================================================================

/// Lifecycle state of a module in one namespace, inferred per operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Absent,
    Deploying,
    Deployed,
    Undeploying,
    Failed,
}

impl LifecycleState {
    /// State inferred from a fresh status snapshot
    pub fn observed(status: &ModuleStatus) -> Self {
        if status.deployed {
            LifecycleState::Deployed
        } else {
            LifecycleState::Absent
        }
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Absent, Deploying)
                | (Deployed, Deploying)
                | (Failed, Deploying)
                | (Deploying, Deployed)
                | (Deploying, Absent)
                | (Deploying, Failed)
                | (Deployed, Undeploying)
                | (Absent, Undeploying)
                | (Failed, Undeploying)
                | (Undeploying, Absent)
                | (Undeploying, Deployed)
                | (Undeploying, Failed)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Absent => write!(f, "Absent"),
            LifecycleState::Deploying => write!(f, "Deploying"),
            LifecycleState::Deployed => write!(f, "Deployed"),
            LifecycleState::Undeploying => write!(f, "Undeploying"),
            LifecycleState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Tenants
// =============================================================================

/// A namespace labelled as belonging to a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantNamespace {
    pub tenant: String,
    pub environment: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(name: &str, ready: i32, desired: i32) -> WorkloadSummary {
        WorkloadSummary {
            kind: WorkloadKind::Deployment,
            name: name.into(),
            module: Some("data-lake".into()),
            ready_replicas: ready,
            desired_replicas: desired,
        }
    }

    fn target() -> DeploymentTarget {
        DeploymentTarget {
            tenant: "acme".into(),
            environment: "dev".into(),
            module: "data-lake".into(),
            tier: None,
            namespace: "acme-dev".into(),
            release_name: "acme-data-lake".into(),
            label_selector: "spanda.ai/module=data-lake".into(),
        }
    }

    #[test]
    fn test_phase_classification() {
        assert_eq!(WorkloadPhase::classify(&[]), WorkloadPhase::Absent);
        assert_eq!(
            WorkloadPhase::classify(&[workload("a", 3, 3), workload("b", 1, 1)]),
            WorkloadPhase::Healthy
        );
        assert_eq!(
            WorkloadPhase::classify(&[workload("a", 3, 3), workload("b", 0, 1)]),
            WorkloadPhase::Degraded
        );
    }

    #[test]
    fn test_status_sums_replicas() {
        let status = ModuleStatus::from_workloads(
            &target(),
            vec![workload("minio", 2, 3), workload("spark", 1, 1)],
            PodCounts { total: 4, running: 3 },
            Some(2),
        );
        assert!(status.deployed);
        assert!(!status.healthy);
        assert_eq!(status.phase, WorkloadPhase::Degraded);
        assert_eq!(status.ready_replicas, 3);
        assert_eq!(status.desired_replicas, 4);
        assert_eq!(status.release_revision, Some(2));
    }

    #[test]
    fn test_absent_status() {
        let status = ModuleStatus::absent(&target());
        assert!(!status.deployed);
        assert!(!status.healthy);
        assert_eq!(status.namespace, "acme-dev");
    }

    #[test]
    fn test_cleanup_policy_matrix() {
        let default = CleanupPolicy::default();
        assert_eq!(default, CleanupPolicy::DEFAULT_REMOVE_DATA);
        assert_eq!(
            default.resource_classes(),
            vec![ResourceClass::PersistentVolumeClaims]
        );

        assert!(CleanupPolicy::KEEP_DATA.resource_classes().is_empty());

        let complete = CleanupPolicy::COMPLETE_CLEANUP.resource_classes();
        assert_eq!(complete.len(), 9);
        assert!(complete.contains(&ResourceClass::PersistentVolumeClaims));
        assert!(complete.contains(&ResourceClass::Secrets));

        let both = CleanupPolicy::new(true, true);
        let classes = both.resource_classes();
        assert!(!classes.contains(&ResourceClass::PersistentVolumeClaims));
        assert!(classes.contains(&ResourceClass::RoleBindings));
        assert_eq!(classes.len(), 8);
    }

    #[test]
    fn test_cleanup_policy_names() {
        let parse = |json: &str| serde_json::from_str::<CleanupPolicy>(json);

        assert_eq!(parse(r#""KeepData""#).unwrap(), CleanupPolicy::KEEP_DATA);
        assert_eq!(parse(r#""CompleteCleanup""#).unwrap(), CleanupPolicy::COMPLETE_CLEANUP);
        assert_eq!(parse(r#""keep-data""#).unwrap(), CleanupPolicy::KEEP_DATA);
        assert_eq!(parse(r#""default""#).unwrap(), CleanupPolicy::DEFAULT_REMOVE_DATA);
        assert_eq!(
            parse(r#"{"keepData":true,"completeCleanup":true}"#).unwrap(),
            CleanupPolicy::new(true, true)
        );
        assert_eq!(parse("{}").unwrap(), CleanupPolicy::default());
        assert!(parse(r#""ScorchedEarth""#).is_err());

        // display names parse back
        for policy in [
            CleanupPolicy::DEFAULT_REMOVE_DATA,
            CleanupPolicy::KEEP_DATA,
            CleanupPolicy::COMPLETE_CLEANUP,
            CleanupPolicy::new(true, true),
        ] {
            assert_eq!(policy.to_string().parse::<CleanupPolicy>(), Ok(policy));
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        use LifecycleState::*;
        assert!(Absent.can_transition_to(Deploying));
        assert!(Deploying.can_transition_to(Failed));
        assert!(Undeploying.can_transition_to(Absent));
        assert!(!Absent.can_transition_to(Deployed));
        assert!(!Deployed.can_transition_to(Absent));
    }
}
