//! In-Memory Backends
//!
//! A simulated cluster and a simulated Helm that installs workloads into it.
//! Used by `serve --standalone` and by the lifecycle tests.

use crate::domain::labels;
use crate::domain::ports::{ClusterInspector, ReleaseManager, ReleaseOutcome, ReleaseSpec};
use crate::domain::{PodCounts, ResourceClass, TenantNamespace, WorkloadKind, WorkloadSummary};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

type Labels = BTreeMap<String, String>;

// =============================================================================
// Label Selectors
// =============================================================================

/// Match a label set against a selector such as `a=b,c!=d,e`
pub fn selector_matches(selector: &str, object_labels: &Labels) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                object_labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
            {
                object_labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else if let Some(key) = term.strip_prefix('!') {
                !object_labels.contains_key(key.trim())
            } else {
                object_labels.contains_key(term)
            }
        })
}

// =============================================================================
// In-Memory Cluster
// =============================================================================

#[derive(Debug, Clone)]
struct StoredNamespace {
    labels: Labels,
    created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredWorkload {
    summary: WorkloadSummary,
    labels: Labels,
}

#[derive(Debug, Clone)]
struct StoredPod {
    labels: Labels,
    running: bool,
}

/// Simulated Kubernetes cluster
#[derive(Debug)]
pub struct InMemoryCluster {
    reachable: AtomicBool,
    namespaces: DashMap<String, StoredNamespace>,
    workloads: DashMap<String, Vec<StoredWorkload>>,
    pods: DashMap<String, Vec<StoredPod>>,
    resources: DashMap<(String, ResourceClass), Vec<Labels>>,
    cleanup_failures: DashMap<ResourceClass, String>,
    deletions: Mutex<Vec<(String, ResourceClass)>>,
}

impl InMemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(true),
            namespaces: DashMap::new(),
            workloads: DashMap::new(),
            pods: DashMap::new(),
            resources: DashMap::new(),
            cleanup_failures: DashMap::new(),
            deletions: Mutex::new(Vec::new()),
        })
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ClusterUnreachable(
                "dial tcp 127.0.0.1:6443: connect: connection refused".to_string(),
            ))
        }
    }

    /// Simulate losing (or regaining) the API server
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn add_namespace(&self, namespace: &str, namespace_labels: Labels) {
        self.namespaces.insert(
            namespace.to_string(),
            StoredNamespace {
                labels: namespace_labels,
                created: Utc::now(),
            },
        );
    }

    pub fn namespace_labels(&self, namespace: &str) -> Option<Labels> {
        self.namespaces.get(namespace).map(|ns| ns.labels.clone())
    }

    /// Add a workload; its namespace is created if missing
    pub fn add_workload(&self, namespace: &str, summary: WorkloadSummary, workload_labels: Labels) {
        if !self.namespaces.contains_key(namespace) {
            self.add_namespace(namespace, Labels::new());
        }
        let mut workloads = self.workloads.entry(namespace.to_string()).or_default();
        workloads.retain(|w| !(w.summary.name == summary.name && w.summary.kind == summary.kind));
        workloads.push(StoredWorkload {
            summary,
            labels: workload_labels,
        });
    }

    /// Convenience: a Deployment labelled for `module`
    pub fn add_module_deployment(&self, namespace: &str, module: &str, ready: i32, desired: i32) {
        self.add_workload(
            namespace,
            WorkloadSummary {
                kind: WorkloadKind::Deployment,
                name: module.to_string(),
                module: Some(module.to_string()),
                ready_replicas: ready,
                desired_replicas: desired,
            },
            module_labels(module, None),
        );
    }

    /// Set ready replicas on every workload matching `selector`
    pub fn set_ready_replicas(&self, namespace: &str, selector: &str, ready: i32) {
        if let Some(mut workloads) = self.workloads.get_mut(namespace) {
            for w in workloads.iter_mut().filter(|w| selector_matches(selector, &w.labels)) {
                w.summary.ready_replicas = ready;
            }
        }
    }

    pub fn add_pod(&self, namespace: &str, pod_labels: Labels, running: bool) {
        self.pods.entry(namespace.to_string()).or_default().push(StoredPod {
            labels: pod_labels,
            running,
        });
    }

    /// Add a secondary object of `class`
    pub fn add_resource(&self, namespace: &str, class: ResourceClass, object_labels: Labels) {
        self.resources
            .entry((namespace.to_string(), class))
            .or_default()
            .push(object_labels);
    }

    pub fn resource_count(&self, namespace: &str, class: ResourceClass) -> usize {
        self.resources
            .get(&(namespace.to_string(), class))
            .map_or(0, |objects| objects.len())
    }

    /// Objects of `class` matching `selector`
    pub fn resource_count_matching(
        &self,
        namespace: &str,
        class: ResourceClass,
        selector: &str,
    ) -> usize {
        self.resources
            .get(&(namespace.to_string(), class))
            .map_or(0, |objects| {
                objects
                    .iter()
                    .filter(|object| selector_matches(selector, object))
                    .count()
            })
    }

    /// Drop pods matching `selector`
    pub fn remove_pods(&self, namespace: &str, selector: &str) {
        if let Some(mut pods) = self.pods.get_mut(namespace) {
            pods.retain(|p| !selector_matches(selector, &p.labels));
        }
    }

    /// Make deletions of `class` fail
    pub fn fail_cleanup(&self, class: ResourceClass, reason: &str) {
        self.cleanup_failures.insert(class, reason.to_string());
    }

    /// Resource classes deleted so far, in order
    pub fn deletions(&self) -> Vec<(String, ResourceClass)> {
        self.deletions.lock().clone()
    }

    /// Remove workloads and pods matching `selector` (what Helm uninstall does)
    pub fn remove_matching(&self, namespace: &str, selector: &str) {
        if let Some(mut workloads) = self.workloads.get_mut(namespace) {
            workloads.retain(|w| !selector_matches(selector, &w.labels));
        }
        self.remove_pods(namespace, selector);
    }
}

#[async_trait]
impl ClusterInspector for InMemoryCluster {
    async fn ensure_namespace(&self, namespace: &str, namespace_labels: &Labels) -> Result<bool> {
        self.check_reachable()?;
        if self.namespaces.contains_key(namespace) {
            return Ok(false);
        }
        self.add_namespace(namespace, namespace_labels.clone());
        debug!("Created simulated namespace {}", namespace);
        Ok(true)
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        self.check_reachable()?;
        Ok(self.namespaces.contains_key(namespace))
    }

    async fn list_workloads(&self, namespace: &str, selector: &str) -> Result<Vec<WorkloadSummary>> {
        self.check_reachable()?;
        Ok(self
            .workloads
            .get(namespace)
            .map(|workloads| {
                workloads
                    .iter()
                    .filter(|w| selector_matches(selector, &w.labels))
                    .map(|w| w.summary.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_pods(&self, namespace: &str, selector: &str) -> Result<PodCounts> {
        self.check_reachable()?;
        let mut counts = PodCounts::default();
        if let Some(pods) = self.pods.get(namespace) {
            for pod in pods.iter().filter(|p| selector_matches(selector, &p.labels)) {
                counts.total += 1;
                if pod.running {
                    counts.running += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn list_tenant_namespaces(&self) -> Result<Vec<TenantNamespace>> {
        self.check_reachable()?;
        let mut namespaces: Vec<TenantNamespace> = self
            .namespaces
            .iter()
            .filter_map(|entry| {
                let tenant = entry.labels.get(labels::TENANT)?.clone();
                Some(TenantNamespace {
                    environment: entry
                        .labels
                        .get(labels::ENVIRONMENT)
                        .cloned()
                        .unwrap_or_default(),
                    tenant,
                    namespace: entry.key().clone(),
                    created: Some(entry.created),
                })
            })
            .collect();
        namespaces.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        Ok(namespaces)
    }

    async fn delete_resources(
        &self,
        namespace: &str,
        class: ResourceClass,
        selector: &str,
    ) -> Result<usize> {
        self.check_reachable()?;
        if let Some(reason) = self.cleanup_failures.get(&class) {
            return Err(Error::Cleanup {
                class: class.to_string(),
                reason: reason.clone(),
            });
        }

        self.deletions.lock().push((namespace.to_string(), class));

        let mut removed = 0;
        if let Some(mut objects) = self.resources.get_mut(&(namespace.to_string(), class)) {
            let before = objects.len();
            objects.retain(|object| !selector_matches(selector, object));
            removed = before - objects.len();
        }
        Ok(removed)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.reachable.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Simulated Helm
// =============================================================================

/// How the simulated Helm behaves on install
#[derive(Debug, Clone, PartialEq)]
pub enum InstallBehavior {
    /// Workloads appear fully ready
    Ready { replicas: i32 },
    /// Workloads appear but never become ready; the install times out
    NeverReady { replicas: i32 },
    /// Release is recorded, workloads have not appeared yet
    Pending,
    /// Helm exits with an error
    Fail { detail: String },
}

impl Default for InstallBehavior {
    fn default() -> Self {
        InstallBehavior::Ready { replicas: 1 }
    }
}

/// Simulated Helm over an [`InMemoryCluster`]
pub struct SimulatedHelm {
    cluster: Arc<InMemoryCluster>,
    default_behavior: Mutex<InstallBehavior>,
    module_behavior: DashMap<String, InstallBehavior>,
    releases: DashMap<(String, String), u32>,
    install_count: AtomicUsize,
    installs: Mutex<Vec<ReleaseSpec>>,
}

impl SimulatedHelm {
    pub fn new(cluster: Arc<InMemoryCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            default_behavior: Mutex::new(InstallBehavior::default()),
            module_behavior: DashMap::new(),
            releases: DashMap::new(),
            install_count: AtomicUsize::new(0),
            installs: Mutex::new(Vec::new()),
        })
    }

    pub fn set_default_behavior(&self, behavior: InstallBehavior) {
        *self.default_behavior.lock() = behavior;
    }

    pub fn set_behavior(&self, module: &str, behavior: InstallBehavior) {
        self.module_behavior.insert(module.to_string(), behavior);
    }

    /// Number of `upgrade --install` invocations
    pub fn install_count(&self) -> usize {
        self.install_count.load(Ordering::SeqCst)
    }

    /// Specs passed to every install, in order
    pub fn installs(&self) -> Vec<ReleaseSpec> {
        self.installs.lock().clone()
    }

    pub fn has_release(&self, release: &str, namespace: &str) -> bool {
        self.releases
            .contains_key(&(namespace.to_string(), release.to_string()))
    }

    fn behavior_for(&self, module: &str) -> InstallBehavior {
        self.module_behavior
            .get(module)
            .map(|b| b.clone())
            .unwrap_or_else(|| self.default_behavior.lock().clone())
    }

    /// Create or replace the release's objects. Pods are replaced, like a
    /// rollout; secondary objects are created once per release.
    fn materialize(&self, spec: &ReleaseSpec, ready: i32, desired: i32) {
        let object_labels = module_labels(&spec.module, Some(&spec.release));
        let release_selector = format!("{}={}", labels::INSTANCE, spec.release);

        self.cluster.add_workload(
            &spec.namespace,
            WorkloadSummary {
                kind: WorkloadKind::Deployment,
                name: spec.release.clone(),
                module: Some(spec.module.clone()),
                ready_replicas: ready,
                desired_replicas: desired,
            },
            object_labels.clone(),
        );
        self.cluster.remove_pods(&spec.namespace, &release_selector);
        for i in 0..desired {
            self.cluster
                .add_pod(&spec.namespace, object_labels.clone(), i < ready);
        }

        // charts in the catalog ship a PVC, a Secret and a ServiceAccount
        for class in [
            ResourceClass::PersistentVolumeClaims,
            ResourceClass::Secrets,
            ResourceClass::ServiceAccounts,
        ] {
            if self
                .cluster
                .resource_count_matching(&spec.namespace, class, &release_selector)
                == 0
            {
                self.cluster
                    .add_resource(&spec.namespace, class, object_labels.clone());
            }
        }
    }
}

#[async_trait]
impl ReleaseManager for SimulatedHelm {
    async fn upgrade_install(&self, spec: &ReleaseSpec) -> Result<ReleaseOutcome> {
        self.install_count.fetch_add(1, Ordering::SeqCst);
        self.installs.lock().push(spec.clone());
        self.cluster.check_reachable()?;

        let key = (spec.namespace.clone(), spec.release.clone());
        let behavior = self.behavior_for(&spec.module);

        if let InstallBehavior::Fail { detail } = &behavior {
            return Err(Error::HelmExecution {
                operation: "upgrade".to_string(),
                release: spec.release.clone(),
                detail: detail.clone(),
            });
        }

        self.cluster
            .ensure_namespace(&spec.namespace, &spec.namespace_labels)
            .await?;
        let revision = {
            let mut entry = self.releases.entry(key).or_insert(0);
            *entry += 1;
            *entry
        };

        match behavior {
            InstallBehavior::Ready { replicas } => self.materialize(spec, replicas, replicas),
            InstallBehavior::NeverReady { replicas } => {
                self.materialize(spec, 0, replicas);
                return Err(Error::Timeout {
                    operation: "upgrade".to_string(),
                    release: spec.release.clone(),
                    duration: spec.timeout,
                });
            }
            InstallBehavior::Pending | InstallBehavior::Fail { .. } => {}
        }

        Ok(ReleaseOutcome {
            release: spec.release.clone(),
            namespace: spec.namespace.clone(),
            revision: Some(revision),
            output: format!("Release \"{}\" has been upgraded.\nREVISION: {}", spec.release, revision),
        })
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<ReleaseOutcome> {
        self.cluster.check_reachable()?;
        if self
            .releases
            .remove(&(namespace.to_string(), release.to_string()))
            .is_none()
        {
            return Err(Error::ReleaseNotFound {
                release: release.to_string(),
                namespace: namespace.to_string(),
            });
        }

        self.cluster
            .remove_matching(namespace, &format!("{}={}", labels::INSTANCE, release));

        Ok(ReleaseOutcome {
            release: release.to_string(),
            namespace: namespace.to_string(),
            revision: None,
            output: format!("release \"{}\" uninstalled", release),
        })
    }

    async fn revision(&self, release: &str, namespace: &str) -> Result<Option<u32>> {
        self.cluster.check_reachable()?;
        Ok(self
            .releases
            .get(&(namespace.to_string(), release.to_string()))
            .map(|r| *r))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn manager_name(&self) -> &str {
        "simulated-helm"
    }
}

/// Labels Helm charts in the catalog put on their objects
fn module_labels(module: &str, release: Option<&str>) -> Labels {
    let mut object_labels = Labels::new();
    object_labels.insert(labels::MODULE.to_string(), module.to_string());
    if let Some(release) = release {
        object_labels.insert(labels::INSTANCE.to_string(), release.to_string());
    }
    object_labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    const SIMULATED_TIMEOUT: Duration = Duration::from_secs(300);

    fn labelled(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_selector_matching() {
        let l = labelled(&[("spanda.ai/module", "minio"), ("tier", "bronze")]);
        assert!(selector_matches("spanda.ai/module=minio", &l));
        assert!(selector_matches("spanda.ai/module==minio,tier", &l));
        assert!(selector_matches("tier!=premium", &l));
        assert!(!selector_matches("spanda.ai/module=spark", &l));
        assert!(!selector_matches("!tier", &l));
        assert!(selector_matches("", &l));
    }

    #[tokio::test]
    async fn test_unreachable_cluster() {
        let cluster = InMemoryCluster::new();
        cluster.set_reachable(false);
        assert_matches!(
            cluster.list_workloads("acme-dev", "spanda.ai/module=minio").await,
            Err(Error::ClusterUnreachable(_))
        );
        assert!(!cluster.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_resources_by_selector() {
        let cluster = InMemoryCluster::new();
        cluster.add_resource(
            "acme-dev",
            ResourceClass::Secrets,
            labelled(&[("spanda.ai/module", "minio")]),
        );
        cluster.add_resource(
            "acme-dev",
            ResourceClass::Secrets,
            labelled(&[("spanda.ai/module", "spark")]),
        );

        let removed = cluster
            .delete_resources("acme-dev", ResourceClass::Secrets, "spanda.ai/module=minio")
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cluster.resource_count("acme-dev", ResourceClass::Secrets), 1);

        cluster.fail_cleanup(ResourceClass::Roles, "forbidden");
        assert_matches!(
            cluster
                .delete_resources("acme-dev", ResourceClass::Roles, "spanda.ai/module=minio")
                .await,
            Err(Error::Cleanup { .. })
        );
    }

    #[tokio::test]
    async fn test_simulated_install_and_uninstall() {
        let cluster = InMemoryCluster::new();
        let helm = SimulatedHelm::new(cluster.clone());
        helm.set_behavior("minio", InstallBehavior::Ready { replicas: 3 });

        let spec = ReleaseSpec {
            release: "acme-minio".into(),
            namespace: "acme-dev".into(),
            module: "minio".into(),
            chart: "charts/minio".into(),
            values_files: vec![],
            set_values: BTreeMap::new(),
            timeout: SIMULATED_TIMEOUT,
            namespace_labels: BTreeMap::new(),
        };

        let outcome = helm.upgrade_install(&spec).await.unwrap();
        assert_eq!(outcome.revision, Some(1));
        let workloads = cluster
            .list_workloads("acme-dev", "spanda.ai/module=minio")
            .await
            .unwrap();
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].ready_replicas, 3);
        assert_eq!(
            cluster.count_pods("acme-dev", "spanda.ai/module=minio").await.unwrap(),
            PodCounts { total: 3, running: 3 }
        );

        helm.uninstall("acme-minio", "acme-dev").await.unwrap();
        assert!(cluster
            .list_workloads("acme-dev", "spanda.ai/module=minio")
            .await
            .unwrap()
            .is_empty());
        // Helm leaves PVCs behind
        assert_eq!(
            cluster.resource_count("acme-dev", ResourceClass::PersistentVolumeClaims),
            1
        );
        assert_matches!(
            helm.uninstall("acme-minio", "acme-dev").await,
            Err(Error::ReleaseNotFound { .. })
        );
    }

    fn release(module: &str) -> ReleaseSpec {
        ReleaseSpec {
            release: format!("acme-{}", module),
            namespace: "acme-dev".into(),
            module: module.into(),
            chart: format!("charts/{}", module).into(),
            values_files: vec![],
            set_values: BTreeMap::new(),
            timeout: SIMULATED_TIMEOUT,
            namespace_labels: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_objects_are_per_release() {
        let cluster = InMemoryCluster::new();
        let helm = SimulatedHelm::new(cluster.clone());
        helm.set_default_behavior(InstallBehavior::Ready { replicas: 2 });

        helm.upgrade_install(&release("minio")).await.unwrap();
        helm.upgrade_install(&release("spark")).await.unwrap();
        for class in [
            ResourceClass::PersistentVolumeClaims,
            ResourceClass::Secrets,
            ResourceClass::ServiceAccounts,
        ] {
            assert_eq!(cluster.resource_count("acme-dev", class), 2);
            assert_eq!(
                cluster.resource_count_matching("acme-dev", class, "spanda.ai/module=spark"),
                1
            );
        }

        // reapply replaces pods and keeps one object per class
        helm.upgrade_install(&release("minio")).await.unwrap();
        assert_eq!(
            cluster.count_pods("acme-dev", "spanda.ai/module=minio").await.unwrap(),
            PodCounts { total: 2, running: 2 }
        );
        assert_eq!(
            cluster.resource_count_matching(
                "acme-dev",
                ResourceClass::PersistentVolumeClaims,
                "spanda.ai/module=minio"
            ),
            1
        );

        let removed = cluster
            .delete_resources(
                "acme-dev",
                ResourceClass::PersistentVolumeClaims,
                "spanda.ai/module=minio",
            )
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            cluster.resource_count("acme-dev", ResourceClass::PersistentVolumeClaims),
            1
        );
    }
}
