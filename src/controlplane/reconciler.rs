//! Cluster State Reconciler
//!
//! Derives module status from the live cluster on every call. Nothing is
//! cached: a status is only valid at the instant it was observed.

use crate::domain::labels;
use crate::domain::ports::{ClusterInspectorRef, ReleaseManagerRef};
use crate::domain::{DeploymentTarget, ModuleStatus, TenantNamespace};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Modules found in one tenant namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantEnvironment {
    pub environment: String,
    pub namespace: String,
    pub modules: Vec<String>,
}

/// A tenant and its environments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    pub tenant: String,
    pub environments: Vec<TenantEnvironment>,
}

/// Reconciler over the cluster and release ports
#[derive(Clone)]
pub struct Reconciler {
    cluster: ClusterInspectorRef,
    releases: ReleaseManagerRef,
}

impl Reconciler {
    pub fn new(cluster: ClusterInspectorRef, releases: ReleaseManagerRef) -> Self {
        Self { cluster, releases }
    }

    /// Live status of a module. "Not deployed" is a status, not an error;
    /// only an unreachable cluster fails.
    pub async fn status_of(&self, target: &DeploymentTarget) -> Result<ModuleStatus> {
        if !self.cluster.namespace_exists(&target.namespace).await? {
            debug!("Namespace {} does not exist", target.namespace);
            return Ok(ModuleStatus::absent(target));
        }

        let workloads = self
            .cluster
            .list_workloads(&target.namespace, &target.label_selector)
            .await?;
        let pods = self
            .cluster
            .count_pods(&target.namespace, &target.label_selector)
            .await?;

        let revision = if workloads.is_empty() {
            None
        } else {
            match self
                .releases
                .revision(&target.release_name, &target.namespace)
                .await
            {
                Ok(revision) => revision,
                Err(e) => {
                    warn!("Could not read revision of {}: {}", target, e);
                    None
                }
            }
        };

        let status = ModuleStatus::from_workloads(target, workloads, pods, revision);
        debug!(
            "{}: {} ({}/{} ready)",
            target, status.phase, status.ready_replicas, status.desired_replicas
        );
        Ok(status)
    }

    pub async fn is_deployed(&self, target: &DeploymentTarget) -> Result<bool> {
        Ok(self.status_of(target).await?.deployed)
    }

    /// Names of modules with at least one workload in `namespace`
    pub async fn deployed_modules(&self, namespace: &str) -> Result<BTreeSet<String>> {
        if !self.cluster.namespace_exists(namespace).await? {
            return Ok(BTreeSet::new());
        }
        Ok(self
            .cluster
            .list_workloads(namespace, labels::MODULE)
            .await?
            .into_iter()
            .filter_map(|w| w.module)
            .collect())
    }

    /// Tenant namespaces, optionally restricted to one tenant
    pub async fn tenant_namespaces(&self, tenant: Option<&str>) -> Result<Vec<TenantNamespace>> {
        let mut namespaces = self.cluster.list_tenant_namespaces().await?;
        if let Some(tenant) = tenant {
            namespaces.retain(|ns| ns.tenant == tenant);
        }
        Ok(namespaces)
    }

    /// Every tenant with the modules deployed in each environment
    pub async fn tenants(&self, tenant: Option<&str>) -> Result<Vec<TenantSummary>> {
        let mut by_tenant: BTreeMap<String, Vec<TenantEnvironment>> = BTreeMap::new();

        for ns in self.tenant_namespaces(tenant).await? {
            let modules = self.deployed_modules(&ns.namespace).await?;
            by_tenant.entry(ns.tenant).or_default().push(TenantEnvironment {
                environment: ns.environment,
                namespace: ns.namespace,
                modules: modules.into_iter().collect(),
            });
        }

        Ok(by_tenant
            .into_iter()
            .map(|(tenant, mut environments)| {
                environments.sort_by(|a, b| a.environment.cmp(&b.environment));
                TenantSummary {
                    tenant,
                    environments,
                }
            })
            .collect())
    }
}
