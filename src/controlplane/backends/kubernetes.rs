//! Kubernetes Cluster Adapter
//!
//! Implements [`ClusterInspector`] over kube-rs. Every API call is bounded
//! by `api_timeout`; read calls are retried with exponential backoff while
//! the failure looks transient.

use crate::domain::labels;
use crate::domain::ports::ClusterInspector;
use crate::domain::{PodCounts, ResourceClass, TenantNamespace, WorkloadKind, WorkloadSummary};
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolumeClaim, Pod, Secret, ServiceAccount,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::GroupVersionKind;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

// =============================================================================
// Configuration
// =============================================================================

/// A custom resource kind removed under complete cleanup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

/// Configuration for the Kubernetes adapter
#[derive(Debug, Clone)]
pub struct KubeClusterConfig {
    /// Bound for a single API call
    pub api_timeout: Duration,
    /// Total retry budget for read calls
    pub retry_budget: Duration,
    /// Custom resource kinds removed under complete cleanup
    pub custom_resources: Vec<CustomResourceKind>,
}

impl Default for KubeClusterConfig {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(30),
            retry_budget: Duration::from_secs(10),
            custom_resources: Vec::new(),
        }
    }
}

// =============================================================================
// Kube Cluster
// =============================================================================

/// Cluster inspector backed by the Kubernetes API
pub struct KubeCluster {
    client: Client,
    config: KubeClusterConfig,
}

impl KubeCluster {
    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn connect(config: KubeClusterConfig) -> Result<Self> {
        let client = tokio::time::timeout(config.api_timeout, Client::try_default())
            .await
            .map_err(|_| Error::ClusterUnreachable("timed out creating client".to_string()))?
            .map_err(|e| Error::ClusterUnreachable(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: KubeClusterConfig) -> Self {
        Self { client, config }
    }

    /// Run one API call under the configured timeout
    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = kube::Result<T>>,
    {
        match tokio::time::timeout(self.config.api_timeout, call).await {
            Ok(result) => result.map_err(map_kube_error),
            Err(_) => Err(Error::ClusterUnreachable(format!(
                "API call timed out after {}s",
                self.config.api_timeout.as_secs()
            ))),
        }
    }

    /// Retry a read call while it fails transiently
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.config.retry_budget),
            ..Default::default()
        };

        let op = &op;
        backoff::future::retry(policy, move || async move {
            op().await.map_err(|e| {
                if e.is_transient() {
                    debug!("Retrying after transient error: {}", e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn list<K>(&self, namespace: &str, selector: &str) -> Result<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(selector);
        let (api, params) = (&api, &params);
        self.with_retry(move || async move { self.bounded(api.list(params)).await })
            .await
            .map(|list| list.items)
    }

    async fn delete_all<K>(&self, namespace: &str, selector: &str) -> Result<usize>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(selector);
        let deleted = self
            .bounded(api.delete_collection(&DeleteParams::default(), &params))
            .await?;
        Ok(deleted.either(|list| list.items.len(), |_| 0))
    }

    async fn delete_custom_resources(&self, namespace: &str, selector: &str) -> Result<usize> {
        let params = ListParams::default().labels(selector);
        let mut total = 0;

        for crd in &self.config.custom_resources {
            let gvk = GroupVersionKind::gvk(&crd.group, &crd.version, &crd.kind);
            let resource = ApiResource::from_gvk_with_plural(&gvk, &crd.plural);
            let api: Api<DynamicObject> =
                Api::namespaced_with(self.client.clone(), namespace, &resource);
            let deleted = self
                .bounded(api.delete_collection(&DeleteParams::default(), &params))
                .await?;
            total += deleted.either(|list| list.items.len(), |_| 0);
        }

        Ok(total)
    }
}

#[async_trait]
impl ClusterInspector for KubeCluster {
    #[instrument(skip(self, namespace_labels))]
    async fn ensure_namespace(
        &self,
        namespace: &str,
        namespace_labels: &BTreeMap<String, String>,
    ) -> Result<bool> {
        if self.namespace_exists(namespace).await? {
            return Ok(false);
        }

        let api: Api<Namespace> = Api::all(self.client.clone());
        let object = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                labels: Some(namespace_labels.clone()),
                ..Default::default()
            },
            ..Default::default()
        };

        match self.bounded(api.create(&PostParams::default(), &object)).await {
            Ok(_) => {
                info!("Created namespace {}", namespace);
                Ok(true)
            }
            // lost a race with another caller
            Err(Error::Kube(kube::Error::Api(response))) if response.code == 409 => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let api = &api;
        self.with_retry(move || async move { self.bounded(api.get_opt(namespace)).await })
            .await
            .map(|ns| ns.is_some())
    }

    #[instrument(skip(self))]
    async fn list_workloads(&self, namespace: &str, selector: &str) -> Result<Vec<WorkloadSummary>> {
        let (deployments, statefulsets) = futures::try_join!(
            self.list::<Deployment>(namespace, selector),
            self.list::<StatefulSet>(namespace, selector),
        )?;

        let mut workloads: Vec<WorkloadSummary> = deployments
            .iter()
            .map(|d| {
                let status = d.status.as_ref();
                WorkloadSummary {
                    kind: WorkloadKind::Deployment,
                    name: d.metadata.name.clone().unwrap_or_default(),
                    module: module_label(&d.metadata),
                    ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
                    desired_replicas: d
                        .spec
                        .as_ref()
                        .and_then(|s| s.replicas)
                        .or_else(|| status.and_then(|s| s.replicas))
                        .unwrap_or(0),
                }
            })
            .collect();

        workloads.extend(statefulsets.iter().map(|s| {
            let status = s.status.as_ref();
            WorkloadSummary {
                kind: WorkloadKind::StatefulSet,
                name: s.metadata.name.clone().unwrap_or_default(),
                module: module_label(&s.metadata),
                ready_replicas: status.and_then(|st| st.ready_replicas).unwrap_or(0),
                desired_replicas: s
                    .spec
                    .as_ref()
                    .and_then(|sp| sp.replicas)
                    .or_else(|| status.map(|st| st.replicas))
                    .unwrap_or(0),
            }
        }));

        debug!("Found {} workloads in {} for {}", workloads.len(), namespace, selector);
        Ok(workloads)
    }

    async fn count_pods(&self, namespace: &str, selector: &str) -> Result<PodCounts> {
        let pods = self.list::<Pod>(namespace, selector).await?;
        let running = pods
            .iter()
            .filter(|p| {
                p.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .map_or(false, |phase| phase == "Running")
            })
            .count();

        Ok(PodCounts {
            total: pods.len() as u32,
            running: running as u32,
        })
    }

    async fn list_tenant_namespaces(&self) -> Result<Vec<TenantNamespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params = ListParams::default().labels(labels::TENANT);
        let (api, params) = (&api, &params);
        let namespaces = self
            .with_retry(move || async move { self.bounded(api.list(params)).await })
            .await?;

        Ok(namespaces
            .items
            .into_iter()
            .filter_map(|ns| {
                let name = ns.metadata.name?;
                let ns_labels = ns.metadata.labels.unwrap_or_default();
                let tenant = ns_labels.get(labels::TENANT)?.clone();
                let environment = ns_labels
                    .get(labels::ENVIRONMENT)
                    .cloned()
                    .or_else(|| name.strip_prefix(&format!("{}-", tenant)).map(String::from))
                    .unwrap_or_default();
                Some(TenantNamespace {
                    tenant,
                    environment,
                    namespace: name,
                    created: ns.metadata.creation_timestamp.map(|t| t.0),
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn delete_resources(
        &self,
        namespace: &str,
        class: ResourceClass,
        selector: &str,
    ) -> Result<usize> {
        let deleted = match class {
            ResourceClass::PersistentVolumeClaims => {
                self.delete_all::<PersistentVolumeClaim>(namespace, selector).await
            }
            ResourceClass::Secrets => self.delete_all::<Secret>(namespace, selector).await,
            ResourceClass::ServiceAccounts => {
                self.delete_all::<ServiceAccount>(namespace, selector).await
            }
            ResourceClass::Roles => self.delete_all::<Role>(namespace, selector).await,
            ResourceClass::RoleBindings => self.delete_all::<RoleBinding>(namespace, selector).await,
            ResourceClass::NetworkPolicies => {
                self.delete_all::<NetworkPolicy>(namespace, selector).await
            }
            ResourceClass::Ingresses => self.delete_all::<Ingress>(namespace, selector).await,
            ResourceClass::Jobs => self.delete_all::<Job>(namespace, selector).await,
            ResourceClass::CustomResources => {
                self.delete_custom_resources(namespace, selector).await
            }
        };

        match &deleted {
            Ok(count) => debug!("Deleted {} {} in {}", count, class, namespace),
            Err(e) => warn!("Failed to delete {} in {}: {}", class, namespace, e),
        }
        deleted
    }

    async fn health_check(&self) -> Result<bool> {
        match self.bounded(self.client.apiserver_version()).await {
            Ok(info) => {
                debug!("API server {}.{}", info.major, info.minor);
                Ok(true)
            }
            Err(Error::ClusterUnreachable(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn module_label(meta: &ObjectMeta) -> Option<String> {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(labels::MODULE))
        .cloned()
}

/// API responses stay `Kube`; anything that never reached the API server
/// is reported as unreachable.
fn map_kube_error(e: kube::Error) -> Error {
    match e {
        kube::Error::Api(_) => Error::Kube(e),
        other => Error::ClusterUnreachable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use kube::core::ErrorResponse;

    #[test]
    fn test_api_errors_stay_kube_errors() {
        let err = map_kube_error(kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "namespaces \"acme-dev\" is forbidden".into(),
            reason: "Forbidden".into(),
            code: 403,
        }));
        assert_matches!(err, Error::Kube(_));
    }

    #[test]
    fn test_transport_errors_are_unreachable() {
        let err = map_kube_error(kube::Error::LinesCodecMaxLineLengthExceeded);
        assert_matches!(err, Error::ClusterUnreachable(_));
    }

    #[test]
    fn test_module_label() {
        let meta = ObjectMeta {
            labels: Some(
                [(labels::MODULE.to_string(), "minio".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        };
        assert_eq!(module_label(&meta), Some("minio".to_string()));
        assert_eq!(module_label(&ObjectMeta::default()), None);
    }
}
