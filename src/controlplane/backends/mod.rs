//! Backend Adapters
//!
//! Provides adapters for the two external systems:
//! - Helm: release install/uninstall through the `helm` binary
//! - Kubernetes: workload and resource queries through kube-rs
//! - Memory: simulated cluster and Helm for standalone mode and tests

pub mod helm;
pub mod kubernetes;
pub mod memory;

pub use helm::*;
pub use kubernetes::*;
pub use memory::*;

use crate::domain::ports::{ClusterInspectorRef, ReleaseManagerRef};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Which backend pair to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Helm CLI + Kubernetes API
    Cluster,
    /// In-memory simulation
    Standalone,
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cluster" | "kubernetes" | "k8s" => Ok(BackendKind::Cluster),
            "standalone" | "memory" => Ok(BackendKind::Standalone),
            _ => Err(Error::Configuration(format!("unknown backend: {}", s))),
        }
    }
}

/// Combined backend configuration
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub helm: HelmConfig,
    pub kube: KubeClusterConfig,
}

/// Release manager and cluster inspector, built together
#[derive(Clone)]
pub struct Backends {
    pub releases: ReleaseManagerRef,
    pub cluster: ClusterInspectorRef,
}

/// Factory for creating backend adapters
pub struct BackendFactory;

impl BackendFactory {
    /// Create the backend pair for `kind`
    pub async fn create(kind: BackendKind, config: BackendConfig) -> Result<Backends> {
        match kind {
            BackendKind::Cluster => {
                let cluster = KubeCluster::connect(config.kube).await?;
                info!("Using Helm ({}) against the Kubernetes API", config.helm.binary.display());
                Ok(Backends {
                    releases: Arc::new(HelmCli::new(config.helm)),
                    cluster: Arc::new(cluster),
                })
            }
            BackendKind::Standalone => {
                info!("Using in-memory cluster simulation");
                Ok(Self::standalone().0)
            }
        }
    }

    /// In-memory backends, plus concrete handles for driving the simulation
    pub fn standalone() -> (Backends, Arc<InMemoryCluster>, Arc<SimulatedHelm>) {
        let cluster = InMemoryCluster::new();
        let helm = SimulatedHelm::new(cluster.clone());
        let backends = Backends {
            releases: helm.clone(),
            cluster: cluster.clone(),
        };
        (backends, cluster, helm)
    }
}
