//! spandak8s - Tenant-scoped platform module lifecycle
//!
//! Enables, disables and inspects platform modules (Helm charts) inside
//! per-tenant, per-environment Kubernetes namespaces.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 CLI  ──HTTP──▶  REST API (axum)                     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                      Lifecycle Orchestrator                         │
//! │   enable / disable / status, confirmation gate, cleanup policy      │
//! ├──────────────┬──────────────┬──────────────┬────────────────────────┤
//! │   Catalog    │ Tier / Ident │  Deployment  │  Cluster State         │
//! │ (hot reload) │  Resolvers   │    Driver    │  Reconciler            │
//! ├──────────────┴──────────────┴──────┬───────┴────────────────────────┤
//! │   ReleaseManager (Helm CLI)        │  ClusterInspector (kube-rs)    │
//! │   SimulatedHelm (standalone)       │  InMemoryCluster (standalone)  │
//! └────────────────────────────────────┴────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`catalog`]: Module catalog snapshots, reload and validation
//! - [`controlplane`]: Resolvers, driver, reconciler, orchestrator and API
//! - [`domain`]: Value types, label keys and backend ports
//! - [`cli`]: Command-line argument definitions and handlers
//! - [`config`]: CLI configuration file
//! - [`metrics`]: Prometheus lifecycle metrics
//! - [`error`]: Error types and handling

pub mod catalog;
pub mod cli;
pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use catalog::{CatalogEvent, CatalogSnapshot, CatalogStore, CatalogStoreConfig, ModuleDefinition};

pub use controlplane::{
    ApiServer, ApiServerConfig, BackendConfig, BackendFactory, BackendKind, Backends,
    DeploymentDriver, DisableRequest, DriverConfig, EnableRequest, IdentityResolver,
    LifecycleOrchestrator, LifecycleOutcome, LifecycleReport, LifecycleRequest,
    OrchestratorConfig, Reconciler, TierResolver,
};

pub use domain::ports::{ClusterInspector, ReleaseManager, ReleaseSpec};
pub use domain::{CleanupPolicy, DeploymentTarget, LifecycleState, ModuleStatus, ResourceTier};

pub use error::{Error, OperationError, Phase, Result};

pub use metrics::LifecycleMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
