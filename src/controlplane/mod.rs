//! Control Plane Module
//!
//! Resolves tenant identities and tiers, drives Helm through the backend
//! adapters, observes the cluster, and composes it all into the module
//! lifecycle operations.

pub mod api;
pub mod backends;
pub mod driver;
pub mod identity;
pub mod orchestrator;
pub mod reconciler;
pub mod tier;

pub use api::{ApiClient, ApiClientConfig, ApiServer, ApiServerConfig, RestRouter};
pub use backends::{BackendConfig, BackendFactory, BackendKind, Backends};
pub use driver::*;
pub use identity::*;
pub use orchestrator::*;
pub use reconciler::*;
pub use tier::*;
