//! Well-known label keys and values used on tenant resources.

/// Label carried by every workload (and secondary resource) of a module
pub const MODULE: &str = "spanda.ai/module";

/// Label carried by tenant namespaces
pub const TENANT: &str = "spanda.ai/tenant";

/// Label carried by tenant namespaces, naming the environment
pub const ENVIRONMENT: &str = "spanda.ai/environment";

/// Label recording the resource tier a module was deployed with
pub const TIER: &str = "spanda.ai/tier";

/// Standard label for the tool managing a resource
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label Helm puts on every templated object
pub const INSTANCE: &str = "app.kubernetes.io/instance";

/// Value for [`MANAGED_BY`] on namespaces created by the driver
pub const MANAGED_BY_SPANDA: &str = "spandak8s";

/// Canonical selector for a module's workloads
pub fn module_selector(module: &str) -> String {
    format!("{}={}", MODULE, module)
}
