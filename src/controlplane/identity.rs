//! Namespace/Identity Resolver
//!
//! Derives the tenant namespace and Helm release name. Both are pure
//! functions of their inputs and are recomputed on every request:
//!
//! - namespace: `{tenant}-{environment}`
//! - release:   `{tenant}-{module}`
//!
//! Tenant names may not contain `-`, which makes both mappings injective.

use crate::domain::DeploymentTarget;
use crate::error::{Error, Result};

/// Kubernetes namespace length limit
pub const MAX_NAMESPACE_LEN: usize = 63;

/// Helm release name length limit
pub const MAX_RELEASE_LEN: usize = 53;

/// Tenant name length limit
pub const MAX_TENANT_LEN: usize = 30;

/// Identity resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    pub fn new() -> Self {
        Self
    }

    /// Validate a tenant name: `[a-z0-9]+`
    pub fn validate_tenant(&self, tenant: &str) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidIdentifier {
            field: "tenant".to_string(),
            value: tenant.to_string(),
            reason: reason.to_string(),
        };

        if tenant.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if tenant.len() > MAX_TENANT_LEN {
            return Err(invalid(&format!("longer than {} characters", MAX_TENANT_LEN)));
        }
        if !tenant
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(invalid("only lowercase letters and digits are allowed"));
        }
        Ok(())
    }

    /// Validate an environment name (DNS label)
    pub fn validate_environment(&self, environment: &str) -> Result<()> {
        validate_dns_label("environment", environment)
    }

    /// Validate a module name (DNS label)
    pub fn validate_module(&self, module: &str) -> Result<()> {
        validate_dns_label("module", module)
    }

    /// Namespace for a tenant environment
    pub fn namespace_for(&self, tenant: &str, environment: &str) -> Result<String> {
        self.validate_tenant(tenant)?;
        self.validate_environment(environment)?;
        let namespace = format!("{}-{}", tenant, environment);
        check_length("namespace", &namespace, MAX_NAMESPACE_LEN)?;
        Ok(namespace)
    }

    /// Helm release name for a tenant module
    pub fn release_name_for(&self, tenant: &str, module: &str) -> Result<String> {
        self.validate_tenant(tenant)?;
        self.validate_module(module)?;
        let release = format!("{}-{}", tenant, module);
        check_length("release", &release, MAX_RELEASE_LEN)?;
        Ok(release)
    }

    /// Full deployment target. `label_selector` comes from the catalog.
    pub fn target(
        &self,
        tenant: &str,
        environment: &str,
        module: &str,
        label_selector: &str,
    ) -> Result<DeploymentTarget> {
        Ok(DeploymentTarget {
            namespace: self.namespace_for(tenant, environment)?,
            release_name: self.release_name_for(tenant, module)?,
            tenant: tenant.to_string(),
            environment: environment.to_string(),
            module: module.to_string(),
            tier: None,
            label_selector: label_selector.to_string(),
        })
    }

    /// Inverse of [`namespace_for`](Self::namespace_for)
    pub fn parse_namespace(&self, namespace: &str) -> Option<(String, String)> {
        let (tenant, environment) = namespace.split_once('-')?;
        self.validate_tenant(tenant).ok()?;
        self.validate_environment(environment).ok()?;
        Some((tenant.to_string(), environment.to_string()))
    }
}

fn validate_dns_label(field: &str, value: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidIdentifier {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let bytes = value.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return Err(invalid("must not be empty"));
    };
    if bytes.len() > MAX_NAMESPACE_LEN {
        return Err(invalid(&format!("longer than {} characters", MAX_NAMESPACE_LEN)));
    }
    if !bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
    {
        return Err(invalid("only lowercase letters, digits and '-' are allowed"));
    }
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(invalid("must start and end with a letter or digit"));
    }
    Ok(())
}

fn check_length(field: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(Error::InvalidIdentifier {
            field: field.to_string(),
            value: value.to_string(),
            reason: format!("longer than {} characters", max),
        });
    }
    Ok(())
}
