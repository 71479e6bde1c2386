//! Resource Tier Resolver
//!
//! Maps a tier name to its resource envelope and picks the Helm values
//! overlay a module should be deployed with.

use crate::catalog::{CatalogSnapshot, ModuleDefinition};
use crate::domain::{ResourceEnvelope, ResourceTier};
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Tier resolver bound to one catalog snapshot
#[derive(Debug, Clone)]
pub struct TierResolver {
    catalog: Arc<CatalogSnapshot>,
}

impl TierResolver {
    pub fn new(catalog: Arc<CatalogSnapshot>) -> Self {
        Self { catalog }
    }

    /// Resolve a tier by name
    pub fn resolve(&self, tier: &str) -> Result<ResourceTier> {
        self.catalog
            .resource_tiers()
            .get(tier)
            .map(|envelope| ResourceTier::from_envelope(tier, envelope))
            .ok_or_else(|| Error::UnknownTier {
                tier: tier.to_string(),
            })
    }

    /// All tiers, in catalog order
    pub fn tiers(&self) -> Vec<ResourceTier> {
        self.catalog
            .resource_tiers()
            .iter()
            .map(|(name, envelope)| ResourceTier::from_envelope(name.as_str(), envelope))
            .collect()
    }

    /// Resource envelope for a module at a tier; a per-module override
    /// replaces the catalog-wide tier envelope.
    pub fn envelope_for(&self, module: &ModuleDefinition, tier: &str) -> Result<ResourceEnvelope> {
        let base = self.resolve(tier)?;
        Ok(module
            .tier_envelopes
            .get(tier)
            .cloned()
            .unwrap_or_else(|| base.envelope()))
    }

    /// Values file to layer on top of the chart defaults: the tier overlay
    /// if the module declares one, otherwise its default values file.
    pub fn values_overlay_for(
        &self,
        module: &ModuleDefinition,
        tier: &str,
    ) -> Result<Option<PathBuf>> {
        self.resolve(tier)?;
        Ok(module
            .tier_values_files
            .get(tier)
            .or(module.values_file.as_ref())
            .cloned())
    }
}
