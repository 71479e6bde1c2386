//! Catalog document format and module definitions
//!
//! The catalog is a YAML document listing resource tiers, categories and the
//! platform modules that can be enabled for a tenant.

use crate::domain::labels;
use crate::domain::ResourceEnvelope;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

// =============================================================================
// Document
// =============================================================================

/// Root of a catalog file
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CatalogDocument {
    /// Resource tiers; the built-in bronze/standard/premium set when omitted
    #[serde(default)]
    pub resource_tiers: IndexMap<String, ResourceEnvelope>,

    /// Display categories
    #[serde(default)]
    pub categories: IndexMap<String, CategoryInfo>,

    /// Platform modules
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

/// A module category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A module entry as written in the catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ModuleEntry {
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub category: Option<String>,
    pub chart_path: Option<PathBuf>,
    /// Default values file, relative to the chart directory
    #[serde(default)]
    pub values_file: Option<PathBuf>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Per-module resource envelope overrides by tier
    #[serde(default)]
    pub tiers: BTreeMap<String, ResourceEnvelope>,
    /// Tier-specific values overlays, relative to the chart directory
    #[serde(default)]
    pub values_files: BTreeMap<String, PathBuf>,
    /// Extra `--set` values
    #[serde(default)]
    pub helm_values: BTreeMap<String, HelmValue>,
    /// Workload label selector (defaults to `spanda.ai/module=<name>`)
    #[serde(default)]
    pub label_selector: Option<String>,
}

/// Scalar Helm value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum HelmValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl std::fmt::Display for HelmValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HelmValue::Bool(v) => write!(f, "{}", v),
            HelmValue::Int(v) => write!(f, "{}", v),
            HelmValue::Float(v) => write!(f, "{}", v),
            HelmValue::String(v) => write!(f, "{}", v),
        }
    }
}

// =============================================================================
// Module Definition
// =============================================================================

/// A validated module definition, immutable for the lifetime of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDefinition {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub category: String,
    /// Chart location, resolved against the charts root
    pub chart_path: PathBuf,
    /// Default values file, resolved against the chart directory
    pub values_file: Option<PathBuf>,
    pub dependencies: BTreeSet<String>,
    pub conflicts_with: BTreeSet<String>,
    pub tier_envelopes: BTreeMap<String, ResourceEnvelope>,
    /// Tier overlays, resolved against the chart directory
    pub tier_values_files: BTreeMap<String, PathBuf>,
    pub helm_values: BTreeMap<String, HelmValue>,
    pub label_selector: String,
}

impl ModuleDefinition {
    /// Build a definition from a catalog entry, resolving relative chart
    /// paths against `charts_root`. Returns the name of the first missing
    /// required field on failure.
    pub(crate) fn from_entry(
        entry: ModuleEntry,
        charts_root: &std::path::Path,
    ) -> std::result::Result<Self, String> {
        let name = entry.name.filter(|n| !n.trim().is_empty()).ok_or("name")?;
        let category = entry.category.ok_or("category")?;
        let chart = entry.chart_path.ok_or("chart_path")?;

        let chart_path = if chart.is_absolute() {
            chart
        } else {
            charts_root.join(chart)
        };
        let in_chart = |p: PathBuf| if p.is_absolute() { p } else { chart_path.join(p) };

        Ok(Self {
            display_name: entry.display_name.unwrap_or_else(|| name.clone()),
            description: entry.description.unwrap_or_default(),
            version: entry.version.unwrap_or_else(|| "latest".to_string()),
            category,
            values_file: entry.values_file.map(in_chart),
            dependencies: entry.dependencies.into_iter().collect(),
            conflicts_with: entry.conflicts.into_iter().collect(),
            tier_envelopes: entry.tiers,
            tier_values_files: entry
                .values_files
                .into_iter()
                .map(|(tier, path)| (tier, in_chart(path)))
                .collect(),
            helm_values: entry.helm_values,
            label_selector: entry
                .label_selector
                .unwrap_or_else(|| labels::module_selector(&name)),
            chart_path,
            name,
        })
    }
}

/// Built-in resource tiers
pub fn default_resource_tiers() -> IndexMap<String, ResourceEnvelope> {
    let mut tiers = IndexMap::new();
    tiers.insert("bronze".to_string(), ResourceEnvelope::new("10", "20Gi", "100Gi"));
    tiers.insert("standard".to_string(), ResourceEnvelope::new("20", "40Gi", "500Gi"));
    tiers.insert("premium".to_string(), ResourceEnvelope::new("50", "100Gi", "2Ti"));
    tiers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_entry_resolves_paths() {
        let entry = ModuleEntry {
            name: Some("data-lake".into()),
            category: Some("data-storage".into()),
            chart_path: Some("data-lake".into()),
            values_file: Some("values.yaml".into()),
            values_files: [("bronze".to_string(), PathBuf::from("values-bronze.yaml"))]
                .into_iter()
                .collect(),
            ..Default::default()
        };

        let def = ModuleDefinition::from_entry(entry, Path::new("/opt/charts")).unwrap();
        assert_eq!(def.chart_path, PathBuf::from("/opt/charts/data-lake"));
        assert_eq!(def.values_file, Some(PathBuf::from("/opt/charts/data-lake/values.yaml")));
        assert_eq!(
            def.tier_values_files["bronze"],
            PathBuf::from("/opt/charts/data-lake/values-bronze.yaml")
        );
        assert_eq!(def.label_selector, "spanda.ai/module=data-lake");
        assert_eq!(def.version, "latest");
    }

    #[test]
    fn test_entry_missing_required_field() {
        let entry = ModuleEntry {
            name: Some("spark".into()),
            category: Some("compute".into()),
            ..Default::default()
        };
        assert_eq!(
            ModuleDefinition::from_entry(entry, Path::new(".")).unwrap_err(),
            "chart_path"
        );
    }

    #[test]
    fn test_helm_value_parsing() {
        let values: BTreeMap<String, HelmValue> =
            serde_yaml::from_str("a: true\nb: 3\nc: hello\nd: 1.5").unwrap();
        assert_eq!(values["a"].to_string(), "true");
        assert_eq!(values["b"].to_string(), "3");
        assert_eq!(values["c"].to_string(), "hello");
        assert_eq!(values["d"].to_string(), "1.5");
    }
}
