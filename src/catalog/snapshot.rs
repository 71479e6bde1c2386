//! Immutable catalog snapshots
//!
//! A snapshot is parsed and validated as a whole; once built it never
//! changes. Reloading produces a new snapshot.

use super::definition::{
    default_resource_tiers, CatalogDocument, CategoryInfo, ModuleDefinition,
};
use crate::domain::ResourceEnvelope;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Validation outcome for one module of a prospective selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleValidation {
    pub module: String,
    pub valid: bool,
    pub dependencies: Vec<String>,
    pub missing_dependencies: Vec<String>,
    pub conflicts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A consistent, validated view of the module catalog
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    modules: IndexMap<String, ModuleDefinition>,
    resource_tiers: IndexMap<String, ResourceEnvelope>,
    categories: IndexMap<String, CategoryInfo>,
    source: String,
    loaded_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    /// Load and validate a catalog file. Relative chart paths resolve
    /// against `charts_root`, or the catalog file's directory when `None`.
    pub fn load(path: &Path, charts_root: Option<&Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::CatalogParse {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let root = charts_root
            .map(Path::to_path_buf)
            .or_else(|| path.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        Self::from_yaml(&text, &path.display().to_string(), &root)
    }

    /// Parse and validate a catalog document
    pub fn from_yaml(text: &str, source: &str, charts_root: &Path) -> Result<Self> {
        let parse_error = |reason: String| Error::CatalogParse {
            source_name: source.to_string(),
            reason,
        };

        let document: CatalogDocument =
            serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))?;

        let resource_tiers = if document.resource_tiers.is_empty() {
            default_resource_tiers()
        } else {
            document.resource_tiers
        };

        let mut modules = IndexMap::with_capacity(document.modules.len());
        for (index, entry) in document.modules.into_iter().enumerate() {
            let def = ModuleDefinition::from_entry(entry, charts_root).map_err(|field| {
                parse_error(format!("modules[{}]: missing required field '{}'", index, field))
            })?;

            if modules.contains_key(&def.name) {
                return Err(parse_error(format!("duplicate module name '{}'", def.name)));
            }
            modules.insert(def.name.clone(), def);
        }

        for def in modules.values() {
            for dep in &def.dependencies {
                if !modules.contains_key(dep) {
                    return Err(parse_error(format!(
                        "module '{}' depends on unknown module '{}'",
                        def.name, dep
                    )));
                }
            }
            for other in &def.conflicts_with {
                if !modules.contains_key(other) {
                    return Err(parse_error(format!(
                        "module '{}' conflicts with unknown module '{}'",
                        def.name, other
                    )));
                }
            }
            for tier in def.tier_values_files.keys().chain(def.tier_envelopes.keys()) {
                if !resource_tiers.contains_key(tier) {
                    return Err(parse_error(format!(
                        "module '{}' references unknown tier '{}'",
                        def.name, tier
                    )));
                }
            }
        }

        debug!(
            "Parsed catalog {}: {} modules, {} tiers",
            source,
            modules.len(),
            resource_tiers.len()
        );

        Ok(Self {
            modules,
            resource_tiers,
            categories: document.categories,
            source: source.to_string(),
            loaded_at: Utc::now(),
        })
    }

    /// Empty catalog with the built-in tiers
    pub fn empty() -> Self {
        Self {
            modules: IndexMap::new(),
            resource_tiers: default_resource_tiers(),
            categories: IndexMap::new(),
            source: "<empty>".to_string(),
            loaded_at: Utc::now(),
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Get a module by name
    pub fn get(&self, name: &str) -> Result<&ModuleDefinition> {
        self.modules.get(name).ok_or_else(|| Error::ModuleNotFound {
            module: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// All modules, in declaration order
    pub fn modules(&self) -> impl Iterator<Item = &ModuleDefinition> {
        self.modules.values()
    }

    pub fn modules_by_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a ModuleDefinition> + 'a {
        self.modules.values().filter(move |m| m.category == category)
    }

    pub fn categories(&self) -> &IndexMap<String, CategoryInfo> {
        &self.categories
    }

    pub fn resource_tiers(&self) -> &IndexMap<String, ResourceEnvelope> {
        &self.resource_tiers
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    // =========================================================================
    // Dependency Validation
    // =========================================================================

    /// All modules `name` depends on, directly or transitively
    pub fn dependency_closure(&self, name: &str) -> Result<BTreeSet<String>> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<&str> = self.get(name)?.dependencies.iter().map(String::as_str).collect();

        while let Some(dep) = stack.pop() {
            if dep == name || !closure.insert(dep.to_string()) {
                continue;
            }
            stack.extend(self.get(dep)?.dependencies.iter().map(String::as_str));
        }

        Ok(closure)
    }

    fn conflicting(&self, a: &ModuleDefinition, b: &str) -> bool {
        a.conflicts_with.contains(b)
            || self
                .modules
                .get(b)
                .map_or(false, |other| other.conflicts_with.contains(&a.name))
    }

    /// Check that a set of modules can be enabled together: every
    /// transitive dependency is part of the set and no two members conflict.
    pub fn validate_selection<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        let selected: BTreeSet<&str> = names.iter().map(AsRef::as_ref).collect();

        for name in &selected {
            let missing: Vec<String> = self
                .dependency_closure(name)?
                .into_iter()
                .filter(|dep| !selected.contains(dep.as_str()))
                .collect();
            if !missing.is_empty() {
                return Err(Error::DependencyUnsatisfied {
                    module: name.to_string(),
                    missing,
                });
            }
        }

        for name in &selected {
            let def = self.get(name)?;
            if let Some(other) = selected
                .iter()
                .find(|other| *other != name && self.conflicting(def, other))
            {
                return Err(Error::Conflict {
                    module: name.to_string(),
                    conflicts_with: other.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Check that `module` can be added to a namespace already running
    /// `deployed`. Unknown deployed modules are ignored.
    pub fn validate_addition(&self, deployed: &BTreeSet<String>, module: &str) -> Result<()> {
        let def = self.get(module)?;

        let missing: Vec<String> = self
            .dependency_closure(module)?
            .into_iter()
            .filter(|dep| !deployed.contains(dep))
            .collect();
        if !missing.is_empty() {
            return Err(Error::DependencyUnsatisfied {
                module: module.to_string(),
                missing,
            });
        }

        if let Some(other) = deployed
            .iter()
            .find(|other| other.as_str() != module && self.conflicting(def, other))
        {
            return Err(Error::Conflict {
                module: module.to_string(),
                conflicts_with: other.clone(),
            });
        }

        Ok(())
    }

    /// Per-module validation report for a prospective selection
    pub fn validation_report<S: AsRef<str>>(&self, names: &[S]) -> Vec<ModuleValidation> {
        let selected: BTreeSet<&str> = names.iter().map(AsRef::as_ref).collect();

        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                match (self.get(name), self.dependency_closure(name)) {
                    (Ok(def), Ok(closure)) => {
                        let missing: Vec<String> = closure
                            .into_iter()
                            .filter(|dep| !selected.contains(dep.as_str()))
                            .collect();
                        let conflicts: Vec<String> = selected
                            .iter()
                            .filter(|other| **other != name && self.conflicting(def, other))
                            .map(|other| other.to_string())
                            .collect();
                        ModuleValidation {
                            module: name.to_string(),
                            valid: missing.is_empty() && conflicts.is_empty(),
                            dependencies: def.dependencies.iter().cloned().collect(),
                            missing_dependencies: missing,
                            conflicts,
                            error: None,
                        }
                    }
                    (Err(e), _) | (_, Err(e)) => ModuleValidation {
                        module: name.to_string(),
                        valid: false,
                        dependencies: Vec::new(),
                        missing_dependencies: Vec::new(),
                        conflicts: Vec::new(),
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect()
    }
}
