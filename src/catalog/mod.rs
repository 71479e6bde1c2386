//! Module Catalog
//!
//! Declarative registry of every platform module that can be enabled for a
//! tenant: charts, default values, tier overlays, dependencies and conflicts.
//!
//! - [`definition`]: catalog document format and validated definitions
//! - [`snapshot`]: immutable, fully validated catalog view
//! - [`store`]: atomically swapped snapshot with polling reload
//! - [`events`]: reload notifications

pub mod definition;
pub mod events;
pub mod snapshot;
pub mod store;

pub use definition::{
    default_resource_tiers, CatalogDocument, CategoryInfo, HelmValue, ModuleDefinition,
    ModuleEntry,
};
pub use events::CatalogEvent;
pub use snapshot::{CatalogSnapshot, ModuleValidation};
pub use store::{CatalogStore, CatalogStoreConfig};

/// JSON schema of the catalog document
pub fn document_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(CatalogDocument)
}
