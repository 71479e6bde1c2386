//! Catalog Events
//!
//! Emitted by the catalog store whenever a reload is attempted.

use serde::{Deserialize, Serialize};

/// Events emitted by the catalog store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogEvent {
    /// A new snapshot was installed
    Reloaded { source: String, module_count: usize },

    /// The catalog could not be parsed; the previous snapshot stays active
    ReloadFailed { source: String, reason: String },
}

impl CatalogEvent {
    pub fn source(&self) -> &str {
        match self {
            CatalogEvent::Reloaded { source, .. } => source,
            CatalogEvent::ReloadFailed { source, .. } => source,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CatalogEvent::ReloadFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let event = CatalogEvent::ReloadFailed {
            source: "/etc/spanda/modules.yaml".to_string(),
            reason: "duplicate module name 'spark'".to_string(),
        };
        assert_eq!(event.source(), "/etc/spanda/modules.yaml");
        assert!(event.is_failure());

        let event = CatalogEvent::Reloaded {
            source: "inline".to_string(),
            module_count: 12,
        };
        assert!(!event.is_failure());
    }
}
