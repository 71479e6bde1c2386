//! Domain layer - Core lifecycle types and port definitions
//!
//! This module defines the value types shared across the control plane and
//! the traits (ports) that the Helm and Kubernetes adapters implement,
//! following hexagonal architecture principles.

pub mod labels;
pub mod ports;
pub mod types;

pub use ports::*;
pub use types::*;
