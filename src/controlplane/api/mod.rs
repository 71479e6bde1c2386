//! API Module
//!
//! REST API for catalog queries and module lifecycle operations, and the
//! HTTP client the CLI talks to it with.

pub mod client;
pub mod rest;
pub mod server;

pub use client::*;
pub use rest::*;
pub use server::*;
