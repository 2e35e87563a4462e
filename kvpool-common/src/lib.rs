// kvpool-common - Shared error and configuration types for the pooled client
//
// This crate has no networking; it defines what can go wrong and how a
// store target is described.

pub mod config;
pub mod error;

// Re-export for convenience
pub use config::*;
pub use error::*;
