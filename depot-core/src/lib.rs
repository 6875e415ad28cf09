//! # depot-core
//!
//! Configuration records consumed by the sync engine: replica descriptors,
//! sync descriptors, and the YAML loading/merging/validation around them.

pub mod config;
pub mod error;

pub use config::{load, Credential, GlobalConfig, ReplicaConfig, SyncConfig};
pub use error::ConfigError;
