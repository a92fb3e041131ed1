//! MedDesk Common Library
//!
//! Shared code for the MedDesk gateway and administrative tools including:
//! - Database models, migrations and repository patterns
//! - Domain rules (age buckets, trends, CPF validation)
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and logging setup

pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod metrics;
pub mod telemetry;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use db::{DbPool, Repository};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
