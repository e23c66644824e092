//! Shared types, errors, and configuration for the cashbook ledger.
//!
//! This crate provides common types used across all other crates:
//! - Rupiah amounts with decimal precision
//! - Typed IDs for type-safe entity references
//! - Pagination types for history queries
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, DatabaseConfig, LedgerSettings};
pub use error::{AppError, AppResult};
