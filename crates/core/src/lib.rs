//! Core business logic for Cashbook.
//!
//! This crate contains the cash ledger engine with ZERO web or database
//! dependencies. Storage sits behind the [`ledger::LedgerStore`] port; the
//! Postgres implementation lives in `cashbook-db`.
//!
//! # Modules
//!
//! - `ledger` - Append-only running-balance ledger for inspectors and projects

pub mod ledger;
