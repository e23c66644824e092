//! Cash ledger engine.
//!
//! Every movement of money is an append-only entry carrying the running balance
//! of each scope it touches:
//! - Entry types, scopes and balance snapshots
//! - Pure entry construction with funds checks
//! - Storage ports and an in-memory store
//! - Atomic movement coordination and cancellation
//! - History, balance and audit queries

pub mod audit;
pub mod balance;
pub mod builder;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod memory;
pub mod query;
pub mod reversal;
pub mod service;
pub mod store;

#[cfg(test)]
mod builder_props;

pub use audit::{ChainReport, ChainViolation, verify_chain};
pub use balance::{LatestBalance, OwnerBalances, ScopeHead};
pub use builder::{EntryBuilder, ExpenditureRequest, IncomeRequest};
pub use coordinator::{Movement, PendingMovement, TransactionCoordinator};
pub use entry::{BalanceSnapshot, Direction, LedgerEntry, NewLedgerEntry, Owner, Scope};
pub use error::LedgerError;
pub use memory::{InMemoryLedgerStore, InMemoryLedgerTx};
pub use query::{
    AccountSummary, ExpenditureDetails, LedgerQueryService, ProjectIncomeReport, since_months_ago,
};
pub use reversal::ReversalHandler;
pub use service::LedgerService;
pub use store::{AggregateUpdate, EntryQuery, LedgerStore, LedgerTx};
