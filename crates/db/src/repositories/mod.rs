//! Repository abstractions for data access.
//!
//! Repositories provide a clean interface for database operations,
//! hiding the `SeaORM` implementation details from the rest of the application.

pub mod ledger;
pub mod project;

pub use ledger::{PgLedgerStore, PgLedgerTx};
pub use project::{
    CreateProjectInput, DEFAULT_EXPENDITURES, ProjectError, ProjectRepository,
    ProjectWithExpenditures,
};
