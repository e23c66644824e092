//! Entity re-exports.

pub use super::ledger_entries::Entity as LedgerEntries;
pub use super::ledger_scopes::Entity as LedgerScopes;
pub use super::project_expenditures::Entity as ProjectExpenditures;
pub use super::projects::Entity as Projects;
