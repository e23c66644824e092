//! `SeaORM` entities for the cash ledger schema.

pub mod prelude;

pub mod ledger_entries;
pub mod ledger_scopes;
pub mod project_expenditures;
pub mod projects;
pub mod sea_orm_active_enums;
