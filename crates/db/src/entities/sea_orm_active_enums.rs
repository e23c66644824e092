//! Postgres enum types.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// `ledger_direction` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "ledger_direction")]
pub enum LedgerDirection {
    /// Money coming in.
    #[sea_orm(string_value = "inbound")]
    Inbound,
    /// Money going out.
    #[sea_orm(string_value = "outbound")]
    Outbound,
}
