//! `SeaORM` Entity for ledger_entries table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::LedgerDirection;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: DateTimeWithTimeZone,
    pub inspector_id: Option<i64>,
    pub project_id: Option<i64>,
    pub direction: LedgerDirection,
    pub reference_id: Option<i64>,
    pub reference_label: String,
    pub description: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_price: Decimal,
    pub quantity: i64,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub inspector_prior_balance: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub inspector_new_balance: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub project_prior_balance: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub project_new_balance: Option<Decimal>,
    pub receipt_ref: Option<String>,
    #[sea_orm(unique)]
    pub reverses_entry_id: Option<i64>,
    pub is_cancelled: bool,
    pub created_by: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::projects::Entity",
        from = "Column::ProjectId",
        to = "super::projects::Column::Id"
    )]
    Projects,
    #[sea_orm(
        belongs_to = "super::project_expenditures::Entity",
        from = "Column::ReferenceId",
        to = "super::project_expenditures::Column::Id"
    )]
    ProjectExpenditures,
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ReversesEntryId",
        to = "Column::Id"
    )]
    SelfRef,
}

impl Related<super::projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Projects.def()
    }
}

impl Related<super::project_expenditures::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProjectExpenditures.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
