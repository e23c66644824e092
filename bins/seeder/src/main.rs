//! Demo data seeder for Cashbook development.
//!
//! Seeds one demo project with its default expenditure categories and books a
//! few movements through the ledger engine, including a cancellation.
//!
//! Usage: cargo run --bin seeder

use anyhow::Context;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cashbook_core::ledger::{ExpenditureRequest, IncomeRequest, LedgerService, Owner, Scope};
use cashbook_db::entities::projects;
use cashbook_db::repositories::{CreateProjectInput, ProjectWithExpenditures};
use cashbook_db::{PgLedgerStore, ProjectRepository, connect};
use cashbook_shared::AppConfig;
use cashbook_shared::types::{InspectorId, ProjectId, UserId};

/// Name of the seeded project (the seeder is idempotent on it).
const DEMO_PROJECT: &str = "Demo drainage project";
/// Inspector in charge of the demo project.
const DEMO_INSPECTOR: InspectorId = InspectorId::new(1);
/// User recorded as author of seeded rows.
const SEED_USER: UserId = UserId::new(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cashbook=debug,seeder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let db = connect(&config.database)
        .await
        .context("failed to connect to database")?;
    info!("Connected to database");

    if demo_project_exists(&db).await? {
        info!(name = DEMO_PROJECT, "Demo project already exists, skipping");
        return Ok(());
    }

    info!("Seeding demo project...");
    let project = ProjectRepository::new(db.clone())
        .create_project(CreateProjectInput {
            name: DEMO_PROJECT.to_string(),
            description: "Drainage works, seeded for local development".to_string(),
            inspector_id: DEMO_INSPECTOR,
            budget: dec!(250000000),
            created_by: SEED_USER,
        })
        .await?;

    let service = LedgerService::new(
        PgLedgerStore::new(db, &config.ledger),
        config.ledger,
    );

    info!("Seeding ledger movements...");
    seed_movements(&service, &project).await?;

    for scope in [
        Scope::Inspector(DEMO_INSPECTOR),
        Scope::Project(ProjectId::new(project.project.id)),
    ] {
        let summary = service.query().account_summary(scope).await?;
        info!(
            %scope,
            balance = %summary.balance,
            entries = summary.entry_count,
            "Seeded account"
        );
    }

    info!("Seeding complete!");
    Ok(())
}

async fn demo_project_exists(db: &DatabaseConnection) -> anyhow::Result<bool> {
    let existing = projects::Entity::find()
        .filter(projects::Column::Name.eq(DEMO_PROJECT))
        .one(db)
        .await?;
    Ok(existing.is_some())
}

async fn seed_movements(
    service: &LedgerService<PgLedgerStore>,
    project: &ProjectWithExpenditures,
) -> anyhow::Result<()> {
    let owner = Owner::InspectorProject {
        inspector: DEMO_INSPECTOR,
        project: ProjectId::new(project.project.id),
    };
    let operational = project
        .expenditure_id("Operational")
        .context("demo project has no Operational category")?;
    let wages = project
        .expenditure_id("Worker wages")
        .context("demo project has no Worker wages category")?;

    service
        .record_income(IncomeRequest {
            owner,
            amount: dec!(15000000),
            label: "Director".to_string(),
            description: "First project disbursement".to_string(),
            receipt_ref: None,
            created_by: SEED_USER,
        })
        .await?;

    let cement = service
        .record_expenditure(ExpenditureRequest {
            owner,
            expenditure_id: Some(operational),
            label: "Operational".to_string(),
            description: "Cement bags".to_string(),
            unit_price: dec!(65000),
            quantity: 40,
            receipt_ref: None,
            created_by: SEED_USER,
        })
        .await?;

    service
        .record_expenditure(ExpenditureRequest {
            owner,
            expenditure_id: Some(wages),
            label: "Worker wages".to_string(),
            description: "Weekly wages, 6 workers".to_string(),
            unit_price: dec!(150000),
            quantity: 6,
            receipt_ref: None,
            created_by: SEED_USER,
        })
        .await?;

    // Booked twice by mistake; the seeded history shows the cancellation.
    let duplicate = service
        .record_expenditure(ExpenditureRequest {
            owner,
            expenditure_id: Some(operational),
            label: "Operational".to_string(),
            description: "Cement bags (duplicate)".to_string(),
            unit_price: cement.unit_price,
            quantity: cement.quantity,
            receipt_ref: None,
            created_by: SEED_USER,
        })
        .await?;
    service.cancel(duplicate.id, SEED_USER).await?;

    Ok(())
}
