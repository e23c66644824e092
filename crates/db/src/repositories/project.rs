//! Project and expenditure category repository.
//!
//! A project is created together with its default expenditure categories; the
//! ledger books spending against those categories and keeps their totals.

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr, TransactionTrait,
};
use tracing::info;

use cashbook_shared::types::{ExpenditureId, InspectorId, ProjectId, UserId};

use crate::entities::{project_expenditures, projects};

/// Default expenditure categories as `(name, is_fixed_cost)`, in sequence order.
pub const DEFAULT_EXPENDITURES: [(&str, bool); 4] = [
    ("Operational", true),
    ("Worker wages", true),
    ("Document copies and stamps", true),
    ("Construction insurance", false),
];

/// Error types for project operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// Project name already taken.
    #[error("Project name already exists: {0}")]
    DuplicateName(String),

    /// Project name is blank.
    #[error("Project name must not be empty")]
    EmptyName,

    /// Inspector id is not positive.
    #[error("Invalid inspector id: {0}")]
    InvalidInspector(InspectorId),

    /// Budget is negative.
    #[error("Budget must not be negative, got {0}")]
    NegativeBudget(Decimal),

    /// Project not found.
    #[error("Project not found: {0}")]
    NotFound(ProjectId),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Input for creating a project.
#[derive(Debug, Clone)]
pub struct CreateProjectInput {
    /// Unique project name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Inspector in charge.
    pub inspector_id: InspectorId,
    /// Planned budget.
    pub budget: Decimal,
    /// Acting user.
    pub created_by: UserId,
}

/// Project with its expenditure categories.
#[derive(Debug, Clone)]
pub struct ProjectWithExpenditures {
    /// The project record.
    pub project: projects::Model,
    /// Its categories, by sequence.
    pub expenditures: Vec<project_expenditures::Model>,
}

impl ProjectWithExpenditures {
    /// Id of the category named `name`.
    #[must_use]
    pub fn expenditure_id(&self, name: &str) -> Option<ExpenditureId> {
        self.expenditures
            .iter()
            .find(|expenditure| expenditure.name == name)
            .map(|expenditure| ExpenditureId::new(expenditure.id))
    }
}

/// Checks a create request before touching the database.
pub fn validate_create_input(input: &CreateProjectInput) -> Result<(), ProjectError> {
    if input.name.trim().is_empty() {
        return Err(ProjectError::EmptyName);
    }
    if !input.inspector_id.is_valid() {
        return Err(ProjectError::InvalidInspector(input.inspector_id));
    }
    if input.budget < Decimal::ZERO {
        return Err(ProjectError::NegativeBudget(input.budget));
    }
    Ok(())
}

/// Project repository.
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    db: DatabaseConnection,
}

impl ProjectRepository {
    /// Creates a new project repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Creates a project and its default expenditure categories in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if the name is taken, a validation error for bad
    /// input, or a database error.
    pub async fn create_project(
        &self,
        input: CreateProjectInput,
    ) -> Result<ProjectWithExpenditures, ProjectError> {
        validate_create_input(&input)?;
        let txn = self.db.begin().await?;
        let now = chrono::Utc::now();

        let project = projects::ActiveModel {
            name: Set(input.name.trim().to_string()),
            description: Set(input.description),
            inspector_id: Set(input.inspector_id.into_inner()),
            budget: Set(input.budget),
            income: Set(Decimal::ZERO),
            created_by: Set(Some(input.created_by.into_inner())),
            updated_by: Set(Some(input.created_by.into_inner())),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|err| match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => ProjectError::DuplicateName(input.name),
            _ => ProjectError::Database(err),
        })?;

        let mut expenditures = Vec::with_capacity(DEFAULT_EXPENDITURES.len());
        for (sequence, (name, is_fixed_cost)) in (1..).zip(DEFAULT_EXPENDITURES) {
            let expenditure = project_expenditures::ActiveModel {
                project_id: Set(project.id),
                sequence: Set(sequence),
                name: Set(name.to_string()),
                total_price: Set(Decimal::ZERO),
                is_fixed_cost: Set(is_fixed_cost),
                updated_by: Set(Some(input.created_by.into_inner())),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            expenditures.push(expenditure);
        }

        txn.commit().await?;
        info!(project_id = project.id, name = %project.name, "project created");

        Ok(ProjectWithExpenditures {
            project,
            expenditures,
        })
    }

    /// Loads a project with its categories.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the project does not exist.
    pub async fn get_project(
        &self,
        project_id: ProjectId,
    ) -> Result<ProjectWithExpenditures, ProjectError> {
        let project = projects::Entity::find_by_id(project_id.into_inner())
            .one(&self.db)
            .await?
            .ok_or(ProjectError::NotFound(project_id))?;
        let expenditures = self.list_expenditures(project_id).await?;

        Ok(ProjectWithExpenditures {
            project,
            expenditures,
        })
    }

    /// Lists a project's expenditure categories by sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_expenditures(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<project_expenditures::Model>, DbErr> {
        project_expenditures::Entity::find()
            .filter(project_expenditures::Column::ProjectId.eq(project_id.into_inner()))
            .order_by_asc(project_expenditures::Column::Sequence)
            .all(&self.db)
            .await
    }
}
