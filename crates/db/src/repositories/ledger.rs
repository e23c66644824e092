//! Postgres implementation of the ledger storage port.
//!
//! Writers on one scope serialize on its `ledger_scopes` row (`SELECT ... FOR
//! UPDATE`) and bump its version with a compare-and-set on every append. Lock
//! waits are bounded by `SET LOCAL lock_timeout`; lock timeouts, deadlocks and
//! serialization failures surface as `ConcurrencyConflict`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use cashbook_core::ledger::{
    AggregateUpdate, BalanceSnapshot, Direction, EntryQuery, LatestBalance, LedgerEntry,
    LedgerError, LedgerStore, LedgerTx, NewLedgerEntry, Owner, Scope, ScopeHead,
};
use cashbook_shared::LedgerSettings;
use cashbook_shared::types::{EntryId, ExpenditureId, InspectorId, ProjectId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbErr, EntityTrait, NotSet, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait,
    RuntimeErr, Select, Set, SqlErr, TransactionTrait,
};
use tracing::{debug, warn};

use crate::entities::{
    ledger_entries, ledger_scopes, project_expenditures, projects,
    sea_orm_active_enums::LedgerDirection,
};

/// SQLSTATEs that mean "another writer got there first"; `SqlErr` does not model them.
const CONFLICT_SQLSTATES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
];

/// Ledger store backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    db: DatabaseConnection,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    /// Creates a store over `db` using the configured lock timeout.
    #[must_use]
    pub fn new(db: DatabaseConnection, settings: &LedgerSettings) -> Self {
        Self {
            db,
            lock_timeout: settings.lock_timeout(),
        }
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, LedgerError> {
        let txn = self.db.begin().await.map_err(storage_error)?;
        let millis = self.lock_timeout.as_millis().max(1);
        txn.execute_unprepared(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .await
            .map_err(storage_error)?;

        Ok(PgLedgerTx {
            txn,
            heads: BTreeMap::new(),
        })
    }

    async fn latest_balance(&self, scope: Scope) -> Result<LatestBalance, LedgerError> {
        latest_balance_on(&self.db, scope).await
    }

    async fn find_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, LedgerError> {
        find_entry_on(&self.db, id).await
    }

    async fn list_entries(&self, query: &EntryQuery) -> Result<Vec<LedgerEntry>, LedgerError> {
        scope_select(query.scope, query.since)
            .order_by_desc(ledger_entries::Column::CreatedAt)
            .order_by_desc(ledger_entries::Column::Id)
            .offset(query.offset)
            .limit(query.limit)
            .all(&self.db)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(to_domain)
            .collect()
    }

    async fn count_entries(
        &self,
        scope: Scope,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, LedgerError> {
        scope_select(scope, since)
            .count(&self.db)
            .await
            .map_err(storage_error)
    }

    async fn list_by_reference(
        &self,
        expenditure_id: ExpenditureId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        ledger_entries::Entity::find()
            .filter(ledger_entries::Column::ReferenceId.eq(expenditure_id.into_inner()))
            .filter(ledger_entries::Column::Direction.eq(LedgerDirection::Outbound))
            .filter(ledger_entries::Column::IsCancelled.eq(false))
            .order_by_desc(ledger_entries::Column::CreatedAt)
            .order_by_desc(ledger_entries::Column::Id)
            .all(&self.db)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(to_domain)
            .collect()
    }

    async fn project_income(&self, project_id: ProjectId) -> Result<Decimal, LedgerError> {
        projects::Entity::find_by_id(project_id.into_inner())
            .one(&self.db)
            .await
            .map_err(storage_error)?
            .map(|project| project.income)
            .ok_or(LedgerError::ProjectNotFound(project_id))
    }

    async fn expenditure_total(
        &self,
        expenditure_id: ExpenditureId,
    ) -> Result<Decimal, LedgerError> {
        project_expenditures::Entity::find_by_id(expenditure_id.into_inner())
            .one(&self.db)
            .await
            .map_err(storage_error)?
            .map(|expenditure| expenditure.total_price)
            .ok_or(LedgerError::ExpenditureNotFound(expenditure_id))
    }
}

/// One Postgres transaction holding row locks on its scope heads.
pub struct PgLedgerTx {
    txn: DatabaseTransaction,
    heads: BTreeMap<Scope, ScopeHead>,
}

impl PgLedgerTx {
    fn ensure_locked(&self, scopes: &[Scope]) -> Result<(), LedgerError> {
        match scopes.iter().find(|scope| !self.heads.contains_key(scope)) {
            Some(scope) => Err(LedgerError::Internal(format!(
                "write to {scope} without holding its lock"
            ))),
            None => Ok(()),
        }
    }

    async fn lock_head(&self, scope: Scope) -> Result<ScopeHead, LedgerError> {
        let seed = ledger_scopes::ActiveModel {
            scope_kind: Set(scope.kind().to_string()),
            scope_id: Set(scope.raw_id()),
            version: Set(0),
            last_entry_id: Set(None),
            last_entry_at: Set(None),
            updated_at: Set(Utc::now().into()),
        };
        ledger_scopes::Entity::insert(seed)
            .on_conflict(
                OnConflict::columns([
                    ledger_scopes::Column::ScopeKind,
                    ledger_scopes::Column::ScopeId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.txn)
            .await
            .map_err(storage_error)?;

        let row = ledger_scopes::Entity::find_by_id((scope.kind().to_string(), scope.raw_id()))
            .lock_exclusive()
            .one(&self.txn)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| LedgerError::Internal(format!("scope head {scope} vanished")))?;

        Ok(ScopeHead {
            version: row.version,
            last_entry_id: row.last_entry_id.map(EntryId::new),
            last_entry_at: row.last_entry_at.map(|at| at.with_timezone(&Utc)),
        })
    }

    async fn advance_head(&mut self, scope: Scope, stored: &LedgerEntry) -> Result<(), LedgerError> {
        let current = self
            .heads
            .get(&scope)
            .copied()
            .ok_or_else(|| LedgerError::Internal(format!("scope {scope} is not locked")))?;
        let next = current.advance(stored.id, stored.created_at);

        let result = ledger_scopes::Entity::update_many()
            .col_expr(ledger_scopes::Column::Version, Expr::value(next.version))
            .col_expr(
                ledger_scopes::Column::LastEntryId,
                Expr::value(stored.id.into_inner()),
            )
            .col_expr(
                ledger_scopes::Column::LastEntryAt,
                Expr::value(stored.created_at),
            )
            .filter(ledger_scopes::Column::ScopeKind.eq(scope.kind()))
            .filter(ledger_scopes::Column::ScopeId.eq(scope.raw_id()))
            .filter(ledger_scopes::Column::Version.eq(current.version))
            .exec(&self.txn)
            .await
            .map_err(storage_error)?;

        if result.rows_affected == 0 {
            warn!(%scope, expected = current.version, "scope head moved under a held lock");
            return Err(LedgerError::ConcurrencyConflict);
        }
        self.heads.insert(scope, next);
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_scopes(&mut self, scopes: &[Scope]) -> Result<(), LedgerError> {
        let mut wanted: Vec<Scope> = scopes
            .iter()
            .copied()
            .filter(|scope| !self.heads.contains_key(scope))
            .collect();
        wanted.sort();
        wanted.dedup();

        for scope in wanted {
            let head = self.lock_head(scope).await?;
            debug!(%scope, version = head.version, "scope lock acquired");
            self.heads.insert(scope, head);
        }
        Ok(())
    }

    async fn latest_balance(&self, scope: Scope) -> Result<LatestBalance, LedgerError> {
        latest_balance_on(&self.txn, scope).await
    }

    async fn find_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, LedgerError> {
        find_entry_on(&self.txn, id).await
    }

    async fn append_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, LedgerError> {
        entry.validate_scopes()?;
        let scopes = entry.owner.scopes();
        self.ensure_locked(&scopes)?;

        let created_at = scopes
            .iter()
            .filter_map(|scope| self.heads.get(scope))
            .fold(Utc::now(), |at, head| head.clamp_timestamp(at));
        let reverses = entry.reverses;

        let model = to_active_model(entry, created_at)
            .insert(&self.txn)
            .await
            .map_err(|err| match reverses {
                Some(original) if is_unique_violation(&err) => {
                    LedgerError::AlreadyCancelled(original)
                }
                _ => storage_error(err),
            })?;
        let stored = to_domain(model)?;

        for scope in scopes {
            self.advance_head(scope, &stored).await?;
        }
        Ok(stored)
    }

    async fn mark_cancelled(&mut self, id: EntryId) -> Result<(), LedgerError> {
        let current = find_entry_on(&self.txn, id)
            .await?
            .ok_or(LedgerError::EntryNotFound(id))?;
        self.ensure_locked(&current.owner.scopes())?;

        let result = ledger_entries::Entity::update_many()
            .col_expr(ledger_entries::Column::IsCancelled, Expr::value(true))
            .filter(ledger_entries::Column::Id.eq(id.into_inner()))
            .filter(ledger_entries::Column::IsCancelled.eq(false))
            .exec(&self.txn)
            .await
            .map_err(storage_error)?;

        if result.rows_affected == 0 {
            return Err(LedgerError::AlreadyCancelled(id));
        }
        Ok(())
    }

    async fn apply_aggregate(
        &mut self,
        update: &AggregateUpdate,
        actor: UserId,
    ) -> Result<(), LedgerError> {
        match *update {
            AggregateUpdate::ProjectIncome { project_id, delta } => {
                let result = projects::Entity::update_many()
                    .col_expr(
                        projects::Column::Income,
                        Expr::col(projects::Column::Income).add(delta),
                    )
                    .col_expr(projects::Column::UpdatedBy, Expr::value(actor.into_inner()))
                    .filter(projects::Column::Id.eq(project_id.into_inner()))
                    .exec(&self.txn)
                    .await
                    .map_err(storage_error)?;
                if result.rows_affected == 0 {
                    return Err(LedgerError::ProjectNotFound(project_id));
                }
            }
            AggregateUpdate::ExpenditureTotal {
                project_id,
                expenditure_id,
                delta,
            } => {
                let result = project_expenditures::Entity::update_many()
                    .col_expr(
                        project_expenditures::Column::TotalPrice,
                        Expr::col(project_expenditures::Column::TotalPrice).add(delta),
                    )
                    .col_expr(
                        project_expenditures::Column::UpdatedBy,
                        Expr::value(actor.into_inner()),
                    )
                    .filter(project_expenditures::Column::Id.eq(expenditure_id.into_inner()))
                    .filter(project_expenditures::Column::ProjectId.eq(project_id.into_inner()))
                    .exec(&self.txn)
                    .await
                    .map_err(storage_error)?;
                if result.rows_affected == 0 {
                    return Err(LedgerError::ExpenditureNotFound(expenditure_id));
                }
            }
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.txn.commit().await.map_err(storage_error)
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.txn.rollback().await.map_err(storage_error)
    }
}

// ============================================================================
// Queries shared by the store and its transactions
// ============================================================================

async fn latest_balance_on<C: ConnectionTrait>(
    conn: &C,
    scope: Scope,
) -> Result<LatestBalance, LedgerError> {
    let newest = scope_select(scope, None)
        .filter(ledger_entries::Column::IsCancelled.eq(false))
        .order_by_desc(ledger_entries::Column::CreatedAt)
        .order_by_desc(ledger_entries::Column::Id)
        .one(conn)
        .await
        .map_err(storage_error)?;

    let Some(model) = newest else {
        return Ok(LatestBalance::empty(scope));
    };
    let entry = to_domain(model)?;
    let snapshot = entry.snapshot_for(scope).ok_or_else(|| {
        LedgerError::Internal(format!("entry {} has no balance for {scope}", entry.id))
    })?;

    Ok(LatestBalance {
        scope,
        balance: snapshot.new,
        as_of: Some(entry.id),
    })
}

async fn find_entry_on<C: ConnectionTrait>(
    conn: &C,
    id: EntryId,
) -> Result<Option<LedgerEntry>, LedgerError> {
    ledger_entries::Entity::find_by_id(id.into_inner())
        .one(conn)
        .await
        .map_err(storage_error)?
        .map(to_domain)
        .transpose()
}

fn scope_select(scope: Scope, since: Option<DateTime<Utc>>) -> Select<ledger_entries::Entity> {
    let select = match scope {
        Scope::Inspector(id) => ledger_entries::Entity::find()
            .filter(ledger_entries::Column::InspectorId.eq(id.into_inner())),
        Scope::Project(id) => ledger_entries::Entity::find()
            .filter(ledger_entries::Column::ProjectId.eq(id.into_inner())),
    };
    select.apply_if(since, |query, since| {
        query.filter(ledger_entries::Column::CreatedAt.gte(since))
    })
}

// ============================================================================
// Row <-> domain mapping
// ============================================================================

const fn to_db_direction(direction: Direction) -> LedgerDirection {
    match direction {
        Direction::Inbound => LedgerDirection::Inbound,
        Direction::Outbound => LedgerDirection::Outbound,
    }
}

const fn from_db_direction(direction: LedgerDirection) -> Direction {
    match direction {
        LedgerDirection::Inbound => Direction::Inbound,
        LedgerDirection::Outbound => Direction::Outbound,
    }
}

fn snapshot(prior: Option<Decimal>, new: Option<Decimal>) -> Option<BalanceSnapshot> {
    Some(BalanceSnapshot {
        prior: prior?,
        new: new?,
    })
}

fn to_domain(model: ledger_entries::Model) -> Result<LedgerEntry, LedgerError> {
    let owner = Owner::from_parts(
        model.inspector_id.map(InspectorId::new),
        model.project_id.map(ProjectId::new),
    )
    .ok_or_else(|| LedgerError::Internal(format!("entry {} has no owner", model.id)))?;

    Ok(LedgerEntry {
        id: EntryId::new(model.id),
        created_at: model.created_at.with_timezone(&Utc),
        owner,
        direction: from_db_direction(model.direction),
        reference_id: model.reference_id.map(ExpenditureId::new),
        reference_label: model.reference_label,
        description: model.description,
        unit_price: model.unit_price,
        quantity: model.quantity,
        total_amount: model.total_amount,
        inspector_balance: snapshot(model.inspector_prior_balance, model.inspector_new_balance),
        project_balance: snapshot(model.project_prior_balance, model.project_new_balance),
        receipt_ref: model.receipt_ref,
        reverses: model.reverses_entry_id.map(EntryId::new),
        is_cancelled: model.is_cancelled,
        created_by: UserId::new(model.created_by),
    })
}

fn to_active_model(entry: NewLedgerEntry, created_at: DateTime<Utc>) -> ledger_entries::ActiveModel {
    ledger_entries::ActiveModel {
        id: NotSet,
        created_at: Set(created_at.into()),
        inspector_id: Set(entry.owner.inspector().map(InspectorId::into_inner)),
        project_id: Set(entry.owner.project().map(ProjectId::into_inner)),
        direction: Set(to_db_direction(entry.direction)),
        reference_id: Set(entry.reference_id.map(ExpenditureId::into_inner)),
        reference_label: Set(entry.reference_label),
        description: Set(entry.description),
        unit_price: Set(entry.unit_price),
        quantity: Set(entry.quantity),
        total_amount: Set(entry.total_amount),
        inspector_prior_balance: Set(entry.inspector_balance.map(|s| s.prior)),
        inspector_new_balance: Set(entry.inspector_balance.map(|s| s.new)),
        project_prior_balance: Set(entry.project_balance.map(|s| s.prior)),
        project_new_balance: Set(entry.project_balance.map(|s| s.new)),
        receipt_ref: Set(entry.receipt_ref),
        reverses_entry_id: Set(entry.reverses.map(EntryId::into_inner)),
        is_cancelled: Set(false),
        created_by: Set(entry.created_by.into_inner()),
    }
}

// ============================================================================
// Error mapping
// ============================================================================

fn sqlstate(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(db_err)))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(db_err))) => {
            db_err.code().map(|code| code.into_owned())
        }
        _ => None,
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Maps a database error onto the ledger taxonomy.
fn storage_error(err: DbErr) -> LedgerError {
    match sqlstate(&err) {
        Some(code) if CONFLICT_SQLSTATES.contains(&code.as_str()) => {
            warn!(sqlstate = %code, error = %err, "ledger write lost a lock race");
            LedgerError::ConcurrencyConflict
        }
        _ => LedgerError::Storage(err.to_string()),
    }
}
