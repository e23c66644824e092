//! Storage ports for the ledger.
//!
//! `LedgerStore` is the read side plus a transaction factory; `LedgerTx` is one
//! atomic unit of work. Implementations live in this crate (in memory) and in
//! `cashbook-db` (Postgres).

use async_trait::async_trait;
use cashbook_shared::types::{EntryId, ExpenditureId, ProjectId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::balance::LatestBalance;
use super::entry::{Direction, LedgerEntry, NewLedgerEntry, Scope};
use super::error::LedgerError;

/// Filter for history listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryQuery {
    /// Scope to list.
    pub scope: Scope,
    /// Only entries created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Maximum number of entries; `None` lists everything.
    pub limit: Option<u64>,
    /// Entries to skip from the newest.
    pub offset: u64,
}

impl EntryQuery {
    /// Every entry of `scope`, newest first.
    #[must_use]
    pub const fn all(scope: Scope) -> Self {
        Self {
            scope,
            since: None,
            limit: None,
            offset: 0,
        }
    }
}

/// A change to a cached total that must land with its ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum AggregateUpdate {
    /// `projects.income += delta`.
    ProjectIncome {
        /// Project to update.
        project_id: ProjectId,
        /// Signed change.
        delta: Decimal,
    },
    /// `project_expenditures.total_price += delta`, for a category of `project_id`.
    ExpenditureTotal {
        /// Project the category must belong to.
        project_id: ProjectId,
        /// Expenditure to update.
        expenditure_id: ExpenditureId,
        /// Signed change.
        delta: Decimal,
    },
}

impl AggregateUpdate {
    /// Cache updates implied by an entry.
    ///
    /// - plain income on a project raises the project's income
    /// - an expenditure raises its category's total
    /// - the compensator of an expenditure lowers that total again
    ///
    /// Category updates are scoped to the entry's project; an entry without a
    /// project scope implies none (such entries cannot carry a reference).
    #[must_use]
    pub fn derive_for(entry: &NewLedgerEntry) -> Vec<Self> {
        let Some(project_id) = entry.owner.project() else {
            return Vec::new();
        };
        match (entry.direction, entry.reverses, entry.reference_id) {
            (Direction::Inbound, None, _) => vec![Self::ProjectIncome {
                project_id,
                delta: entry.total_amount,
            }],
            (Direction::Outbound, _, Some(expenditure_id)) => vec![Self::ExpenditureTotal {
                project_id,
                expenditure_id,
                delta: entry.total_amount,
            }],
            (Direction::Inbound, Some(_), Some(expenditure_id)) => vec![Self::ExpenditureTotal {
                project_id,
                expenditure_id,
                delta: -entry.total_amount,
            }],
            _ => Vec::new(),
        }
    }
}

/// Read access to the ledger and the factory for write transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Transaction type produced by [`LedgerStore::begin`].
    type Tx: LedgerTx;

    /// Opens a write transaction.
    async fn begin(&self) -> Result<Self::Tx, LedgerError>;

    /// Balance after the newest non-cancelled entry of `scope`; zero when empty.
    async fn latest_balance(&self, scope: Scope) -> Result<LatestBalance, LedgerError>;

    /// Loads one entry.
    async fn find_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Entries of a scope, newest first by `(created_at, id)`.
    async fn list_entries(&self, query: &EntryQuery) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Number of entries a query without limit/offset would return.
    async fn count_entries(
        &self,
        scope: Scope,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, LedgerError>;

    /// Non-cancelled outbound entries booked against an expenditure, newest first.
    async fn list_by_reference(
        &self,
        expenditure_id: ExpenditureId,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Cached `projects.income`.
    async fn project_income(&self, project_id: ProjectId) -> Result<Decimal, LedgerError>;

    /// Cached `project_expenditures.total_price`.
    async fn expenditure_total(
        &self,
        expenditure_id: ExpenditureId,
    ) -> Result<Decimal, LedgerError>;
}

/// One atomic unit of ledger writes.
///
/// Dropping a transaction without calling [`LedgerTx::commit`] discards every write.
#[async_trait]
pub trait LedgerTx: Send + Sync {
    /// Acquires the exclusive per-scope locks, in sorted order.
    ///
    /// Fails with `ConcurrencyConflict` if a lock is not granted within the
    /// configured timeout.
    async fn lock_scopes(&mut self, scopes: &[Scope]) -> Result<(), LedgerError>;

    /// Latest balance as seen by this transaction (read-your-writes).
    async fn latest_balance(&self, scope: Scope) -> Result<LatestBalance, LedgerError>;

    /// Loads one entry as seen by this transaction.
    async fn find_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Appends an entry; every scope it touches must be locked.
    async fn append_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, LedgerError>;

    /// Flags an entry as cancelled; fails on a second call.
    async fn mark_cancelled(&mut self, id: EntryId) -> Result<(), LedgerError>;

    /// Applies a cached-total update.
    async fn apply_aggregate(
        &mut self,
        update: &AggregateUpdate,
        actor: UserId,
    ) -> Result<(), LedgerError>;

    /// Makes every write visible.
    async fn commit(self) -> Result<(), LedgerError>;

    /// Discards every write.
    async fn rollback(self) -> Result<(), LedgerError>;
}
