//! In-memory ledger store.
//!
//! Writers serialize per scope on a `tokio::sync::Mutex` kept in a `DashMap`;
//! writes are staged in the transaction and applied under one state write lock on
//! commit. Used by the engine's tests and by callers that do not need durability.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cashbook_shared::LedgerSettings;
use cashbook_shared::types::{EntryId, ExpenditureId, ProjectId, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use super::balance::{LatestBalance, ScopeHead};
use super::entry::{Direction, LedgerEntry, NewLedgerEntry, Scope};
use super::error::LedgerError;
use super::store::{AggregateUpdate, EntryQuery, LedgerStore, LedgerTx};

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<EntryId, LedgerEntry>,
    heads: HashMap<Scope, ScopeHead>,
    project_income: HashMap<ProjectId, Decimal>,
    expenditures: HashMap<ExpenditureId, CategoryTotal>,
}

/// Cached total of one expenditure category and the project owning it.
#[derive(Debug, Clone, Copy)]
struct CategoryTotal {
    project_id: ProjectId,
    total: Decimal,
}

impl MemoryState {
    fn head_version(&self, scope: Scope) -> i64 {
        self.heads.get(&scope).map_or(0, |head| head.version)
    }

    /// Newest non-cancelled entry of `scope` across stored and staged entries.
    fn latest_balance(
        &self,
        scope: Scope,
        staged: &[LedgerEntry],
        cancelled: &[EntryId],
    ) -> LatestBalance {
        self.entries
            .values()
            .chain(staged)
            .filter(|entry| entry.owner.touches(scope))
            .filter(|entry| !entry.is_cancelled && !cancelled.contains(&entry.id))
            .max_by_key(|entry| entry.order_key())
            .and_then(|entry| {
                entry.snapshot_for(scope).map(|snapshot| LatestBalance {
                    scope,
                    balance: snapshot.new,
                    as_of: Some(entry.id),
                })
            })
            .unwrap_or_else(|| LatestBalance::empty(scope))
    }

    fn scope_entries(&self, scope: Scope, since: Option<DateTime<Utc>>) -> Vec<&LedgerEntry> {
        let mut entries: Vec<&LedgerEntry> = self
            .entries
            .values()
            .filter(|entry| entry.owner.touches(scope))
            .filter(|entry| since.is_none_or(|since| entry.created_at >= since))
            .collect();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.order_key()));
        entries
    }
}

struct Shared {
    state: RwLock<MemoryState>,
    locks: DashMap<Scope, Arc<Mutex<()>>>,
    next_id: AtomicI64,
    lock_timeout: Duration,
}

/// Ledger store kept entirely in process memory.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerStore {
    /// Creates an empty store with the default lock timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(LedgerSettings::default().lock_timeout())
    }

    /// Creates an empty store whose transactions wait at most `timeout` for a scope lock.
    #[must_use]
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(MemoryState::default()),
                locks: DashMap::new(),
                next_id: AtomicI64::new(1),
                lock_timeout: timeout,
            }),
        }
    }

    /// Creates an empty store configured from ledger settings.
    #[must_use]
    pub fn from_settings(settings: &LedgerSettings) -> Self {
        Self::with_lock_timeout(settings.lock_timeout())
    }

    /// Registers a project so income can be cached against it.
    pub async fn register_project(&self, project_id: ProjectId) {
        self.shared
            .state
            .write()
            .await
            .project_income
            .entry(project_id)
            .or_insert(Decimal::ZERO);
    }

    /// Registers an expenditure category of `project_id` so spending on that
    /// project can be cached against it.
    pub async fn register_expenditure(&self, project_id: ProjectId, expenditure_id: ExpenditureId) {
        self.shared
            .state
            .write()
            .await
            .expenditures
            .entry(expenditure_id)
            .or_insert(CategoryTotal {
                project_id,
                total: Decimal::ZERO,
            });
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, LedgerError> {
        Ok(InMemoryLedgerTx {
            shared: Arc::clone(&self.shared),
            guards: BTreeMap::new(),
            versions: HashMap::new(),
            appended: Vec::new(),
            cancelled: Vec::new(),
            aggregates: Vec::new(),
        })
    }

    async fn latest_balance(&self, scope: Scope) -> Result<LatestBalance, LedgerError> {
        Ok(self.shared.state.read().await.latest_balance(scope, &[], &[]))
    }

    async fn find_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.shared.state.read().await.entries.get(&id).cloned())
    }

    async fn list_entries(&self, query: &EntryQuery) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.shared.state.read().await;
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));

        Ok(state
            .scope_entries(query.scope, query.since)
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_entries(
        &self,
        scope: Scope,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, LedgerError> {
        let state = self.shared.state.read().await;
        let count = state.scope_entries(scope, since).len();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn list_by_reference(
        &self,
        expenditure_id: ExpenditureId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.shared.state.read().await;
        let mut entries: Vec<LedgerEntry> = state
            .entries
            .values()
            .filter(|entry| entry.reference_id == Some(expenditure_id))
            .filter(|entry| entry.direction == Direction::Outbound && !entry.is_cancelled)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.order_key()));
        Ok(entries)
    }

    async fn project_income(&self, project_id: ProjectId) -> Result<Decimal, LedgerError> {
        self.shared
            .state
            .read()
            .await
            .project_income
            .get(&project_id)
            .copied()
            .ok_or(LedgerError::ProjectNotFound(project_id))
    }

    async fn expenditure_total(
        &self,
        expenditure_id: ExpenditureId,
    ) -> Result<Decimal, LedgerError> {
        self.shared
            .state
            .read()
            .await
            .expenditures
            .get(&expenditure_id)
            .map(|category| category.total)
            .ok_or(LedgerError::ExpenditureNotFound(expenditure_id))
    }
}

/// A staged in-memory transaction holding its scope locks.
pub struct InMemoryLedgerTx {
    shared: Arc<Shared>,
    guards: BTreeMap<Scope, OwnedMutexGuard<()>>,
    versions: HashMap<Scope, i64>,
    appended: Vec<LedgerEntry>,
    cancelled: Vec<EntryId>,
    aggregates: Vec<AggregateUpdate>,
}

impl InMemoryLedgerTx {
    fn ensure_locked(&self, scopes: &[Scope]) -> Result<(), LedgerError> {
        match scopes.iter().find(|scope| !self.guards.contains_key(scope)) {
            Some(scope) => Err(LedgerError::Internal(format!(
                "write to {scope} without holding its lock"
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn lock_scopes(&mut self, scopes: &[Scope]) -> Result<(), LedgerError> {
        let mut wanted: Vec<Scope> = scopes
            .iter()
            .copied()
            .filter(|scope| !self.guards.contains_key(scope))
            .collect();
        wanted.sort();
        wanted.dedup();

        for scope in wanted {
            let lock = Arc::clone(self.shared.locks.entry(scope).or_default().value());
            let Ok(guard) = tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned()).await
            else {
                warn!(%scope, "timed out waiting for scope lock");
                return Err(LedgerError::ConcurrencyConflict);
            };

            let version = self.shared.state.read().await.head_version(scope);
            debug!(%scope, version, "scope lock acquired");
            self.versions.insert(scope, version);
            self.guards.insert(scope, guard);
        }
        Ok(())
    }

    async fn latest_balance(&self, scope: Scope) -> Result<LatestBalance, LedgerError> {
        let state = self.shared.state.read().await;
        Ok(state.latest_balance(scope, &self.appended, &self.cancelled))
    }

    async fn find_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, LedgerError> {
        let staged = self.appended.iter().find(|entry| entry.id == id).cloned();
        let found = match staged {
            Some(entry) => Some(entry),
            None => self.shared.state.read().await.entries.get(&id).cloned(),
        };
        Ok(found.map(|mut entry| {
            if self.cancelled.contains(&entry.id) {
                entry.is_cancelled = true;
            }
            entry
        }))
    }

    async fn append_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, LedgerError> {
        entry.validate_scopes()?;
        let scopes = entry.owner.scopes();
        self.ensure_locked(&scopes)?;

        let mut created_at = Utc::now();
        {
            let state = self.shared.state.read().await;
            if let Some(reversed) = entry.reverses {
                let duplicate = state
                    .entries
                    .values()
                    .chain(&self.appended)
                    .any(|stored| stored.reverses == Some(reversed));
                if duplicate {
                    return Err(LedgerError::AlreadyCancelled(reversed));
                }
            }
            for scope in &scopes {
                if let Some(head) = state.heads.get(scope) {
                    created_at = head.clamp_timestamp(created_at);
                }
            }
        }
        for staged in &self.appended {
            let shares_scope = scopes.iter().any(|scope| staged.owner.touches(*scope));
            if shares_scope && staged.created_at > created_at {
                created_at = staged.created_at;
            }
        }

        let id = EntryId::new(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let stored = LedgerEntry::from_new(id, created_at, entry);
        self.appended.push(stored.clone());
        Ok(stored)
    }

    async fn mark_cancelled(&mut self, id: EntryId) -> Result<(), LedgerError> {
        let current = self
            .find_entry(id)
            .await?
            .ok_or(LedgerError::EntryNotFound(id))?;
        self.ensure_locked(&current.owner.scopes())?;
        if current.is_cancelled {
            return Err(LedgerError::AlreadyCancelled(id));
        }
        self.cancelled.push(id);
        Ok(())
    }

    async fn apply_aggregate(
        &mut self,
        update: &AggregateUpdate,
        _actor: UserId,
    ) -> Result<(), LedgerError> {
        {
            let state = self.shared.state.read().await;
            match update {
                AggregateUpdate::ProjectIncome { project_id, .. } => {
                    if !state.project_income.contains_key(project_id) {
                        return Err(LedgerError::ProjectNotFound(*project_id));
                    }
                }
                AggregateUpdate::ExpenditureTotal {
                    project_id,
                    expenditure_id,
                    ..
                } => {
                    let owned = state
                        .expenditures
                        .get(expenditure_id)
                        .is_some_and(|category| category.project_id == *project_id);
                    if !owned {
                        return Err(LedgerError::ExpenditureNotFound(*expenditure_id));
                    }
                }
            }
        }
        self.aggregates.push(*update);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), LedgerError> {
        let mut state = self.shared.state.write().await;

        for (scope, expected) in &self.versions {
            let actual = state.head_version(*scope);
            if actual != *expected {
                warn!(%scope, expected, actual, "scope head moved under a held lock");
                return Err(LedgerError::ConcurrencyConflict);
            }
        }

        for id in &self.cancelled {
            if let Some(staged) = self.appended.iter_mut().find(|entry| entry.id == *id) {
                staged.is_cancelled = true;
            } else if let Some(stored) = state.entries.get_mut(id) {
                stored.is_cancelled = true;
            }
        }

        for update in &self.aggregates {
            match *update {
                AggregateUpdate::ProjectIncome { project_id, delta } => {
                    *state.project_income.entry(project_id).or_insert(Decimal::ZERO) += delta;
                }
                AggregateUpdate::ExpenditureTotal {
                    project_id,
                    expenditure_id,
                    delta,
                } => {
                    state
                        .expenditures
                        .entry(expenditure_id)
                        .or_insert(CategoryTotal {
                            project_id,
                            total: Decimal::ZERO,
                        })
                        .total += delta;
                }
            }
        }

        for entry in self.appended.drain(..) {
            for scope in entry.owner.scopes() {
                let head = state.heads.entry(scope).or_default();
                *head = head.advance(entry.id, entry.created_at);
            }
            state.entries.insert(entry.id, entry);
        }

        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        debug!(
            staged_entries = self.appended.len(),
            "in-memory transaction rolled back"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::{BalanceSnapshot, Owner};
    use cashbook_shared::types::InspectorId;
    use rust_decimal_macros::dec;

    const INSPECTOR: InspectorId = InspectorId::new(1);

    fn scope() -> Scope {
        Scope::Inspector(INSPECTOR)
    }

    fn income(prior: Decimal, amount: Decimal) -> NewLedgerEntry {
        NewLedgerEntry {
            owner: Owner::Inspector(INSPECTOR),
            direction: Direction::Inbound,
            reference_id: None,
            reference_label: "income".to_string(),
            description: String::new(),
            unit_price: amount,
            quantity: 1,
            total_amount: amount,
            inspector_balance: Some(BalanceSnapshot {
                prior,
                new: prior + amount,
            }),
            project_balance: None,
            receipt_ref: None,
            reverses: None,
            created_by: UserId::new(1),
        }
    }

    #[tokio::test]
    async fn test_read_your_writes_inside_tx() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.lock_scopes(&[scope()]).await.unwrap();

        let stored = tx.append_entry(income(dec!(0), dec!(500))).await.unwrap();
        let latest = tx.latest_balance(scope()).await.unwrap();
        assert_eq!(latest.balance, dec!(500));
        assert_eq!(latest.as_of, Some(stored.id));

        // Not visible outside until commit.
        assert_eq!(store.latest_balance(scope()).await.unwrap().balance, dec!(0));
        tx.commit().await.unwrap();
        assert_eq!(store.latest_balance(scope()).await.unwrap().balance, dec!(500));
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.lock_scopes(&[scope()]).await.unwrap();
        tx.append_entry(income(dec!(0), dec!(500))).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.count_entries(scope(), None).await.unwrap(), 0);
        assert_eq!(store.latest_balance(scope()).await.unwrap().as_of, None);
    }

    #[tokio::test]
    async fn test_append_requires_lock() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let result = tx.append_entry(income(dec!(0), dec!(1))).await;
        assert!(matches!(result, Err(LedgerError::Internal(_))));
    }

    #[tokio::test]
    async fn test_mark_cancelled_twice_fails() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.lock_scopes(&[scope()]).await.unwrap();
        let stored = tx.append_entry(income(dec!(0), dec!(10))).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_scopes(&[scope()]).await.unwrap();
        tx.mark_cancelled(stored.id).await.unwrap();
        assert!(matches!(
            tx.mark_cancelled(stored.id).await,
            Err(LedgerError::AlreadyCancelled(_))
        ));
        assert!(matches!(
            tx.mark_cancelled(EntryId::new(999)).await,
            Err(LedgerError::EntryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_timeout_is_conflict() {
        let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(20));
        let mut holder = store.begin().await.unwrap();
        holder.lock_scopes(&[scope()]).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        assert!(matches!(
            waiter.lock_scopes(&[scope()]).await,
            Err(LedgerError::ConcurrencyConflict)
        ));

        drop(holder);
        waiter.lock_scopes(&[scope()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_aggregate_target() {
        let store = InMemoryLedgerStore::new();
        store.register_project(ProjectId::new(1)).await;
        let mut tx = store.begin().await.unwrap();

        let known = AggregateUpdate::ProjectIncome {
            project_id: ProjectId::new(1),
            delta: dec!(5),
        };
        tx.apply_aggregate(&known, UserId::new(1)).await.unwrap();

        let unknown = AggregateUpdate::ExpenditureTotal {
            project_id: ProjectId::new(1),
            expenditure_id: ExpenditureId::new(4),
            delta: dec!(5),
        };
        assert!(matches!(
            tx.apply_aggregate(&unknown, UserId::new(1)).await,
            Err(LedgerError::ExpenditureNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_category_of_another_project_is_not_found() {
        let store = InMemoryLedgerStore::new();
        store
            .register_expenditure(ProjectId::new(2), ExpenditureId::new(11))
            .await;
        let mut tx = store.begin().await.unwrap();

        let foreign = AggregateUpdate::ExpenditureTotal {
            project_id: ProjectId::new(1),
            expenditure_id: ExpenditureId::new(11),
            delta: dec!(400),
        };
        assert!(matches!(
            tx.apply_aggregate(&foreign, UserId::new(1)).await,
            Err(LedgerError::ExpenditureNotFound(_))
        ));

        let owned = AggregateUpdate::ExpenditureTotal {
            project_id: ProjectId::new(2),
            expenditure_id: ExpenditureId::new(11),
            delta: dec!(400),
        };
        tx.apply_aggregate(&owned, UserId::new(1)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(
            store.expenditure_total(ExpenditureId::new(11)).await.unwrap(),
            dec!(400)
        );
    }

    #[tokio::test]
    async fn test_append_rejects_reference_without_project() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.lock_scopes(&[scope()]).await.unwrap();

        let mut entry = income(dec!(0), dec!(10));
        entry.reference_id = Some(ExpenditureId::new(11));
        assert!(matches!(
            tx.append_entry(entry).await,
            Err(LedgerError::InvalidOwner(_))
        ));
    }

    #[tokio::test]
    async fn test_list_entries_newest_first_with_window() {
        let store = InMemoryLedgerStore::new();
        let mut prior = dec!(0);
        for amount in [dec!(1), dec!(2), dec!(3)] {
            let mut tx = store.begin().await.unwrap();
            tx.lock_scopes(&[scope()]).await.unwrap();
            tx.append_entry(income(prior, amount)).await.unwrap();
            tx.commit().await.unwrap();
            prior += amount;
        }

        let page = store
            .list_entries(&EntryQuery {
                scope: scope(),
                since: None,
                limit: Some(2),
                offset: 0,
            })
            .await
            .unwrap();
        let amounts: Vec<Decimal> = page.iter().map(|e| e.total_amount).collect();
        assert_eq!(amounts, vec![dec!(3), dec!(2)]);

        let future = Utc::now() + chrono::Duration::days(1);
        assert_eq!(store.count_entries(scope(), Some(future)).await.unwrap(), 0);
        assert_eq!(store.count_entries(scope(), None).await.unwrap(), 3);
    }
}
