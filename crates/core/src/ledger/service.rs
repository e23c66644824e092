//! Use-case facade over the ledger engine.
//!
//! Callers record income and expenditure, cancel entries and read balances
//! through this service; every write goes through one coordinated transaction.

use cashbook_shared::LedgerSettings;
use cashbook_shared::types::{EntryId, PageRequest, PageResponse, UserId};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;

use super::builder::{EntryBuilder, ExpenditureRequest, IncomeRequest};
use super::coordinator::{Movement, TransactionCoordinator};
use super::entry::{LedgerEntry, Scope};
use super::error::LedgerError;
use super::query::LedgerQueryService;
use super::reversal::ReversalHandler;
use super::store::LedgerStore;

/// Ledger operations for the use-case layer.
#[derive(Clone)]
pub struct LedgerService<S> {
    coordinator: TransactionCoordinator<S>,
    reversals: ReversalHandler<S>,
    query: LedgerQueryService<S>,
}

impl<S: LedgerStore + Clone> LedgerService<S> {
    /// Wires the engine components over one store.
    pub fn new(store: S, settings: LedgerSettings) -> Self {
        let coordinator = TransactionCoordinator::new(store.clone());
        Self {
            reversals: ReversalHandler::new(coordinator.clone()),
            query: LedgerQueryService::new(store, settings),
            coordinator,
        }
    }
}

impl<S: LedgerStore> LedgerService<S> {
    /// Read-side queries.
    pub fn query(&self) -> &LedgerQueryService<S> {
        &self.query
    }

    /// The coordinator, for callers that build entries themselves.
    pub fn coordinator(&self) -> &TransactionCoordinator<S> {
        &self.coordinator
    }

    /// Records incoming money.
    ///
    /// Income on a project also raises the project's cached income.
    pub async fn record_income(&self, request: IncomeRequest) -> Result<LedgerEntry, LedgerError> {
        let pending = self.coordinator.begin(&request.owner).await?;
        match EntryBuilder::build_income(&request, pending.balances()) {
            Ok(entry) => pending.commit(Movement::derived(entry)).await,
            Err(err) => {
                warn!(owner = ?request.owner, error = %err, "income rejected");
                Err(pending.reject(err).await)
            }
        }
    }

    /// Records an itemized expenditure.
    ///
    /// Every touched scope must cover `unit_price * quantity`; the referenced
    /// expenditure's cached total rises by the same amount.
    pub async fn record_expenditure(
        &self,
        request: ExpenditureRequest,
    ) -> Result<LedgerEntry, LedgerError> {
        let pending = self.coordinator.begin(&request.owner).await?;
        match EntryBuilder::build_expenditure(&request, pending.balances()) {
            Ok(entry) => pending.commit(Movement::derived(entry)).await,
            Err(err) => {
                warn!(owner = ?request.owner, error = %err, "expenditure rejected");
                Err(pending.reject(err).await)
            }
        }
    }

    /// Cancels an expenditure entry, returning its compensator.
    pub async fn cancel(&self, entry_id: EntryId, actor: UserId) -> Result<LedgerEntry, LedgerError> {
        self.reversals.cancel(entry_id, actor).await
    }

    /// History of `scope` over the last `months` months (default window when `None`).
    pub async fn history(
        &self,
        scope: Scope,
        months: Option<u32>,
        page: PageRequest,
    ) -> Result<PageResponse<LedgerEntry>, LedgerError> {
        let since = self.query.history_window(Utc::now(), months);
        self.query.get_history(scope, Some(since), page).await
    }

    /// Current balance of `scope`.
    pub async fn balance(&self, scope: Scope) -> Result<Decimal, LedgerError> {
        self.query.get_current_balance(scope).await
    }
}
