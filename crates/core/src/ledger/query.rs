//! Read-side projections over the ledger.

use cashbook_shared::LedgerSettings;
use cashbook_shared::types::{
    EntryId, ExpenditureId, PageRequest, PageResponse, ProjectId, Rupiah,
};
use chrono::{DateTime, Months, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::audit::{
    ChainReport, ChainViolation, verify_chain, verify_expenditure_total, verify_project_income,
};
use super::entry::{LedgerEntry, Scope};
use super::error::LedgerError;
use super::store::{EntryQuery, LedgerStore};

/// Start of the UTC day `months` months before `now`; `0` means one month.
#[must_use]
pub fn since_months_ago(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let months = months.max(1);
    let start = now
        .checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    start.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Balance overview of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    /// Summarized scope.
    pub scope: Scope,
    /// Current balance.
    pub balance: Rupiah,
    /// Entry the balance was read from.
    pub as_of: Option<EntryId>,
    /// Number of entries on the scope, cancelled ones included.
    pub entry_count: u64,
}

/// Spending booked against one expenditure category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpenditureDetails {
    /// The category.
    pub expenditure_id: ExpenditureId,
    /// Non-cancelled outbound entries, newest first.
    pub entries: Vec<LedgerEntry>,
    /// Sum of those entries.
    pub ledger_total: Decimal,
    /// Cached `total_price`.
    pub cached_total: Decimal,
}

impl ExpenditureDetails {
    /// Checks the cached total against the entries.
    pub fn verify(&self) -> Result<Decimal, ChainViolation> {
        verify_expenditure_total(&self.entries, self.cached_total)
    }
}

/// Cached project income next to the ledger it caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectIncomeReport {
    /// The project.
    pub project_id: ProjectId,
    /// Cached `income`.
    pub cached_income: Decimal,
    /// Result of comparing it with the ledger.
    pub verified: Result<Decimal, ChainViolation>,
}

/// Read-only queries for reporting and UI.
#[derive(Clone)]
pub struct LedgerQueryService<S> {
    store: S,
    settings: LedgerSettings,
}

impl<S: LedgerStore> LedgerQueryService<S> {
    /// Creates a query service over `store`.
    pub fn new(store: S, settings: LedgerSettings) -> Self {
        Self { store, settings }
    }

    /// Start of the history window for `months`, falling back to the configured default.
    pub fn history_window(&self, now: DateTime<Utc>, months: Option<u32>) -> DateTime<Utc> {
        since_months_ago(now, months.unwrap_or(self.settings.default_interval_months))
    }

    /// One page of a scope's history, newest first.
    ///
    /// The total comes from a separate count query and is a point-in-time
    /// snapshot; entries appended between the two reads may make it stale.
    pub async fn get_history(
        &self,
        scope: Scope,
        since: Option<DateTime<Utc>>,
        page: PageRequest,
    ) -> Result<PageResponse<LedgerEntry>, LedgerError> {
        let page = page.normalized(self.settings.default_page_size, self.settings.max_page_size);
        let entries = self
            .store
            .list_entries(&EntryQuery {
                scope,
                since,
                limit: Some(page.limit()),
                offset: page.offset(),
            })
            .await?;
        let total = self.store.count_entries(scope, since).await?;

        Ok(PageResponse::new(entries, page.page, page.per_page, total))
    }

    /// Current balance of `scope`; zero for a scope without entries.
    pub async fn get_current_balance(&self, scope: Scope) -> Result<Decimal, LedgerError> {
        Ok(self.store.latest_balance(scope).await?.balance)
    }

    /// Balance and entry count of `scope`.
    pub async fn account_summary(&self, scope: Scope) -> Result<AccountSummary, LedgerError> {
        let latest = self.store.latest_balance(scope).await?;
        let entry_count = self.store.count_entries(scope, None).await?;
        Ok(AccountSummary {
            scope,
            balance: Rupiah::new(latest.balance),
            as_of: latest.as_of,
            entry_count,
        })
    }

    /// Entries booked against an expenditure with their sum and the cached total.
    pub async fn expenditure_details(
        &self,
        expenditure_id: ExpenditureId,
    ) -> Result<ExpenditureDetails, LedgerError> {
        let cached_total = self.store.expenditure_total(expenditure_id).await?;
        let entries = self.store.list_by_reference(expenditure_id).await?;
        let ledger_total = entries.iter().map(|entry| entry.total_amount).sum();

        Ok(ExpenditureDetails {
            expenditure_id,
            entries,
            ledger_total,
            cached_total,
        })
    }

    /// Compares a project's cached income with its ledger.
    pub async fn project_income_report(
        &self,
        project_id: ProjectId,
    ) -> Result<ProjectIncomeReport, LedgerError> {
        let cached_income = self.store.project_income(project_id).await?;
        let entries = self
            .store
            .list_entries(&EntryQuery::all(Scope::Project(project_id)))
            .await?;

        Ok(ProjectIncomeReport {
            project_id,
            cached_income,
            verified: verify_project_income(project_id, &entries, cached_income),
        })
    }

    /// Audits the whole chain of `scope`.
    pub async fn audit_scope(&self, scope: Scope) -> Result<ChainReport, LedgerError> {
        let entries = self.store.list_entries(&EntryQuery::all(scope)).await?;
        Ok(verify_chain(scope, &entries))
    }
}
