//! Scope balances and running-balance bookkeeping.

use cashbook_shared::types::EntryId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::entry::{BalanceSnapshot, Direction, Owner, Scope};
use super::error::LedgerError;

/// The newest non-cancelled balance of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestBalance {
    /// Scope this balance belongs to.
    pub scope: Scope,
    /// Balance after the newest non-cancelled entry.
    pub balance: Decimal,
    /// That entry, or `None` for a scope without entries.
    pub as_of: Option<EntryId>,
}

impl LatestBalance {
    /// Balance of a scope that has no entries yet.
    #[must_use]
    pub const fn empty(scope: Scope) -> Self {
        Self {
            scope,
            balance: Decimal::ZERO,
            as_of: None,
        }
    }
}

/// Latest balances of every scope an owner touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OwnerBalances {
    /// Inspector scope balance, when touched.
    pub inspector: Option<LatestBalance>,
    /// Project scope balance, when touched.
    pub project: Option<LatestBalance>,
}

impl OwnerBalances {
    /// Collects balances keyed by scope kind.
    #[must_use]
    pub fn from_latest(balances: impl IntoIterator<Item = LatestBalance>) -> Self {
        let mut out = Self::default();
        for latest in balances {
            match latest.scope {
                Scope::Inspector(_) => out.inspector = Some(latest),
                Scope::Project(_) => out.project = Some(latest),
            }
        }
        out
    }

    /// Balance loaded for `scope`.
    #[must_use]
    pub fn for_scope(&self, scope: Scope) -> Option<&LatestBalance> {
        let latest = match scope {
            Scope::Inspector(_) => self.inspector.as_ref(),
            Scope::Project(_) => self.project.as_ref(),
        };
        latest.filter(|latest| latest.scope == scope)
    }

    /// Balance loaded for `scope`, or an internal error if the caller never read it.
    pub fn require(&self, scope: Scope) -> Result<&LatestBalance, LedgerError> {
        self.for_scope(scope)
            .ok_or_else(|| LedgerError::Internal(format!("balance for {scope} was not loaded")))
    }

    /// Computes the snapshots a movement of `amount` would record for `owner`.
    ///
    /// Returns `(inspector, project)`.
    pub fn snapshots(
        &self,
        owner: &Owner,
        direction: Direction,
        amount: Decimal,
    ) -> Result<(Option<BalanceSnapshot>, Option<BalanceSnapshot>), LedgerError> {
        let snapshot = |scope: Scope| -> Result<BalanceSnapshot, LedgerError> {
            let prior = self.require(scope)?.balance;
            BalanceSnapshot::apply(prior, direction, amount).ok_or_else(|| {
                LedgerError::InvalidAmount("balance overflows decimal range".to_string())
            })
        };

        let inspector = owner
            .inspector()
            .map(|id| snapshot(Scope::Inspector(id)))
            .transpose()?;
        let project = owner
            .project()
            .map(|id| snapshot(Scope::Project(id)))
            .transpose()?;

        Ok((inspector, project))
    }
}

/// Head of a scope chain: the contested row writers serialize on.
///
/// `version` counts stored entries on the scope; it increases by exactly one per append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeHead {
    /// Number of entries appended to the scope.
    pub version: i64,
    /// Newest entry on the scope.
    pub last_entry_id: Option<EntryId>,
    /// Timestamp of the newest entry.
    pub last_entry_at: Option<DateTime<Utc>>,
}

impl Default for ScopeHead {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeHead {
    /// Head of a scope without entries.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            version: 0,
            last_entry_id: None,
            last_entry_at: None,
        }
    }

    /// Head after appending one entry.
    #[must_use]
    pub fn advance(&self, entry_id: EntryId, created_at: DateTime<Utc>) -> Self {
        Self {
            version: self.version + 1,
            last_entry_id: Some(entry_id),
            last_entry_at: Some(created_at),
        }
    }

    /// Earliest timestamp the next entry may carry.
    #[must_use]
    pub fn clamp_timestamp(&self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_entry_at {
            Some(last) if last > candidate => last,
            _ => candidate,
        }
    }
}
