//! Consistency checks over stored entries and cached totals.

use cashbook_shared::types::{EntryId, ProjectId};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use super::entry::{Direction, LedgerEntry, Scope};

/// One inconsistency found by an audit.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ChainViolation {
    /// The entry touches the scope but has no snapshot for it.
    #[error("entry {entry} touches {scope} but records no balance for it")]
    MissingSnapshot {
        /// Offending entry.
        entry: EntryId,
        /// Audited scope.
        scope: Scope,
    },

    /// The entry does not start where the previous entry ended.
    #[error("entry {entry} starts at {actual}, previous entry ended at {expected}")]
    BrokenLink {
        /// Offending entry.
        entry: EntryId,
        /// New balance of the previous entry (zero at chain start).
        expected: Decimal,
        /// Prior balance recorded on the entry.
        actual: Decimal,
    },

    /// `new != prior + signed amount`.
    #[error("entry {entry} ends at {actual}, expected {expected}")]
    BadArithmetic {
        /// Offending entry.
        entry: EntryId,
        /// `prior + signed amount`.
        expected: Decimal,
        /// New balance recorded on the entry.
        actual: Decimal,
    },

    /// Final balance disagrees with the sum of effective entries.
    #[error("final balance {actual} differs from the sum of effective entries {expected}")]
    FinalBalanceMismatch {
        /// Signed sum of entries that are neither cancelled nor compensating.
        expected: Decimal,
        /// Balance after the last entry.
        actual: Decimal,
    },

    /// A cached total drifted from the ledger.
    #[error("cached total {cached} differs from ledger total {ledger}")]
    CacheDrift {
        /// Total derived from entries.
        ledger: Decimal,
        /// Total stored on the owner row.
        cached: Decimal,
    },
}

/// Result of auditing one scope chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// Audited scope.
    pub scope: Scope,
    /// Entries touching the scope.
    pub entries_checked: usize,
    /// Balance after the last entry.
    pub final_balance: Decimal,
    /// Signed sum of effective entries.
    pub effective_total: Decimal,
    /// Everything that did not add up.
    pub violations: Vec<ChainViolation>,
}

impl ChainReport {
    /// Returns true if no violation was found.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Walks the chain of `scope` in `(created_at, id)` order.
///
/// Every stored entry, cancelled ones included, links to its predecessor: a
/// compensator continues from the balance that still contained the cancelled
/// movement. The final balance must equal the signed sum of effective entries.
#[must_use]
pub fn verify_chain(scope: Scope, entries: &[LedgerEntry]) -> ChainReport {
    let mut chain: Vec<&LedgerEntry> = entries
        .iter()
        .filter(|entry| entry.owner.touches(scope))
        .collect();
    chain.sort_by_key(|entry| entry.order_key());

    let mut violations = Vec::new();
    let mut running = Decimal::ZERO;
    let mut effective_total = Decimal::ZERO;

    for entry in &chain {
        if entry.is_effective() {
            effective_total += entry.signed_amount();
        }

        let Some(snapshot) = entry.snapshot_for(scope) else {
            violations.push(ChainViolation::MissingSnapshot {
                entry: entry.id,
                scope,
            });
            continue;
        };

        if snapshot.prior != running {
            violations.push(ChainViolation::BrokenLink {
                entry: entry.id,
                expected: running,
                actual: snapshot.prior,
            });
        }
        let expected = snapshot.prior + entry.signed_amount();
        if snapshot.new != expected {
            violations.push(ChainViolation::BadArithmetic {
                entry: entry.id,
                expected,
                actual: snapshot.new,
            });
        }
        running = snapshot.new;
    }

    if running != effective_total {
        violations.push(ChainViolation::FinalBalanceMismatch {
            expected: effective_total,
            actual: running,
        });
    }

    ChainReport {
        scope,
        entries_checked: chain.len(),
        final_balance: running,
        effective_total,
        violations,
    }
}

/// Compares an expenditure's cached total with its non-cancelled outbound entries.
///
/// Returns the ledger total when they agree.
pub fn verify_expenditure_total(
    entries: &[LedgerEntry],
    cached: Decimal,
) -> Result<Decimal, ChainViolation> {
    let ledger: Decimal = entries
        .iter()
        .filter(|entry| entry.direction == Direction::Outbound && !entry.is_cancelled)
        .map(|entry| entry.total_amount)
        .sum();
    check_cache(ledger, cached)
}

/// Compares a project's cached income with the plain inbound entries touching it.
///
/// Returns the ledger total when they agree.
pub fn verify_project_income(
    project_id: ProjectId,
    entries: &[LedgerEntry],
    cached: Decimal,
) -> Result<Decimal, ChainViolation> {
    let ledger: Decimal = entries
        .iter()
        .filter(|entry| entry.owner.project() == Some(project_id))
        .filter(|entry| entry.direction == Direction::Inbound && entry.reverses.is_none())
        .map(|entry| entry.total_amount)
        .sum();
    check_cache(ledger, cached)
}

fn check_cache(ledger: Decimal, cached: Decimal) -> Result<Decimal, ChainViolation> {
    if ledger == cached {
        Ok(ledger)
    } else {
        Err(ChainViolation::CacheDrift { ledger, cached })
    }
}
