//! Atomic execution of ledger movements.
//!
//! A movement is one transaction: lock the owner's scopes, read their latest
//! balances, optionally flag a cancelled entry, append the new entry, apply the
//! cached-total updates, commit. Any failure rolls back every step.

use cashbook_shared::types::EntryId;
use tracing::{debug, info, warn};

use super::balance::OwnerBalances;
use super::entry::{LedgerEntry, NewLedgerEntry, Owner};
use super::error::LedgerError;
use super::store::{AggregateUpdate, LedgerStore, LedgerTx};

/// Everything one atomic movement writes.
#[derive(Debug, Clone)]
pub struct Movement {
    /// Entry to append.
    pub entry: NewLedgerEntry,
    /// Entry to flag as cancelled in the same transaction.
    pub cancels: Option<EntryId>,
    /// Cached-total updates.
    pub updates: Vec<AggregateUpdate>,
}

impl Movement {
    /// A movement with the cache updates its entry implies.
    #[must_use]
    pub fn derived(entry: NewLedgerEntry) -> Self {
        let updates = AggregateUpdate::derive_for(&entry);
        Self {
            entry,
            cancels: None,
            updates,
        }
    }

    /// Also flags `entry_id` as cancelled.
    #[must_use]
    pub fn cancelling(mut self, entry_id: EntryId) -> Self {
        self.cancels = Some(entry_id);
        self
    }
}

/// Opens movement transactions against a store.
#[derive(Clone)]
pub struct TransactionCoordinator<S> {
    store: S,
}

impl<S: LedgerStore> TransactionCoordinator<S> {
    /// Creates a coordinator over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Opens a transaction, locks the owner's scopes and reads their balances.
    ///
    /// Writers on the same scope queue here; writers on other scopes do not.
    pub async fn begin(&self, owner: &Owner) -> Result<PendingMovement<S::Tx>, LedgerError> {
        owner.validate()?;
        let mut tx = self.store.begin().await?;
        let scopes = owner.scopes();

        if let Err(err) = tx.lock_scopes(&scopes).await {
            discard(tx, &err).await;
            return Err(err);
        }

        let mut latest = Vec::with_capacity(scopes.len());
        for scope in &scopes {
            match tx.latest_balance(*scope).await {
                Ok(balance) => latest.push(balance),
                Err(err) => {
                    discard(tx, &err).await;
                    return Err(err);
                }
            }
        }
        debug!(?owner, "movement opened");

        Ok(PendingMovement {
            tx,
            owner: *owner,
            balances: OwnerBalances::from_latest(latest),
        })
    }

    /// Commits an entry that was built outside of a pending movement.
    ///
    /// The entry's prior snapshots must still equal the latest balances once the
    /// scopes are locked; otherwise the movement is rejected with `StaleBalance`
    /// and nothing is written.
    pub async fn commit_movement(
        &self,
        entry: NewLedgerEntry,
        updates: Vec<AggregateUpdate>,
    ) -> Result<EntryId, LedgerError> {
        let pending = self.begin(&entry.owner).await?;

        for scope in entry.owner.scopes() {
            let actual = match pending.balances.require(scope) {
                Ok(latest) => latest.balance,
                Err(err) => {
                    pending.abort().await?;
                    return Err(err);
                }
            };
            let expected = entry.snapshot_for(scope).map(|snapshot| snapshot.prior);
            if expected != Some(actual) {
                warn!(%scope, ?expected, %actual, "rejecting entry built from a stale balance");
                pending.abort().await?;
                return Err(LedgerError::StaleBalance {
                    scope,
                    expected: expected.unwrap_or_default(),
                    actual,
                });
            }
        }

        let stored = pending
            .commit(Movement {
                entry,
                cancels: None,
                updates,
            })
            .await?;
        Ok(stored.id)
    }
}

/// An open movement holding the owner's scope locks.
///
/// Dropping it without [`PendingMovement::commit`] rolls the transaction back.
pub struct PendingMovement<T> {
    tx: T,
    owner: Owner,
    balances: OwnerBalances,
}

impl<T: LedgerTx> PendingMovement<T> {
    /// Latest balances read under the locks.
    pub fn balances(&self) -> &OwnerBalances {
        &self.balances
    }

    /// Owner whose scopes are locked.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Loads an entry inside the transaction.
    pub async fn find_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, LedgerError> {
        self.tx.find_entry(id).await
    }

    /// Writes the movement and commits.
    ///
    /// On any error the transaction is rolled back and the error returned unchanged.
    pub async fn commit(mut self, movement: Movement) -> Result<LedgerEntry, LedgerError> {
        let owner = self.owner;
        match write_movement(&mut self.tx, movement).await {
            Ok(stored) => {
                self.tx.commit().await?;
                info!(
                    entry_id = %stored.id,
                    ?owner,
                    direction = stored.direction.as_str(),
                    amount = %stored.total_amount,
                    "ledger movement committed"
                );
                Ok(stored)
            }
            Err(err) => {
                discard(self.tx, &err).await;
                Err(err)
            }
        }
    }

    /// Rolls back explicitly.
    pub async fn abort(self) -> Result<(), LedgerError> {
        self.tx.rollback().await
    }

    /// Rolls back after `cause` rejected the movement and hands `cause` back.
    ///
    /// A failing rollback is logged; the caller still sees the rejection.
    pub async fn reject(self, cause: LedgerError) -> LedgerError {
        discard(self.tx, &cause).await;
        cause
    }
}

async fn write_movement<T: LedgerTx>(
    tx: &mut T,
    movement: Movement,
) -> Result<LedgerEntry, LedgerError> {
    if let Some(cancelled) = movement.cancels {
        tx.mark_cancelled(cancelled).await?;
    }
    let actor = movement.entry.created_by;
    let stored = tx.append_entry(movement.entry).await?;
    for update in &movement.updates {
        tx.apply_aggregate(update, actor).await?;
    }
    Ok(stored)
}

async fn discard<T: LedgerTx>(tx: T, cause: &LedgerError) {
    warn!(error = %cause, code = cause.error_code(), "ledger movement rolled back");
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "rollback failed; transaction dropped");
    }
}
