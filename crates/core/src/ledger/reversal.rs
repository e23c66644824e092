//! Cancellation of ledger entries.
//!
//! Cancelling never deletes history: the original entry is flagged and a
//! compensating entry continues each chain from its current balance. Both land in
//! one transaction, together with the matching expenditure-total update.

use cashbook_shared::types::{EntryId, UserId};
use tracing::{info, warn};

use super::builder::EntryBuilder;
use super::coordinator::{Movement, PendingMovement, TransactionCoordinator};
use super::entry::{Direction, LedgerEntry};
use super::error::LedgerError;
use super::store::{LedgerStore, LedgerTx};

/// Orchestrates cancellation end-to-end.
#[derive(Clone)]
pub struct ReversalHandler<S> {
    coordinator: TransactionCoordinator<S>,
}

impl<S: LedgerStore> ReversalHandler<S> {
    /// Creates a handler over `coordinator`.
    pub fn new(coordinator: TransactionCoordinator<S>) -> Self {
        Self { coordinator }
    }

    /// Cancels `entry_id` on behalf of `actor` and returns the compensating entry.
    ///
    /// Checks, in order: the entry exists (`EntryNotFound`), is not cancelled yet
    /// (`AlreadyCancelled`), and is outbound (`NotReversible`). The entry is re-read
    /// after its scopes are locked, so two racing cancellations resolve to one
    /// success and one `AlreadyCancelled`.
    pub async fn cancel(&self, entry_id: EntryId, actor: UserId) -> Result<LedgerEntry, LedgerError> {
        let Some(snapshot) = self.coordinator.store().find_entry(entry_id).await? else {
            return Err(LedgerError::EntryNotFound(entry_id));
        };

        let pending = self.coordinator.begin(&snapshot.owner).await?;
        let movement = match prepare(&pending, entry_id, actor).await {
            Ok(movement) => movement,
            Err(err) => {
                warn!(%entry_id, error = %err, "cancellation rejected");
                return Err(pending.reject(err).await);
            }
        };

        let compensator = pending.commit(movement).await?;
        info!(
            %entry_id,
            compensating_entry_id = %compensator.id,
            amount = %compensator.total_amount,
            "ledger entry cancelled"
        );
        Ok(compensator)
    }
}

async fn prepare<T: LedgerTx>(
    pending: &PendingMovement<T>,
    entry_id: EntryId,
    actor: UserId,
) -> Result<Movement, LedgerError> {
    let original = pending
        .find_entry(entry_id)
        .await?
        .ok_or(LedgerError::EntryNotFound(entry_id))?;

    if original.is_cancelled {
        return Err(LedgerError::AlreadyCancelled(entry_id));
    }
    if original.direction == Direction::Inbound {
        return Err(LedgerError::NotReversible(entry_id));
    }

    let compensator = EntryBuilder::build_reversal(&original, pending.balances(), actor)?;
    Ok(Movement::derived(compensator).cancelling(entry_id))
}
