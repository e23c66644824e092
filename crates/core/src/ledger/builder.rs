//! Pure construction of candidate ledger entries.
//!
//! The builder never touches storage: it takes the latest balances read under the
//! scope locks and either returns an internally consistent entry or rejects the
//! movement.

use cashbook_shared::types::{ExpenditureId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::balance::OwnerBalances;
use super::entry::{Direction, LedgerEntry, NewLedgerEntry, Owner, Scope};
use super::error::LedgerError;

/// Prefix of the label and description on compensating entries.
pub const CANCELLATION_PREFIX: &str = "Cancellation of ";

/// Decimal places an amount may carry; matches the `NUMERIC(19, 4)` columns.
pub const MAX_AMOUNT_SCALE: u32 = 4;

/// A request to record incoming money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeRequest {
    /// Receiving scopes.
    pub owner: Owner,
    /// Amount received; must be positive.
    pub amount: Decimal,
    /// Short label.
    pub label: String,
    /// Free-form description.
    pub description: String,
    /// Optional receipt pointer.
    pub receipt_ref: Option<String>,
    /// Acting user.
    pub created_by: UserId,
}

/// A request to record an itemized expenditure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenditureRequest {
    /// Paying scopes.
    pub owner: Owner,
    /// Expenditure category this spend is booked against.
    pub expenditure_id: Option<ExpenditureId>,
    /// Short label.
    pub label: String,
    /// Free-form description.
    pub description: String,
    /// Price per unit; must be positive.
    pub unit_price: Decimal,
    /// Number of units; must be positive.
    pub quantity: i64,
    /// Optional receipt pointer.
    pub receipt_ref: Option<String>,
    /// Acting user.
    pub created_by: UserId,
}

/// Stateless builder for ledger entries.
pub struct EntryBuilder;

impl EntryBuilder {
    /// Builds an inbound entry with `quantity = 1` and `total_amount = amount`.
    ///
    /// # Errors
    ///
    /// `InvalidAmount` for non-positive amounts or more than four decimal places,
    /// `InvalidOwner` for unusable scope ids.
    pub fn build_income(
        request: &IncomeRequest,
        balances: &OwnerBalances,
    ) -> Result<NewLedgerEntry, LedgerError> {
        request.owner.validate()?;
        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "income must be positive, got {}",
                request.amount
            )));
        }
        ensure_scale("income", request.amount)?;

        let (inspector_balance, project_balance) =
            balances.snapshots(&request.owner, Direction::Inbound, request.amount)?;

        Ok(NewLedgerEntry {
            owner: request.owner,
            direction: Direction::Inbound,
            reference_id: None,
            reference_label: request.label.clone(),
            description: request.description.clone(),
            unit_price: request.amount,
            quantity: 1,
            total_amount: request.amount,
            inspector_balance,
            project_balance,
            receipt_ref: request.receipt_ref.clone(),
            reverses: None,
            created_by: request.created_by,
        })
    }

    /// Builds an outbound entry of `unit_price * quantity`.
    ///
    /// Every scope the owner touches must cover the total; all of them are
    /// decremented in the same entry.
    ///
    /// # Errors
    ///
    /// `InvalidOwner` when a category is referenced without a project scope,
    /// `InvalidAmount` for non-positive price or quantity or a price with more
    /// than four decimal places (checked before balances), `InsufficientFunds`
    /// naming the first scope that cannot cover the total.
    pub fn build_expenditure(
        request: &ExpenditureRequest,
        balances: &OwnerBalances,
    ) -> Result<NewLedgerEntry, LedgerError> {
        request.owner.validate()?;
        request.owner.validate_reference(request.expenditure_id)?;
        if request.quantity <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }
        if request.unit_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "unit price must be positive, got {}",
                request.unit_price
            )));
        }
        ensure_scale("unit price", request.unit_price)?;

        let total_amount = request
            .unit_price
            .checked_mul(Decimal::from(request.quantity))
            .ok_or_else(|| LedgerError::InvalidAmount("total amount overflows".to_string()))?;

        for scope in request.owner.scopes() {
            ensure_covers(balances, scope, total_amount)?;
        }

        let (inspector_balance, project_balance) =
            balances.snapshots(&request.owner, Direction::Outbound, total_amount)?;

        Ok(NewLedgerEntry {
            owner: request.owner,
            direction: Direction::Outbound,
            reference_id: request.expenditure_id,
            reference_label: request.label.clone(),
            description: request.description.clone(),
            unit_price: request.unit_price,
            quantity: request.quantity,
            total_amount,
            inspector_balance,
            project_balance,
            receipt_ref: request.receipt_ref.clone(),
            reverses: None,
            created_by: request.created_by,
        })
    }

    /// Builds the compensating entry for `original`.
    ///
    /// The compensator continues each chain from the *current* balances, not from
    /// the original's position, and links back through `reverses`.
    ///
    /// # Errors
    ///
    /// `NotReversible` if the original is already cancelled or is inbound.
    pub fn build_reversal(
        original: &LedgerEntry,
        balances: &OwnerBalances,
        actor: UserId,
    ) -> Result<NewLedgerEntry, LedgerError> {
        if original.is_cancelled || original.direction == Direction::Inbound {
            return Err(LedgerError::NotReversible(original.id));
        }

        let direction = original.direction.opposite();
        let (inspector_balance, project_balance) =
            balances.snapshots(&original.owner, direction, original.total_amount)?;

        Ok(NewLedgerEntry {
            owner: original.owner,
            direction,
            reference_id: original.reference_id,
            reference_label: format!("{CANCELLATION_PREFIX}{}", original.reference_label),
            description: format!("{CANCELLATION_PREFIX}{}", original.description),
            unit_price: original.unit_price,
            quantity: original.quantity,
            total_amount: original.total_amount,
            inspector_balance,
            project_balance,
            receipt_ref: original.receipt_ref.clone(),
            reverses: Some(original.id),
            created_by: actor,
        })
    }
}

fn ensure_scale(what: &str, amount: Decimal) -> Result<(), LedgerError> {
    if amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return Err(LedgerError::InvalidAmount(format!(
            "{what} has more than {MAX_AMOUNT_SCALE} decimal places: {amount}"
        )));
    }
    Ok(())
}

fn ensure_covers(
    balances: &OwnerBalances,
    scope: Scope,
    requested: Decimal,
) -> Result<(), LedgerError> {
    let available = balances.require(scope)?.balance;
    if available < requested {
        return Err(LedgerError::InsufficientFunds {
            scope,
            available,
            requested,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::balance::LatestBalance;
    use cashbook_shared::types::{EntryId, InspectorId, ProjectId};
    use chrono::Utc;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    const INSPECTOR: InspectorId = InspectorId::new(1);
    const PROJECT: ProjectId = ProjectId::new(2);

    fn both() -> Owner {
        Owner::InspectorProject {
            inspector: INSPECTOR,
            project: PROJECT,
        }
    }

    fn balances(inspector: Decimal, project: Decimal) -> OwnerBalances {
        OwnerBalances::from_latest([
            LatestBalance {
                scope: Scope::Inspector(INSPECTOR),
                balance: inspector,
                as_of: Some(EntryId::new(10)),
            },
            LatestBalance {
                scope: Scope::Project(PROJECT),
                balance: project,
                as_of: Some(EntryId::new(10)),
            },
        ])
    }

    fn expenditure(unit_price: Decimal, quantity: i64) -> ExpenditureRequest {
        ExpenditureRequest {
            owner: both(),
            expenditure_id: Some(ExpenditureId::new(5)),
            label: "Operational".to_string(),
            description: "Cement".to_string(),
            unit_price,
            quantity,
            receipt_ref: None,
            created_by: UserId::new(1),
        }
    }

    #[test]
    fn test_build_income_on_empty_scope() {
        let request = IncomeRequest {
            owner: Owner::Inspector(INSPECTOR),
            amount: dec!(100000),
            label: "opening".to_string(),
            description: "Opening float".to_string(),
            receipt_ref: None,
            created_by: UserId::new(1),
        };
        let balances =
            OwnerBalances::from_latest([LatestBalance::empty(Scope::Inspector(INSPECTOR))]);

        let entry = EntryBuilder::build_income(&request, &balances).expect("valid income");

        assert_eq!(entry.direction, Direction::Inbound);
        assert_eq!(entry.quantity, 1);
        assert_eq!(entry.total_amount, dec!(100000));
        assert_eq!(entry.inspector_balance.map(|s| s.prior), Some(dec!(0)));
        assert_eq!(entry.inspector_balance.map(|s| s.new), Some(dec!(100000)));
        assert_eq!(entry.project_balance, None);
    }

    #[rstest]
    #[case(dec!(0))]
    #[case(dec!(-500))]
    fn test_build_income_rejects_non_positive(#[case] amount: Decimal) {
        let request = IncomeRequest {
            owner: both(),
            amount,
            label: String::new(),
            description: String::new(),
            receipt_ref: None,
            created_by: UserId::new(1),
        };
        let result = EntryBuilder::build_income(&request, &balances(dec!(0), dec!(0)));
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn test_build_expenditure_decrements_both_scopes() {
        let entry = EntryBuilder::build_expenditure(
            &expenditure(dec!(5000), 3),
            &balances(dec!(100000), dec!(40000)),
        )
        .expect("funds available");

        assert_eq!(entry.total_amount, dec!(15000));
        assert_eq!(entry.direction, Direction::Outbound);
        assert_eq!(entry.reference_id, Some(ExpenditureId::new(5)));
        assert_eq!(entry.inspector_balance.map(|s| s.new), Some(dec!(85000)));
        assert_eq!(entry.project_balance.map(|s| s.new), Some(dec!(25000)));
    }

    #[test]
    fn test_build_expenditure_exact_balance_allowed() {
        let entry = EntryBuilder::build_expenditure(
            &expenditure(dec!(15000), 1),
            &balances(dec!(15000), dec!(15000)),
        )
        .expect("exact balance covers the total");
        assert_eq!(entry.project_balance.map(|s| s.new), Some(dec!(0)));
    }

    #[rstest]
    #[case(dec!(5000), 0)]
    #[case(dec!(5000), -2)]
    #[case(dec!(0), 3)]
    #[case(dec!(-1), 3)]
    fn test_build_expenditure_rejects_invalid_amounts(
        #[case] unit_price: Decimal,
        #[case] quantity: i64,
    ) {
        // Balances are missing entirely: the amount check must fire first.
        let result =
            EntryBuilder::build_expenditure(&expenditure(unit_price, quantity), &OwnerBalances::default());
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }

    #[rstest]
    #[case(dec!(0.33335))]
    #[case(dec!(1500.00001))]
    fn test_build_expenditure_rejects_sub_unit_precision(#[case] unit_price: Decimal) {
        let result = EntryBuilder::build_expenditure(
            &expenditure(unit_price, 3),
            &balances(dec!(100000), dec!(100000)),
        );
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn test_build_expenditure_accepts_four_places_and_trailing_zeros() {
        let balances = balances(dec!(100000), dec!(100000));
        let entry = EntryBuilder::build_expenditure(&expenditure(dec!(0.3333), 3), &balances)
            .expect("four places fit");
        assert_eq!(entry.total_amount, dec!(0.9999));

        EntryBuilder::build_expenditure(&expenditure(dec!(1500.000000), 1), &balances)
            .expect("trailing zeros are not precision");
    }

    #[test]
    fn test_build_income_rejects_sub_unit_precision() {
        let request = IncomeRequest {
            owner: both(),
            amount: dec!(10.12345),
            label: String::new(),
            description: String::new(),
            receipt_ref: None,
            created_by: UserId::new(1),
        };
        let result = EntryBuilder::build_income(&request, &balances(dec!(0), dec!(0)));
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn test_build_expenditure_category_needs_project() {
        let mut request = expenditure(dec!(400), 1);
        request.owner = Owner::Inspector(INSPECTOR);
        let result = EntryBuilder::build_expenditure(&request, &balances(dec!(1000), dec!(0)));
        assert!(matches!(result, Err(LedgerError::InvalidOwner(_))));

        request.expenditure_id = None;
        let entry = EntryBuilder::build_expenditure(&request, &balances(dec!(1000), dec!(0)))
            .expect("uncategorized inspector spend");
        assert_eq!(entry.project_balance, None);
    }

    #[test]
    fn test_build_expenditure_insufficient_project_funds() {
        let result = EntryBuilder::build_expenditure(
            &expenditure(dec!(100000), 1),
            &balances(dec!(500000), dec!(85000)),
        );

        match result {
            Err(LedgerError::InsufficientFunds {
                scope,
                available,
                requested,
            }) => {
                assert_eq!(scope, Scope::Project(PROJECT));
                assert_eq!(available, dec!(85000));
                assert_eq!(requested, dec!(100000));
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
    }

    #[test]
    fn test_build_expenditure_insufficient_inspector_funds() {
        let result = EntryBuilder::build_expenditure(
            &expenditure(dec!(1000), 2),
            &balances(dec!(1500), dec!(900000)),
        );
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds { scope: Scope::Inspector(_), .. })
        ));
    }

    #[test]
    fn test_build_expenditure_overflow_is_invalid_amount() {
        let result = EntryBuilder::build_expenditure(
            &expenditure(Decimal::MAX, 2),
            &balances(Decimal::MAX, Decimal::MAX),
        );
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }

    fn stored_expenditure() -> LedgerEntry {
        let new = EntryBuilder::build_expenditure(
            &expenditure(dec!(5000), 3),
            &balances(dec!(100000), dec!(100000)),
        )
        .expect("funds available");
        LedgerEntry::from_new(EntryId::new(11), Utc::now(), new)
    }

    #[test]
    fn test_build_reversal_uses_current_balances() {
        let original = stored_expenditure();
        // Another movement landed after the original.
        let current = balances(dec!(60000), dec!(70000));

        let reversal =
            EntryBuilder::build_reversal(&original, &current, UserId::new(9)).expect("reversible");

        assert_eq!(reversal.direction, Direction::Inbound);
        assert_eq!(reversal.total_amount, dec!(15000));
        assert_eq!(reversal.reverses, Some(EntryId::new(11)));
        assert_eq!(reversal.reference_id, original.reference_id);
        assert_eq!(reversal.reference_label, "Cancellation of Operational");
        assert_eq!(reversal.description, "Cancellation of Cement");
        assert_eq!(reversal.created_by, UserId::new(9));
        assert_eq!(reversal.inspector_balance.map(|s| s.prior), Some(dec!(60000)));
        assert_eq!(reversal.inspector_balance.map(|s| s.new), Some(dec!(75000)));
        assert_eq!(reversal.project_balance.map(|s| s.new), Some(dec!(85000)));
    }

    #[test]
    fn test_build_reversal_rejects_cancelled_and_inbound() {
        let mut original = stored_expenditure();
        original.is_cancelled = true;
        assert!(matches!(
            EntryBuilder::build_reversal(&original, &balances(dec!(0), dec!(0)), UserId::new(1)),
            Err(LedgerError::NotReversible(_))
        ));

        let mut original = stored_expenditure();
        original.direction = Direction::Inbound;
        assert!(matches!(
            EntryBuilder::build_reversal(&original, &balances(dec!(0), dec!(0)), UserId::new(1)),
            Err(LedgerError::NotReversible(_))
        ));
    }
}
