//! Property-based tests for EntryBuilder.
//!
//! - Property 2: No negative balance after an accepted expenditure
//! - Property 3: Reversal nets to zero

use cashbook_shared::types::{EntryId, ExpenditureId, InspectorId, ProjectId, UserId};
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;

use super::balance::{LatestBalance, OwnerBalances};
use super::builder::{EntryBuilder, ExpenditureRequest, IncomeRequest};
use super::entry::{LedgerEntry, Owner, Scope};
use super::error::LedgerError;

const INSPECTOR: InspectorId = InspectorId::new(1);
const PROJECT: ProjectId = ProjectId::new(1);

fn owner() -> Owner {
    Owner::InspectorProject {
        inspector: INSPECTOR,
        project: PROJECT,
    }
}

/// Strategy for whole-rupiah amounts.
fn amount() -> impl Strategy<Value = Decimal> {
    (1i64..5_000_000i64).prop_map(Decimal::from)
}

/// A movement request: either income or an itemized expenditure.
#[derive(Debug, Clone)]
enum Step {
    Income(Decimal),
    Spend(Decimal, i64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        amount().prop_map(Step::Income),
        (amount(), 1i64..5i64).prop_map(|(price, qty)| Step::Spend(price, qty)),
    ]
}

fn balances_of(inspector: Decimal, project: Decimal) -> OwnerBalances {
    OwnerBalances::from_latest([
        LatestBalance {
            scope: Scope::Inspector(INSPECTOR),
            balance: inspector,
            as_of: None,
        },
        LatestBalance {
            scope: Scope::Project(PROJECT),
            balance: project,
            as_of: None,
        },
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// **Property 2.1: Accepted expenditures never leave a negative balance**
    ///
    /// *For any* sequence of income and expenditure requests applied in order,
    /// every accepted entry SHALL leave both scope balances >= 0, and every
    /// rejection SHALL be InsufficientFunds with the balances unchanged.
    #[test]
    fn prop_no_negative_balance(steps in prop::collection::vec(step(), 1..40)) {
        let mut inspector = Decimal::ZERO;
        let mut project = Decimal::ZERO;

        for step in steps {
            let balances = balances_of(inspector, project);
            let result = match step {
                Step::Income(amount) => EntryBuilder::build_income(
                    &IncomeRequest {
                        owner: owner(),
                        amount,
                        label: "income".to_string(),
                        description: String::new(),
                        receipt_ref: None,
                        created_by: UserId::new(1),
                    },
                    &balances,
                ),
                Step::Spend(unit_price, quantity) => EntryBuilder::build_expenditure(
                    &ExpenditureRequest {
                        owner: owner(),
                        expenditure_id: Some(ExpenditureId::new(1)),
                        label: "spend".to_string(),
                        description: String::new(),
                        unit_price,
                        quantity,
                        receipt_ref: None,
                        created_by: UserId::new(1),
                    },
                    &balances,
                ),
            };

            match result {
                Ok(entry) => {
                    let new_inspector = entry.inspector_balance.map(|s| s.new);
                    let new_project = entry.project_balance.map(|s| s.new);
                    prop_assert!(new_inspector.is_some_and(|b| b >= Decimal::ZERO));
                    prop_assert!(new_project.is_some_and(|b| b >= Decimal::ZERO));
                    inspector = new_inspector.unwrap_or(inspector);
                    project = new_project.unwrap_or(project);
                }
                Err(LedgerError::InsufficientFunds { available, requested, .. }) => {
                    prop_assert!(available < requested);
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
    }

    /// **Property 3.1: A reversal restores the balance the original removed**
    ///
    /// *For any* accepted expenditure and any later balance, applying the
    /// reversal SHALL add back exactly the expenditure total on every scope.
    #[test]
    fn prop_reversal_nets_to_zero(
        unit_price in amount(),
        quantity in 1i64..10i64,
        later_inspector in 0i64..10_000_000i64,
        later_project in 0i64..10_000_000i64,
    ) {
        let funds = unit_price * Decimal::from(quantity);
        let spent = EntryBuilder::build_expenditure(
            &ExpenditureRequest {
                owner: owner(),
                expenditure_id: None,
                label: "spend".to_string(),
                description: "spend".to_string(),
                unit_price,
                quantity,
                receipt_ref: None,
                created_by: UserId::new(1),
            },
            &balances_of(funds, funds),
        );
        prop_assert!(spent.is_ok());
        let Ok(spent) = spent else { return Ok(()) };
        let original = LedgerEntry::from_new(EntryId::new(1), Utc::now(), spent);

        let current = balances_of(Decimal::from(later_inspector), Decimal::from(later_project));
        let reversal = EntryBuilder::build_reversal(&original, &current, UserId::new(2));
        prop_assert!(reversal.is_ok());
        let Ok(reversal) = reversal else { return Ok(()) };

        prop_assert_eq!(reversal.signed_amount() + original.signed_amount(), Decimal::ZERO);
        prop_assert_eq!(
            reversal.inspector_balance.map(|s| s.change()),
            Some(original.total_amount)
        );
        prop_assert_eq!(
            reversal.project_balance.map(|s| s.new),
            Some(Decimal::from(later_project) + original.total_amount)
        );
    }
}
