//! Ledger entry domain types.

use std::fmt;

use cashbook_shared::types::{EntryId, ExpenditureId, InspectorId, ProjectId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Direction of a cash movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Money coming in; increases the balance of every touched scope.
    Inbound,
    /// Money going out; decreases the balance of every touched scope.
    Outbound,
}

impl Direction {
    /// Returns the amount with the sign this direction applies to a balance.
    #[must_use]
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            Self::Inbound => amount,
            Self::Outbound => -amount,
        }
    }

    /// Returns the opposite direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Inbound => Self::Outbound,
            Self::Outbound => Self::Inbound,
        }
    }

    /// Returns the storage name of this direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// An account context that carries its own running balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Scope {
    /// The float held by one inspector across all projects.
    Inspector(InspectorId),
    /// The cash position of one project.
    Project(ProjectId),
}

impl Scope {
    /// Storage name of the scope kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Inspector(_) => "inspector",
            Self::Project(_) => "project",
        }
    }

    /// Raw identifier of the scope owner.
    #[must_use]
    pub const fn raw_id(&self) -> i64 {
        match self {
            Self::Inspector(id) => id.into_inner(),
            Self::Project(id) => id.into_inner(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.raw_id())
    }
}

/// The scopes an entry affects.
///
/// An entry touches the inspector scope, the project scope, or both at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    /// Only the inspector's float.
    Inspector(InspectorId),
    /// Only the project's cash position.
    Project(ProjectId),
    /// A project movement drawn from (or credited to) a specific inspector.
    InspectorProject {
        /// Inspector scope.
        inspector: InspectorId,
        /// Project scope.
        project: ProjectId,
    },
}

impl Owner {
    /// Builds an owner from optional parts; `None` when neither scope is given.
    #[must_use]
    pub fn from_parts(inspector: Option<InspectorId>, project: Option<ProjectId>) -> Option<Self> {
        match (inspector, project) {
            (Some(inspector), Some(project)) => Some(Self::InspectorProject { inspector, project }),
            (Some(inspector), None) => Some(Self::Inspector(inspector)),
            (None, Some(project)) => Some(Self::Project(project)),
            (None, None) => None,
        }
    }

    /// Inspector scope id, if touched.
    #[must_use]
    pub const fn inspector(&self) -> Option<InspectorId> {
        match self {
            Self::Inspector(id) | Self::InspectorProject { inspector: id, .. } => Some(*id),
            Self::Project(_) => None,
        }
    }

    /// Project scope id, if touched.
    #[must_use]
    pub const fn project(&self) -> Option<ProjectId> {
        match self {
            Self::Project(id) | Self::InspectorProject { project: id, .. } => Some(*id),
            Self::Inspector(_) => None,
        }
    }

    /// Touched scopes in lock order.
    #[must_use]
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes = Vec::with_capacity(2);
        if let Some(inspector) = self.inspector() {
            scopes.push(Scope::Inspector(inspector));
        }
        if let Some(project) = self.project() {
            scopes.push(Scope::Project(project));
        }
        scopes.sort();
        scopes
    }

    /// Returns true if the owner touches `scope`.
    #[must_use]
    pub fn touches(&self, scope: Scope) -> bool {
        match scope {
            Scope::Inspector(id) => self.inspector() == Some(id),
            Scope::Project(id) => self.project() == Some(id),
        }
    }

    /// Rejects owners that reference non-positive ids.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let inspector_ok = self.inspector().is_none_or(|id| id.is_valid());
        let project_ok = self.project().is_none_or(|id| id.is_valid());
        if inspector_ok && project_ok {
            Ok(())
        } else {
            Err(LedgerError::InvalidOwner(*self))
        }
    }

    /// Rejects an expenditure-category reference on an owner without a project
    /// scope; categories belong to projects.
    pub fn validate_reference(&self, reference: Option<ExpenditureId>) -> Result<(), LedgerError> {
        if reference.is_some() && self.project().is_none() {
            return Err(LedgerError::InvalidOwner(*self));
        }
        Ok(())
    }
}

/// Balance of one scope immediately before and after an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Balance before the entry.
    pub prior: Decimal,
    /// Balance after the entry.
    pub new: Decimal,
}

impl BalanceSnapshot {
    /// Applies a movement to `prior`.
    ///
    /// Returns `None` on decimal overflow.
    #[must_use]
    pub fn apply(prior: Decimal, direction: Direction, amount: Decimal) -> Option<Self> {
        let new = prior.checked_add(direction.signed(amount))?;
        Some(Self { prior, new })
    }

    /// Signed change recorded by this snapshot.
    #[must_use]
    pub fn change(&self) -> Decimal {
        self.new - self.prior
    }
}

/// A fully computed entry that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    /// Scopes affected.
    pub owner: Owner,
    /// Inbound or outbound.
    pub direction: Direction,
    /// Expenditure line this movement belongs to.
    pub reference_id: Option<ExpenditureId>,
    /// Short label shown in listings.
    pub reference_label: String,
    /// Free-form description.
    pub description: String,
    /// Price per unit.
    pub unit_price: Decimal,
    /// Number of units.
    pub quantity: i64,
    /// `unit_price * quantity`.
    pub total_amount: Decimal,
    /// Inspector scope snapshot, present iff the owner touches an inspector.
    pub inspector_balance: Option<BalanceSnapshot>,
    /// Project scope snapshot, present iff the owner touches a project.
    pub project_balance: Option<BalanceSnapshot>,
    /// Pointer to an externally stored receipt.
    pub receipt_ref: Option<String>,
    /// Entry this one compensates.
    pub reverses: Option<EntryId>,
    /// Actor that requested the movement.
    pub created_by: UserId,
}

impl NewLedgerEntry {
    /// Checks the owner ids and that a category reference sits on a project.
    pub fn validate_scopes(&self) -> Result<(), LedgerError> {
        self.owner.validate()?;
        self.owner.validate_reference(self.reference_id)
    }

    /// Signed amount this entry applies to each touched scope.
    #[must_use]
    pub fn signed_amount(&self) -> Decimal {
        self.direction.signed(self.total_amount)
    }

    /// Snapshot recorded for `scope`, if the entry touches it.
    #[must_use]
    pub fn snapshot_for(&self, scope: Scope) -> Option<BalanceSnapshot> {
        if !self.owner.touches(scope) {
            return None;
        }
        match scope {
            Scope::Inspector(_) => self.inspector_balance,
            Scope::Project(_) => self.project_balance,
        }
    }
}

/// One stored cash movement.
///
/// Entries are immutable apart from `is_cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Store-assigned identifier.
    pub id: EntryId,
    /// Store-assigned timestamp; `(created_at, id)` is the chain order.
    pub created_at: DateTime<Utc>,
    /// Scopes affected.
    pub owner: Owner,
    /// Inbound or outbound.
    pub direction: Direction,
    /// Expenditure line this movement belongs to.
    pub reference_id: Option<ExpenditureId>,
    /// Short label shown in listings.
    pub reference_label: String,
    /// Free-form description.
    pub description: String,
    /// Price per unit.
    pub unit_price: Decimal,
    /// Number of units.
    pub quantity: i64,
    /// `unit_price * quantity`.
    pub total_amount: Decimal,
    /// Inspector scope snapshot.
    pub inspector_balance: Option<BalanceSnapshot>,
    /// Project scope snapshot.
    pub project_balance: Option<BalanceSnapshot>,
    /// Pointer to an externally stored receipt.
    pub receipt_ref: Option<String>,
    /// Entry this one compensates.
    pub reverses: Option<EntryId>,
    /// Set once the entry has been compensated.
    pub is_cancelled: bool,
    /// Actor that requested the movement.
    pub created_by: UserId,
}

impl LedgerEntry {
    /// Materializes a stored entry.
    #[must_use]
    pub fn from_new(id: EntryId, created_at: DateTime<Utc>, entry: NewLedgerEntry) -> Self {
        Self {
            id,
            created_at,
            owner: entry.owner,
            direction: entry.direction,
            reference_id: entry.reference_id,
            reference_label: entry.reference_label,
            description: entry.description,
            unit_price: entry.unit_price,
            quantity: entry.quantity,
            total_amount: entry.total_amount,
            inspector_balance: entry.inspector_balance,
            project_balance: entry.project_balance,
            receipt_ref: entry.receipt_ref,
            reverses: entry.reverses,
            is_cancelled: false,
            created_by: entry.created_by,
        }
    }

    /// Signed amount this entry applies to each touched scope.
    #[must_use]
    pub fn signed_amount(&self) -> Decimal {
        self.direction.signed(self.total_amount)
    }

    /// Snapshot recorded for `scope`, if the entry touches it.
    #[must_use]
    pub fn snapshot_for(&self, scope: Scope) -> Option<BalanceSnapshot> {
        if !self.owner.touches(scope) {
            return None;
        }
        match scope {
            Scope::Inspector(_) => self.inspector_balance,
            Scope::Project(_) => self.project_balance,
        }
    }

    /// Returns true if the entry still counts towards balances.
    ///
    /// Cancelled entries and the compensators that cancel them net to zero.
    #[must_use]
    pub fn is_effective(&self) -> bool {
        !self.is_cancelled && self.reverses.is_none()
    }

    /// Chain order key.
    #[must_use]
    pub fn order_key(&self) -> (DateTime<Utc>, EntryId) {
        (self.created_at, self.id)
    }
}
