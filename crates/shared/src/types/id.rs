//! Typed IDs for type-safe entity references.
//!
//! Using typed IDs prevents accidentally passing a `ProjectId` where an `InspectorId` is expected.
//! Every ID wraps the `BIGINT` key the database assigns; valid IDs are strictly positive.

use serde::{Deserialize, Serialize};

/// Macro to generate typed ID wrappers.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Creates an ID from a raw database key.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw database key.
            #[must_use]
            pub const fn into_inner(self) -> i64 {
                self.0
            }

            /// Returns true if the ID can refer to a stored row (strictly positive).
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 > 0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.trim().parse()?))
            }
        }
    };
}

typed_id!(UserId, "Unique identifier for a user (the actor behind a movement).");
typed_id!(InspectorId, "Unique identifier for an inspector account scope.");
typed_id!(ProjectId, "Unique identifier for a project account scope.");
typed_id!(ExpenditureId, "Unique identifier for a project expenditure category.");
typed_id!(EntryId, "Unique, monotonically assigned identifier for a ledger entry.");

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_typed_id_roundtrip_raw() {
        let id = ProjectId::new(42);
        assert_eq!(id.into_inner(), 42);
        assert_eq!(ProjectId::from(42), id);
    }

    #[test]
    fn test_typed_id_validity() {
        assert!(InspectorId::new(1).is_valid());
        assert!(!InspectorId::new(0).is_valid());
        assert!(!InspectorId::new(-7).is_valid());
    }

    #[test]
    fn test_typed_id_display_and_parse() {
        let id = EntryId::new(1234);
        assert_eq!(id.to_string(), "1234");
        assert_eq!(EntryId::from_str(" 1234 ").unwrap(), id);
        assert!(EntryId::from_str("abc").is_err());
    }

    #[test]
    fn test_typed_id_ordering_follows_raw_key() {
        let mut ids = vec![EntryId::new(3), EntryId::new(1), EntryId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![EntryId::new(1), EntryId::new(2), EntryId::new(3)]);
    }

    #[test]
    fn test_typed_id_serializes_transparently() {
        let json = serde_json::to_string(&UserId::new(9)).unwrap();
        assert_eq!(json, "9");
    }
}
