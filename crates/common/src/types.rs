//! Typed identifiers.
//!
//! Every entity gets its own newtype so a reservation id can never be passed
//! where a checkout id is expected. Engine-owned records use random UUIDs;
//! catalog-owned keys (variants, warehouses) and collaborator-issued ids
//! (orders, cart lines) are opaque strings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of a checkout attempt (the orchestration record).
    CheckoutId
);
uuid_id!(
    /// Identifier of a shopping cart.
    CartId
);
uuid_id!(
    /// Identifier of a stock reservation.
    ReservationId
);
uuid_id!(
    /// Identifier of a frozen price snapshot.
    SnapshotId
);
uuid_id!(
    /// Identifier of an inventory ledger transaction.
    TransactionId
);

string_id!(
    /// Catalog variant (SKU) identifier.
    VariantId
);
string_id!(
    /// Warehouse code.
    WarehouseId
);
string_id!(
    /// Order identifier issued by the order collaborator.
    OrderId
);
string_id!(
    /// Cart line identifier issued by the cart owner.
    LineId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_unique() {
        assert_ne!(CheckoutId::new(), CheckoutId::new());
        assert_ne!(ReservationId::new(), ReservationId::new());
    }

    #[test]
    fn test_uuid_id_parses_its_display_form() {
        let id = CheckoutId::new();
        let parsed: CheckoutId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_uuid_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<CartId>().is_err());
    }

    #[test]
    fn test_string_ids_serialize_transparently() {
        let variant = VariantId::new("SKU-001");
        let json = serde_json::to_string(&variant).unwrap();
        assert_eq!(json, "\"SKU-001\"");
        assert_eq!(variant.as_str(), "SKU-001");
    }
}
