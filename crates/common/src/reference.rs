//! Owner references for reservations and ledger transactions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CheckoutId, OrderId};

/// Who a reservation or stock movement belongs to.
///
/// Stored as a `(kind, key)` pair; [`Reference::from_parts`] is the only way
/// back from that pair, so every kind has to be handled explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reference {
    /// A checkout attempt.
    Checkout { checkout_id: CheckoutId },
    /// A placed order (fulfillment, cancellation).
    Order { order_id: OrderId },
    /// An operator action.
    Manual { actor: String },
}

/// Discriminant of a [`Reference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Checkout,
    Order,
    Manual,
}

/// Error returned when a stored `(kind, key)` pair cannot be decoded.
#[derive(Debug, Error)]
pub enum ReferenceParseError {
    #[error("unknown reference kind: {0}")]
    UnknownKind(String),

    #[error("invalid checkout id in reference: {0}")]
    InvalidCheckoutId(#[from] uuid::Error),
}

impl Reference {
    /// Reference to a checkout attempt.
    pub fn checkout(checkout_id: CheckoutId) -> Self {
        Reference::Checkout { checkout_id }
    }

    /// Reference to an order.
    pub fn order(order_id: impl Into<OrderId>) -> Self {
        Reference::Order {
            order_id: order_id.into(),
        }
    }

    /// Reference to an operator action.
    pub fn manual(actor: impl Into<String>) -> Self {
        Reference::Manual {
            actor: actor.into(),
        }
    }

    pub fn kind(&self) -> ReferenceKind {
        match self {
            Reference::Checkout { .. } => ReferenceKind::Checkout,
            Reference::Order { .. } => ReferenceKind::Order,
            Reference::Manual { .. } => ReferenceKind::Manual,
        }
    }

    /// The key half of the stored pair.
    pub fn key(&self) -> String {
        match self {
            Reference::Checkout { checkout_id } => checkout_id.to_string(),
            Reference::Order { order_id } => order_id.to_string(),
            Reference::Manual { actor } => actor.clone(),
        }
    }

    /// Returns the checkout id if this reference points at a checkout.
    pub fn checkout_id(&self) -> Option<CheckoutId> {
        match self {
            Reference::Checkout { checkout_id } => Some(*checkout_id),
            _ => None,
        }
    }

    /// Rebuilds a reference from its stored `(kind, key)` pair.
    pub fn from_parts(kind: &str, key: &str) -> Result<Self, ReferenceParseError> {
        match kind {
            "checkout" => Ok(Reference::checkout(key.parse()?)),
            "order" => Ok(Reference::order(key)),
            "manual" => Ok(Reference::manual(key)),
            other => Err(ReferenceParseError::UnknownKind(other.to_string())),
        }
    }
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Checkout => "checkout",
            ReferenceKind::Order => "order",
            ReferenceKind::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_round_trip_for_every_kind() {
        let refs = [
            Reference::checkout(CheckoutId::new()),
            Reference::order("ORD-1"),
            Reference::manual("ops@example.com"),
        ];
        for r in refs {
            let back = Reference::from_parts(r.kind().as_str(), &r.key()).unwrap();
            assert_eq!(back, r);
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = Reference::from_parts("cart", "abc").unwrap_err();
        assert!(matches!(err, ReferenceParseError::UnknownKind(_)));
    }

    #[test]
    fn test_checkout_reference_requires_uuid_key() {
        assert!(Reference::from_parts("checkout", "nope").is_err());
    }

    #[test]
    fn test_display_is_kind_and_key() {
        assert_eq!(Reference::order("ORD-9").to_string(), "order:ORD-9");
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(Reference::manual("alice")).unwrap();
        assert_eq!(json["kind"], "manual");
        assert_eq!(json["actor"], "alice");
    }
}
