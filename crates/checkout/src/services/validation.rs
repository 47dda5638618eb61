//! Cart validation collaborator.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{Cart, VariantId};

use crate::error::ServiceError;

/// Decides whether a cart may enter checkout.
#[async_trait]
pub trait CartValidator: Send + Sync {
    /// `Err(ServiceError::Rejected)` when the cart itself is invalid.
    async fn validate(&self, cart: &Cart) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryValidatorState {
    blocked_variants: HashSet<VariantId>,
    unavailable: bool,
    validated: usize,
}

/// In-memory validator: rejects empty carts, zero quantities, duplicate
/// lines and blocked variants.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartValidator {
    state: Arc<RwLock<InMemoryValidatorState>>,
}

impl InMemoryCartValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects any cart containing `variant_id`.
    pub fn block_variant(&self, variant_id: impl Into<VariantId>) {
        self.write().blocked_variants.insert(variant_id.into());
    }

    /// Makes the validator itself fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Number of carts that passed validation.
    pub fn validated_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .validated
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryValidatorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CartValidator for InMemoryCartValidator {
    async fn validate(&self, cart: &Cart) -> Result<(), ServiceError> {
        let mut state = self.write();
        if state.unavailable {
            return Err(ServiceError::Unavailable("validator offline".to_string()));
        }
        if cart.is_empty() {
            return Err(ServiceError::Rejected("cart is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for line in &cart.lines {
            if line.quantity == 0 {
                return Err(ServiceError::Rejected(format!(
                    "line {} has zero quantity",
                    line.line_id
                )));
            }
            if !seen.insert(&line.line_id) {
                return Err(ServiceError::Rejected(format!(
                    "duplicate line {}",
                    line.line_id
                )));
            }
            if state.blocked_variants.contains(&line.variant_id) {
                return Err(ServiceError::Rejected(format!(
                    "variant {} cannot be sold",
                    line.variant_id
                )));
            }
        }

        state.validated += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::{CartId, CartLine, CurrencyCode};

    use super::*;

    fn cart() -> Cart {
        Cart::new(CartId::new(), CurrencyCode::new("USD").unwrap())
            .with_line(CartLine::new("l1", "A", 1))
    }

    #[tokio::test]
    async fn test_valid_cart_passes() {
        let validator = InMemoryCartValidator::new();
        validator.validate(&cart()).await.unwrap();
        assert_eq!(validator.validated_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_carts_are_rejected() {
        let validator = InMemoryCartValidator::new();
        let empty = Cart::new(CartId::new(), CurrencyCode::new("USD").unwrap());
        let zero = cart().with_line(CartLine::new("l2", "B", 0));
        let duplicate = cart().with_line(CartLine::new("l1", "B", 1));

        for cart in [empty, zero, duplicate] {
            assert!(matches!(
                validator.validate(&cart).await,
                Err(ServiceError::Rejected(_))
            ));
        }

        validator.block_variant("A");
        assert!(validator.validate(&cart()).await.is_err());
        assert_eq!(validator.validated_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_validator() {
        let validator = InMemoryCartValidator::new();
        validator.set_unavailable(true);
        assert!(matches!(
            validator.validate(&cart()).await,
            Err(ServiceError::Unavailable(_))
        ));
    }
}
