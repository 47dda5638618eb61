//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{CheckoutId, CurrencyCode, Money};
use pricing::PriceSnapshot;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// A successful authorization hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub authorization_id: String,
    pub amount: Money,
    pub currency: CurrencyCode,
}

/// A successful capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub capture_id: String,
    pub authorization_id: String,
}

/// Payment operations. The wire protocol behind them is not modelled.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Places a hold for the frozen cart total. `Rejected` means declined.
    async fn authorize(
        &self,
        checkout_id: CheckoutId,
        cart_snapshot: &PriceSnapshot,
    ) -> Result<Authorization, ServiceError>;

    async fn capture(&self, authorization_id: &str) -> Result<Capture, ServiceError>;

    /// Drops an authorization hold. Voiding an unknown id is not an error.
    async fn void(&self, authorization_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthorizationStatus {
    Authorized,
    Captured,
    Voided,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    authorizations: HashMap<String, (CheckoutId, Money, AuthorizationStatus)>,
    next_id: u32,
    decline: bool,
    fail_on_authorize: bool,
    fail_on_capture: bool,
    delay: Option<Duration>,
}

/// In-memory payment gateway for tests and the demo server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every subsequent authorization.
    pub fn set_decline(&self, decline: bool) {
        self.write().decline = decline;
    }

    pub fn set_fail_on_authorize(&self, fail: bool) {
        self.write().fail_on_authorize = fail;
    }

    pub fn set_fail_on_capture(&self, fail: bool) {
        self.write().fail_on_capture = fail;
    }

    /// Sleeps this long before answering authorize and capture calls.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.write().delay = delay;
    }

    /// Authorizations still holding funds.
    pub fn active_authorizations(&self) -> usize {
        self.count(AuthorizationStatus::Authorized)
    }

    pub fn captured_count(&self) -> usize {
        self.count(AuthorizationStatus::Captured)
    }

    pub fn voided_count(&self) -> usize {
        self.count(AuthorizationStatus::Voided)
    }

    /// Total amount held or captured for `checkout_id`.
    pub fn amount_for(&self, checkout_id: CheckoutId) -> Money {
        self.read()
            .authorizations
            .values()
            .filter(|(id, _, status)| *id == checkout_id && *status != AuthorizationStatus::Voided)
            .map(|(_, amount, _)| *amount)
            .sum()
    }

    fn count(&self, status: AuthorizationStatus) -> usize {
        self.read()
            .authorizations
            .values()
            .filter(|(_, _, s)| *s == status)
            .count()
    }

    fn delay(&self) -> Option<Duration> {
        self.read().delay
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryPaymentState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryPaymentState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn authorize(
        &self,
        checkout_id: CheckoutId,
        cart_snapshot: &PriceSnapshot,
    ) -> Result<Authorization, ServiceError> {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.write();
        if state.fail_on_authorize {
            return Err(ServiceError::Unavailable("gateway timeout".to_string()));
        }
        if state.decline {
            return Err(ServiceError::Rejected("card declined".to_string()));
        }

        state.next_id += 1;
        let authorization_id = format!("AUTH-{:04}", state.next_id);
        let amount = cart_snapshot.grand_total();
        state.authorizations.insert(
            authorization_id.clone(),
            (checkout_id, amount, AuthorizationStatus::Authorized),
        );

        Ok(Authorization {
            authorization_id,
            amount,
            currency: cart_snapshot.currency().clone(),
        })
    }

    async fn capture(&self, authorization_id: &str) -> Result<Capture, ServiceError> {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.write();
        if state.fail_on_capture {
            return Err(ServiceError::Unavailable("capture failed".to_string()));
        }
        let Some(entry) = state.authorizations.get_mut(authorization_id) else {
            return Err(ServiceError::Rejected(format!(
                "unknown authorization {authorization_id}"
            )));
        };
        let status = entry.2;
        match status {
            AuthorizationStatus::Voided => {
                return Err(ServiceError::Rejected("authorization voided".to_string()));
            }
            AuthorizationStatus::Authorized => entry.2 = AuthorizationStatus::Captured,
            AuthorizationStatus::Captured => {}
        }

        Ok(Capture {
            capture_id: format!("CAP-{}", authorization_id.trim_start_matches("AUTH-")),
            authorization_id: authorization_id.to_string(),
        })
    }

    async fn void(&self, authorization_id: &str) -> Result<(), ServiceError> {
        let mut state = self.write();
        if let Some(entry) = state.authorizations.get_mut(authorization_id) {
            entry.2 = AuthorizationStatus::Voided;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pricing::{ResolvedPrice, SnapshotScope};

    use super::*;

    fn snapshot(checkout_id: CheckoutId) -> PriceSnapshot {
        let resolved = ResolvedPrice {
            currency: CurrencyCode::new("USD").unwrap(),
            unit_price: Money::from_cents(2500),
            quantity: 2,
            discounts: vec![],
            taxes: vec![],
            promotion_metadata: serde_json::Map::new(),
        };
        PriceSnapshot::capture(checkout_id, SnapshotScope::Cart, &resolved, None, None, Utc::now())
    }

    #[tokio::test]
    async fn test_authorize_capture_and_void() {
        let gateway = InMemoryPaymentGateway::new();
        let checkout_id = CheckoutId::new();

        let auth = gateway
            .authorize(checkout_id, &snapshot(checkout_id))
            .await
            .unwrap();
        assert_eq!(auth.authorization_id, "AUTH-0001");
        assert_eq!(auth.amount, Money::from_cents(5000));
        assert_eq!(gateway.active_authorizations(), 1);

        let capture = gateway.capture(&auth.authorization_id).await.unwrap();
        assert_eq!(capture.capture_id, "CAP-0001");
        assert_eq!(gateway.captured_count(), 1);
        assert_eq!(gateway.amount_for(checkout_id), Money::from_cents(5000));

        gateway.void(&auth.authorization_id).await.unwrap();
        assert_eq!(gateway.voided_count(), 1);
        assert_eq!(gateway.amount_for(checkout_id), Money::ZERO);
    }

    #[tokio::test]
    async fn test_decline_and_failure_are_distinct() {
        let gateway = InMemoryPaymentGateway::new();
        let checkout_id = CheckoutId::new();

        gateway.set_decline(true);
        assert!(matches!(
            gateway.authorize(checkout_id, &snapshot(checkout_id)).await,
            Err(ServiceError::Rejected(_))
        ));

        gateway.set_decline(false);
        gateway.set_fail_on_authorize(true);
        assert!(matches!(
            gateway.authorize(checkout_id, &snapshot(checkout_id)).await,
            Err(ServiceError::Unavailable(_))
        ));
        assert_eq!(gateway.active_authorizations(), 0);
    }

    #[tokio::test]
    async fn test_voided_authorization_cannot_be_captured() {
        let gateway = InMemoryPaymentGateway::new();
        let checkout_id = CheckoutId::new();
        let auth = gateway
            .authorize(checkout_id, &snapshot(checkout_id))
            .await
            .unwrap();
        gateway.void(&auth.authorization_id).await.unwrap();
        assert!(gateway.capture(&auth.authorization_id).await.is_err());
    }
}
