//! Order system trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{Cart, CheckoutId, Money, OrderId};
use pricing::FrozenPrices;

use crate::error::ServiceError;

/// Creates and cancels orders in the order system.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn create_order(
        &self,
        checkout_id: CheckoutId,
        cart: &Cart,
        prices: &FrozenPrices,
    ) -> Result<OrderId, ServiceError>;

    async fn cancel_order(&self, order_id: &OrderId) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOrder {
    pub checkout_id: CheckoutId,
    pub total: Money,
    pub lines: usize,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<OrderId, RecordedOrder>,
    next_id: u32,
    fail_on_create: bool,
}

/// In-memory order system for tests and the demo server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderGateway {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_create(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_create = fail;
    }

    /// Orders that were created and not cancelled.
    pub fn open_order_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .orders
            .values()
            .filter(|o| !o.cancelled)
            .count()
    }

    pub fn order(&self, order_id: &OrderId) -> Option<RecordedOrder> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .orders
            .get(order_id)
            .cloned()
    }
}

#[async_trait]
impl OrderGateway for InMemoryOrderGateway {
    async fn create_order(
        &self,
        checkout_id: CheckoutId,
        cart: &Cart,
        prices: &FrozenPrices,
    ) -> Result<OrderId, ServiceError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_create {
            return Err(ServiceError::Unavailable("order service down".to_string()));
        }

        state.next_id += 1;
        let order_id = OrderId::new(format!("ORD-{:04}", state.next_id));
        state.orders.insert(
            order_id.clone(),
            RecordedOrder {
                checkout_id,
                total: prices.grand_total(),
                lines: cart.lines.len(),
                cancelled: false,
            },
        );
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(order) = state.orders.get_mut(order_id) {
            order.cancelled = true;
        }
        Ok(())
    }
}
