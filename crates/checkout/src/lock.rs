//! The checkout lock: one record per checkout attempt.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use common::{CartId, CheckoutId, LineId, OrderId, ReservationId};
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::failure::{FailureReason, UserOutcome};
use crate::state::CheckoutState;

pub(crate) const AUTHORIZATION_ID: &str = "authorization_id";
pub(crate) const ORDER_ID: &str = "order_id";
pub(crate) const CAPTURE_ID: &str = "capture_id";
pub(crate) const ADJUSTED_QUANTITIES: &str = "adjusted_quantities";
pub(crate) const RESERVATION_IDS: &str = "reservation_ids";

/// Who started the checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl SessionIdentity {
    pub fn anonymous(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
        }
    }

    pub fn user(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: Some(user_id.into()),
        }
    }
}

/// A checkout attempt and how far it got.
///
/// Every change produces a new value with `version + 1`; stores only accept
/// it if the stored row still has the previous state and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutLock {
    pub(crate) id: CheckoutId,
    pub(crate) cart_id: CartId,
    pub(crate) session: SessionIdentity,
    pub(crate) state: CheckoutState,
    pub(crate) phase: CheckoutState,
    pub(crate) failure: Option<FailureReason>,
    pub(crate) locked_at: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) failed_at: Option<DateTime<Utc>>,
    pub(crate) metadata: serde_json::Map<String, serde_json::Value>,
    pub(crate) version: i64,
    pub(crate) updated_at: DateTime<Utc>,
}

impl CheckoutLock {
    pub fn new(
        cart_id: CartId,
        session: SessionIdentity,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: CheckoutId::new(),
            cart_id,
            session,
            state: CheckoutState::Pending,
            phase: CheckoutState::Pending,
            failure: None,
            locked_at: now,
            expires_at: now + ttl,
            completed_at: None,
            failed_at: None,
            metadata: serde_json::Map::new(),
            version: 1,
            updated_at: now,
        }
    }

    pub fn id(&self) -> CheckoutId {
        self.id
    }

    pub fn cart_id(&self) -> CartId {
        self.cart_id
    }

    pub fn session(&self) -> &SessionIdentity {
        &self.session
    }

    pub fn state(&self) -> CheckoutState {
        self.state
    }

    /// The last non-terminal state entered.
    pub fn phase(&self) -> CheckoutState {
        self.phase
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    pub fn locked_at(&self) -> DateTime<Utc> {
        self.locked_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn can_resume(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && !self.is_expired(now)
    }

    pub fn authorization_id(&self) -> Option<&str> {
        self.metadata.get(AUTHORIZATION_ID).and_then(|v| v.as_str())
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.metadata
            .get(ORDER_ID)
            .and_then(|v| v.as_str())
            .map(OrderId::new)
    }

    pub fn capture_id(&self) -> Option<&str> {
        self.metadata.get(CAPTURE_ID).and_then(|v| v.as_str())
    }

    /// Lines held at less than the requested quantity, with the held amount.
    pub fn adjusted_quantities(&self) -> BTreeMap<LineId, u32> {
        self.metadata
            .get(ADJUSTED_QUANTITIES)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// The stock holds this checkout committed to when it left `Reserving`.
    pub fn reservation_ids(&self) -> Vec<ReservationId> {
        self.metadata
            .get(RESERVATION_IDS)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Remaining lifetime, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// What the shopper sees for this checkout, if it has finished.
    pub fn user_outcome(&self) -> Option<UserOutcome> {
        match self.state {
            CheckoutState::Completed => self
                .order_id()
                .map(|order_id| UserOutcome::Completed { order_id }),
            CheckoutState::Failed => self.failure.as_ref().map(FailureReason::user_outcome),
            _ => None,
        }
    }

    /// The next step on the happy path.
    pub fn advanced(&self, to: CheckoutState, now: DateTime<Utc>) -> Result<Self> {
        if to == CheckoutState::Failed || !self.state.can_transition_to(to) {
            return Err(CheckoutError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        let mut next = self.bumped(now);
        next.state = to;
        if to.is_terminal() {
            next.completed_at = Some(now);
        } else {
            next.phase = to;
        }
        Ok(next)
    }

    /// The failed version of this lock. `reason.phase` should be `self.phase()`.
    pub fn failed(&self, reason: FailureReason, now: DateTime<Utc>) -> Result<Self> {
        if self.is_terminal() {
            return Err(CheckoutError::InvalidTransition {
                from: self.state,
                to: CheckoutState::Failed,
            });
        }
        let mut next = self.bumped(now);
        next.state = CheckoutState::Failed;
        next.failure = Some(reason);
        next.failed_at = Some(now);
        Ok(next)
    }

    pub(crate) fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    fn bumped(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = now;
        next
    }
}
