//! Structured failure reasons and the outcomes shown to shoppers.

use chrono::{DateTime, Utc};
use common::{OrderId, VariantId};
use serde::{Deserialize, Serialize};

use crate::state::CheckoutState;

/// Why a checkout failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientStock,
    /// Some stock was available but the partial policy refused it.
    PartialReservation,
    LockContention,
    CheckoutExpired,
    /// The shopper walked away.
    Abandoned,
    ValidationFailed,
    PricingUnavailable,
    PaymentDeclined,
    /// A collaborator failed or timed out.
    DownstreamFailure,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InsufficientStock => "insufficient_stock",
            FailureKind::PartialReservation => "partial_reservation",
            FailureKind::LockContention => "lock_contention",
            FailureKind::CheckoutExpired => "checkout_expired",
            FailureKind::Abandoned => "abandoned",
            FailureKind::ValidationFailed => "validation_failed",
            FailureKind::PricingUnavailable => "pricing_unavailable",
            FailureKind::PaymentDeclined => "payment_declined",
            FailureKind::DownstreamFailure => "downstream_failure",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The failure recorded on a checkout lock.
///
/// `detail` is for operators and is never shown to the shopper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    /// The step that was running when the failure happened.
    pub phase: CheckoutState,
    pub occurred_at: DateTime<Utc>,
    pub detail: String,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
}

impl FailureReason {
    pub fn new(
        kind: FailureKind,
        phase: CheckoutState,
        detail: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            phase,
            occurred_at,
            detail: detail.into(),
            variant_id: None,
        }
    }

    pub fn for_variant(mut self, variant_id: VariantId) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    /// What the shopper is told.
    pub fn user_outcome(&self) -> UserOutcome {
        match self.kind {
            FailureKind::InsufficientStock | FailureKind::PartialReservation => {
                UserOutcome::StockUnavailable {
                    variant_id: self.variant_id.clone(),
                }
            }
            FailureKind::PaymentDeclined => UserOutcome::PaymentDeclined,
            FailureKind::CheckoutExpired | FailureKind::Abandoned => UserOutcome::CheckoutExpired,
            FailureKind::ValidationFailed => UserOutcome::CartInvalid,
            FailureKind::LockContention
            | FailureKind::PricingUnavailable
            | FailureKind::DownstreamFailure
            | FailureKind::Internal => UserOutcome::TryAgainLater,
        }
    }
}

/// The closed set of results a shopper can see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UserOutcome {
    Completed { order_id: OrderId },
    StockUnavailable { variant_id: Option<VariantId> },
    PaymentDeclined,
    CheckoutExpired,
    CartInvalid,
    TryAgainLater,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_failures_are_not_surfaced() {
        let reason = FailureReason::new(
            FailureKind::Internal,
            CheckoutState::Capturing,
            "connection reset by peer",
            Utc::now(),
        );
        let json = serde_json::to_value(reason.user_outcome()).unwrap();
        assert_eq!(json, serde_json::json!({ "outcome": "try_again_later" }));
    }

    #[test]
    fn test_stock_failures_name_the_variant() {
        let reason = FailureReason::new(
            FailureKind::PartialReservation,
            CheckoutState::Reserving,
            "2 of 3 available",
            Utc::now(),
        )
        .for_variant(VariantId::new("SKU-1"));
        assert_eq!(
            reason.user_outcome(),
            UserOutcome::StockUnavailable {
                variant_id: Some(VariantId::new("SKU-1"))
            }
        );
    }

    #[test]
    fn test_abandonment_reads_as_expiry() {
        let reason = FailureReason::new(
            FailureKind::Abandoned,
            CheckoutState::Authorizing,
            "tab closed",
            Utc::now(),
        );
        assert_eq!(reason.user_outcome(), UserOutcome::CheckoutExpired);
    }
}
