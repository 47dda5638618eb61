//! Stock reservations and lock tokens.

use chrono::{DateTime, Utc};
use common::{Reference, ReservationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{InventoryError, Result};
use crate::level::InventoryKey;

/// Short-lived single-writer permission on one inventory level.
///
/// Serializes the read-modify-write of the reserved counter. Distinct from,
/// and much shorter than, a reservation's own expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(Uuid);

impl LockToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a reservation.
///
/// ```text
/// Cart ───┬──► OrderConfirmed
/// Manual ─┴──► Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Held for a checkout in progress.
    Cart,
    /// Placed by an operator.
    Manual,
    /// Permanent until fulfillment or order cancellation (terminal).
    OrderConfirmed,
    /// Stock returned to the pool (terminal).
    Released,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Cart => "cart",
            ReservationStatus::Manual => "manual",
            ReservationStatus::OrderConfirmed => "order_confirmed",
            ReservationStatus::Released => "released",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::OrderConfirmed | ReservationStatus::Released
        )
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = InventoryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cart" => Ok(ReservationStatus::Cart),
            "manual" => Ok(ReservationStatus::Manual),
            "order_confirmed" => Ok(ReservationStatus::OrderConfirmed),
            "released" => Ok(ReservationStatus::Released),
            other => Err(InventoryError::InvalidRow(format!(
                "unknown reservation status {other}"
            ))),
        }
    }
}

/// What to do when only part of a request can be held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialPolicy {
    /// Treat a partial fill as `InsufficientStock`.
    #[default]
    Reject,
    /// Hold what is available and flag the reservation as partial.
    Accept,
}

impl std::str::FromStr for PartialPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(PartialPolicy::Reject),
            "accept" => Ok(PartialPolicy::Accept),
            other => Err(format!("unknown partial policy {other}")),
        }
    }
}

/// A hold against one inventory level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    pub(crate) id: ReservationId,
    pub(crate) key: InventoryKey,
    pub(crate) requested_quantity: i64,
    pub(crate) reserved_quantity: i64,
    pub(crate) is_partial: bool,
    pub(crate) status: ReservationStatus,
    pub(crate) owner: Reference,
    pub(crate) lock_token: Option<LockToken>,
    pub(crate) lock_expires_at: Option<DateTime<Utc>>,
    pub(crate) expires_at: Option<DateTime<Utc>>,
    pub(crate) is_released: bool,
    pub(crate) released_at: Option<DateTime<Utc>>,
    pub(crate) version: i64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl StockReservation {
    /// A reservation that is about to be filled by the holder of `token`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn pending(
        key: InventoryKey,
        requested: i64,
        owner: Reference,
        status: ReservationStatus,
        token: LockToken,
        lock_expires_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            key,
            requested_quantity: requested,
            reserved_quantity: 0,
            is_partial: false,
            status,
            owner,
            lock_token: Some(token),
            lock_expires_at: Some(lock_expires_at),
            expires_at: Some(expires_at),
            is_released: false,
            released_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn key(&self) -> &InventoryKey {
        &self.key
    }

    pub fn requested_quantity(&self) -> i64 {
        self.requested_quantity
    }

    pub fn reserved_quantity(&self) -> i64 {
        self.reserved_quantity
    }

    pub fn is_partial(&self) -> bool {
        self.is_partial
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn owner(&self) -> &Reference {
        &self.owner
    }

    pub fn lock_token(&self) -> Option<LockToken> {
        self.lock_token
    }

    pub fn lock_expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock_expires_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_released(&self) -> bool {
        self.is_released
    }

    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        self.released_at
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Expired, still holding stock and not confirmed: the sweeper's target.
    pub fn is_sweepable(&self, now: DateTime<Utc>) -> bool {
        !self.is_released && !self.status.is_terminal() && self.is_expired(now)
    }

    /// True while the reservation still holds (or may still hold) stock.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_released && !self.status.is_terminal() && !self.is_expired(now)
    }

    fn bumped(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = now;
        next
    }

    /// Records the granted quantity and drops the lock token.
    pub(crate) fn filled(&self, granted: i64, now: DateTime<Utc>) -> Self {
        let mut next = self.bumped(now);
        next.reserved_quantity = granted.min(self.requested_quantity);
        next.is_partial = next.reserved_quantity < self.requested_quantity;
        next.lock_token = None;
        next.lock_expires_at = None;
        next
    }

    /// Terminal release; the held quantity stays recorded for the audit trail.
    pub(crate) fn released(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.bumped(now);
        next.status = ReservationStatus::Released;
        next.is_released = true;
        next.released_at = Some(now);
        next.lock_token = None;
        next.lock_expires_at = None;
        next
    }

    /// Undoes `released`, the row this reservation was flipped to, keeping
    /// the version moving forward.
    pub(crate) fn reopened(&self, released: &StockReservation, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version = released.version + 1;
        next.updated_at = now;
        next
    }

    pub(crate) fn confirmed(&self, now: DateTime<Utc>) -> Result<Self> {
        if self.is_released {
            return Err(InventoryError::InvalidReservationState {
                id: self.id,
                status: self.status,
                operation: "confirm",
            });
        }
        let mut next = self.bumped(now);
        next.status = ReservationStatus::OrderConfirmed;
        next.expires_at = None;
        Ok(next)
    }

    pub(crate) fn extended(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self> {
        if self.is_released || self.status.is_terminal() {
            return Err(InventoryError::InvalidReservationState {
                id: self.id,
                status: self.status,
                operation: "extend",
            });
        }
        if self.is_expired(now) {
            return Err(InventoryError::ReservationExpired(self.id));
        }
        let mut next = self.bumped(now);
        next.expires_at = Some(expires_at);
        Ok(next)
    }
}

/// Result of a successful `reserve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    Full(StockReservation),
    /// Less than requested was held; only returned under [`PartialPolicy::Accept`].
    Partial(StockReservation),
}

impl ReservationOutcome {
    pub fn reservation(&self) -> &StockReservation {
        match self {
            ReservationOutcome::Full(r) | ReservationOutcome::Partial(r) => r,
        }
    }

    pub fn into_reservation(self) -> StockReservation {
        match self {
            ReservationOutcome::Full(r) | ReservationOutcome::Partial(r) => r,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, ReservationOutcome::Partial(_))
    }
}
