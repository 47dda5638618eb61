//! Ledger adjustments and the append-only transaction log.

use chrono::{DateTime, Utc};
use common::{Reference, ReservationId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;
use crate::level::{InventoryKey, InventoryLevel};

/// Which counter of an [`InventoryLevel`] an adjustment touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    /// Physical stock in the warehouse.
    OnHand,
    /// Accounting hold against on-hand stock.
    Reserved,
    Damaged,
    Incoming,
    Preorder,
}

impl Counter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::OnHand => "on_hand",
            Counter::Reserved => "reserved",
            Counter::Damaged => "damaged",
            Counter::Incoming => "incoming",
            Counter::Preorder => "preorder",
        }
    }
}

impl std::fmt::Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Counter {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_hand" => Ok(Counter::OnHand),
            "reserved" => Ok(Counter::Reserved),
            "damaged" => Ok(Counter::Damaged),
            "incoming" => Ok(Counter::Incoming),
            "preorder" => Ok(Counter::Preorder),
            other => Err(InventoryError::InvalidRow(format!("unknown counter {other}"))),
        }
    }
}

/// Why stock changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Goods received into the warehouse.
    Receipt,
    /// Goods shipped out.
    Shipment,
    /// Goods returned by a customer.
    Return,
    /// Stock count correction.
    Adjustment,
    Damage,
    Incoming,
    Preorder,
    /// Hold placed by a reservation.
    Reserve,
    /// Hold returned on explicit release.
    Release,
    /// Hold returned by the expiry sweeper.
    Expire,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Receipt => "receipt",
            TransactionKind::Shipment => "shipment",
            TransactionKind::Return => "return",
            TransactionKind::Adjustment => "adjustment",
            TransactionKind::Damage => "damage",
            TransactionKind::Incoming => "incoming",
            TransactionKind::Preorder => "preorder",
            TransactionKind::Reserve => "reserve",
            TransactionKind::Release => "release",
            TransactionKind::Expire => "expire",
        }
    }

    /// The counters this kind of transaction may touch.
    pub fn allows(&self, counter: Counter) -> bool {
        match self {
            TransactionKind::Receipt
            | TransactionKind::Shipment
            | TransactionKind::Return => counter == Counter::OnHand,
            TransactionKind::Adjustment => true,
            TransactionKind::Damage => counter == Counter::Damaged,
            TransactionKind::Incoming => counter == Counter::Incoming,
            TransactionKind::Preorder => counter == Counter::Preorder,
            TransactionKind::Reserve | TransactionKind::Release | TransactionKind::Expire => {
                counter == Counter::Reserved
            }
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receipt" => Ok(TransactionKind::Receipt),
            "shipment" => Ok(TransactionKind::Shipment),
            "return" => Ok(TransactionKind::Return),
            "adjustment" => Ok(TransactionKind::Adjustment),
            "damage" => Ok(TransactionKind::Damage),
            "incoming" => Ok(TransactionKind::Incoming),
            "preorder" => Ok(TransactionKind::Preorder),
            "reserve" => Ok(TransactionKind::Reserve),
            "release" => Ok(TransactionKind::Release),
            "expire" => Ok(TransactionKind::Expire),
            other => Err(InventoryError::InvalidRow(format!(
                "unknown transaction kind {other}"
            ))),
        }
    }
}

/// The counters captured before and after a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub quantity: i64,
    pub reserved: i64,
    pub damaged: i64,
}

/// A requested change to one counter of one level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub key: InventoryKey,
    pub counter: Counter,
    pub delta: i64,
    pub kind: TransactionKind,
    pub actor: String,
    pub reference: Option<Reference>,
    pub reservation_id: Option<ReservationId>,
    pub note: Option<String>,
}

impl Adjustment {
    pub fn counter(key: InventoryKey, counter: Counter, delta: i64, kind: TransactionKind) -> Self {
        Self {
            key,
            counter,
            delta,
            kind,
            actor: "system".to_string(),
            reference: None,
            reservation_id: None,
            note: None,
        }
    }

    /// Physical stock movement.
    pub fn stock(key: InventoryKey, delta: i64, kind: TransactionKind) -> Self {
        Self::counter(key, Counter::OnHand, delta, kind)
    }

    /// Change to the reserved (held) counter.
    pub fn reserved(key: InventoryKey, delta: i64, kind: TransactionKind) -> Self {
        Self::counter(key, Counter::Reserved, delta, kind)
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn referencing(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn for_reservation(mut self, id: ReservationId) -> Self {
        self.reservation_id = Some(id);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// One row of the append-only audit log. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: TransactionId,
    pub key: InventoryKey,
    pub kind: TransactionKind,
    pub counter: Counter,
    pub delta: i64,
    pub before: Counters,
    pub after: Counters,
    pub actor: String,
    pub reference: Option<Reference>,
    pub reservation_id: Option<ReservationId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InventoryTransaction {
    /// Records `adjustment` moving `before` to `after`.
    pub fn record(
        adjustment: &Adjustment,
        before: &InventoryLevel,
        after: &InventoryLevel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            key: adjustment.key.clone(),
            kind: adjustment.kind,
            counter: adjustment.counter,
            delta: adjustment.delta,
            before: before.counters(),
            after: after.counters(),
            actor: adjustment.actor.clone(),
            reference: adjustment.reference.clone(),
            reservation_id: adjustment.reservation_id,
            note: adjustment.note.clone(),
            created_at: now,
        }
    }
}
