//! Stock reservation manager.

use std::time::Duration;

use common::{Clock, Reference, ReservationId, VariantId, WarehouseId, ttl};

use crate::error::{InventoryError, Result};
use crate::ledger::InventoryLedger;
use crate::level::InventoryKey;
use crate::reservation::{
    LockToken, PartialPolicy, ReservationOutcome, ReservationStatus, StockReservation,
};
use crate::retry::RetryPolicy;
use crate::store::{LedgerStore, ReservationStore};
use crate::transaction::{Adjustment, TransactionKind};

/// Tunables for the reservation manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationConfig {
    /// Lifetime of the per-level lock token. Covers one read-modify-write.
    pub lock_token_ttl: Duration,
    /// Default lifetime of a reservation.
    pub reservation_ttl: Duration,
    /// Backoff used while another writer holds the lock token.
    pub retry: RetryPolicy,
    pub partial_policy: PartialPolicy,
    /// How many expired reservations the sweeper loads per query.
    pub sweep_batch: usize,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            lock_token_ttl: Duration::from_secs(5),
            reservation_ttl: Duration::from_secs(15 * 60),
            retry: RetryPolicy::default(),
            partial_policy: PartialPolicy::default(),
            sweep_batch: 100,
        }
    }
}

/// Parameters of one `reserve` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub key: InventoryKey,
    pub quantity: i64,
    pub owner: Reference,
    status: ReservationStatus,
    pub ttl: Option<Duration>,
    pub partial_policy: Option<PartialPolicy>,
}

impl ReserveRequest {
    /// A cart reservation with the manager's default TTL and partial policy.
    pub fn new(
        variant_id: impl Into<VariantId>,
        warehouse_id: impl Into<WarehouseId>,
        quantity: i64,
        owner: Reference,
    ) -> Self {
        Self {
            key: InventoryKey::new(variant_id, warehouse_id),
            quantity,
            owner,
            status: ReservationStatus::Cart,
            ttl: None,
            partial_policy: None,
        }
    }

    /// Marks the reservation as placed by an operator.
    pub fn manual(mut self) -> Self {
        self.status = ReservationStatus::Manual;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_partial_policy(mut self, policy: PartialPolicy) -> Self {
        self.partial_policy = Some(policy);
        self
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }
}

/// Result of spreading one variant's quantity across warehouses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub reservations: Vec<StockReservation>,
    pub requested: i64,
    /// Units no warehouse could hold. Zero under [`PartialPolicy::Reject`].
    pub shortfall: i64,
}

impl Allocation {
    pub fn reserved(&self) -> i64 {
        self.requested - self.shortfall
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall == 0
    }
}

/// Which reservations a release may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseScope {
    /// Caller release: confirmed reservations are refused.
    Unconfirmed,
    /// Sweeper: only reservations still expired on re-read.
    Expired,
    /// Compensation: confirmed reservations are returned too.
    Any,
}

/// Creates, confirms, extends and releases stock reservations.
///
/// Reserving is two-phase: take the level's lock token, then re-read the
/// level and increment its reserved counter through the ledger under that
/// token. Releases, sweeps and confirms flip the reservation with a
/// version-checked update. Stock goes back through
/// [`InventoryLedger::settle_reservation`], which reads what the reservation
/// holds from its tagged transactions, so a repeated or recovered release
/// never returns more than was taken.
pub struct ReservationManager<L: LedgerStore, R: ReservationStore> {
    ledger: InventoryLedger<L>,
    reservations: R,
    config: ReservationConfig,
}

impl<L, R> Clone for ReservationManager<L, R>
where
    L: LedgerStore + Clone,
    R: ReservationStore + Clone,
{
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            reservations: self.reservations.clone(),
            config: self.config,
        }
    }
}

impl<L: LedgerStore, R: ReservationStore> ReservationManager<L, R> {
    /// Creates a manager writing counters through `ledger`.
    pub fn new(ledger: InventoryLedger<L>, reservations: R, config: ReservationConfig) -> Self {
        Self {
            ledger,
            reservations,
            config,
        }
    }

    /// The ledger the manager reserves against.
    pub fn ledger(&self) -> &InventoryLedger<L> {
        &self.ledger
    }

    /// The reservation store.
    pub fn store(&self) -> &R {
        &self.reservations
    }

    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Holds `request.quantity` units of one level for `request.owner`.
    ///
    /// Returns `Partial` only under [`PartialPolicy::Accept`]. Fails with
    /// `InsufficientStock` when nothing (or, under `Reject`, not everything)
    /// can be held, and with `LockContention` once the retry budget is spent.
    #[tracing::instrument(
        skip(self, request),
        fields(key = %request.key, quantity = request.quantity, owner = %request.owner)
    )]
    pub async fn reserve(&self, request: ReserveRequest) -> Result<ReservationOutcome> {
        if request.quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(request.quantity));
        }
        // Fail fast on untracked levels before contending for a token.
        self.ledger.level(&request.key).await?;

        let token = self.acquire_token(&request.key).await?;
        let result = self.fill(&request, token).await;
        if let Err(e) = self.ledger.store().release_token(&request.key, token).await {
            tracing::warn!(error = %e, "failed to release lock token; it will expire");
        }

        match &result {
            Ok(outcome) => {
                metrics::counter!("reservations_created_total").increment(1);
                if outcome.is_partial() {
                    metrics::counter!("reservations_partial_total").increment(1);
                }
                tracing::info!(
                    reservation_id = %outcome.reservation().id(),
                    reserved = outcome.reservation().reserved_quantity(),
                    partial = outcome.is_partial(),
                    "stock reserved"
                );
            }
            Err(e) => tracing::warn!(error = %e, "reservation failed"),
        }
        result
    }

    async fn acquire_token(&self, key: &InventoryKey) -> Result<LockToken> {
        let token = LockToken::new();
        let retry = self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = self.ledger.clock().now();
            let expires_at = now + ttl(self.config.lock_token_ttl);
            if self
                .ledger
                .store()
                .acquire_token(key, token, now, expires_at)
                .await?
            {
                return Ok(token);
            }

            metrics::counter!("reservation_lock_contention_total").increment(1);
            if attempt >= retry.max_attempts {
                return Err(InventoryError::LockContention(key.clone()));
            }
            let delay = retry.delay_for(attempt);
            tracing::debug!(attempt, ?delay, "lock token busy, backing off");
            tokio::time::sleep(delay).await;
        }
    }

    /// Second phase of `reserve`; runs while `token` holds the level.
    async fn fill(&self, request: &ReserveRequest, token: LockToken) -> Result<ReservationOutcome> {
        let clock = self.ledger.clock();
        let now = clock.now();
        let lifetime = request.ttl.unwrap_or(self.config.reservation_ttl);
        let pending = StockReservation::pending(
            request.key.clone(),
            request.quantity,
            request.owner.clone(),
            request.status,
            token,
            now + ttl(self.config.lock_token_ttl),
            now + ttl(lifetime),
            now,
        );
        self.reservations.insert(pending.clone()).await?;

        let level = self.ledger.level(&request.key).await?;
        let allows_backorder = self
            .ledger
            .catalog()
            .allows_backorder(&request.key.variant_id)
            .await?;
        let reservable = level.reservable(allows_backorder);
        let grant = request.quantity.min(reservable);
        let policy = request.partial_policy.unwrap_or(self.config.partial_policy);

        if grant <= 0 || (grant < request.quantity && policy == PartialPolicy::Reject) {
            self.abandon(&pending).await;
            metrics::counter!("inventory_insufficient_stock_total").increment(1);
            return Err(InventoryError::InsufficientStock {
                variant_id: request.key.variant_id.clone(),
                warehouse_id: Some(request.key.warehouse_id.clone()),
                requested: request.quantity,
                available: reservable.max(0),
            });
        }

        let adjustment = Adjustment::reserved(request.key.clone(), grant, TransactionKind::Reserve)
            .by(request.owner.to_string())
            .referencing(request.owner.clone())
            .for_reservation(pending.id());
        if let Err(e) = self.ledger.adjust_reserved(adjustment, Some(token)).await {
            self.abandon(&pending).await;
            return Err(match e {
                InventoryError::TokenNotHeld(key) => InventoryError::LockContention(key),
                other => other,
            });
        }

        let filled = pending.filled(grant, clock.now());
        if let Err(e) = self.reservations.update(filled.clone(), pending.version()).await {
            // Someone released the pending row while we held stock for it.
            // Settling is a no-op if that release already returned the grant.
            if let Err(settle) = self
                .settle(&pending, TransactionKind::Release, "fill aborted")
                .await
            {
                tracing::error!(
                    reservation_id = %pending.id(),
                    grant,
                    error = %settle,
                    "failed to return reserved stock"
                );
            }
            return Err(e);
        }

        Ok(if filled.is_partial() {
            ReservationOutcome::Partial(filled)
        } else {
            ReservationOutcome::Full(filled)
        })
    }

    /// Marks a reservation that never held stock as released.
    async fn abandon(&self, pending: &StockReservation) {
        let released = pending.released(self.ledger.clock().now());
        if let Err(e) = self.reservations.update(released, pending.version()).await {
            tracing::warn!(reservation_id = %pending.id(), error = %e, "failed to abandon reservation");
        }
    }

    /// Returns whatever `reservation` still holds on its level.
    async fn settle(
        &self,
        reservation: &StockReservation,
        kind: TransactionKind,
        note: &str,
    ) -> Result<i64> {
        let release = Adjustment::reserved(reservation.key().clone(), 0, kind)
            .referencing(reservation.owner().clone())
            .for_reservation(reservation.id())
            .with_note(note);
        self.ledger.settle_reservation(release).await
    }

    /// Spreads `quantity` over the catalog's warehouses, most preferred first.
    #[tracing::instrument(skip(self, owner))]
    pub async fn allocate(
        &self,
        variant_id: &VariantId,
        quantity: i64,
        owner: Reference,
        reservation_ttl: Option<Duration>,
    ) -> Result<Allocation> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        let warehouses = self
            .ledger
            .catalog()
            .warehouse_priority(variant_id)
            .await?;
        if warehouses.is_empty() {
            return Err(InventoryError::NoWarehouse(variant_id.clone()));
        }

        let mut reservations = Vec::new();
        let mut remaining = quantity;
        for warehouse_id in warehouses {
            if remaining == 0 {
                break;
            }
            let mut request =
                ReserveRequest::new(variant_id.clone(), warehouse_id, remaining, owner.clone())
                    .with_partial_policy(PartialPolicy::Accept);
            request.ttl = reservation_ttl;

            match self.reserve(request).await {
                Ok(outcome) => {
                    let reservation = outcome.into_reservation();
                    remaining -= reservation.reserved_quantity();
                    reservations.push(reservation);
                }
                Err(InventoryError::InsufficientStock { .. } | InventoryError::LevelNotFound(_)) => {
                }
                Err(e) => {
                    self.release_all(&reservations).await;
                    return Err(e);
                }
            }
        }

        if remaining > 0 && self.config.partial_policy == PartialPolicy::Reject {
            self.release_all(&reservations).await;
            return Err(InventoryError::InsufficientStock {
                variant_id: variant_id.clone(),
                warehouse_id: None,
                requested: quantity,
                available: quantity - remaining,
            });
        }

        Ok(Allocation {
            reservations,
            requested: quantity,
            shortfall: remaining,
        })
    }

    async fn release_all(&self, reservations: &[StockReservation]) {
        for reservation in reservations {
            if let Err(e) = self.release(reservation.id()).await {
                tracing::warn!(reservation_id = %reservation.id(), error = %e, "rollback release failed");
            }
        }
    }

    /// Makes the hold permanent. The reserved counter does not change.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, id: ReservationId) -> Result<StockReservation> {
        loop {
            let current = self.load(id).await?;
            if current.status() == ReservationStatus::OrderConfirmed {
                return Ok(current);
            }
            let now = self.ledger.clock().now();
            if current.is_expired(now) && !current.is_released() {
                return Err(InventoryError::ReservationExpired(id));
            }
            if current.lock_token().is_some() {
                // Still being filled.
                return Err(InventoryError::InvalidReservationState {
                    id,
                    status: current.status(),
                    operation: "confirm",
                });
            }
            let next = current.confirmed(now)?;
            match self.reservations.update(next.clone(), current.version()).await {
                Ok(()) => {
                    tracing::info!(reserved = next.reserved_quantity(), "reservation confirmed");
                    return Ok(next);
                }
                Err(InventoryError::ConcurrencyConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns the held quantity to the level. Idempotent: a second call
    /// returns 0 and changes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, id: ReservationId) -> Result<i64> {
        Ok(self
            .release_as(id, TransactionKind::Release, ReleaseScope::Unconfirmed)
            .await?
            .unwrap_or(0))
    }

    /// Like [`ReservationManager::release`], but also returns the stock of
    /// an order-confirmed reservation. Used when a checkout that already
    /// confirmed its holds is rolled back.
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, id: ReservationId) -> Result<i64> {
        Ok(self
            .release_as(id, TransactionKind::Release, ReleaseScope::Any)
            .await?
            .unwrap_or(0))
    }

    /// Flips the reservation to released, then settles its stock.
    ///
    /// Returns `None` when there was nothing to do: already released and
    /// settled, or (for [`ReleaseScope::Expired`]) no longer sweepable on
    /// re-read. If settling fails the flip is undone, so a later release or
    /// sweep picks the reservation up again.
    async fn release_as(
        &self,
        id: ReservationId,
        kind: TransactionKind,
        scope: ReleaseScope,
    ) -> Result<Option<i64>> {
        let note = match scope {
            ReleaseScope::Unconfirmed => "released",
            ReleaseScope::Expired => "expired",
            ReleaseScope::Any => "revoked",
        };
        loop {
            let current = self.load(id).await?;
            if current.is_released() {
                // Stock left behind by a release whose settle never landed.
                let held = self.settle(&current, kind, note).await?;
                if held > 0 {
                    tracing::warn!(reservation_id = %id, held, "returned stock of a released reservation");
                    return Ok(Some(held));
                }
                return Ok(None);
            }
            if current.status() == ReservationStatus::OrderConfirmed {
                match scope {
                    ReleaseScope::Any => {}
                    ReleaseScope::Expired => return Ok(None),
                    ReleaseScope::Unconfirmed => {
                        return Err(InventoryError::InvalidReservationState {
                            id,
                            status: current.status(),
                            operation: "release",
                        });
                    }
                }
            }
            let now = self.ledger.clock().now();
            if scope == ReleaseScope::Expired && !current.is_sweepable(now) {
                return Ok(None);
            }

            let next = current.released(now);
            match self.reservations.update(next.clone(), current.version()).await {
                Ok(()) => {}
                Err(InventoryError::ConcurrencyConflict { .. }) => continue,
                Err(e) => return Err(e),
            }

            let held = match self.settle(&current, kind, note).await {
                Ok(held) => held,
                Err(e) => {
                    let reopened = current.reopened(&next, self.ledger.clock().now());
                    if let Err(undo) = self.reservations.update(reopened, next.version()).await {
                        tracing::error!(
                            reservation_id = %id,
                            error = %undo,
                            "failed to reopen reservation after a failed release"
                        );
                    }
                    return Err(e);
                }
            };
            metrics::counter!("reservations_released_total").increment(1);
            tracing::info!(reservation_id = %id, held, kind = %kind, "reservation released");
            return Ok(Some(held));
        }
    }

    /// Moves the expiry of a live reservation to `now + ttl`.
    #[tracing::instrument(skip(self))]
    pub async fn extend(&self, id: ReservationId, ttl_from_now: Duration) -> Result<StockReservation> {
        loop {
            let current = self.load(id).await?;
            let now = self.ledger.clock().now();
            let next = current.extended(now + ttl(ttl_from_now), now)?;
            match self.reservations.update(next.clone(), current.version()).await {
                Ok(()) => return Ok(next),
                Err(InventoryError::ConcurrencyConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Releases every expired, unreleased, unconfirmed reservation.
    ///
    /// Returns how many reservations were released by this call.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<usize> {
        let batch = self.config.sweep_batch.max(1);
        let mut released = 0;
        let mut quantity = 0;
        loop {
            let now = self.ledger.clock().now();
            let expired = self.reservations.expired(now, batch).await?;
            let loaded = expired.len();
            let mut progressed = 0;

            for reservation in expired {
                match self
                    .release_as(reservation.id(), TransactionKind::Expire, ReleaseScope::Expired)
                    .await
                {
                    Ok(Some(held)) => {
                        released += 1;
                        progressed += 1;
                        quantity += held;
                    }
                    Ok(None) => progressed += 1,
                    Err(e) => tracing::warn!(
                        reservation_id = %reservation.id(),
                        error = %e,
                        "failed to sweep reservation"
                    ),
                }
            }

            if loaded < batch || progressed == 0 {
                break;
            }
        }

        if released > 0 {
            metrics::counter!("reservations_swept_total").increment(released as u64);
            tracing::info!(released, quantity, "swept expired reservations");
        }
        Ok(released)
    }

    /// Releases every reservation held by `owner`; returns the total quantity
    /// returned. Keeps going past failures and reports the first one.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn release_owned(&self, owner: &Reference) -> Result<i64> {
        let mut total = 0;
        let mut first_error = None;
        for reservation in self.reservations.for_owner(owner).await? {
            if reservation.is_released()
                || reservation.status() == ReservationStatus::OrderConfirmed
            {
                continue;
            }
            match self.release(reservation.id()).await {
                Ok(quantity) => total += quantity,
                Err(e) => {
                    tracing::warn!(reservation_id = %reservation.id(), error = %e, "release failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Revokes every unreleased reservation held by `owner`, confirmed or
    /// not; returns the total quantity returned. Keeps going past failures
    /// and reports the first one.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn revoke_owned(&self, owner: &Reference) -> Result<i64> {
        let mut total = 0;
        let mut first_error = None;
        for reservation in self.reservations.for_owner(owner).await? {
            match self.revoke(reservation.id()).await {
                Ok(quantity) => total += quantity,
                Err(e) => {
                    tracing::warn!(reservation_id = %reservation.id(), error = %e, "revoke failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Confirms every unreleased reservation held by `owner`.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn confirm_owned(&self, owner: &Reference) -> Result<Vec<StockReservation>> {
        let mut confirmed = Vec::new();
        for reservation in self.reservations.for_owner(owner).await? {
            if reservation.is_released() {
                continue;
            }
            confirmed.push(self.confirm(reservation.id()).await?);
        }
        Ok(confirmed)
    }

    /// Every reservation held by `owner`, released ones included.
    pub async fn for_owner(&self, owner: &Reference) -> Result<Vec<StockReservation>> {
        self.reservations.for_owner(owner).await
    }

    /// Loads one reservation.
    pub async fn get(&self, id: ReservationId) -> Result<Option<StockReservation>> {
        self.reservations.get(id).await
    }

    /// Expired reservations still holding stock, for reporting.
    pub async fn expired_unreleased(&self, limit: usize) -> Result<Vec<StockReservation>> {
        let now = self.ledger.clock().now();
        self.reservations.expired(now, limit).await
    }

    async fn load(&self, id: ReservationId) -> Result<StockReservation> {
        self.reservations
            .get(id)
            .await?
            .ok_or(InventoryError::ReservationNotFound(id))
    }
}
