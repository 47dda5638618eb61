//! Checkout orchestrator: drives a cart from submission to a committed order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::{Cart, CartLine, CheckoutId, Clock, OrderId, Reference, ReservationId, VariantId};
use futures_util::future::join_all;
use inventory::{
    InventoryError, LedgerStore, PartialPolicy, ReservationManager, ReservationStatus,
    ReservationStore, ReserveRequest, StockReservation,
};
use pricing::{
    FrozenPrices, PriceRequest, PriceSnapshotService, PricingContext, PricingError, SnapshotStore,
};
use serde::Serialize;

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result, ServiceError};
use crate::failure::{FailureKind, FailureReason, UserOutcome};
use crate::lock::{
    ADJUSTED_QUANTITIES, AUTHORIZATION_ID, CAPTURE_ID, CheckoutLock, ORDER_ID, RESERVATION_IDS,
    SessionIdentity,
};
use crate::services::{CartValidator, OrderGateway, PaymentGateway};
use crate::state::CheckoutState;
use crate::store::CheckoutStore;

/// The external systems a checkout calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub validator: Arc<dyn CartValidator>,
    pub payments: Arc<dyn PaymentGateway>,
    pub orders: Arc<dyn OrderGateway>,
}

/// Where a `run` ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutOutcome {
    pub lock: CheckoutLock,
    pub outcome: UserOutcome,
}

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checkouts_expired: usize,
    pub reservations_released: usize,
}

/// A step that could not complete. Recorded on the lock, never returned.
#[derive(Debug)]
struct StepFailure {
    kind: FailureKind,
    detail: String,
    variant_id: Option<VariantId>,
}

impl StepFailure {
    fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            variant_id: None,
        }
    }

    fn for_variant(mut self, variant_id: VariantId) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    fn from_inventory(error: InventoryError) -> Self {
        match error {
            InventoryError::InsufficientStock {
                variant_id,
                requested,
                available,
                ..
            } => {
                let kind = if available > 0 && available < requested {
                    FailureKind::PartialReservation
                } else {
                    FailureKind::InsufficientStock
                };
                Self::new(kind, format!("{available} of {requested} available"))
                    .for_variant(variant_id)
            }
            InventoryError::NoWarehouse(variant_id) => {
                Self::new(FailureKind::InsufficientStock, "no warehouse stocks variant")
                    .for_variant(variant_id)
            }
            InventoryError::LevelNotFound(key) => {
                Self::new(FailureKind::InsufficientStock, format!("untracked level {key}"))
                    .for_variant(key.variant_id)
            }
            InventoryError::LockContention(key) => Self::new(
                FailureKind::LockContention,
                format!("lock contention on {key}"),
            )
            .for_variant(key.variant_id),
            other => Self::new(FailureKind::Internal, other.to_string()),
        }
    }

    fn from_service(error: ServiceError, rejected: FailureKind) -> Self {
        match error {
            ServiceError::Rejected(reason) => Self::new(rejected, reason),
            ServiceError::Unavailable(reason) => Self::new(FailureKind::DownstreamFailure, reason),
        }
    }
}

enum StepError {
    /// The checkout fails with a recorded reason.
    Failed(StepFailure),
    /// The runner stops without touching the lock (lost race, store outage).
    Abort(CheckoutError),
}

impl From<CheckoutError> for StepError {
    fn from(error: CheckoutError) -> Self {
        StepError::Abort(error)
    }
}

impl From<StepFailure> for StepError {
    fn from(failure: StepFailure) -> Self {
        StepError::Failed(failure)
    }
}

type StepResult = std::result::Result<CheckoutLock, StepError>;

/// Orchestrates checkout attempts.
///
/// Each attempt is a [`CheckoutLock`] advanced one state at a time:
/// validate, reserve stock, freeze prices, authorize, create the order,
/// capture, commit. Every advance is a store write conditioned on the
/// previous state and version, so two runners never both win a step. Any
/// failure marks the lock failed, then releases the checkout's reservations,
/// voids the authorization and cancels a created order.
pub struct CheckoutOrchestrator<C, L, R, P>
where
    C: CheckoutStore,
    L: LedgerStore,
    R: ReservationStore,
    P: SnapshotStore,
{
    store: C,
    reservations: ReservationManager<L, R>,
    prices: PriceSnapshotService<P>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    config: CheckoutConfig,
}

impl<C, L, R, P> CheckoutOrchestrator<C, L, R, P>
where
    C: CheckoutStore,
    L: LedgerStore,
    R: ReservationStore,
    P: SnapshotStore,
{
    /// Creates an orchestrator over its store, the stock and price services
    /// and the external collaborators.
    pub fn new(
        store: C,
        reservations: ReservationManager<L, R>,
        prices: PriceSnapshotService<P>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            reservations,
            prices,
            collaborators,
            clock,
            config,
        }
    }

    /// The checkout lock store.
    pub fn store(&self) -> &C {
        &self.store
    }

    /// The reservation manager holding stock for checkouts.
    pub fn reservations(&self) -> &ReservationManager<L, R> {
        &self.reservations
    }

    /// The service that freezes checkout prices.
    pub fn prices(&self) -> &PriceSnapshotService<P> {
        &self.prices
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Starts a checkout for `cart`, or resumes the one already running.
    ///
    /// An expired active checkout is failed (and its stock released) before
    /// a new one is created.
    #[tracing::instrument(skip(self, cart, session), fields(cart_id = %cart.id))]
    pub async fn begin(&self, cart: &Cart, session: SessionIdentity) -> Result<CheckoutLock> {
        let now = self.clock.now();
        if let Some(active) = self.store.active_for_cart(cart.id).await? {
            if !active.is_expired(now) {
                tracing::info!(checkout_id = %active.id(), state = %active.state(), "resuming checkout");
                return Ok(active);
            }
            match self.expire(active).await {
                Ok(_) | Err(CheckoutError::StateConflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let lock = CheckoutLock::new(
            cart.id,
            session,
            now,
            common::ttl(self.config.checkout_ttl),
        );
        match self.store.create(lock.clone()).await {
            Ok(()) => {
                metrics::counter!("checkout_started_total").increment(1);
                tracing::info!(checkout_id = %lock.id(), "checkout started");
                Ok(lock)
            }
            Err(CheckoutError::ActiveCheckoutExists { checkout_id, .. }) => {
                tracing::info!(%checkout_id, "lost checkout creation race; resuming winner");
                self.load(checkout_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// `begin` followed by `run`.
    pub async fn checkout(&self, cart: &Cart, session: SessionIdentity) -> Result<CheckoutOutcome> {
        let lock = self.begin(cart, session).await?;
        self.run(lock.id(), cart).await
    }

    /// Drives the checkout from its current state to a terminal one.
    ///
    /// Returns `StateConflict` if another runner advanced the checkout
    /// concurrently; that runner owns it from then on.
    #[tracing::instrument(skip(self, cart))]
    pub async fn run(&self, checkout_id: CheckoutId, cart: &Cart) -> Result<CheckoutOutcome> {
        let mut lock = self.load(checkout_id).await?;
        if lock.cart_id() != cart.id {
            return Err(CheckoutError::CartMismatch {
                checkout_id,
                expected: lock.cart_id(),
                actual: cart.id,
            });
        }

        loop {
            if lock.is_terminal() {
                return Ok(self.outcome(lock));
            }
            if lock.is_expired(self.clock.now()) {
                lock = self.expire(lock).await?;
                continue;
            }

            lock = match self.step(&lock, cart).await {
                Ok(next) => next,
                Err(StepError::Failed(failure)) => self.fail(&lock, failure).await?,
                Err(StepError::Abort(e)) => return Err(e),
            };
        }
    }

    /// Fails a running checkout on the shopper's behalf and releases its stock.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel(&self, checkout_id: CheckoutId, reason: &str) -> Result<CheckoutLock> {
        let lock = self.load(checkout_id).await?;
        if lock.is_terminal() {
            return Err(CheckoutError::InvalidTransition {
                from: lock.state(),
                to: CheckoutState::Failed,
            });
        }
        self.fail(&lock, StepFailure::new(FailureKind::Abandoned, reason))
            .await
    }

    /// Loads one checkout lock.
    pub async fn get(&self, checkout_id: CheckoutId) -> Result<Option<CheckoutLock>> {
        self.store.get(checkout_id).await
    }

    /// True while the checkout is neither finished nor expired.
    pub async fn can_resume(&self, checkout_id: CheckoutId) -> Result<bool> {
        let lock = self.load(checkout_id).await?;
        Ok(lock.can_resume(self.clock.now()))
    }

    /// Checkouts that are neither completed nor failed.
    pub async fn list_active(&self) -> Result<Vec<CheckoutLock>> {
        self.store.list_active().await
    }

    /// Fails every expired, unfinished checkout and releases its stock.
    #[tracing::instrument(skip(self))]
    pub async fn expire_stale(&self) -> Result<usize> {
        let batch = self.config.expire_batch.max(1);
        let mut expired = 0;
        loop {
            let stale = self.store.expired(self.clock.now(), batch).await?;
            let loaded = stale.len();
            let mut progressed = 0;
            for lock in stale {
                match self.expire(lock).await {
                    Ok(_) => {
                        expired += 1;
                        progressed += 1;
                    }
                    // Finished or expired by someone else in the meantime.
                    Err(CheckoutError::StateConflict { .. }) => progressed += 1,
                    Err(e) => tracing::warn!(error = %e, "failed to expire checkout"),
                }
            }
            if loaded < batch || progressed == 0 {
                break;
            }
        }
        if expired > 0 {
            tracing::info!(expired, "expired stale checkouts");
        }
        Ok(expired)
    }

    /// Deletes finished checkouts last touched more than `older_than` ago,
    /// together with their frozen prices.
    #[tracing::instrument(skip(self))]
    pub async fn prune(&self, older_than: ChronoDuration) -> Result<usize> {
        let cutoff = self.clock.now() - older_than;
        let batch = self.config.expire_batch.max(1);
        let mut pruned = 0;
        loop {
            let ids = self.store.terminal_before(cutoff, batch).await?;
            let loaded = ids.len();
            let before = pruned;
            for id in ids {
                self.prices.delete_for_checkout(id).await?;
                if self.store.delete_terminal(id).await? {
                    pruned += 1;
                }
            }
            if loaded < batch || pruned == before {
                break;
            }
        }
        if pruned > 0 {
            tracing::info!(pruned, "pruned finished checkouts");
        }
        Ok(pruned)
    }

    /// One background pass: expire stale checkouts, then sweep expired
    /// reservations.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let checkouts_expired = self.expire_stale().await?;
        let reservations_released = self.reservations.sweep_expired().await?;
        Ok(SweepReport {
            checkouts_expired,
            reservations_released,
        })
    }

    async fn load(&self, checkout_id: CheckoutId) -> Result<CheckoutLock> {
        self.store
            .get(checkout_id)
            .await?
            .ok_or(CheckoutError::NotFound(checkout_id))
    }

    fn outcome(&self, lock: CheckoutLock) -> CheckoutOutcome {
        let outcome = lock.user_outcome().unwrap_or(UserOutcome::TryAgainLater);
        CheckoutOutcome { lock, outcome }
    }

    async fn step(&self, lock: &CheckoutLock, cart: &Cart) -> StepResult {
        match lock.state() {
            CheckoutState::Pending => self.advance(lock, lock.clone()).await,
            CheckoutState::Validating => self.validate(lock, cart).await,
            CheckoutState::Reserving => self.reserve(lock, cart).await,
            CheckoutState::LockingPrices => self.lock_prices(lock, cart).await,
            CheckoutState::Authorizing => self.authorize(lock).await,
            CheckoutState::CreatingOrder => self.create_order(lock, cart).await,
            CheckoutState::Capturing => self.capture(lock).await,
            CheckoutState::Committing => self.commit(lock).await,
            CheckoutState::Completed | CheckoutState::Failed => Ok(lock.clone()),
        }
    }

    /// Moves `current` to its next state, carrying `updated`'s metadata.
    async fn advance(&self, current: &CheckoutLock, updated: CheckoutLock) -> StepResult {
        let to = current.state().next().ok_or(CheckoutError::InvalidTransition {
            from: current.state(),
            to: current.state(),
        })?;
        let next = updated.advanced(to, self.clock.now())?;
        self.store
            .transition(&next, current.state(), current.version())
            .await?;
        tracing::info!(checkout_id = %next.id(), from = %current.state(), to = %to, "checkout advanced");
        Ok(next)
    }

    /// Runs a collaborator call under the downstream timeout.
    async fn call<T, F>(&self, what: &str, call: F) -> std::result::Result<T, ServiceError>
    where
        F: Future<Output = std::result::Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.config.downstream_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Unavailable(format!(
                "{what} timed out after {:?}",
                self.config.downstream_timeout
            ))),
        }
    }

    async fn validate(&self, lock: &CheckoutLock, cart: &Cart) -> StepResult {
        if cart.is_empty() {
            return Err(StepFailure::new(FailureKind::ValidationFailed, "cart is empty").into());
        }
        self.call("cart validation", self.collaborators.validator.validate(cart))
            .await
            .map_err(|e| StepFailure::from_service(e, FailureKind::ValidationFailed))?;
        self.advance(lock, lock.clone()).await
    }

    /// Holds stock for every line, concurrently.
    ///
    /// The ids of the holds made here are recorded on the lock. A runner that
    /// loses the transition releases exactly the holds it made, so the
    /// winner's holds are never touched.
    async fn reserve(&self, lock: &CheckoutLock, cart: &Cart) -> StepResult {
        let owner = Reference::checkout(lock.id());
        // Reservations never outlive the checkout they belong to.
        let lifetime = lock
            .remaining(self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_secs(1));

        let results = join_all(
            cart.lines
                .iter()
                .map(|line| self.reserve_line(line, owner.clone(), lifetime)),
        )
        .await;

        let mut held_ids = Vec::new();
        let mut adjusted = serde_json::Map::new();
        let mut failure = None;
        for (line, result) in cart.lines.iter().zip(results) {
            let reservations = match result {
                Ok(reservations) => reservations,
                Err(e) => {
                    failure.get_or_insert(StepFailure::from_inventory(e));
                    continue;
                }
            };
            let held: i64 = reservations.iter().map(|r| r.reserved_quantity()).sum();
            held_ids.extend(reservations.iter().map(|r| r.id()));
            if held == 0 {
                failure.get_or_insert(
                    StepFailure::new(FailureKind::InsufficientStock, "nothing available")
                        .for_variant(line.variant_id.clone()),
                );
            } else if held < i64::from(line.quantity) {
                adjusted.insert(line.line_id.to_string(), serde_json::json!(held));
            }
        }
        if let Some(failure) = failure {
            self.release_holds(&held_ids).await;
            return Err(failure.into());
        }

        let mut updated = lock
            .clone()
            .with_metadata(RESERVATION_IDS, serde_json::json!(held_ids));
        if !adjusted.is_empty() {
            tracing::info!(checkout_id = %lock.id(), lines = adjusted.len(), "lines partially reserved");
            updated = updated.with_metadata(ADJUSTED_QUANTITIES, serde_json::Value::Object(adjusted));
        }
        match self.advance(lock, updated).await {
            Ok(next) => Ok(next),
            Err(e) => {
                self.release_holds(&held_ids).await;
                Err(e)
            }
        }
    }

    /// Reserves one line, from its pinned warehouse or spread over the
    /// catalog's warehouses.
    async fn reserve_line(
        &self,
        line: &CartLine,
        owner: Reference,
        lifetime: Duration,
    ) -> std::result::Result<Vec<StockReservation>, InventoryError> {
        let quantity = i64::from(line.quantity);
        match &line.warehouse_id {
            Some(warehouse_id) => {
                let request = ReserveRequest::new(
                    line.variant_id.clone(),
                    warehouse_id.clone(),
                    quantity,
                    owner,
                )
                .with_ttl(lifetime);
                match self.reservations.reserve(request).await {
                    Ok(outcome) => Ok(vec![outcome.into_reservation()]),
                    Err(InventoryError::InsufficientStock { available: 0, .. })
                        if self.reservations.config().partial_policy == PartialPolicy::Accept =>
                    {
                        Ok(Vec::new())
                    }
                    Err(e) => Err(e),
                }
            }
            None => self
                .reservations
                .allocate(&line.variant_id, quantity, owner, Some(lifetime))
                .await
                .map(|allocation| allocation.reservations),
        }
    }

    async fn release_holds(&self, ids: &[ReservationId]) {
        for &id in ids {
            if let Err(e) = self.reservations.release(id).await {
                tracing::warn!(reservation_id = %id, error = %e, "release of own hold failed");
            }
        }
    }

    /// Freezes prices at the quantities actually held. Re-entry reuses the
    /// prices already frozen for this checkout.
    async fn lock_prices(&self, lock: &CheckoutLock, cart: &Cart) -> StepResult {
        let existing = self
            .prices
            .for_checkout(lock.id())
            .await
            .map_err(|e| StepFailure::new(FailureKind::Internal, e.to_string()))?;
        if existing.is_none() {
            let adjusted = lock.adjusted_quantities();
            let requests: Vec<PriceRequest> = cart
                .lines
                .iter()
                .map(|line| {
                    let mut request = PriceRequest::from(line);
                    if let Some(&held) = adjusted.get(&line.line_id) {
                        request.quantity = held;
                    }
                    request
                })
                .collect();
            let context = PricingContext {
                coupon_code: cart.coupon_code.clone(),
                user_id: lock.session().user_id.clone(),
                comparison_currency: None,
            };

            let frozen = tokio::time::timeout(
                self.config.downstream_timeout,
                self.prices.freeze(lock.id(), &cart.currency, &requests, &context),
            )
            .await;
            match frozen {
                Ok(Ok(_)) => {}
                // A concurrent runner froze first; its prices stand.
                Ok(Err(PricingError::SnapshotExists { .. })) => {}
                Ok(Err(e)) => {
                    return Err(StepFailure::new(FailureKind::PricingUnavailable, e.to_string()).into());
                }
                Err(_) => {
                    return Err(StepFailure::new(
                        FailureKind::PricingUnavailable,
                        "price resolution timed out",
                    )
                    .into());
                }
            }
        }
        self.advance(lock, lock.clone()).await
    }

    async fn frozen_prices(&self, lock: &CheckoutLock) -> std::result::Result<FrozenPrices, StepError> {
        match self.prices.for_checkout(lock.id()).await {
            Ok(Some(frozen)) => Ok(frozen),
            Ok(None) => Err(StepFailure::new(FailureKind::Internal, "no frozen prices").into()),
            Err(e) => Err(StepFailure::new(FailureKind::Internal, e.to_string()).into()),
        }
    }

    async fn authorize(&self, lock: &CheckoutLock) -> StepResult {
        if lock.authorization_id().is_some() {
            return self.advance(lock, lock.clone()).await;
        }
        let frozen = self.frozen_prices(lock).await?;
        let authorization = self
            .call(
                "payment authorization",
                self.collaborators.payments.authorize(lock.id(), &frozen.cart),
            )
            .await
            .map_err(|e| StepFailure::from_service(e, FailureKind::PaymentDeclined))?;

        let updated = lock.clone().with_metadata(
            AUTHORIZATION_ID,
            serde_json::json!(authorization.authorization_id),
        );
        match self.advance(lock, updated).await {
            Ok(next) => Ok(next),
            Err(e) => {
                self.void(&authorization.authorization_id).await;
                Err(e)
            }
        }
    }

    async fn create_order(&self, lock: &CheckoutLock, cart: &Cart) -> StepResult {
        if lock.order_id().is_some() {
            return self.advance(lock, lock.clone()).await;
        }
        let frozen = self.frozen_prices(lock).await?;
        let order_id = self
            .call(
                "order creation",
                self.collaborators.orders.create_order(lock.id(), cart, &frozen),
            )
            .await
            .map_err(|e| StepFailure::from_service(e, FailureKind::DownstreamFailure))?;

        let updated = lock
            .clone()
            .with_metadata(ORDER_ID, serde_json::json!(order_id.as_str()));
        match self.advance(lock, updated).await {
            Ok(next) => Ok(next),
            Err(e) => {
                self.cancel_order(&order_id).await;
                Err(e)
            }
        }
    }

    async fn capture(&self, lock: &CheckoutLock) -> StepResult {
        if lock.capture_id().is_some() {
            return self.advance(lock, lock.clone()).await;
        }
        let Some(authorization_id) = lock.authorization_id() else {
            return Err(StepFailure::new(FailureKind::Internal, "no authorization to capture").into());
        };
        let capture = self
            .call(
                "payment capture",
                self.collaborators.payments.capture(authorization_id),
            )
            .await
            .map_err(|e| StepFailure::from_service(e, FailureKind::PaymentDeclined))?;

        let updated = lock
            .clone()
            .with_metadata(CAPTURE_ID, serde_json::json!(capture.capture_id));
        self.advance(lock, updated).await
    }

    /// Confirms the recorded holds, releases any strays left by lost
    /// runners, then completes. Never runs before capture.
    ///
    /// Every hold is checked before the first is confirmed, so a hold lost
    /// in the meantime fails the checkout without making the others
    /// permanent.
    async fn commit(&self, lock: &CheckoutLock) -> StepResult {
        let recorded = lock.reservation_ids();
        let now = self.clock.now();
        for &id in &recorded {
            let hold = self
                .reservations
                .get(id)
                .await
                .map_err(StepFailure::from_inventory)?
                .ok_or_else(|| StepFailure::new(FailureKind::Internal, format!("hold {id} not found")))?;
            let held = hold.status() == ReservationStatus::OrderConfirmed
                || (hold.is_live(now) && hold.lock_token().is_none());
            if !held {
                return Err(StepFailure::new(
                    FailureKind::InsufficientStock,
                    format!("hold {id} was released or expired before commit"),
                )
                .for_variant(hold.key().variant_id.clone())
                .into());
            }
        }
        for &id in &recorded {
            self.reservations
                .confirm(id)
                .await
                .map_err(StepFailure::from_inventory)?;
        }

        let owner = Reference::checkout(lock.id());
        let strays: Vec<ReservationId> = self
            .reservations
            .for_owner(&owner)
            .await
            .map_err(StepFailure::from_inventory)?
            .into_iter()
            .filter(|r| !r.is_released() && !r.status().is_terminal() && !recorded.contains(&r.id()))
            .map(|r| r.id())
            .collect();
        if !strays.is_empty() {
            tracing::info!(checkout_id = %lock.id(), strays = strays.len(), "releasing stray holds");
            self.release_holds(&strays).await;
        }

        let next = self.advance(lock, lock.clone()).await?;
        metrics::counter!("checkout_completed_total").increment(1);
        let duration = (self.clock.now() - next.locked_at())
            .to_std()
            .unwrap_or(Duration::ZERO);
        metrics::histogram!("checkout_duration_seconds").record(duration.as_secs_f64());
        tracing::info!(
            checkout_id = %next.id(),
            order_id = next.order_id().map(|o| o.to_string()).unwrap_or_default(),
            duration_secs = duration.as_secs_f64(),
            "checkout completed"
        );
        Ok(next)
    }

    async fn expire(&self, lock: CheckoutLock) -> Result<CheckoutLock> {
        self.fail(
            &lock,
            StepFailure::new(FailureKind::CheckoutExpired, "checkout expired"),
        )
        .await
    }

    /// Records the failure, then compensates: release stock, void the
    /// authorization, cancel the order.
    ///
    /// The failed state is written first so a runner that lost the race
    /// never compensates for the winner.
    async fn fail(&self, lock: &CheckoutLock, failure: StepFailure) -> Result<CheckoutLock> {
        let now = self.clock.now();
        let mut reason = FailureReason::new(failure.kind, lock.phase(), failure.detail, now);
        if let Some(variant_id) = failure.variant_id {
            reason = reason.for_variant(variant_id);
        }
        let failed = lock.failed(reason, now)?;
        self.store
            .transition(&failed, lock.state(), lock.version())
            .await?;

        metrics::counter!("checkout_failed_total", "phase" => lock.phase().as_str()).increment(1);
        tracing::warn!(
            checkout_id = %lock.id(),
            phase = %lock.phase(),
            kind = %failure.kind,
            "checkout failed"
        );

        self.compensate(&failed).await;
        Ok(failed)
    }

    /// Returns every hold of the checkout, including ones a partial commit
    /// already confirmed, then voids and cancels.
    async fn compensate(&self, lock: &CheckoutLock) {
        let owner = Reference::checkout(lock.id());
        match self.reservations.revoke_owned(&owner).await {
            Ok(released) => tracing::info!(checkout_id = %lock.id(), released, "reservations released"),
            // A failed release reopens its hold; unconfirmed holds are swept
            // once expired, confirmed ones need an operator.
            Err(e) => tracing::error!(checkout_id = %lock.id(), error = %e, "release during compensation failed"),
        }
        if let Some(authorization_id) = lock.authorization_id() {
            self.void(authorization_id).await;
        }
        if let Some(order_id) = lock.order_id() {
            self.cancel_order(&order_id).await;
        }
    }

    async fn void(&self, authorization_id: &str) {
        if let Err(e) = self
            .call(
                "authorization void",
                self.collaborators.payments.void(authorization_id),
            )
            .await
        {
            tracing::warn!(authorization_id, error = %e, "authorization void failed");
        }
    }

    async fn cancel_order(&self, order_id: &OrderId) {
        if let Err(e) = self
            .call(
                "order cancellation",
                self.collaborators.orders.cancel_order(order_id),
            )
            .await
        {
            tracing::warn!(%order_id, error = %e, "order cancellation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use inventory::InventoryKey;

    use super::*;

    fn shortage(requested: i64, available: i64) -> InventoryError {
        InventoryError::InsufficientStock {
            variant_id: VariantId::new("SKU-1"),
            warehouse_id: None,
            requested,
            available,
        }
    }

    #[test]
    fn test_partial_fill_is_classified_apart_from_none() {
        let partial = StepFailure::from_inventory(shortage(5, 2));
        assert_eq!(partial.kind, FailureKind::PartialReservation);
        assert_eq!(partial.variant_id, Some(VariantId::new("SKU-1")));

        let none = StepFailure::from_inventory(shortage(5, 0));
        assert_eq!(none.kind, FailureKind::InsufficientStock);
    }

    #[test]
    fn test_contention_is_not_a_stock_failure() {
        let failure =
            StepFailure::from_inventory(InventoryError::LockContention(InventoryKey::new("SKU-1", "WH-1")));
        assert_eq!(failure.kind, FailureKind::LockContention);
        assert_eq!(failure.variant_id, Some(VariantId::new("SKU-1")));
    }

    #[test]
    fn test_service_errors_split_on_rejection() {
        let declined = StepFailure::from_service(
            ServiceError::Rejected("card declined".into()),
            FailureKind::PaymentDeclined,
        );
        assert_eq!(declined.kind, FailureKind::PaymentDeclined);

        let down = StepFailure::from_service(
            ServiceError::Unavailable("timeout".into()),
            FailureKind::PaymentDeclined,
        );
        assert_eq!(down.kind, FailureKind::DownstreamFailure);
    }
}
