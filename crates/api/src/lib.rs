//! HTTP API server for the checkout and stock reservation engine.
//!
//! Exposes inventory, reservation, checkout and reporting endpoints, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::{
    CheckoutOrchestrator, CheckoutStore, Collaborators, InMemoryCartValidator,
    InMemoryCheckoutStore, InMemoryOrderGateway, InMemoryPaymentGateway, PostgresCheckoutStore,
};
use common::{Clock, SystemClock};
use inventory::{
    InMemoryCatalog, InMemoryLedgerStore, InMemoryReservationStore, InventoryLedger, LedgerStore,
    PostgresLedgerStore, PostgresReservationStore, ReservationManager, ReservationStore,
};
use metrics_exporter_prometheus::PrometheusHandle;
use pricing::{
    InMemoryPricingResolver, InMemorySnapshotStore, PostgresSnapshotStore, PriceSnapshotService,
    SnapshotStore,
};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;

/// The orchestrator over whichever stores the server was started with.
pub type Orchestrator = CheckoutOrchestrator<
    Arc<dyn CheckoutStore>,
    Arc<dyn LedgerStore>,
    Arc<dyn ReservationStore>,
    Arc<dyn SnapshotStore>,
>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Warehouse priority and backorder flags for stocked variants.
    pub catalog: InMemoryCatalog,
    /// Unit prices served to the price snapshot service.
    pub prices: InMemoryPricingResolver,
    pub payments: InMemoryPaymentGateway,
    pub orders: InMemoryOrderGateway,
    /// `"memory"` or `"postgres"`.
    pub storage: &'static str,
}

impl AppState {
    pub fn reservations(&self) -> &ReservationManager<Arc<dyn LedgerStore>, Arc<dyn ReservationStore>> {
        self.orchestrator.reservations()
    }

    pub fn ledger(&self) -> &InventoryLedger<Arc<dyn LedgerStore>> {
        self.orchestrator.reservations().ledger()
    }
}

/// The four persistence backends behind the engine.
pub struct Stores {
    pub kind: &'static str,
    pub checkouts: Arc<dyn CheckoutStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub reservations: Arc<dyn ReservationStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            kind: "memory",
            checkouts: Arc::new(InMemoryCheckoutStore::new()),
            ledger: Arc::new(InMemoryLedgerStore::new()),
            reservations: Arc::new(InMemoryReservationStore::new()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            kind: "postgres",
            checkouts: Arc::new(PostgresCheckoutStore::new(pool.clone())),
            ledger: Arc::new(PostgresLedgerStore::new(pool.clone())),
            reservations: Arc::new(PostgresReservationStore::new(pool.clone())),
            snapshots: Arc::new(PostgresSnapshotStore::new(pool)),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(routes::metrics::MetricsState {
            handle: metrics_handle,
            app: state.clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/inventory/levels", post(routes::inventory::track))
        .route(
            "/inventory/{variant}/{warehouse}",
            get(routes::inventory::get),
        )
        .route(
            "/inventory/{variant}/{warehouse}/adjust",
            post(routes::inventory::adjust),
        )
        .route(
            "/inventory/{variant}/{warehouse}/transactions",
            get(routes::inventory::transactions),
        )
        .route("/prices/{variant}", post(routes::inventory::set_price))
        .route("/reservations", post(routes::reservations::create))
        .route("/reservations/{id}", get(routes::reservations::get))
        .route(
            "/reservations/{id}/release",
            post(routes::reservations::release),
        )
        .route(
            "/reservations/{id}/confirm",
            post(routes::reservations::confirm),
        )
        .route(
            "/reservations/{id}/extend",
            post(routes::reservations::extend),
        )
        .route("/checkouts", post(routes::checkouts::create))
        .route("/checkouts/{id}", get(routes::checkouts::get))
        .route("/checkouts/{id}/cancel", post(routes::checkouts::cancel))
        .route(
            "/reports/active-checkouts",
            get(routes::reports::active_checkouts),
        )
        .route(
            "/reports/expired-reservations",
            get(routes::reports::expired_reservations),
        )
        .route("/reports/stock-alerts", get(routes::reports::stock_alerts))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over `stores`, with in-memory collaborators.
pub fn create_state(stores: Stores, config: &Config, clock: Arc<dyn Clock>) -> Arc<AppState> {
    let catalog = InMemoryCatalog::new();
    let prices = InMemoryPricingResolver::new();
    let payments = InMemoryPaymentGateway::new();
    let orders = InMemoryOrderGateway::new();

    let ledger = InventoryLedger::new(stores.ledger, Arc::new(catalog.clone()), clock.clone());
    let reservations =
        ReservationManager::new(ledger, stores.reservations, config.reservation_config());
    let snapshots = PriceSnapshotService::new(stores.snapshots, Arc::new(prices.clone()), clock.clone());
    let orchestrator = CheckoutOrchestrator::new(
        stores.checkouts,
        reservations,
        snapshots,
        Collaborators {
            validator: Arc::new(InMemoryCartValidator::new()),
            payments: Arc::new(payments.clone()),
            orders: Arc::new(orders.clone()),
        },
        clock,
        config.checkout_config(),
    );

    Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        catalog,
        prices,
        payments,
        orders,
        storage: stores.kind,
    })
}

/// Creates in-memory application state with the system clock.
pub fn create_default_state(config: &Config) -> Arc<AppState> {
    create_state(Stores::in_memory(), config, Arc::new(SystemClock))
}
