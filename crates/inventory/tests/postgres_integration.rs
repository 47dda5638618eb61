//! PostgreSQL integration tests for the inventory stores.
//!
//! These need Docker and are ignored by default. Run with:
//!
//! ```bash
//! cargo test -p inventory --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use common::{CheckoutId, Clock, ManualClock, Reference, VariantId, WarehouseId};
use inventory::{
    InMemoryCatalog, InventoryError, InventoryKey, InventoryLedger, LedgerStore, LevelSettings,
    LockToken, PostgresLedgerStore, PostgresReservationStore, ReservationConfig,
    ReservationManager, ReserveRequest, TransactionKind,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{host}:{port}/postgres");

            let pool = PgPool::connect(&connection_string).await.unwrap();
            inventory::run_migrations(&pool).await.unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn fresh_pool() -> PgPool {
    let info = container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();
    sqlx::query(
        "TRUNCATE TABLE inventory_transactions, stock_reservations, inventory_levels, \
         checkout_locks, price_snapshots",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool
}

type Manager = ReservationManager<PostgresLedgerStore, PostgresReservationStore>;

async fn manager(clock: ManualClock) -> Manager {
    let pool = fresh_pool().await;
    let ledger = InventoryLedger::new(
        PostgresLedgerStore::new(pool.clone()),
        Arc::new(InMemoryCatalog::new()),
        Arc::new(clock),
    );
    ReservationManager::new(
        ledger,
        PostgresReservationStore::new(pool),
        ReservationConfig::default(),
    )
}

async fn stock(manager: &Manager, quantity: i64) {
    manager
        .ledger()
        .track(InventoryKey::new("SKU", "WH"), LevelSettings::default())
        .await
        .unwrap();
    manager
        .ledger()
        .adjust(
            &VariantId::new("SKU"),
            &WarehouseId::new("WH"),
            quantity,
            TransactionKind::Receipt,
            Some(Reference::manual("receiving")),
        )
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_level_round_trips_with_transactions() {
    let manager = manager(ManualClock::starting_now()).await;
    stock(&manager, 7).await;

    let snapshot = manager
        .ledger()
        .get(&VariantId::new("SKU"), &WarehouseId::new("WH"))
        .await
        .unwrap();
    assert_eq!(snapshot.level.quantity(), 7);
    assert_eq!(snapshot.level.version(), 2);

    let transactions = manager
        .ledger()
        .transactions(&VariantId::new("SKU"), &WarehouseId::new("WH"))
        .await
        .unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].reference, Some(Reference::manual("receiving")));
    assert_eq!(transactions[0].after.quantity, 7);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_tracking_twice_is_rejected() {
    let manager = manager(ManualClock::starting_now()).await;
    stock(&manager, 1).await;
    let err = manager
        .ledger()
        .track(InventoryKey::new("SKU", "WH"), LevelSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::LevelExists(_)));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_token_is_exclusive_in_the_database() {
    let clock = ManualClock::starting_now();
    let manager = manager(clock.clone()).await;
    stock(&manager, 1).await;
    let key = InventoryKey::new("SKU", "WH");
    let store = manager.ledger().store();
    let now = clock.now();

    assert!(
        store
            .acquire_token(&key, LockToken::new(), now, now + ChronoDuration::seconds(5))
            .await
            .unwrap()
    );
    assert!(
        !store
            .acquire_token(&key, LockToken::new(), now, now + ChronoDuration::seconds(5))
            .await
            .unwrap()
    );
    let later = now + ChronoDuration::seconds(6);
    assert!(
        store
            .acquire_token(&key, LockToken::new(), later, later + ChronoDuration::seconds(5))
            .await
            .unwrap()
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_reserve_release_and_sweep_against_postgres() {
    let clock = ManualClock::starting_now();
    let manager = manager(clock.clone()).await;
    stock(&manager, 5).await;
    let owner = Reference::checkout(CheckoutId::new());

    let first = manager
        .reserve(ReserveRequest::new("SKU", "WH", 3, owner.clone()))
        .await
        .unwrap()
        .into_reservation();
    let err = manager
        .reserve(ReserveRequest::new("SKU", "WH", 3, owner.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { .. }));

    assert_eq!(manager.release(first.id()).await.unwrap(), 3);
    assert_eq!(manager.release(first.id()).await.unwrap(), 0);

    let second = manager
        .reserve(ReserveRequest::new("SKU", "WH", 2, owner.clone()))
        .await
        .unwrap()
        .into_reservation();
    clock.advance(ChronoDuration::minutes(25));
    assert_eq!(manager.sweep_expired().await.unwrap(), 1);

    let swept = manager.get(second.id()).await.unwrap().unwrap();
    assert!(swept.is_released());
    let level = manager
        .ledger()
        .get(&VariantId::new("SKU"), &WarehouseId::new("WH"))
        .await
        .unwrap();
    assert_eq!(level.level.reserved_quantity(), 0);
    assert_eq!(manager.for_owner(&owner).await.unwrap().len(), 3);
}
