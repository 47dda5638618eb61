//! Concurrency and expiry scenarios for the reservation manager.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::{CheckoutId, Clock, ManualClock, Reference, SystemClock, VariantId, WarehouseId};
use futures_util::future::join_all;
use inventory::{
    Adjustment, Counter, InMemoryCatalog, InMemoryLedgerStore, InMemoryReservationStore,
    InventoryError, InventoryKey, InventoryLedger, LevelSettings, PartialPolicy,
    ReservationConfig, ReservationManager, ReservationOutcome, ReserveRequest, RetryPolicy,
    TransactionKind,
};

type Manager = ReservationManager<InMemoryLedgerStore, InMemoryReservationStore>;

fn manager_with(clock: Arc<dyn Clock>, policy: PartialPolicy) -> Manager {
    let ledger = InventoryLedger::new(
        InMemoryLedgerStore::new(),
        Arc::new(InMemoryCatalog::new()),
        clock,
    );
    let config = ReservationConfig {
        partial_policy: policy,
        retry: RetryPolicy {
            max_attempts: 200,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        },
        ..ReservationConfig::default()
    };
    ReservationManager::new(ledger, InMemoryReservationStore::new(), config)
}

async fn stock(manager: &Manager, quantity: i64, damaged: i64) {
    let ledger = manager.ledger();
    ledger
        .track(InventoryKey::new("SKU", "WH"), LevelSettings::default())
        .await
        .unwrap();
    ledger
        .adjust(
            &VariantId::new("SKU"),
            &WarehouseId::new("WH"),
            quantity,
            TransactionKind::Receipt,
            None,
        )
        .await
        .unwrap();
    if damaged > 0 {
        ledger
            .adjust_counter(Adjustment::counter(
                InventoryKey::new("SKU", "WH"),
                Counter::Damaged,
                damaged,
                TransactionKind::Damage,
            ))
            .await
            .unwrap();
    }
}

async fn reserved(manager: &Manager) -> i64 {
    manager
        .ledger()
        .get(&VariantId::new("SKU"), &WarehouseId::new("WH"))
        .await
        .unwrap()
        .level
        .reserved_quantity()
}

fn checkout_owner() -> Reference {
    Reference::checkout(CheckoutId::new())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_reservations_never_oversell() {
    let manager = manager_with(Arc::new(SystemClock), PartialPolicy::Reject);
    stock(&manager, 25, 3).await;

    let attempts = (0..40).map(|i| {
        let manager = manager.clone();
        tokio::spawn(async move {
            let quantity = 1 + (i % 3);
            manager
                .reserve(ReserveRequest::new("SKU", "WH", quantity, checkout_owner()))
                .await
        })
    });
    let results = join_all(attempts).await;

    let mut granted = 0;
    for result in results {
        match result.unwrap() {
            Ok(outcome) => granted += outcome.reservation().reserved_quantity(),
            Err(InventoryError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert!(granted <= 25 - 3, "granted {granted} of 22 sellable units");
    assert_eq!(reserved(&manager).await, granted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_partial_fills_never_oversell() {
    let manager = manager_with(Arc::new(SystemClock), PartialPolicy::Accept);
    stock(&manager, 17, 0).await;

    let attempts = (0..30).map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .reserve(ReserveRequest::new("SKU", "WH", 2, checkout_owner()))
                .await
        })
    });
    let results = join_all(attempts).await;

    let granted: i64 = results
        .into_iter()
        .filter_map(|r| r.unwrap().ok())
        .map(|o| o.reservation().reserved_quantity())
        .sum();

    // 30 x 2 requested against 17 units: everything is handed out, nothing more.
    assert_eq!(granted, 17);
    assert_eq!(reserved(&manager).await, 17);
}

async fn two_racing_reserves_of_three(
    policy: PartialPolicy,
) -> (Manager, Vec<inventory::Result<ReservationOutcome>>) {
    let manager = manager_with(Arc::new(SystemClock), policy);
    stock(&manager, 5, 0).await;

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .reserve(ReserveRequest::new("SKU", "WH", 3, checkout_owner()))
                .await
        })
    };
    let second = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .reserve(ReserveRequest::new("SKU", "WH", 3, checkout_owner()))
                .await
        })
    };
    let results = vec![first.await.unwrap(), second.await.unwrap()];
    (manager, results)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_reserves_under_reject_policy() {
    let (manager, results) = two_racing_reserves_of_three(PartialPolicy::Reject).await;

    let full = results
        .iter()
        .filter(|r| {
            matches!(r, Ok(o) if !o.is_partial() && o.reservation().reserved_quantity() == 3)
        })
        .count();
    let insufficient = results
        .iter()
        .filter(|r| matches!(r, Err(InventoryError::InsufficientStock { .. })))
        .count();

    assert_eq!(full, 1);
    assert_eq!(insufficient, 1);
    assert_eq!(reserved(&manager).await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_reserves_under_accept_policy() {
    let (manager, results) = two_racing_reserves_of_three(PartialPolicy::Accept).await;

    let mut held: Vec<i64> = results
        .iter()
        .map(|r| r.as_ref().unwrap().reservation().reserved_quantity())
        .collect();
    held.sort_unstable();

    assert_eq!(held, vec![2, 3]);
    let partial = results
        .iter()
        .filter(|r| r.as_ref().unwrap().is_partial())
        .count();
    assert_eq!(partial, 1);
    assert_eq!(reserved(&manager).await, 5);
}

#[tokio::test]
async fn test_reservation_expired_ten_minutes_ago_is_swept() {
    let clock = ManualClock::starting_now();
    let manager = manager_with(Arc::new(clock.clone()), PartialPolicy::Reject);
    stock(&manager, 10, 0).await;

    let other = manager
        .reserve(
            ReserveRequest::new("SKU", "WH", 2, checkout_owner())
                .with_ttl(Duration::from_secs(3600)),
        )
        .await
        .unwrap()
        .into_reservation();
    let stale = manager
        .reserve(ReserveRequest::new("SKU", "WH", 4, checkout_owner()))
        .await
        .unwrap()
        .into_reservation();
    assert_eq!(reserved(&manager).await, 6);

    // Default TTL is 15 minutes; move to 10 minutes past expiry.
    clock.advance(ChronoDuration::minutes(25));
    let expires_at = stale.expires_at().unwrap();
    assert_eq!(clock.now() - expires_at, ChronoDuration::minutes(10));

    let swept = manager.sweep_expired().await.unwrap();

    assert_eq!(swept, 1);
    assert_eq!(reserved(&manager).await, 2);
    let stale = manager.get(stale.id()).await.unwrap().unwrap();
    assert!(stale.is_released());
    assert_eq!(stale.released_at(), Some(clock.now()));
    assert!(!manager.get(other.id()).await.unwrap().unwrap().is_released());

    let expiries = manager
        .ledger()
        .transactions(&VariantId::new("SKU"), &WarehouseId::new("WH"))
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Expire)
        .collect::<Vec<_>>();
    assert_eq!(expiries.len(), 1);
    assert_eq!(expiries[0].delta, -4);
    assert_eq!(expiries[0].reservation_id, Some(stale.id()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_release_and_sweep_return_stock_once() {
    let clock = ManualClock::starting_now();
    let manager = manager_with(Arc::new(clock.clone()), PartialPolicy::Reject);
    stock(&manager, 10, 0).await;

    let id = manager
        .reserve(ReserveRequest::new("SKU", "WH", 4, checkout_owner()))
        .await
        .unwrap()
        .reservation()
        .id();
    clock.advance(ChronoDuration::minutes(20));

    let mut tasks = Vec::new();
    for i in 0..6 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                manager.release(id).await.map(|_| ())
            } else {
                manager.sweep_expired().await.map(|_| ())
            }
        }));
    }
    for task in join_all(tasks).await {
        task.unwrap().unwrap();
    }

    assert_eq!(reserved(&manager).await, 0);
    let returns = manager
        .ledger()
        .transactions(&VariantId::new("SKU"), &WarehouseId::new("WH"))
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.counter == Counter::Reserved && t.delta < 0)
        .count();
    assert_eq!(returns, 1);
}
