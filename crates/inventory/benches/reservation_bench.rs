use std::sync::Arc;

use common::{Reference, SystemClock, VariantId, WarehouseId};
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{
    InMemoryCatalog, InMemoryLedgerStore, InMemoryReservationStore, InventoryKey,
    InventoryLedger, LevelSettings, ReservationConfig, ReservationManager, ReserveRequest,
    TransactionKind,
};

type Manager = ReservationManager<InMemoryLedgerStore, InMemoryReservationStore>;

fn manager(rt: &tokio::runtime::Runtime, quantity: i64) -> Manager {
    let ledger = InventoryLedger::new(
        InMemoryLedgerStore::new(),
        Arc::new(InMemoryCatalog::new()),
        Arc::new(SystemClock),
    );
    let manager = ReservationManager::new(
        ledger,
        InMemoryReservationStore::new(),
        ReservationConfig::default(),
    );
    rt.block_on(async {
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
                None,
            )
            .await
            .unwrap();
    });
    manager
}

fn bench_reserve_and_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = manager(&rt, 1_000_000);

    c.bench_function("reservation/reserve_then_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let outcome = manager
                    .reserve(ReserveRequest::new("SKU", "WH", 1, Reference::manual("bench")))
                    .await
                    .unwrap();
                manager.release(outcome.reservation().id()).await.unwrap();
            });
        });
    });
}

fn bench_contended_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = manager(&rt, 1_000_000);

    c.bench_function("reservation/8_concurrent_reserves", |b| {
        b.iter(|| {
            rt.block_on(async {
                let handles: Vec<_> = (0..8)
                    .map(|_| {
                        let manager = manager.clone();
                        tokio::spawn(async move {
                            manager
                                .reserve(ReserveRequest::new(
                                    "SKU",
                                    "WH",
                                    1,
                                    Reference::manual("bench"),
                                ))
                                .await
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap().unwrap();
                }
            });
        });
    });
}

fn bench_ledger_adjust(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = manager(&rt, 0);
    let variant = VariantId::new("SKU");
    let warehouse = WarehouseId::new("WH");

    c.bench_function("ledger/adjust_receipt", |b| {
        b.iter(|| {
            rt.block_on(async {
                manager
                    .ledger()
                    .adjust(&variant, &warehouse, 1, TransactionKind::Receipt, None)
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_and_release,
    bench_contended_reserve,
    bench_ledger_adjust
);
criterion_main!(benches);
