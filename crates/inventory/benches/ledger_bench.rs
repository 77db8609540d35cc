use std::sync::Arc;

use chrono::Duration;
use common::{Size, VariantKey};
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{InventoryLedger, ReservationManager};
use store::{InMemoryStore, StockStore};
use uuid::Uuid;

fn bench_key() -> VariantKey {
    VariantKey::new(1, Size::new("UK-8").unwrap())
}

fn bench_decrement_increment(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    rt.block_on(async { store.register_variant(&bench_key(), 1_000).await.unwrap() });
    let ledger = InventoryLedger::new(store);

    c.bench_function("inventory/decrement_increment", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = bench_key();
                ledger.try_decrement(&key, 1).await.unwrap();
                ledger.increment(&key, 1, Uuid::new_v4()).await.unwrap();
            });
        });
    });
}

fn bench_hold_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    rt.block_on(async { store.register_variant(&bench_key(), 1_000).await.unwrap() });
    let manager = ReservationManager::new(store);

    c.bench_function("inventory/hold_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let reservation = manager
                    .hold(&bench_key(), 1, Duration::seconds(300))
                    .await
                    .unwrap();
                manager.release(reservation.id).await.unwrap();
            });
        });
    });
}

fn bench_contended_holds(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("inventory/contended_holds_32", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                store.register_variant(&bench_key(), 16).await.unwrap();
                let manager = Arc::new(ReservationManager::new(store));

                let handles: Vec<_> = (0..32)
                    .map(|_| {
                        let manager = Arc::clone(&manager);
                        tokio::spawn(async move {
                            manager.hold(&bench_key(), 1, Duration::seconds(300)).await
                        })
                    })
                    .collect();
                for handle in handles {
                    let _ = handle.await.unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_decrement_increment,
    bench_hold_release,
    bench_contended_holds
);
criterion_main!(benches);
