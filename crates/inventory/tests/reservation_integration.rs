//! Integration tests for holds against a shared ledger.
//!
//! These exercise the stock invariants under contention: the counter never
//! goes negative and every unit is either available, held, or committed.

use std::sync::Arc;

use chrono::Duration;
use common::{Clock, ManualClock, ReservationState, Size, VariantKey};
use futures_util::future::join_all;
use inventory::{ReservationError, ReservationManager};
use store::{InMemoryStore, ReservationStore, StockStore};

type Manager = ReservationManager<InMemoryStore, ManualClock>;

fn variant(product_id: i64, size: &str) -> VariantKey {
    VariantKey::new(product_id, Size::new(size).unwrap())
}

async fn create_manager(stock: &[(VariantKey, u32)]) -> (Arc<Manager>, ManualClock, InMemoryStore) {
    let store = InMemoryStore::new();
    let clock = ManualClock::default();
    for (key, available) in stock {
        store.register_variant(key, *available).await.unwrap();
    }
    let manager = Arc::new(ReservationManager::with_clock(store.clone(), clock.clone()));
    (manager, clock, store)
}

mod contention {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_holds_on_last_unit_exactly_one_wins() {
        let key = variant(10, "UK-8");
        let (manager, _, _) = create_manager(&[(key.clone(), 1)]).await;

        let attempts = (0..2).map(|_| {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            tokio::spawn(async move { manager.hold(&key, 1, Duration::seconds(300)).await })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let won = results.iter().filter(|r| r.is_ok()).count();
        let lost = results
            .iter()
            .filter(|r| matches!(r, Err(ReservationError::InsufficientStock { .. })))
            .count();
        assert_eq!(won, 1);
        assert_eq!(lost, 1);
        assert_eq!(manager.ledger().get_available(&key).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn held_plus_committed_never_exceeds_stock() {
        let key = variant(10, "UK-8");
        let (manager, _, store) = create_manager(&[(key.clone(), 7)]).await;

        let attempts = (0..40).map(|i| {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            tokio::spawn(async move {
                let reservation = manager.hold(&key, 1, Duration::seconds(300)).await?;
                if i % 3 == 0 {
                    manager.commit(reservation.id).await?;
                }
                Ok::<_, ReservationError>(reservation.quantity)
            })
        });
        let granted: u32 = join_all(attempts)
            .await
            .into_iter()
            .filter_map(|joined| joined.unwrap().ok())
            .sum();

        let held = store.reservation_count(ReservationState::Held).await as u32;
        let committed = store.reservation_count(ReservationState::Committed).await as u32;
        let available = manager.ledger().get_available(&key).await.unwrap();

        assert_eq!(granted, 7);
        assert_eq!(held + committed, 7);
        assert_eq!(available, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_commit_and_release_resolve_once() {
        let key = variant(10, "UK-8");
        let (manager, _, store) = create_manager(&[(key.clone(), 1)]).await;
        let id = manager.hold(&key, 1, Duration::seconds(300)).await.unwrap().id;

        let commit = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.commit(id).await.is_ok() })
        };
        let release = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.release(id).await.is_ok() })
        };
        let committed = commit.await.unwrap();
        let released = release.await.unwrap();

        assert!(committed ^ released);
        let expected = if released { 1 } else { 0 };
        assert_eq!(manager.ledger().get_available(&key).await.unwrap(), expected);
        assert!(store.credit_count().await <= 1);
    }
}

mod expiry {
    use super::*;

    #[tokio::test]
    async fn lapsed_hold_is_released_without_client_action() {
        let key = variant(10, "UK-8");
        let (manager, clock, store) = create_manager(&[(key.clone(), 1)]).await;
        let reservation = manager.hold(&key, 1, Duration::seconds(300)).await.unwrap();

        clock.advance(Duration::seconds(299));
        assert!(manager.release_expired(clock.now(), 10).await.unwrap().is_empty());

        clock.advance(Duration::seconds(1));
        let released = manager.release_expired(clock.now(), 10).await.unwrap();

        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, reservation.id);
        assert_eq!(manager.ledger().get_available(&key).await.unwrap(), 1);
        let stored = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ReservationState::Released);
    }

    #[tokio::test]
    async fn committed_hold_is_never_swept() {
        let key = variant(10, "UK-8");
        let (manager, clock, _) = create_manager(&[(key.clone(), 1)]).await;
        let reservation = manager.hold(&key, 1, Duration::seconds(60)).await.unwrap();
        manager.commit(reservation.id).await.unwrap();

        clock.advance(Duration::hours(1));
        let released = manager.release_expired(clock.now(), 10).await.unwrap();

        assert!(released.is_empty());
        assert_eq!(manager.ledger().get_available(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_respects_batch_size() {
        let key = variant(10, "UK-8");
        let (manager, clock, _) = create_manager(&[(key.clone(), 5)]).await;
        for _ in 0..5 {
            manager.hold(&key, 1, Duration::seconds(60)).await.unwrap();
        }

        clock.advance(Duration::seconds(61));
        let first = manager.release_expired(clock.now(), 2).await.unwrap();
        let rest = manager.release_expired(clock.now(), 10).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(rest.len(), 3);
        assert_eq!(manager.ledger().get_available(&key).await.unwrap(), 5);
    }
}
