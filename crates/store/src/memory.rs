use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OrderState, ProductId, ReservationId, ReservationState, UserId, VariantKey};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    Order, OrderTransition, Product, ReconciliationEntry, Reservation, Result, StockLevel,
    store::{
        CatalogStore, Credit, Decrement, OrderInsert, OrderStore, ReconciliationStore,
        ReservationStore, StockStore, Transition,
    },
};

#[derive(Default)]
struct State {
    products: HashMap<ProductId, Product>,
    stock: HashMap<VariantKey, StockLevel>,
    credits: HashSet<Uuid>,
    reservations: HashMap<ReservationId, Reservation>,
    orders: HashMap<OrderId, Order>,
    reconciliations: Vec<ReconciliationEntry>,
}

/// In-memory store for tests and single-instance local runs.
///
/// Every operation runs under one write (or read) lock acquisition, which
/// gives each primitive the same atomicity the SQL statement has in the
/// PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of ledger credits recorded.
    pub async fn credit_count(&self) -> usize {
        self.state.read().await.credits.len()
    }

    /// Returns the number of reservations in `state`.
    pub async fn reservation_count(&self, state: ReservationState) -> usize {
        self.state
            .read()
            .await
            .reservations
            .values()
            .filter(|r| r.state == state)
            .count()
    }

    /// Returns the number of persisted orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl StockStore for InMemoryStore {
    async fn register_variant(&self, key: &VariantKey, initial: u32) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.stock.contains_key(key) {
            return Ok(false);
        }
        state.stock.insert(
            key.clone(),
            StockLevel {
                key: key.clone(),
                available: initial,
                updated_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn try_decrement(&self, key: &VariantKey, quantity: u32) -> Result<Decrement> {
        let mut state = self.state.write().await;
        let Some(level) = state.stock.get_mut(key) else {
            return Ok(Decrement::UnknownVariant);
        };

        if level.available < quantity {
            return Ok(Decrement::Insufficient {
                available: level.available,
            });
        }

        level.available -= quantity;
        level.updated_at = Utc::now();
        Ok(Decrement::Applied {
            remaining: level.available,
        })
    }

    async fn credit(&self, key: &VariantKey, quantity: u32, credit_id: Uuid) -> Result<Credit> {
        let mut state = self.state.write().await;
        if state.credits.contains(&credit_id) {
            return Ok(Credit::AlreadyApplied);
        }

        let Some(level) = state.stock.get_mut(key) else {
            return Ok(Credit::UnknownVariant);
        };
        let Some(available) = level.available.checked_add(quantity) else {
            return Err(crate::StoreError::Corrupt(format!(
                "stock counter for {key} would overflow"
            )));
        };
        level.available = available;
        level.updated_at = Utc::now();

        state.credits.insert(credit_id);
        Ok(Credit::Applied { available })
    }

    async fn stock_level(&self, key: &VariantKey) -> Result<Option<StockLevel>> {
        Ok(self.state.read().await.stock.get(key).cloned())
    }

    async fn stock_levels(&self, product_id: ProductId) -> Result<Vec<StockLevel>> {
        let state = self.state.read().await;
        let mut levels: Vec<_> = state
            .stock
            .values()
            .filter(|l| l.key.product_id == product_id)
            .cloned()
            .collect();
        levels.sort_by(|a, b| a.key.size.cmp(&b.key.size));
        Ok(levels)
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn insert_reservation(&self, reservation: &Reservation) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.state.read().await.reservations.get(&id).cloned())
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut reservations: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.order_id == Some(order_id))
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationState,
        to: ReservationState,
        at: DateTime<Utc>,
    ) -> Result<Transition<ReservationState>> {
        let mut state = self.state.write().await;
        let Some(reservation) = state.reservations.get_mut(&id) else {
            return Ok(Transition::NotFound);
        };

        if reservation.state != from {
            return Ok(Transition::Conflict {
                actual: reservation.state,
            });
        }

        reservation.state = to;
        reservation.resolved_at = Some(at);
        Ok(Transition::Applied)
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut expired: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn uncredited_releases(&self, limit: usize) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut missing: Vec<_> = state
            .reservations
            .values()
            .filter(|r| {
                r.state == ReservationState::Released && !state.credits.contains(&r.id.as_uuid())
            })
            .cloned()
            .collect();
        missing.sort_by_key(|r| r.resolved_at);
        missing.truncate(limit);
        Ok(missing)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<OrderInsert> {
        let mut state = self.state.write().await;

        let attachable = order.reservation_ids().all(|id| {
            state
                .reservations
                .get(&id)
                .is_some_and(|r| r.state == ReservationState::Held && r.order_id.is_none())
        });
        if !attachable {
            return Ok(OrderInsert::ReservationsUnavailable);
        }

        for id in order.reservation_ids() {
            if let Some(reservation) = state.reservations.get_mut(&id) {
                reservation.order_id = Some(order.id);
            }
        }
        state.orders.insert(order.id, order.clone());
        Ok(OrderInsert::Inserted)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_order_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.payment_ref.as_deref() == Some(payment_ref))
            .cloned())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn stranded_orders(&self, limit: usize) -> Result<Vec<OrderId>> {
        let state = self.state.read().await;
        let mut stranded: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.state == OrderState::PendingPayment)
            .filter(|o| {
                o.reservation_ids().any(|id| {
                    state
                        .reservations
                        .get(&id)
                        .is_some_and(|r| r.state == ReservationState::Released)
                })
            })
            .collect();
        stranded.sort_by_key(|o| o.created_at);
        Ok(stranded.into_iter().take(limit).map(|o| o.id).collect())
    }

    async fn set_payment_ref(&self, id: OrderId, payment_ref: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&id) {
            Some(order) if order.payment_ref.is_none() => {
                order.payment_ref = Some(payment_ref.to_string());
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_order(
        &self,
        id: OrderId,
        transition: OrderTransition,
    ) -> Result<Transition<OrderState>> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(Transition::NotFound);
        };

        if order.state != transition.from {
            return Ok(Transition::Conflict {
                actual: order.state,
            });
        }

        order.state = transition.to;
        order.updated_at = transition.at;
        if transition.reason.is_some() {
            order.failure_reason = transition.reason;
        }
        if transition.payment_id.is_some() {
            order.payment_id = transition.payment_id;
        }
        Ok(Transition::Applied)
    }
}

#[async_trait]
impl ReconciliationStore for InMemoryStore {
    async fn insert_reconciliation(&self, entry: &ReconciliationEntry) -> Result<()> {
        self.state.write().await.reconciliations.push(entry.clone());
        Ok(())
    }

    async fn open_reconciliations(&self) -> Result<Vec<ReconciliationEntry>> {
        let state = self.state.read().await;
        Ok(state
            .reconciliations
            .iter()
            .filter(|e| e.is_open())
            .cloned()
            .collect())
    }

    async fn resolve_reconciliation(
        &self,
        id: Uuid,
        note: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .reconciliations
            .iter_mut()
            .find(|e| e.id == id && e.is_open())
        {
            Some(entry) => {
                entry.resolved_at = Some(at);
                entry.resolution = Some(note.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        self.state
            .write()
            .await
            .products
            .insert(product.id, product.clone());
        Ok(())
    }
}
