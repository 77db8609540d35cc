//! Rows persisted by the store.

use chrono::{DateTime, Duration, Utc};
use common::{
    Money, OrderId, OrderState, ProductId, ReservationId, ReservationState, UserId, VariantKey,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A catalog product, read-only from the order core's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Money) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
        }
    }
}

/// Point-in-time view of one size variant's stock counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub key: VariantKey,
    pub available: u32,
    pub updated_at: DateTime<Utc>,
}

/// A time-boxed claim on stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub key: VariantKey,
    pub quantity: u32,
    /// Set when the reservation is attached to a persisted order.
    pub order_id: Option<OrderId>,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// When the reservation left `Held`.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Creates a fresh Held reservation expiring `ttl` after `now`.
    pub fn held(
        id: ReservationId,
        key: VariantKey,
        quantity: u32,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            key,
            quantity,
            order_id: None,
            state: ReservationState::Held,
            created_at: now,
            expires_at: now + ttl,
            resolved_at: None,
        }
    }

    /// Returns true if the hold is still active but its TTL has lapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == ReservationState::Held && self.expires_at <= now
    }
}

/// One line of an order, backed by exactly one reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub position: u32,
    pub reservation_id: ReservationId,
    pub key: VariantKey,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    /// Unit price times quantity, or None on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// An order and its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub total: Money,
    pub currency: String,
    pub state: OrderState,
    /// Reference the payment gateway assigned to this order.
    pub payment_ref: Option<String>,
    /// Gateway payment id from a verified callback.
    pub payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn reservation_ids(&self) -> impl Iterator<Item = ReservationId> + '_ {
        self.lines.iter().map(|line| line.reservation_id)
    }
}

/// A requested order state change, applied only if the order is still in `from`.
#[derive(Debug, Clone)]
pub struct OrderTransition {
    pub from: OrderState,
    pub to: OrderState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
    pub payment_id: Option<String>,
}

impl OrderTransition {
    pub fn new(from: OrderState, to: OrderState, at: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            at,
            reason: None,
            payment_id: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_payment_id(mut self, payment_id: impl Into<String>) -> Self {
        self.payment_id = Some(payment_id.into());
        self
    }
}

/// An operator work item for a payment that moved money without producing a Paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub id: Uuid,
    pub order_id: OrderId,
    pub payment_ref: Option<String>,
    pub payment_id: Option<String>,
    /// Reservations that were committed, i.e. stock that was consumed for this payment.
    pub committed: Vec<ReservationId>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
}

impl ReconciliationEntry {
    pub fn open(
        order_id: OrderId,
        payment_ref: Option<String>,
        payment_id: Option<String>,
        committed: Vec<ReservationId>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            payment_ref,
            payment_id,
            committed,
            reason: reason.into(),
            created_at: now,
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Size;

    #[test]
    fn held_reservation_expires_after_ttl() {
        let now = Utc::now();
        let key = VariantKey::new(10, Size::new("UK-8").unwrap());
        let reservation = Reservation::held(
            ReservationId::new(),
            key,
            1,
            now,
            Duration::seconds(300),
        );

        assert!(!reservation.is_expired(now));
        assert!(!reservation.is_expired(now + Duration::seconds(299)));
        assert!(reservation.is_expired(now + Duration::seconds(300)));
    }

    #[test]
    fn resolved_reservation_never_expires() {
        let now = Utc::now();
        let key = VariantKey::new(10, Size::new("UK-8").unwrap());
        let mut reservation =
            Reservation::held(ReservationId::new(), key, 1, now, Duration::seconds(1));
        reservation.state = ReservationState::Committed;

        assert!(!reservation.is_expired(now + Duration::hours(1)));
    }

    #[test]
    fn line_total_multiplies_price() {
        let line = OrderLine {
            position: 0,
            reservation_id: ReservationId::new(),
            key: VariantKey::new(3, Size::new("M").unwrap()),
            product_name: "Linen shirt".to_string(),
            quantity: 3,
            unit_price: Money::from_minor(149_900),
        };
        assert_eq!(line.line_total(), Some(Money::from_minor(449_700)));
    }
}
