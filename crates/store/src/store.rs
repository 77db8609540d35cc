use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OrderState, ProductId, ReservationId, ReservationState, UserId, VariantKey};
use uuid::Uuid;

use crate::{
    Order, OrderTransition, Product, ReconciliationEntry, Reservation, Result, StockLevel,
};

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrement {
    /// The counter was reduced; `remaining` is the new value.
    Applied { remaining: u32 },
    /// The counter holds less than requested and was left untouched.
    Insufficient { available: u32 },
    /// No counter exists for the key.
    UnknownVariant,
}

/// Outcome of a keyed stock credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credit {
    /// The counter was increased; `available` is the new value.
    Applied { available: u32 },
    /// A credit with the same id was applied before; nothing changed.
    AlreadyApplied,
    /// No counter exists for the key; nothing changed.
    UnknownVariant,
}

/// Outcome of a compare-and-set on a row's state column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    /// The row was in the expected state and now holds the new one.
    Applied,
    /// The row was in a different state, returned here.
    Conflict { actual: S },
    /// No row with that id.
    NotFound,
}

impl<S> Transition<S> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

/// Outcome of persisting a new order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderInsert {
    /// The order, its lines and the reservation attachments were written.
    Inserted,
    /// At least one line's reservation was no longer Held or already belonged
    /// to an order; nothing was written.
    ReservationsUnavailable,
}

/// Per-(product, size) stock counters.
///
/// Every mutation is a single conditional update keyed by the variant; no
/// caller ever reads a counter and writes back a computed value.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Creates the counter if it does not exist yet.
    ///
    /// Returns false (and leaves the counter alone) if it already existed.
    async fn register_variant(&self, key: &VariantKey, initial: u32) -> Result<bool>;

    /// Reduces the counter by `quantity` only if it holds at least that much.
    async fn try_decrement(&self, key: &VariantKey, quantity: u32) -> Result<Decrement>;

    /// Increases the counter by `quantity` unless a credit with `credit_id`
    /// was already applied. Recording the credit and increasing the counter
    /// happen atomically.
    async fn credit(&self, key: &VariantKey, quantity: u32, credit_id: Uuid) -> Result<Credit>;

    /// Reads one counter.
    async fn stock_level(&self, key: &VariantKey) -> Result<Option<StockLevel>>;

    /// Reads every size of a product, ordered by size.
    async fn stock_levels(&self, product_id: ProductId) -> Result<Vec<StockLevel>>;
}

/// Reservation rows.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert_reservation(&self, reservation: &Reservation) -> Result<()>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>>;

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>>;

    /// Moves a reservation from `from` to `to`, stamping `resolved_at`.
    async fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationState,
        to: ReservationState,
        at: DateTime<Utc>,
    ) -> Result<Transition<ReservationState>>;

    /// Held reservations whose `expires_at` is at or before `now`, oldest first.
    async fn expired_reservations(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<Reservation>>;

    /// Released reservations whose ledger credit was never recorded.
    async fn uncredited_releases(&self, limit: usize) -> Result<Vec<Reservation>>;
}

/// Order rows and their line items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Writes the order with its lines and attaches every line's reservation
    /// to it, all or nothing.
    async fn insert_order(&self, order: &Order) -> Result<OrderInsert>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn find_order_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Order>>;

    /// Orders of a user, newest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// `PendingPayment` orders with at least one `Released` reservation,
    /// oldest first. Such an order can no longer be fulfilled as placed.
    async fn stranded_orders(&self, limit: usize) -> Result<Vec<OrderId>>;

    /// Records the gateway reference if the order has none yet.
    async fn set_payment_ref(&self, id: OrderId, payment_ref: &str) -> Result<bool>;

    /// Compare-and-set on the order state. This is the single serialization
    /// point between payment callbacks, cancellation and expiry.
    async fn transition_order(
        &self,
        id: OrderId,
        transition: OrderTransition,
    ) -> Result<Transition<OrderState>>;
}

/// Operator queue for payments that need manual follow-up.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn insert_reconciliation(&self, entry: &ReconciliationEntry) -> Result<()>;

    /// Unresolved entries, oldest first.
    async fn open_reconciliations(&self) -> Result<Vec<ReconciliationEntry>>;

    /// Marks an open entry resolved. Returns false if it does not exist or
    /// was already resolved.
    async fn resolve_reconciliation(&self, id: Uuid, note: &str, at: DateTime<Utc>)
    -> Result<bool>;
}

/// Read access to the product catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Inserts or replaces a catalog entry. Used to seed local and test setups.
    async fn upsert_product(&self, product: &Product) -> Result<()>;
}

/// Everything the order core needs from persistence.
pub trait Store:
    StockStore + ReservationStore + OrderStore + ReconciliationStore + CatalogStore
{
}

impl<T> Store for T where
    T: StockStore + ReservationStore + OrderStore + ReconciliationStore + CatalogStore
{
}
