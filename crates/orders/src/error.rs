//! Order error types.

use common::{OrderId, OrderState, ProductId, Size, SizeError, VariantKey};
use inventory::{LedgerError, ReservationError};
use serde::Serialize;
use store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// A checkout line that could not be held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailableLine {
    pub product_id: ProductId,
    pub size: Size,
    pub requested: u32,
    pub available: u32,
}

impl UnavailableLine {
    pub fn new(key: &VariantKey, requested: u32, available: u32) -> Self {
        Self {
            product_id: key.product_id,
            size: key.size.clone(),
            requested,
            available,
        }
    }
}

/// A request rejected before it reached the reservation manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("order has no items")]
    EmptyOrder,

    #[error("order has more than {max} items")]
    TooManyLines { max: usize },

    #[error("invalid user id: {0}")]
    InvalidUserId(i64),

    #[error("item {line}: invalid product id {product_id}")]
    InvalidProductId { line: usize, product_id: i64 },

    #[error("item {line}: {source}")]
    InvalidSize { line: usize, source: SizeError },

    #[error("item {line}: quantity {quantity} is outside 1..={max}")]
    InvalidQuantity { line: usize, quantity: i64, max: u32 },

    #[error("item {line}: {key} appears more than once")]
    DuplicateLine { line: usize, key: VariantKey },

    #[error("order total overflows")]
    TotalOverflow,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("unknown payment status: {0}")]
    UnknownPaymentStatus(String),
}

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// One or more lines could not be held; nothing was reserved.
    #[error("{} item(s) unavailable", .0.len())]
    Unavailable(Vec<UnavailableLine>),

    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    /// A hold lapsed between being taken and the order being saved.
    #[error("Reservation lapsed before the order was saved")]
    HoldLapsed,

    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("No order for payment reference {0}")]
    UnknownPaymentReference(String),

    /// The order already left `PendingPayment`.
    #[error("Order {id} already resolved as {state}")]
    AlreadyResolved { id: OrderId, state: OrderState },

    #[error("Payment callback signature is invalid")]
    GatewaySignatureInvalid,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Reconciliation entry not found or already resolved: {0}")]
    ReconciliationNotFound(Uuid),

    #[error("Reservation error: {0}")]
    Reservation(#[from] ReservationError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
