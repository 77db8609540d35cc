//! Inventory error types.

use common::{ReservationId, ReservationState, VariantKey};
use store::StoreError;
use thiserror::Error;

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The variant holds less than requested; nothing changed.
    #[error("Insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: VariantKey,
        requested: u32,
        available: u32,
    },

    /// No stock counter exists for the variant.
    #[error("Unknown variant: {0}")]
    UnknownVariant(VariantKey),

    /// Quantities must be positive.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from reservation operations.
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("Insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: VariantKey,
        requested: u32,
        available: u32,
    },

    #[error("Unknown variant: {0}")]
    UnknownVariant(VariantKey),

    #[error("Reservation not found: {0}")]
    NotFound(ReservationId),

    /// The reservation already left `Held`.
    #[error("Reservation {id} already resolved as {state}")]
    AlreadyResolved {
        id: ReservationId,
        state: ReservationState,
    },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<LedgerError> for ReservationError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientStock {
                key,
                requested,
                available,
            } => ReservationError::InsufficientStock {
                key,
                requested,
                available,
            },
            LedgerError::UnknownVariant(key) => ReservationError::UnknownVariant(key),
            LedgerError::InvalidQuantity(quantity) => ReservationError::InvalidQuantity(quantity),
            LedgerError::Store(err) => ReservationError::Store(err),
        }
    }
}

impl ReservationError {
    /// Returns true if the error means the stock simply is not there.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ReservationError::InsufficientStock { .. } | ReservationError::UnknownVariant(_)
        )
    }
}
