//! Checkout request validation.
//!
//! Request bodies arrive loosely typed. They are turned into
//! [`ValidatedCheckout`] here, before any stock is touched.

use std::collections::HashSet;

use common::{ProductId, Size, UserId, VariantKey};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum number of distinct items in one order.
pub const MAX_LINES: usize = 20;

/// Maximum quantity of a single item.
pub const MAX_LINE_QUANTITY: u32 = 10;

/// A checkout request as received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: i64,
    pub items: Vec<CheckoutItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: i64,
    pub size: String,
    pub quantity: i64,
}

/// A checkout request whose every field has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCheckout {
    pub user_id: UserId,
    pub lines: Vec<CheckoutLine>,
}

/// One item to hold, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLine {
    pub key: VariantKey,
    pub quantity: u32,
}

impl CheckoutLine {
    pub fn new(key: VariantKey, quantity: u32) -> Self {
        Self { key, quantity }
    }
}

impl CheckoutRequest {
    pub fn validate(self) -> Result<ValidatedCheckout, ValidationError> {
        if self.user_id <= 0 {
            return Err(ValidationError::InvalidUserId(self.user_id));
        }
        if self.items.is_empty() {
            return Err(ValidationError::EmptyOrder);
        }
        if self.items.len() > MAX_LINES {
            return Err(ValidationError::TooManyLines { max: MAX_LINES });
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        let mut lines = Vec::with_capacity(self.items.len());

        for (line, item) in self.items.into_iter().enumerate() {
            if item.product_id <= 0 {
                return Err(ValidationError::InvalidProductId {
                    line,
                    product_id: item.product_id,
                });
            }

            let size = Size::new(&item.size)
                .map_err(|source| ValidationError::InvalidSize { line, source })?;

            let quantity = u32::try_from(item.quantity)
                .ok()
                .filter(|quantity| (1..=MAX_LINE_QUANTITY).contains(quantity))
                .ok_or(ValidationError::InvalidQuantity {
                    line,
                    quantity: item.quantity,
                    max: MAX_LINE_QUANTITY,
                })?;

            let key = VariantKey::new(ProductId::new(item.product_id), size);
            if !seen.insert(key.clone()) {
                return Err(ValidationError::DuplicateLine { line, key });
            }

            lines.push(CheckoutLine { key, quantity });
        }

        Ok(ValidatedCheckout {
            user_id: UserId::new(self.user_id),
            lines,
        })
    }
}

impl TryFrom<CheckoutRequest> for ValidatedCheckout {
    type Error = ValidationError;

    fn try_from(request: CheckoutRequest) -> Result<Self, Self::Error> {
        request.validate()
    }
}
