//! HTTP route handlers.

pub mod admin;
pub mod checkout;
pub mod health;
pub mod inventory;
pub mod orders;
pub mod payments;

use common::{OrderId, Size, VariantKey};

use crate::error::ApiError;

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))?;
    Ok(OrderId::from_uuid(uuid))
}

fn parse_variant(product_id: i64, size: &str) -> Result<VariantKey, ApiError> {
    if product_id <= 0 {
        return Err(ApiError::BadRequest(format!(
            "Invalid product id: {product_id}"
        )));
    }
    let size = Size::new(size).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(VariantKey::new(product_id, size))
}
