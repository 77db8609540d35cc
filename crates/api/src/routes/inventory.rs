//! Public stock availability.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use orders::PaymentGateway;
use serde::Serialize;
use store::{StockLevel, Store};

use super::parse_variant;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub product_id: i64,
    pub size: String,
    pub available: u32,
}

impl From<StockLevel> for AvailabilityResponse {
    fn from(level: StockLevel) -> Self {
        Self {
            product_id: level.key.product_id.as_i64(),
            size: level.key.size.to_string(),
            available: level.available,
        }
    }
}

/// GET /inventory/{product_id}/{size}
#[tracing::instrument(skip(state))]
pub async fn availability<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path((product_id, size)): Path<(i64, String)>,
) -> Result<Json<AvailabilityResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let key = parse_variant(product_id, &size)?;
    let available = state.orders.ledger().get_available(&key).await?;
    Ok(Json(AvailabilityResponse {
        product_id,
        size: key.size.to_string(),
        available,
    }))
}
