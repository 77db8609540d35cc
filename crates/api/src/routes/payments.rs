//! Payment gateway callback endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use orders::{PaymentCallback, PaymentGateway, PaymentOutcome};
use serde::Serialize;
use store::Store;

use super::orders::OrderResponse;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    #[serde(flatten)]
    pub outcome: PaymentOutcome,
    pub order: OrderResponse,
}

/// POST /payments/callback
///
/// Retried deliveries answer 200 with `"outcome": "duplicate"` so the
/// gateway stops retrying. A bad signature is 401 and changes nothing.
#[tracing::instrument(skip(state, callback), fields(payment_ref = %callback.gateway_order_id))]
pub async fn callback<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Json<PaymentResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let resolution = state.orders.on_payment_result(callback).await?;
    Ok(Json(PaymentResponse {
        outcome: resolution.outcome,
        order: resolution.order.into(),
    }))
}
