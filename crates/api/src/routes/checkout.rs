//! Checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use orders::{CheckoutRequest, PaymentGateway};
use store::Store;

use super::orders::OrderResponse;
use crate::AppState;
use crate::error::ApiError;

/// POST /checkout: holds stock for every line and opens a payment.
///
/// Responds 201 with the pending order, 409 listing unavailable lines, or
/// 422 if the request is invalid.
#[tracing::instrument(skip(state, request), fields(user_id = request.user_id, items = request.items.len()))]
pub async fn create<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let validated = request.validate()?;
    let order = state.orders.checkout(validated).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}
