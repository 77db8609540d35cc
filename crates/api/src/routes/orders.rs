//! Order lookup and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::UserId;
use orders::PaymentGateway;
use serde::Serialize;
use store::{Order, OrderLine, Store};

use super::parse_order_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: i64,
    pub state: String,
    pub total_minor: i64,
    pub currency: String,
    pub payment_ref: Option<String>,
    pub payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub lines: Vec<OrderLineResponse>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct OrderLineResponse {
    pub product_id: i64,
    pub size: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_minor: i64,
    pub reservation_id: String,
}

impl From<OrderLine> for OrderLineResponse {
    fn from(line: OrderLine) -> Self {
        Self {
            product_id: line.key.product_id.as_i64(),
            size: line.key.size.to_string(),
            product_name: line.product_name,
            quantity: line.quantity,
            unit_price_minor: line.unit_price.minor(),
            reservation_id: line.reservation_id.to_string(),
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.as_i64(),
            state: order.state.to_string(),
            total_minor: order.total.minor(),
            currency: order.currency,
            payment_ref: order.payment_ref,
            payment_id: order.payment_id,
            failure_reason: order.failure_reason,
            lines: order.lines.into_iter().map(OrderLineResponse::from).collect(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let order = state.orders.get_order(parse_order_id(&id)?).await?;
    Ok(Json(order.into()))
}

/// POST /orders/{id}/cancel: cancels an order that is still awaiting payment.
#[tracing::instrument(skip(state))]
pub async fn cancel<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let order = state.orders.cancel(parse_order_id(&id)?).await?;
    Ok(Json(order.into()))
}

/// GET /users/{id}/orders: order history, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_user<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<OrderResponse>>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    if user_id <= 0 {
        return Err(ApiError::BadRequest(format!("Invalid user id: {user_id}")));
    }
    let orders = state.orders.orders_for_user(UserId::new(user_id)).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}
