//! Operator endpoints: catalog seeding, stock adjustments and the
//! reconciliation queue. Every route sits behind [`require_token`].

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use common::{Money, ProductId};
use inventory::CreditOutcome;
use orders::PaymentGateway;
use serde::{Deserialize, Serialize};
use store::{CatalogStore, Product, ReconciliationEntry, Store};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::inventory::AvailabilityResponse;
use super::parse_variant;
use crate::AppState;
use crate::error::ApiError;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// The configured admin token. `None` locks every admin route.
#[derive(Debug, Clone, Default)]
pub struct AdminToken(pub Option<Arc<str>>);

/// Rejects requests whose `x-admin-token` header does not match.
pub async fn require_token(
    State(token): State<AdminToken>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorized = match (&token.0, request.headers().get(ADMIN_TOKEN_HEADER)) {
        (Some(expected), Some(provided)) => {
            provided.as_bytes().ct_eq(expected.as_bytes()).into()
        }
        _ => false,
    };

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "rejected admin request");
        return Err(ApiError::Unauthorized("admin token required".to_string()));
    }
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
pub struct UpsertProductRequest {
    pub id: i64,
    pub name: String,
    pub price_minor: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterVariantRequest {
    pub product_id: i64,
    pub size: String,
    #[serde(default)]
    pub available: u32,
}

#[derive(Debug, Serialize)]
pub struct RegisterVariantResponse {
    pub created: bool,
    #[serde(flatten)]
    pub stock: AvailabilityResponse,
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
    /// Idempotency key; a retried restock with the same id is a no-op.
    pub adjustment_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RestockResponse {
    pub applied: bool,
    pub available: u32,
}

#[derive(Debug, Deserialize)]
pub struct WriteOffRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub note: String,
}

/// POST /admin/products
#[tracing::instrument(skip(state, request), fields(product_id = request.id))]
pub async fn upsert_product<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Json(request): Json<UpsertProductRequest>,
) -> Result<Json<Product>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    if request.id <= 0 {
        return Err(ApiError::BadRequest(format!("Invalid product id: {}", request.id)));
    }
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Product name is required".to_string()));
    }
    if request.price_minor < 0 {
        return Err(ApiError::BadRequest("Price cannot be negative".to_string()));
    }

    let product = Product::new(
        ProductId::new(request.id),
        request.name.trim(),
        Money::from_minor(request.price_minor),
    );
    state.store.upsert_product(&product).await?;
    Ok(Json(product))
}

/// POST /admin/inventory: registers a size variant. Existing counters are
/// left untouched.
#[tracing::instrument(skip(state, request), fields(product_id = request.product_id, size = %request.size))]
pub async fn register_variant<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Json(request): Json<RegisterVariantRequest>,
) -> Result<(StatusCode, Json<RegisterVariantResponse>), ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let key = parse_variant(request.product_id, &request.size)?;
    let ledger = state.orders.ledger();
    let created = ledger.register_variant(&key, request.available).await?;
    let available = ledger.get_available(&key).await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(RegisterVariantResponse {
            created,
            stock: AvailabilityResponse {
                product_id: request.product_id,
                size: key.size.to_string(),
                available,
            },
        }),
    ))
}

/// GET /admin/inventory/{product_id}
#[tracing::instrument(skip(state))]
pub async fn list_variants<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(product_id): Path<i64>,
) -> Result<Json<Vec<AvailabilityResponse>>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    if product_id <= 0 {
        return Err(ApiError::BadRequest(format!("Invalid product id: {product_id}")));
    }
    let levels = state
        .orders
        .ledger()
        .list_variants(ProductId::new(product_id))
        .await?;
    Ok(Json(levels.into_iter().map(AvailabilityResponse::from).collect()))
}

/// POST /admin/inventory/{product_id}/{size}/restock
#[tracing::instrument(skip(state, request), fields(quantity = request.quantity, adjustment_id = %request.adjustment_id))]
pub async fn restock<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path((product_id, size)): Path<(i64, String)>,
    Json(request): Json<RestockRequest>,
) -> Result<Json<RestockResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let key = parse_variant(product_id, &size)?;
    let ledger = state.orders.ledger();

    let response = match ledger
        .restock(&key, request.quantity, request.adjustment_id)
        .await?
    {
        CreditOutcome::Applied { available } => RestockResponse {
            applied: true,
            available,
        },
        CreditOutcome::AlreadyApplied => RestockResponse {
            applied: false,
            available: ledger.get_available(&key).await?,
        },
    };
    Ok(Json(response))
}

/// POST /admin/inventory/{product_id}/{size}/write-off
#[tracing::instrument(skip(state, request), fields(quantity = request.quantity))]
pub async fn write_off<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path((product_id, size)): Path<(i64, String)>,
    Json(request): Json<WriteOffRequest>,
) -> Result<Json<AvailabilityResponse>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let key = parse_variant(product_id, &size)?;
    let available = state
        .orders
        .ledger()
        .write_off(&key, request.quantity)
        .await?;
    Ok(Json(AvailabilityResponse {
        product_id,
        size: key.size.to_string(),
        available,
    }))
}

/// GET /admin/reconciliations: the open operator queue, oldest first.
pub async fn list_reconciliations<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
) -> Result<Json<Vec<ReconciliationEntry>>, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    Ok(Json(state.orders.reconciliations().list_open().await?))
}

/// POST /admin/reconciliations/{id}/resolve
#[tracing::instrument(skip(state, request))]
pub async fn resolve_reconciliation<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<StatusCode, ApiError>
where
    S: Store + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let id = Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid reconciliation id: {e}")))?;
    if request.note.trim().is_empty() {
        return Err(ApiError::BadRequest("A resolution note is required".to_string()));
    }
    state
        .orders
        .reconciliations()
        .resolve(id, request.note.trim())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
