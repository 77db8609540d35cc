//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Money, Size, VariantKey};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{InMemoryPaymentGateway, OrderConfig, OrderService};
use store::{CatalogStore, InMemoryStore, Product, StockStore};
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "test-admin-token";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: axum::Router,
    gateway: InMemoryPaymentGateway,
}

/// Builds an app over an in-memory store seeded with product 10 in size
/// UK-8 (`stock` pairs) and product 11 in size UK-9 (none).
async fn setup(stock: u32) -> TestApp {
    let store = InMemoryStore::new();
    for (id, name) in [(10, "Runner"), (11, "Trail")] {
        store
            .upsert_product(&Product::new(id, name, Money::from_minor(129_900)))
            .await
            .unwrap();
    }
    store
        .register_variant(&VariantKey::new(10, Size::new("UK-8").unwrap()), stock)
        .await
        .unwrap();
    store
        .register_variant(&VariantKey::new(11, Size::new("UK-9").unwrap()), 0)
        .await
        .unwrap();

    let gateway = InMemoryPaymentGateway::new("test_key_secret");
    let orders = Arc::new(OrderService::new(
        store.clone(),
        gateway.clone(),
        OrderConfig::default(),
    ));
    let state = Arc::new(api::AppState::new(
        orders,
        store,
        Some(ADMIN_TOKEN.to_string()),
    ));
    TestApp {
        router: api::create_app(state, get_metrics_handle()),
        gateway,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn admin_post(
        &self,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("x-admin-token", ADMIN_TOKEN)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn admin_get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .header("x-admin-token", ADMIN_TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn checkout(&self, quantity: i64) -> (StatusCode, serde_json::Value) {
        self.post(
            "/checkout",
            serde_json::json!({
                "user_id": 7,
                "items": [{ "product_id": 10, "size": "UK-8", "quantity": quantity }]
            }),
        )
        .await
    }

    fn callback(&self, order: &serde_json::Value, payment_id: &str, status: &str) -> serde_json::Value {
        let payment_ref = order["payment_ref"].as_str().unwrap();
        serde_json::to_value(self.gateway.signed_callback(payment_ref, payment_id, status)).unwrap()
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = setup(1).await;

    let (status, json) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup(1).await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

mod checkout {
    use super::*;

    #[tokio::test]
    async fn test_checkout_creates_pending_order() {
        let app = setup(2).await;

        let (status, order) = app.checkout(2).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["state"], "PendingPayment");
        assert_eq!(order["total_minor"], 259_800);
        assert_eq!(order["lines"][0]["size"], "UK-8");
        assert!(order["payment_ref"].as_str().unwrap().starts_with("order_"));

        let (status, stock) = app.get("/inventory/10/UK-8").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stock["available"], 0);

        let uri = format!("/orders/{}", order["id"].as_str().unwrap());
        let (status, fetched) = app.get(&uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], order["id"]);

        let (status, history) = app.get("/users/7/orders").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_checkout_unavailable_lists_lines() {
        let app = setup(1).await;

        let (status, json) = app
            .post(
                "/checkout",
                serde_json::json!({
                    "user_id": 7,
                    "items": [
                        { "product_id": 10, "size": "UK-8", "quantity": 1 },
                        { "product_id": 11, "size": "UK-9", "quantity": 1 }
                    ]
                }),
            )
            .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["unavailable"][0]["product_id"], 11);
        assert_eq!(json["unavailable"][0]["available"], 0);

        // The first line's hold was given back.
        let (_, stock) = app.get("/inventory/10/UK-8").await;
        assert_eq!(stock["available"], 1);
    }

    #[tokio::test]
    async fn test_checkout_rejects_invalid_quantity() {
        let app = setup(1).await;

        let (status, json) = app.checkout(0).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].as_str().unwrap().contains("quantity"));
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let app = setup(1).await;

        let (status, _) = app
            .get("/orders/00000000-0000-0000-0000-000000000000")
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app.get("/orders/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_releases_stock_once() {
        let app = setup(1).await;
        let (_, order) = app.checkout(1).await;
        let uri = format!("/orders/{}/cancel", order["id"].as_str().unwrap());

        let (status, cancelled) = app.post(&uri, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["state"], "Cancelled");

        let (status, _) = app.post(&uri, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, stock) = app.get("/inventory/10/UK-8").await;
        assert_eq!(stock["available"], 1);
    }
}

mod payments {
    use super::*;

    #[tokio::test]
    async fn test_success_callback_marks_paid() {
        let app = setup(1).await;
        let (_, order) = app.checkout(1).await;

        let (status, json) = app
            .post("/payments/callback", app.callback(&order, "pay_1", "captured"))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "paid");
        assert_eq!(json["order"]["state"], "Paid");
        assert_eq!(json["order"]["payment_id"], "pay_1");

        let (status, json) = app
            .post("/payments/callback", app.callback(&order, "pay_1", "captured"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "duplicate");
    }

    #[tokio::test]
    async fn test_failure_callback_releases_stock() {
        let app = setup(1).await;
        let (_, order) = app.checkout(1).await;

        let (status, json) = app
            .post("/payments/callback", app.callback(&order, "pay_1", "failed"))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "failed");
        let (_, stock) = app.get("/inventory/10/UK-8").await;
        assert_eq!(stock["available"], 1);
    }

    #[tokio::test]
    async fn test_invalid_signature_is_unauthorized() {
        let app = setup(1).await;
        let (_, order) = app.checkout(1).await;
        let mut callback = app.callback(&order, "pay_1", "captured");
        callback["payment_id"] = serde_json::json!("pay_2");

        let (status, _) = app.post("/payments/callback", callback).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let uri = format!("/orders/{}", order["id"].as_str().unwrap());
        let (_, fetched) = app.get(&uri).await;
        assert_eq!(fetched["state"], "PendingPayment");
    }

    #[tokio::test]
    async fn test_status_outside_signature_is_unauthorized() {
        let app = setup(1).await;
        let (_, order) = app.checkout(1).await;
        let mut callback = app.callback(&order, "pay_1", "captured");
        callback["status"] = serde_json::json!("failed");

        let (status, _) = app.post("/payments/callback", callback).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (_, stock) = app.get("/inventory/10/UK-8").await;
        assert_eq!(stock["available"], 0);
    }
}

mod admin {
    use super::*;

    #[tokio::test]
    async fn test_admin_requires_token() {
        let app = setup(1).await;

        let (status, _) = app.get("/admin/reconciliations").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .post(
                "/admin/inventory",
                serde_json::json!({ "product_id": 10, "size": "UK-10", "available": 5 }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, json) = app.admin_get("/admin/reconciliations").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admin_rejects_near_miss_tokens() {
        let app = setup(1).await;

        for token in ["test-admin", "test-admin-tokem", "test-admin-token-2", ""] {
            let (status, _) = app
                .send(
                    Request::builder()
                        .uri("/admin/reconciliations")
                        .header("x-admin-token", token)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "token {token:?}");
        }
    }

    #[tokio::test]
    async fn test_register_restock_and_write_off() {
        let app = setup(1).await;

        let (status, json) = app
            .admin_post(
                "/admin/inventory",
                serde_json::json!({ "product_id": 10, "size": "UK-10", "available": 3 }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["created"], true);
        assert_eq!(json["available"], 3);

        let restock = serde_json::json!({
            "quantity": 2,
            "adjustment_id": "7f0c1e1e-5a4b-4c57-9a43-5b1f0f6b2c11"
        });
        let (status, json) = app
            .admin_post("/admin/inventory/10/UK-10/restock", restock.clone())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["applied"], true);
        assert_eq!(json["available"], 5);

        let (_, json) = app
            .admin_post("/admin/inventory/10/UK-10/restock", restock)
            .await;
        assert_eq!(json["applied"], false);
        assert_eq!(json["available"], 5);

        let (status, json) = app
            .admin_post(
                "/admin/inventory/10/UK-10/write-off",
                serde_json::json!({ "quantity": 6 }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json["error"].as_str().is_some());

        let (status, json) = app
            .admin_post(
                "/admin/inventory/10/UK-10/write-off",
                serde_json::json!({ "quantity": 1 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["available"], 4);

        let (status, json) = app.admin_get("/admin/inventory/10").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_product_enables_checkout() {
        let app = setup(1).await;

        let (status, _) = app
            .admin_post(
                "/admin/products",
                serde_json::json!({ "id": 42, "name": "Court Classic", "price_minor": 89_900 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        app.admin_post(
            "/admin/inventory",
            serde_json::json!({ "product_id": 42, "size": "UK-7", "available": 1 }),
        )
        .await;

        let (status, order) = app
            .post(
                "/checkout",
                serde_json::json!({
                    "user_id": 3,
                    "items": [{ "product_id": 42, "size": "UK-7", "quantity": 1 }]
                }),
            )
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["total_minor"], 89_900);
        assert_eq!(order["lines"][0]["product_name"], "Court Classic");
    }

    #[tokio::test]
    async fn test_resolve_missing_reconciliation() {
        let app = setup(1).await;

        let (status, _) = app
            .admin_post(
                "/admin/reconciliations/7f0c1e1e-5a4b-4c57-9a43-5b1f0f6b2c11/resolve",
                serde_json::json!({ "note": "refunded" }),
            )
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
