//! Payment gateway boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::{Money, OrderId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrderError, ValidationError};
use crate::signature::{self, SignedFields};

/// An order opened with the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    /// Gateway reference, stored on the order as `payment_ref`.
    pub id: String,
    pub amount: Money,
    pub currency: String,
    pub receipt: String,
}

/// A payment result posted back by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub gateway_order_id: String,
    pub payment_id: String,
    pub status: String,
    pub signature: String,
}

/// Normalized callback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Succeeded,
    Failed,
}

impl PaymentStatus {
    /// Maps gateway status strings. `captured`, `authorized` and `paid` are
    /// successes, `failed` is a failure.
    pub fn parse(status: &str) -> Result<Self, ValidationError> {
        match status.trim().to_ascii_lowercase().as_str() {
            "captured" | "authorized" | "paid" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(ValidationError::UnknownPaymentStatus(other.to_string())),
        }
    }
}

impl PaymentCallback {
    /// The fields covered by `signature`.
    pub fn signed_fields(&self) -> SignedFields<'_> {
        SignedFields {
            gateway_order_id: &self.gateway_order_id,
            payment_id: &self.payment_id,
            status: &self.status,
        }
    }

    /// Checks required fields and parses the status.
    pub fn payment_status(&self) -> Result<PaymentStatus, ValidationError> {
        if self.gateway_order_id.trim().is_empty() {
            return Err(ValidationError::MissingField("gateway_order_id"));
        }
        if self.payment_id.trim().is_empty() {
            return Err(ValidationError::MissingField("payment_id"));
        }
        if self.signature.trim().is_empty() {
            return Err(ValidationError::MissingField("signature"));
        }
        PaymentStatus::parse(&self.status)
    }
}

/// Trait for payment gateway operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment for `amount`, tagged with the order id as receipt.
    async fn create_order(
        &self,
        amount: Money,
        currency: &str,
        receipt: OrderId,
    ) -> Result<GatewayOrder, OrderError>;

    /// Returns true if the callback was signed by the gateway.
    fn verify_signature(&self, callback: &PaymentCallback) -> bool;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    orders: HashMap<String, GatewayOrder>,
    fail_on_create: bool,
}

/// In-memory gateway for tests and local runs.
///
/// Orders are kept in memory; callbacks are verified with the real signature
/// scheme, so [`signed_callback`](Self::signed_callback) produces exactly what
/// the provider would post.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    key_secret: Arc<str>,
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new(key_secret: impl Into<String>) -> Self {
        Self {
            key_secret: Arc::from(key_secret.into()),
            state: Arc::default(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the gateway to reject order creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state().fail_on_create = fail;
    }

    /// Returns the number of orders opened.
    pub fn order_count(&self) -> usize {
        self.state().orders.len()
    }

    pub fn gateway_order(&self, id: &str) -> Option<GatewayOrder> {
        self.state().orders.get(id).cloned()
    }

    /// Builds a callback signed with this gateway's key secret.
    pub fn signed_callback(
        &self,
        gateway_order_id: &str,
        payment_id: &str,
        status: &str,
    ) -> PaymentCallback {
        let mut callback = PaymentCallback {
            gateway_order_id: gateway_order_id.to_string(),
            payment_id: payment_id.to_string(),
            status: status.to_string(),
            signature: String::new(),
        };
        callback.signature = signature::sign(&self.key_secret, callback.signed_fields());
        callback
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_order(
        &self,
        amount: Money,
        currency: &str,
        receipt: OrderId,
    ) -> Result<GatewayOrder, OrderError> {
        let mut state = self.state();

        if state.fail_on_create {
            return Err(OrderError::Gateway("gateway unavailable".to_string()));
        }

        let simple = Uuid::new_v4().simple().to_string();
        let order = GatewayOrder {
            id: format!("order_{}", &simple[..14]),
            amount,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
        };
        state.orders.insert(order.id.clone(), order.clone());

        Ok(order)
    }

    fn verify_signature(&self, callback: &PaymentCallback) -> bool {
        signature::verify(&self.key_secret, callback.signed_fields(), &callback.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            PaymentStatus::parse("captured").unwrap(),
            PaymentStatus::Succeeded
        );
        assert_eq!(
            PaymentStatus::parse("Authorized").unwrap(),
            PaymentStatus::Succeeded
        );
        assert_eq!(
            PaymentStatus::parse("paid").unwrap(),
            PaymentStatus::Succeeded
        );
        assert_eq!(
            PaymentStatus::parse(" failed ").unwrap(),
            PaymentStatus::Failed
        );
        assert!(matches!(
            PaymentStatus::parse("refunded"),
            Err(ValidationError::UnknownPaymentStatus(status)) if status == "refunded"
        ));
    }

    #[test]
    fn test_callback_requires_fields() {
        let mut callback = PaymentCallback {
            gateway_order_id: "order_1".to_string(),
            payment_id: String::new(),
            status: "captured".to_string(),
            signature: "00".to_string(),
        };
        assert_eq!(
            callback.payment_status(),
            Err(ValidationError::MissingField("payment_id"))
        );

        callback.payment_id = "pay_1".to_string();
        assert_eq!(callback.payment_status(), Ok(PaymentStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_create_order_records_order() {
        let gateway = InMemoryPaymentGateway::new("secret");
        let receipt = OrderId::new();

        let order = gateway
            .create_order(Money::from_minor(129_900), "INR", receipt)
            .await
            .unwrap();

        assert!(order.id.starts_with("order_"));
        assert_eq!(order.receipt, receipt.to_string());
        assert_eq!(gateway.order_count(), 1);
        assert_eq!(gateway.gateway_order(&order.id), Some(order));
    }

    #[tokio::test]
    async fn test_create_order_failure_toggle() {
        let gateway = InMemoryPaymentGateway::new("secret");
        gateway.set_fail_on_create(true);

        let result = gateway
            .create_order(Money::from_minor(100), "INR", OrderId::new())
            .await;

        assert!(matches!(result, Err(OrderError::Gateway(_))));
        assert_eq!(gateway.order_count(), 0);
    }

    #[test]
    fn test_signed_callback_verifies() {
        let gateway = InMemoryPaymentGateway::new("secret");
        let callback = gateway.signed_callback("order_1", "pay_1", "captured");
        assert!(gateway.verify_signature(&callback));

        let other = InMemoryPaymentGateway::new("different");
        assert!(!other.verify_signature(&callback));

        let mut tampered = callback.clone();
        tampered.payment_id = "pay_2".to_string();
        assert!(!gateway.verify_signature(&tampered));

        let mut flipped = callback;
        flipped.status = "failed".to_string();
        assert!(!gateway.verify_signature(&flipped));
    }
}
