//! Order placement on top of the inventory ledger.
//!
//! [`OrderService`] is the order state machine: checkout holds stock and opens
//! a gateway payment, payment callbacks commit or release the holds, and
//! cancellation and expiry release them. Every order state change is a
//! compare-and-set in the store, which is the only point where concurrent
//! callbacks, cancels and sweeps are ordered.

pub mod error;
pub mod gateway;
pub mod reconciliation;
pub mod service;
pub mod signature;
pub mod sweeper;
pub mod validation;

pub use error::{OrderError, UnavailableLine, ValidationError};
pub use gateway::{
    GatewayOrder, InMemoryPaymentGateway, PaymentCallback, PaymentGateway, PaymentStatus,
};
pub use reconciliation::ReconciliationQueue;
pub use service::{OrderConfig, OrderService, PaymentOutcome, PaymentResolution};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperConfig};
pub use validation::{CheckoutItem, CheckoutLine, CheckoutRequest, ValidatedCheckout};
