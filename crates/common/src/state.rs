//! Lifecycle states for reservations and orders.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A state name read back from storage that matches no known state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} state: {value}")]
pub struct UnknownState {
    pub kind: &'static str,
    pub value: String,
}

/// The state of a stock reservation.
///
/// State transitions:
/// ```text
/// Held ──┬──► Committed
///        └──► Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReservationState {
    /// Stock is decremented and claimed by this reservation.
    #[default]
    Held,

    /// Payment confirmed; the stock is consumed (terminal state).
    Committed,

    /// The quantity went back to the ledger (terminal state).
    Released,
}

impl ReservationState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationState::Held)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Held => "Held",
            ReservationState::Committed => "Committed",
            ReservationState::Released => "Released",
        }
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Held" => Ok(ReservationState::Held),
            "Committed" => Ok(ReservationState::Committed),
            "Released" => Ok(ReservationState::Released),
            other => Err(UnknownState {
                kind: "reservation",
                value: other.to_string(),
            }),
        }
    }
}

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PendingPayment ──┬──► Paid
///                  ├──► Failed
///                  ├──► Expired
///                  └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderState {
    /// Every line holds stock; waiting for the payment provider.
    #[default]
    PendingPayment,

    /// Payment confirmed and every hold committed (terminal state).
    Paid,

    /// Payment failed, or confirmation arrived for holds that were gone (terminal state).
    Failed,

    /// Cancelled before payment (terminal state).
    Cancelled,

    /// Holds lapsed without a payment callback (terminal state).
    Expired,
}

impl OrderState {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderState::PendingPayment)
    }

    /// Returns true if the order can move to `next` from this state.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        matches!(self, OrderState::PendingPayment) && next.is_terminal()
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::PendingPayment => "PendingPayment",
            OrderState::Paid => "Paid",
            OrderState::Failed => "Failed",
            OrderState::Cancelled => "Cancelled",
            OrderState::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingPayment" => Ok(OrderState::PendingPayment),
            "Paid" => Ok(OrderState::Paid),
            "Failed" => Ok(OrderState::Failed),
            "Cancelled" => Ok(OrderState::Cancelled),
            "Expired" => Ok(OrderState::Expired),
            other => Err(UnknownState {
                kind: "order",
                value: other.to_string(),
            }),
        }
    }
}
