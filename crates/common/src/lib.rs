//! Shared types for the storefront order core.

pub mod clock;
pub mod money;
pub mod state;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use money::Money;
pub use state::{OrderState, ReservationState, UnknownState};
pub use types::{OrderId, ProductId, ReservationId, Size, SizeError, UserId, VariantKey};
