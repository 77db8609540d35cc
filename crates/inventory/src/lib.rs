//! Inventory ledger and reservation manager.
//!
//! The ledger owns the per-(product, size) counters; the reservation manager
//! turns ledger decrements into time-boxed holds that are later committed or
//! released exactly once.

pub mod error;
pub mod ledger;
pub mod reservation;

pub use error::{LedgerError, ReservationError};
pub use ledger::{CreditOutcome, InventoryLedger};
pub use reservation::{ReservationManager, RepairReport};
