pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use records::{
    Order, OrderLine, OrderTransition, Product, ReconciliationEntry, Reservation, StockLevel,
};
pub use store::{
    CatalogStore, Credit, Decrement, OrderInsert, OrderStore, ReconciliationStore,
    ReservationStore, StockStore, Store, Transition,
};
