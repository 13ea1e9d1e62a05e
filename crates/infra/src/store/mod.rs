//! Inventory storage: unit-of-work port plus Postgres and in-memory
//! implementations.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use r#trait::{InventoryStore, InventoryTx, LedgerAppend, StoreError};
