//! `stockbook-infra` — storage, ports, and operation orchestration.
//!
//! Everything with IO lives here: the unit-of-work store (Postgres and
//! in-memory implementations), the item catalog and audit ports, the tracking
//! resolver, the five operation handlers, and the read-only query service.

pub mod audit;
pub mod catalog;
pub mod handlers;
pub mod queries;
pub mod resolver;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use audit::{AuditEvent, AuditSink, TracingAuditSink};
pub use catalog::{InMemoryItemCatalog, ItemCatalog, PostgresItemCatalog};
pub use handlers::{InventoryService, OperationOutcome, ReservationDescriptor};
pub use queries::InventoryQueries;
pub use store::{
    InMemoryInventoryStore, InventoryStore, InventoryTx, LedgerAppend, PostgresInventoryStore,
    StoreError,
};
