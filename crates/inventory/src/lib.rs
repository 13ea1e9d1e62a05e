//! `stockbook-inventory` — inventory domain model.
//!
//! Pure domain types and rules: no IO, no storage. The balance aggregate,
//! tracking dimensions, ledger entry types, and operation commands live here;
//! persistence and orchestration live in `stockbook-infra`.

pub mod balance;
pub mod command;
pub mod item;
pub mod tracking;
pub mod transaction;

pub use balance::{BalanceKey, InventoryBalance, StockStatus};
pub use command::{
    AdjustStock, AdjustmentDirection, IssueStock, MoveStock, ReceiveStock, ReserveStock,
};
pub use item::{Item, ItemType, ItemUsage, TrackingRequirement, TrackingScope};
pub use tracking::{
    InventoryTracking, TrackingDimension, TrackingInput, TrackingStatus, TrackingType,
};
pub use transaction::{InventoryTransaction, SourceRef, TransactionType};
