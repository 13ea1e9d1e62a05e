//! `stockbook-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod context;
pub mod entity;
pub mod error;
pub mod id;

pub use context::RequestContext;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{BalanceId, ItemId, LocationId, TenantId, TrackingId, TransactionId};
