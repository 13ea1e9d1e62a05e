//! Storage port: unit of work + transaction handle.
//!
//! A store hands out transaction handles (`begin`); every repository call
//! takes the handle, so there is no ambient coordination state. Writes become
//! visible only on `commit`; dropping a handle discards everything it staged.
//! Reads that need no transactional scope live directly on the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use stockbook_core::{DomainError, ItemId, TenantId, TrackingId};
use stockbook_inventory::{
    BalanceKey, InventoryBalance, InventoryTracking, InventoryTransaction, TrackingType,
};

/// Storage-layer error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness or version conflict (CAS miss, duplicate key).
    #[error("storage conflict: {0}")]
    Conflict(String),

    /// A row the operation depends on is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Everything else: connectivity, serialization, corrupt rows.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for DomainError {
    /// Repository-boundary translation: integrity and conflict failures
    /// become business-rule errors; missing rows stay not-found.
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => DomainError::business_rule(msg),
            StoreError::NotFound(msg) => DomainError::not_found(msg),
            StoreError::Storage(msg) => DomainError::business_rule(msg),
        }
    }
}

/// Result of a ledger append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerAppend {
    /// A new row was written.
    Inserted(InventoryTransaction),
    /// A row with the same (tenant, idempotency_key) already existed;
    /// this is the winner's record, unchanged.
    Existing(InventoryTransaction),
}

impl LedgerAppend {
    pub fn record(&self) -> &InventoryTransaction {
        match self {
            LedgerAppend::Inserted(t) | LedgerAppend::Existing(t) => t,
        }
    }
}

/// One open unit of work. All writes commit atomically or not at all.
#[async_trait]
pub trait InventoryTx: Send {
    // -- balances ------------------------------------------------------

    async fn find_balance(&mut self, key: &BalanceKey)
        -> Result<Option<InventoryBalance>, StoreError>;

    async fn insert_balance(&mut self, balance: &InventoryBalance) -> Result<(), StoreError>;

    /// Conditional update keyed on id + `expected_version` (the version the
    /// row had when loaded). Zero affected rows means a concurrent writer
    /// won; that surfaces as `Conflict` and is never retried here.
    async fn update_balance(
        &mut self,
        balance: &InventoryBalance,
        expected_version: u64,
    ) -> Result<(), StoreError>;

    // -- ledger --------------------------------------------------------

    async fn find_transaction_by_idempotency_key(
        &mut self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<InventoryTransaction>, StoreError>;

    /// Append-only insert. When the transaction carries an idempotency key
    /// that already exists for the tenant, the existing row is returned
    /// instead of an error (conflict-tolerant insert + re-fetch).
    async fn insert_transaction(
        &mut self,
        transaction: &InventoryTransaction,
    ) -> Result<LedgerAppend, StoreError>;

    // -- tracking ------------------------------------------------------

    async fn find_tracking(
        &mut self,
        tenant_id: TenantId,
        item_id: ItemId,
        tracking_type: TrackingType,
        identifier: &str,
    ) -> Result<Option<InventoryTracking>, StoreError>;

    /// Get-or-create semantics: on a natural-key collision the stored record
    /// is returned, never a conflict error.
    async fn insert_tracking(
        &mut self,
        tracking: &InventoryTracking,
    ) -> Result<InventoryTracking, StoreError>;

    // -- scope ---------------------------------------------------------

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Store: opens units of work and serves read-only queries.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError>;

    // Read-only queries; no unit of work required.

    async fn get_balance(&self, key: &BalanceKey)
        -> Result<Option<InventoryBalance>, StoreError>;

    async fn get_balance_by_id(
        &self,
        tenant_id: TenantId,
        balance_id: stockbook_core::BalanceId,
    ) -> Result<Option<InventoryBalance>, StoreError>;

    async fn get_balances_by_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Vec<InventoryBalance>, StoreError>;

    /// Committed ledger row for a tenant's idempotency key, if one exists.
    /// Used to resolve a commit-time idempotency race to the winner's row.
    async fn get_transaction_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<InventoryTransaction>, StoreError>;

    async fn get_transactions_by_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Vec<InventoryTransaction>, StoreError>;

    async fn get_transactions_by_reference(
        &self,
        tenant_id: TenantId,
        ref_type: &str,
        ref_id: Uuid,
    ) -> Result<Vec<InventoryTransaction>, StoreError>;

    async fn get_transactions_by_date_range(
        &self,
        tenant_id: TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<InventoryTransaction>, StoreError>;

    async fn get_tracking_by_id(
        &self,
        tenant_id: TenantId,
        tracking_id: TrackingId,
    ) -> Result<Option<InventoryTracking>, StoreError>;
}
