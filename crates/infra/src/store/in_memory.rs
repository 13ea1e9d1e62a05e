//! In-memory inventory store.
//!
//! Intended for tests/dev. Writes are staged on the transaction handle and
//! validated against committed state under one lock at commit time, so the
//! visibility and conflict behavior matches the Postgres implementation:
//! nothing staged is observable until commit, a stale balance version fails
//! the whole unit of work, and dropping the handle discards everything.
//! Tracking inserts are the exception (see `insert_tracking`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use stockbook_core::{BalanceId, ItemId, TenantId, TrackingId};
use stockbook_inventory::{
    BalanceKey, InventoryBalance, InventoryTracking, InventoryTransaction, TrackingType,
};

use super::r#trait::{InventoryStore, InventoryTx, LedgerAppend, StoreError};

#[derive(Debug, Default)]
struct Tables {
    balances: HashMap<BalanceKey, InventoryBalance>,
    transactions: Vec<InventoryTransaction>,
    tracking: Vec<InventoryTracking>,
}

impl Tables {
    fn find_tracking(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
        tracking_type: TrackingType,
        identifier: &str,
    ) -> Option<&InventoryTracking> {
        self.tracking.iter().find(|t| {
            t.tenant_id == tenant_id
                && t.item_id == item_id
                && t.tracking_type() == tracking_type
                && t.identifier() == identifier
        })
    }

    fn find_transaction_by_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Option<&InventoryTransaction> {
        self.transactions
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.idempotency_key.as_deref() == Some(key))
    }
}

/// In-memory store. Cheap to clone; clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_poisoned() -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        Ok(Box::new(InMemoryTx {
            inner: Arc::clone(&self.inner),
            balance_inserts: Vec::new(),
            balance_updates: Vec::new(),
            transactions: Vec::new(),
        }))
    }

    async fn get_balance(
        &self,
        key: &BalanceKey,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables.balances.get(key).cloned())
    }

    async fn get_balance_by_id(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables
            .balances
            .values()
            .find(|b| b.key.tenant_id == tenant_id && b.id == balance_id)
            .cloned())
    }

    async fn get_balances_by_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Vec<InventoryBalance>, StoreError> {
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables
            .balances
            .values()
            .filter(|b| b.key.tenant_id == tenant_id && b.key.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn get_transaction_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables.find_transaction_by_key(tenant_id, key).cloned())
    }

    async fn get_transactions_by_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables
            .transactions
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn get_transactions_by_reference(
        &self,
        tenant_id: TenantId,
        ref_type: &str,
        ref_id: Uuid,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables
            .transactions
            .iter()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.source_ref
                        .as_ref()
                        .is_some_and(|r| r.ref_type == ref_type && r.ref_id == ref_id)
            })
            .cloned()
            .collect())
    }

    async fn get_transactions_by_date_range(
        &self,
        tenant_id: TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables
            .transactions
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.occurred_at >= from && t.occurred_at <= to)
            .cloned()
            .collect())
    }

    async fn get_tracking_by_id(
        &self,
        tenant_id: TenantId,
        tracking_id: TrackingId,
    ) -> Result<Option<InventoryTracking>, StoreError> {
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables
            .tracking
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.id == tracking_id)
            .cloned())
    }
}

/// Staged writes for one unit of work.
struct InMemoryTx {
    inner: Arc<RwLock<Tables>>,
    balance_inserts: Vec<InventoryBalance>,
    balance_updates: Vec<(InventoryBalance, u64)>,
    transactions: Vec<InventoryTransaction>,
}

#[async_trait]
impl InventoryTx for InMemoryTx {
    async fn find_balance(
        &mut self,
        key: &BalanceKey,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        // Writes staged in this scope shadow committed state.
        if let Some((b, _)) = self.balance_updates.iter().rev().find(|(b, _)| &b.key == key) {
            return Ok(Some(b.clone()));
        }
        if let Some(b) = self.balance_inserts.iter().rev().find(|b| &b.key == key) {
            return Ok(Some(b.clone()));
        }
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables.balances.get(key).cloned())
    }

    async fn insert_balance(&mut self, balance: &InventoryBalance) -> Result<(), StoreError> {
        self.balance_inserts.push(balance.clone());
        Ok(())
    }

    async fn update_balance(
        &mut self,
        balance: &InventoryBalance,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        // Fail fast on a version that is already stale; the authoritative
        // check is repeated under the write lock at commit.
        {
            let tables = self.inner.read().map_err(|_| lock_poisoned())?;
            if let Some(current) = tables.balances.get(&balance.key) {
                if current.version != expected_version {
                    return Err(StoreError::Conflict(format!(
                        "concurrent modification of balance {}: expected version {expected_version}, found {}",
                        balance.id, current.version
                    )));
                }
            }
        }
        self.balance_updates.push((balance.clone(), expected_version));
        Ok(())
    }

    async fn find_transaction_by_idempotency_key(
        &mut self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        if let Some(t) = self
            .transactions
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.idempotency_key.as_deref() == Some(key))
        {
            return Ok(Some(t.clone()));
        }
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables.find_transaction_by_key(tenant_id, key).cloned())
    }

    async fn insert_transaction(
        &mut self,
        transaction: &InventoryTransaction,
    ) -> Result<LedgerAppend, StoreError> {
        if let Some(key) = transaction.idempotency_key.as_deref() {
            if let Some(existing) = self
                .find_transaction_by_idempotency_key(transaction.tenant_id, key)
                .await?
            {
                return Ok(LedgerAppend::Existing(existing));
            }
        }
        self.transactions.push(transaction.clone());
        Ok(LedgerAppend::Inserted(transaction.clone()))
    }

    async fn find_tracking(
        &mut self,
        tenant_id: TenantId,
        item_id: ItemId,
        tracking_type: TrackingType,
        identifier: &str,
    ) -> Result<Option<InventoryTracking>, StoreError> {
        let tables = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(tables
            .find_tracking(tenant_id, item_id, tracking_type, identifier)
            .cloned())
    }

    async fn insert_tracking(
        &mut self,
        tracking: &InventoryTracking,
    ) -> Result<InventoryTracking, StoreError> {
        // Tracking rows are never deleted and get-or-create is idempotent,
        // so the insert takes effect immediately under the table lock. This
        // mirrors the row-level effect of the conflict-tolerant insert in
        // Postgres: concurrent first references converge on one record.
        let mut tables = self.inner.write().map_err(|_| lock_poisoned())?;
        if let Some(existing) = tables.find_tracking(
            tracking.tenant_id,
            tracking.item_id,
            tracking.tracking_type(),
            &tracking.identifier(),
        ) {
            return Ok(existing.clone());
        }
        tables.tracking.push(tracking.clone());
        Ok(tracking.clone())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tables = self.inner.write().map_err(|_| lock_poisoned())?;

        // Validate everything before applying anything.
        for balance in &self.balance_inserts {
            if tables.balances.contains_key(&balance.key) {
                return Err(StoreError::Conflict(format!(
                    "balance already exists for key of balance {}",
                    balance.id
                )));
            }
        }
        for (balance, expected_version) in &self.balance_updates {
            let current = tables.balances.get(&balance.key).ok_or_else(|| {
                StoreError::Conflict(format!("balance {} vanished before commit", balance.id))
            })?;
            if current.version != *expected_version {
                return Err(StoreError::Conflict(format!(
                    "concurrent modification of balance {}: expected version {expected_version}, found {}",
                    balance.id, current.version
                )));
            }
        }
        for transaction in &self.transactions {
            if let Some(key) = transaction.idempotency_key.as_deref() {
                if tables
                    .find_transaction_by_key(transaction.tenant_id, key)
                    .is_some()
                {
                    return Err(StoreError::Conflict(format!(
                        "idempotency key '{key}' was committed by a concurrent writer"
                    )));
                }
            }
        }

        for balance in self.balance_inserts {
            tables.balances.insert(balance.key, balance);
        }
        for (balance, _) in self.balance_updates {
            tables.balances.insert(balance.key, balance);
        }
        tables.transactions.extend(self.transactions);

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Staged writes are dropped with the handle.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use stockbook_core::LocationId;
    use stockbook_inventory::TrackingDimension;

    use super::*;

    fn test_key() -> BalanceKey {
        BalanceKey::available(TenantId::new(), ItemId::new(), LocationId::new(), None)
    }

    fn balance_with(key: BalanceKey, quantity: i64, version: u64) -> InventoryBalance {
        let mut b = InventoryBalance::open(key, Utc::now());
        b.quantity = Decimal::from(quantity);
        b.version = version;
        b
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryInventoryStore::new();
        let key = test_key();

        let mut tx = store.begin().await.unwrap();
        tx.insert_balance(&balance_with(key, 5, 1)).await.unwrap();
        assert!(store.get_balance(&key).await.unwrap().is_none());

        tx.commit().await.unwrap();
        let committed = store.get_balance(&key).await.unwrap().unwrap();
        assert_eq!(committed.quantity, Decimal::from(5));
    }

    #[tokio::test]
    async fn dropped_transaction_discards_staged_writes() {
        let store = InMemoryInventoryStore::new();
        let key = test_key();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_balance(&balance_with(key, 5, 1)).await.unwrap();
            // No commit.
        }
        assert!(store.get_balance(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overlapping_updates_yield_one_success_and_one_conflict() {
        let store = InMemoryInventoryStore::new();
        let key = test_key();

        let mut seed = store.begin().await.unwrap();
        seed.insert_balance(&balance_with(key, 10, 1)).await.unwrap();
        seed.commit().await.unwrap();

        // Both writers load version 1, then race to commit.
        let mut tx_a = store.begin().await.unwrap();
        let mut tx_b = store.begin().await.unwrap();
        let loaded_a = tx_a.find_balance(&key).await.unwrap().unwrap();
        let loaded_b = tx_b.find_balance(&key).await.unwrap().unwrap();

        let mut updated_a = loaded_a.clone();
        updated_a.quantity = Decimal::from(6);
        updated_a.version += 1;
        tx_a.update_balance(&updated_a, loaded_a.version).await.unwrap();
        tx_a.commit().await.unwrap();

        let mut updated_b = loaded_b.clone();
        updated_b.quantity = Decimal::from(3);
        updated_b.version += 1;
        let result = async {
            tx_b.update_balance(&updated_b, loaded_b.version).await?;
            tx_b.commit().await
        }
        .await;
        match result {
            Err(StoreError::Conflict(msg)) => assert!(msg.contains("concurrent modification")),
            other => panic!("expected conflict, got {other:?}"),
        }

        let committed = store.get_balance(&key).await.unwrap().unwrap();
        assert_eq!(committed.quantity, Decimal::from(6));
        assert_eq!(committed.version, 2);
    }

    #[tokio::test]
    async fn tracking_insert_is_get_or_create() {
        let store = InMemoryInventoryStore::new();
        let tenant = TenantId::new();
        let item = ItemId::new();
        let dim = TrackingDimension::serial("SN-1").unwrap();

        let mut tx = store.begin().await.unwrap();
        let first = tx
            .insert_tracking(&InventoryTracking::new(tenant, item, dim.clone(), Utc::now()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let second = tx
            .insert_tracking(&InventoryTracking::new(tenant, item, dim, Utc::now()))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn idempotency_key_duplicate_returns_existing_row() {
        let store = InMemoryInventoryStore::new();
        let tenant = TenantId::new();
        let item = ItemId::new();
        let location = LocationId::new();

        let make = || {
            InventoryTransaction::new(
                stockbook_core::TransactionId::new(),
                tenant,
                stockbook_inventory::TransactionType::Receive,
                item,
                Decimal::from(10),
                "EA".to_string(),
                location,
                None,
                Utc::now(),
            )
            .with_idempotency_key(Some("retry-1".to_string()))
        };

        let mut tx = store.begin().await.unwrap();
        let first = tx.insert_transaction(&make()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let second = tx.insert_transaction(&make()).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(matches!(first, LedgerAppend::Inserted(_)));
        match second {
            LedgerAppend::Existing(t) => assert_eq!(t.id, first.record().id),
            other => panic!("expected existing record, got {other:?}"),
        }
    }
}
