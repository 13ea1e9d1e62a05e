//! Postgres-backed inventory store.
//!
//! One sqlx transaction per unit of work; every repository call runs on the
//! transaction handle, so the balance mutation(s) and the ledger append of an
//! operation commit atomically or not at all. Dropping the handle rolls the
//! transaction back.
//!
//! ## Error mapping
//!
//! | PostgreSQL error code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` (unique)      | `Conflict` | CAS race, duplicate natural key |
//! | `23514` (check)       | `Conflict` | Negative quantity slipped past the aggregate |
//! | other database errors | `Storage`  | Connectivity, serialization, corrupt rows |
//!
//! Tracking and idempotency races never reach the caller as errors: inserts
//! use `ON CONFLICT DO NOTHING` and re-fetch the winner's row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockbook_core::{BalanceId, ItemId, TenantId, TrackingId};
use stockbook_inventory::{
    BalanceKey, InventoryBalance, InventoryTracking, InventoryTransaction, SourceRef,
    StockStatus, TrackingDimension, TrackingStatus, TrackingType, TransactionType,
};

use super::r#trait::{InventoryStore, InventoryTx, LedgerAppend, StoreError};

const BALANCE_COLUMNS: &str = "id, tenant_id, item_id, location_id, tracking_id, status, \
     quantity, version, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, tenant_id, occurred_at, transaction_type, item_id, \
     quantity, uom, location_id, tracking_id, cost_per_unit, source_ref_type, source_ref_id, \
     reason_code, idempotency_key, created_at";

const TRACKING_COLUMNS: &str = "id, tenant_id, item_id, tracking_type, identifier, \
     parent_tracking_id, serial_number, supplier_batch, expiration_date, manufacturing_date, \
     status, created_at";

/// Postgres store. Clone-cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PostgresTx { tx }))
    }

    #[instrument(skip(self), fields(tenant_id = %key.tenant_id), err)]
    async fn get_balance(
        &self,
        key: &BalanceKey,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        let row: Option<BalanceRow> = sqlx::query_as(&format!(
            "SELECT {BALANCE_COLUMNS} FROM inventory_balances \
             WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3 \
               AND tracking_id IS NOT DISTINCT FROM $4 AND status = $5"
        ))
        .bind(key.tenant_id.as_uuid())
        .bind(key.item_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(key.tracking_id.map(|t| *t.as_uuid()))
        .bind(key.status.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_balance", e))?;
        row.map(BalanceRow::into_domain).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get_balance_by_id(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        let row: Option<BalanceRow> = sqlx::query_as(&format!(
            "SELECT {BALANCE_COLUMNS} FROM inventory_balances \
             WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(balance_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_balance_by_id", e))?;
        row.map(BalanceRow::into_domain).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get_balances_by_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Vec<InventoryBalance>, StoreError> {
        let rows: Vec<BalanceRow> = sqlx::query_as(&format!(
            "SELECT {BALANCE_COLUMNS} FROM inventory_balances \
             WHERE tenant_id = $1 AND item_id = $2 \
             ORDER BY created_at ASC"
        ))
        .bind(tenant_id.as_uuid())
        .bind(item_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_balances_by_item", e))?;
        rows.into_iter().map(BalanceRow::into_domain).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get_transaction_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions \
             WHERE tenant_id = $1 AND idempotency_key = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_transaction_by_idempotency_key", e))?;
        row.map(TransactionRow::into_domain).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get_transactions_by_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions \
             WHERE tenant_id = $1 AND item_id = $2 \
             ORDER BY occurred_at ASC, created_at ASC"
        ))
        .bind(tenant_id.as_uuid())
        .bind(item_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_transactions_by_item", e))?;
        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get_transactions_by_reference(
        &self,
        tenant_id: TenantId,
        ref_type: &str,
        ref_id: Uuid,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions \
             WHERE tenant_id = $1 AND source_ref_type = $2 AND source_ref_id = $3 \
             ORDER BY occurred_at ASC, created_at ASC"
        ))
        .bind(tenant_id.as_uuid())
        .bind(ref_type)
        .bind(ref_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_transactions_by_reference", e))?;
        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get_transactions_by_date_range(
        &self,
        tenant_id: TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions \
             WHERE tenant_id = $1 AND occurred_at >= $2 AND occurred_at <= $3 \
             ORDER BY occurred_at ASC, created_at ASC"
        ))
        .bind(tenant_id.as_uuid())
        .bind(from)
        .bind(to)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_transactions_by_date_range", e))?;
        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get_tracking_by_id(
        &self,
        tenant_id: TenantId,
        tracking_id: TrackingId,
    ) -> Result<Option<InventoryTracking>, StoreError> {
        let row: Option<TrackingRow> = sqlx::query_as(&format!(
            "SELECT {TRACKING_COLUMNS} FROM inventory_tracking \
             WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(tracking_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_tracking_by_id", e))?;
        row.map(TrackingRow::into_domain).transpose()
    }
}

/// One open sqlx transaction.
struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryTx for PostgresTx {
    async fn find_balance(
        &mut self,
        key: &BalanceKey,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        let row: Option<BalanceRow> = sqlx::query_as(&format!(
            "SELECT {BALANCE_COLUMNS} FROM inventory_balances \
             WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3 \
               AND tracking_id IS NOT DISTINCT FROM $4 AND status = $5"
        ))
        .bind(key.tenant_id.as_uuid())
        .bind(key.item_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(key.tracking_id.map(|t| *t.as_uuid()))
        .bind(key.status.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_balance", e))?;
        row.map(BalanceRow::into_domain).transpose()
    }

    async fn insert_balance(&mut self, balance: &InventoryBalance) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO inventory_balances \
             (id, tenant_id, item_id, location_id, tracking_id, status, quantity, version, \
              created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(balance.id.as_uuid())
        .bind(balance.key.tenant_id.as_uuid())
        .bind(balance.key.item_id.as_uuid())
        .bind(balance.key.location_id.as_uuid())
        .bind(balance.key.tracking_id.map(|t| *t.as_uuid()))
        .bind(balance.key.status.as_str())
        .bind(balance.quantity)
        .bind(balance.version as i64)
        .bind(balance.created_at)
        .bind(balance.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_balance", e))?;
        Ok(())
    }

    async fn update_balance(
        &mut self,
        balance: &InventoryBalance,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE inventory_balances \
             SET quantity = $1, version = $2, updated_at = $3 \
             WHERE id = $4 AND tenant_id = $5 AND version = $6",
        )
        .bind(balance.quantity)
        .bind(balance.version as i64)
        .bind(balance.updated_at)
        .bind(balance.id.as_uuid())
        .bind(balance.key.tenant_id.as_uuid())
        .bind(expected_version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_balance", e))?;

        // Zero affected rows: a concurrent writer bumped the version first.
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "concurrent modification of balance {}: version {expected_version} is stale",
                balance.id
            )));
        }
        Ok(())
    }

    async fn find_transaction_by_idempotency_key(
        &mut self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions \
             WHERE tenant_id = $1 AND idempotency_key = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_transaction_by_idempotency_key", e))?;
        row.map(TransactionRow::into_domain).transpose()
    }

    async fn insert_transaction(
        &mut self,
        transaction: &InventoryTransaction,
    ) -> Result<LedgerAppend, StoreError> {
        let conflict_clause = if transaction.idempotency_key.is_some() {
            " ON CONFLICT (tenant_id, idempotency_key) WHERE idempotency_key IS NOT NULL \
             DO NOTHING"
        } else {
            ""
        };
        let result = sqlx::query(&format!(
            "INSERT INTO inventory_transactions \
             (id, tenant_id, occurred_at, transaction_type, item_id, quantity, uom, \
              location_id, tracking_id, cost_per_unit, source_ref_type, source_ref_id, \
              reason_code, idempotency_key, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)\
             {conflict_clause}"
        ))
        .bind(transaction.id.as_uuid())
        .bind(transaction.tenant_id.as_uuid())
        .bind(transaction.occurred_at)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.item_id.as_uuid())
        .bind(transaction.quantity)
        .bind(&transaction.uom)
        .bind(transaction.location_id.as_uuid())
        .bind(transaction.tracking_id.map(|t| *t.as_uuid()))
        .bind(transaction.cost_per_unit)
        .bind(transaction.source_ref.as_ref().map(|r| r.ref_type.clone()))
        .bind(transaction.source_ref.as_ref().map(|r| r.ref_id))
        .bind(&transaction.reason_code)
        .bind(&transaction.idempotency_key)
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        if result.rows_affected() > 0 {
            return Ok(LedgerAppend::Inserted(transaction.clone()));
        }

        // The insert was suppressed by the idempotency constraint: a writer
        // with the same key won. Re-fetch and hand back its row unchanged.
        let Some(key) = transaction.idempotency_key.as_deref() else {
            return Err(StoreError::Storage(
                "insert suppressed without an idempotency key".to_string(),
            ));
        };
        let existing = self
            .find_transaction_by_idempotency_key(transaction.tenant_id, key)
            .await?
            .ok_or_else(|| {
                StoreError::Storage(format!(
                    "idempotency conflict on key '{key}' but no existing row found"
                ))
            })?;
        Ok(LedgerAppend::Existing(existing))
    }

    async fn find_tracking(
        &mut self,
        tenant_id: TenantId,
        item_id: ItemId,
        tracking_type: TrackingType,
        identifier: &str,
    ) -> Result<Option<InventoryTracking>, StoreError> {
        let row: Option<TrackingRow> = sqlx::query_as(&format!(
            "SELECT {TRACKING_COLUMNS} FROM inventory_tracking \
             WHERE tenant_id = $1 AND item_id = $2 AND tracking_type = $3 AND identifier = $4"
        ))
        .bind(tenant_id.as_uuid())
        .bind(item_id.as_uuid())
        .bind(tracking_type.as_str())
        .bind(identifier)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_tracking", e))?;
        row.map(TrackingRow::into_domain).transpose()
    }

    async fn insert_tracking(
        &mut self,
        tracking: &InventoryTracking,
    ) -> Result<InventoryTracking, StoreError> {
        let (serial, batch, expiration, manufacturing) = dimension_fields(&tracking.dimension);
        let result = sqlx::query(
            "INSERT INTO inventory_tracking \
             (id, tenant_id, item_id, tracking_type, identifier, parent_tracking_id, \
              serial_number, supplier_batch, expiration_date, manufacturing_date, status, \
              created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (tenant_id, item_id, tracking_type, identifier) DO NOTHING",
        )
        .bind(tracking.id.as_uuid())
        .bind(tracking.tenant_id.as_uuid())
        .bind(tracking.item_id.as_uuid())
        .bind(tracking.tracking_type().as_str())
        .bind(tracking.identifier())
        .bind(tracking.parent_tracking_id.map(|t| *t.as_uuid()))
        .bind(serial)
        .bind(batch)
        .bind(expiration)
        .bind(manufacturing)
        .bind(tracking.status.as_str())
        .bind(tracking.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_tracking", e))?;

        if result.rows_affected() > 0 {
            return Ok(tracking.clone());
        }

        // Lost the get-or-create race; the winner's record is the identity.
        self.find_tracking(
            tracking.tenant_id,
            tracking.item_id,
            tracking.tracking_type(),
            &tracking.identifier(),
        )
        .await?
        .ok_or_else(|| {
            StoreError::Storage(format!(
                "tracking conflict on '{}' but no existing row found",
                tracking.identifier()
            ))
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn dimension_fields(
    dimension: &TrackingDimension,
) -> (
    Option<String>,
    Option<String>,
    Option<NaiveDate>,
    Option<NaiveDate>,
) {
    match dimension {
        TrackingDimension::Serial { serial } => (Some(serial.clone()), None, None, None),
        TrackingDimension::SupplierBatch { batch } => (None, Some(batch.clone()), None, None),
        TrackingDimension::Expiration { date } => (None, None, Some(*date), None),
        TrackingDimension::ManufacturingDate { date } => (None, None, None, Some(*date)),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation: CAS race or duplicate natural key.
                Some("23505") => StoreError::Conflict(msg),
                // Check constraint (e.g. quantity >= 0).
                Some("23514") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {operation}")),
        other => StoreError::Storage(format!("error in {operation}: {other}")),
    }
}

// SQLx row types

#[derive(Debug, FromRow)]
struct BalanceRow {
    id: Uuid,
    tenant_id: Uuid,
    item_id: Uuid,
    location_id: Uuid,
    tracking_id: Option<Uuid>,
    status: String,
    quantity: Decimal,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BalanceRow {
    fn into_domain(self) -> Result<InventoryBalance, StoreError> {
        let status = StockStatus::parse(&self.status)
            .map_err(|e| StoreError::Storage(format!("corrupt balance row: {e}")))?;
        Ok(InventoryBalance {
            id: BalanceId::from_uuid(self.id),
            key: BalanceKey {
                tenant_id: TenantId::from_uuid(self.tenant_id),
                item_id: ItemId::from_uuid(self.item_id),
                location_id: stockbook_core::LocationId::from_uuid(self.location_id),
                tracking_id: self.tracking_id.map(TrackingId::from_uuid),
                status,
            },
            quantity: self.quantity,
            version: self.version as u64,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    tenant_id: Uuid,
    occurred_at: DateTime<Utc>,
    transaction_type: String,
    item_id: Uuid,
    quantity: Decimal,
    uom: String,
    location_id: Uuid,
    tracking_id: Option<Uuid>,
    cost_per_unit: Option<Decimal>,
    source_ref_type: Option<String>,
    source_ref_id: Option<Uuid>,
    reason_code: Option<String>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> Result<InventoryTransaction, StoreError> {
        let transaction_type = TransactionType::parse(&self.transaction_type)
            .map_err(|e| StoreError::Storage(format!("corrupt transaction row: {e}")))?;
        let source_ref = match (self.source_ref_type, self.source_ref_id) {
            (Some(ref_type), Some(ref_id)) => Some(SourceRef { ref_type, ref_id }),
            _ => None,
        };
        Ok(InventoryTransaction {
            id: stockbook_core::TransactionId::from_uuid(self.id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            occurred_at: self.occurred_at,
            transaction_type,
            item_id: ItemId::from_uuid(self.item_id),
            quantity: self.quantity,
            uom: self.uom,
            location_id: stockbook_core::LocationId::from_uuid(self.location_id),
            tracking_id: self.tracking_id.map(TrackingId::from_uuid),
            cost_per_unit: self.cost_per_unit,
            source_ref,
            reason_code: self.reason_code,
            idempotency_key: self.idempotency_key,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TrackingRow {
    id: Uuid,
    tenant_id: Uuid,
    item_id: Uuid,
    tracking_type: String,
    identifier: String,
    parent_tracking_id: Option<Uuid>,
    serial_number: Option<String>,
    supplier_batch: Option<String>,
    expiration_date: Option<NaiveDate>,
    manufacturing_date: Option<NaiveDate>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TrackingRow {
    fn into_domain(self) -> Result<InventoryTracking, StoreError> {
        let tracking_type = TrackingType::parse(&self.tracking_type)
            .map_err(|e| StoreError::Storage(format!("corrupt tracking row: {e}")))?;
        let corrupt = || {
            StoreError::Storage(format!(
                "tracking row '{}' is missing its {}-typed field",
                self.identifier, self.tracking_type
            ))
        };
        let dimension = match tracking_type {
            TrackingType::Serial => TrackingDimension::Serial {
                serial: self.serial_number.clone().ok_or_else(corrupt)?,
            },
            TrackingType::SupplierBatch => TrackingDimension::SupplierBatch {
                batch: self.supplier_batch.clone().ok_or_else(corrupt)?,
            },
            TrackingType::Expiration => TrackingDimension::Expiration {
                date: self.expiration_date.ok_or_else(corrupt)?,
            },
            TrackingType::ManufacturingDate => TrackingDimension::ManufacturingDate {
                date: self.manufacturing_date.ok_or_else(corrupt)?,
            },
        };
        let status = TrackingStatus::parse(&self.status)
            .map_err(|e| StoreError::Storage(format!("corrupt tracking row: {e}")))?;
        Ok(InventoryTracking {
            id: TrackingId::from_uuid(self.id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            item_id: ItemId::from_uuid(self.item_id),
            dimension,
            parent_tracking_id: self.parent_tracking_id.map(TrackingId::from_uuid),
            status,
            created_at: self.created_at,
        })
    }
}
