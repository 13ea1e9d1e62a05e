//! Inventory operation handlers.
//!
//! Each operation runs inside exactly one unit of work: resolve tracking,
//! load or create the balance(s), mutate the aggregate, append the ledger
//! row, commit. A failure anywhere rolls the whole scope back — partial
//! balance or ledger writes are never visible.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use stockbook_core::{
    BalanceId, DomainError, DomainResult, ItemId, LocationId, RequestContext, TenantId,
    TrackingId, TransactionId,
};
use stockbook_inventory::{
    AdjustStock, AdjustmentDirection, BalanceKey, InventoryBalance, InventoryTracking,
    InventoryTransaction, IssueStock, Item, MoveStock, ReceiveStock, ReserveStock,
    TrackingInput, TransactionType,
};

use crate::audit::{AuditEvent, AuditSink};
use crate::catalog::ItemCatalog;
use crate::resolver::resolve_or_create;
use crate::store::r#trait::{InventoryStore, InventoryTx, LedgerAppend, StoreError};

/// Result of a committed (or idempotently replayed) operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub transaction_id: TransactionId,
    /// Source balance first; moves also carry the destination balance.
    pub balance_ids: Vec<BalanceId>,
    /// Quantity the operation applied (the ledger row's quantity).
    pub quantity: Decimal,
}

/// Advisory reservation: an availability check at a point in time.
///
/// Nothing is persisted and no quantity is deducted; a subsequent issue can
/// still fail if stock was consumed in between (see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDescriptor {
    pub reservation_id: Uuid,
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub tracking_id: Option<TrackingId>,
    pub balance_id: BalanceId,
    pub quantity: Decimal,
    pub reserved_at: chrono::DateTime<Utc>,
}

/// The five inventory commands plus the advisory reserve/release pair.
pub struct InventoryService {
    store: Arc<dyn InventoryStore>,
    catalog: Arc<dyn ItemCatalog>,
    audit: Arc<dyn AuditSink>,
}

impl InventoryService {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        catalog: Arc<dyn ItemCatalog>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            catalog,
            audit,
        }
    }

    /// Receive stock into a location, creating the balance on first movement.
    #[instrument(skip(self, ctx, cmd), fields(item_id = %cmd.item_id), err)]
    pub async fn receive(
        &self,
        ctx: &RequestContext,
        cmd: ReceiveStock,
    ) -> DomainResult<OperationOutcome> {
        let tenant_id = ctx.tenant()?;
        cmd.validate()?;
        let item = self.load_item(tenant_id, cmd.item_id).await?;
        let now = Utc::now();

        let mut tx = self.store.begin().await.map_err(DomainError::from)?;
        let tracking = self
            .resolve_tracking(tx.as_mut(), tenant_id, &item, &cmd.tracking)
            .await?;
        let key = BalanceKey::available(
            tenant_id,
            cmd.item_id,
            cmd.location_id,
            tracking.as_ref().map(|t| t.id),
        );

        if let Some(existing) = self
            .find_replay(tx.as_mut(), tenant_id, cmd.idempotency_key.as_deref())
            .await?
        {
            tx.rollback().await.map_err(DomainError::from)?;
            return replay_outcome(self.store.as_ref(), &existing, &[key]).await;
        }

        let (mut balance, created) = load_or_open(tx.as_mut(), &key, now).await?;
        let loaded_version = balance.version;
        balance.receive(cmd.quantity, cmd.cost_per_unit, now)?;
        persist_balance(tx.as_mut(), &balance, created, loaded_version).await?;

        let transaction_id = TransactionId::new();
        let entry = InventoryTransaction::new(
            transaction_id,
            tenant_id,
            TransactionType::Receive,
            cmd.item_id,
            cmd.quantity,
            cmd.uom.unwrap_or_else(|| item.default_uom.clone()),
            cmd.location_id,
            tracking.as_ref().map(|t| t.id),
            now,
        )
        .with_cost(cmd.cost_per_unit)
        .with_source_ref(cmd.source_ref)
        .with_reason_code(cmd.reason_code)
        .with_idempotency_key(cmd.idempotency_key);

        match tx.insert_transaction(&entry).await.map_err(DomainError::from)? {
            LedgerAppend::Inserted(_) => {}
            LedgerAppend::Existing(existing) => {
                // Lost an idempotency race after the dedup check; hand back
                // the winner's result and discard our writes.
                tx.rollback().await.map_err(DomainError::from)?;
                return replay_outcome(self.store.as_ref(), &existing, &[key]).await;
            }
        }

        if let Some(outcome) = self
            .commit_with_replay(tx, tenant_id, entry.idempotency_key.as_deref(), &[key])
            .await?
        {
            return Ok(outcome);
        }
        self.notify_audit("receive", tenant_id, transaction_id, cmd.item_id, cmd.quantity)
            .await;
        Ok(OperationOutcome {
            transaction_id,
            balance_ids: vec![balance.id],
            quantity: cmd.quantity,
        })
    }

    /// Issue stock out of a location.
    #[instrument(skip(self, ctx, cmd), fields(item_id = %cmd.item_id), err)]
    pub async fn issue(
        &self,
        ctx: &RequestContext,
        cmd: IssueStock,
    ) -> DomainResult<OperationOutcome> {
        let tenant_id = ctx.tenant()?;
        cmd.validate()?;
        let item = self.load_item(tenant_id, cmd.item_id).await?;
        let now = Utc::now();

        let mut tx = self.store.begin().await.map_err(DomainError::from)?;
        let tracking = self
            .resolve_tracking(tx.as_mut(), tenant_id, &item, &cmd.tracking)
            .await?;
        let key = BalanceKey::available(
            tenant_id,
            cmd.item_id,
            cmd.location_id,
            tracking.as_ref().map(|t| t.id),
        );

        if let Some(existing) = self
            .find_replay(tx.as_mut(), tenant_id, cmd.idempotency_key.as_deref())
            .await?
        {
            tx.rollback().await.map_err(DomainError::from)?;
            return replay_outcome(self.store.as_ref(), &existing, &[key]).await;
        }

        let mut balance = require_balance(tx.as_mut(), &key).await?;
        let loaded_version = balance.version;
        balance.issue(cmd.quantity, now)?;
        persist_balance(tx.as_mut(), &balance, false, loaded_version).await?;

        let transaction_id = TransactionId::new();
        let entry = InventoryTransaction::new(
            transaction_id,
            tenant_id,
            TransactionType::Issue,
            cmd.item_id,
            cmd.quantity,
            item.default_uom.clone(),
            cmd.location_id,
            tracking.as_ref().map(|t| t.id),
            now,
        )
        .with_source_ref(cmd.source_ref)
        .with_reason_code(cmd.reason_code)
        .with_idempotency_key(cmd.idempotency_key);

        match tx.insert_transaction(&entry).await.map_err(DomainError::from)? {
            LedgerAppend::Inserted(_) => {}
            LedgerAppend::Existing(existing) => {
                tx.rollback().await.map_err(DomainError::from)?;
                return replay_outcome(self.store.as_ref(), &existing, &[key]).await;
            }
        }

        if let Some(outcome) = self
            .commit_with_replay(tx, tenant_id, entry.idempotency_key.as_deref(), &[key])
            .await?
        {
            return Ok(outcome);
        }
        self.notify_audit("issue", tenant_id, transaction_id, cmd.item_id, cmd.quantity)
            .await;
        Ok(OperationOutcome {
            transaction_id,
            balance_ids: vec![balance.id],
            quantity: cmd.quantity,
        })
    }

    /// Adjust stock up or down (cycle count, damage write-off).
    #[instrument(skip(self, ctx, cmd), fields(item_id = %cmd.item_id, direction = ?cmd.direction), err)]
    pub async fn adjust(
        &self,
        ctx: &RequestContext,
        cmd: AdjustStock,
    ) -> DomainResult<OperationOutcome> {
        let tenant_id = ctx.tenant()?;
        cmd.validate()?;
        let item = self.load_item(tenant_id, cmd.item_id).await?;
        let now = Utc::now();

        let mut tx = self.store.begin().await.map_err(DomainError::from)?;
        let tracking = self
            .resolve_tracking(tx.as_mut(), tenant_id, &item, &cmd.tracking)
            .await?;
        let key = BalanceKey::available(
            tenant_id,
            cmd.item_id,
            cmd.location_id,
            tracking.as_ref().map(|t| t.id),
        );

        if let Some(existing) = self
            .find_replay(tx.as_mut(), tenant_id, cmd.idempotency_key.as_deref())
            .await?
        {
            tx.rollback().await.map_err(DomainError::from)?;
            return replay_outcome(self.store.as_ref(), &existing, &[key]).await;
        }

        // Upward adjustments may open a fresh balance; downward ones need
        // existing stock, like an issue.
        let (mut balance, created) = match cmd.direction {
            AdjustmentDirection::In => load_or_open(tx.as_mut(), &key, now).await?,
            AdjustmentDirection::Out => (require_balance(tx.as_mut(), &key).await?, false),
        };
        let loaded_version = balance.version;
        balance.adjust(cmd.quantity, cmd.direction, now)?;
        persist_balance(tx.as_mut(), &balance, created, loaded_version).await?;

        let transaction_type = match cmd.direction {
            AdjustmentDirection::In => TransactionType::AdjustIn,
            AdjustmentDirection::Out => TransactionType::AdjustOut,
        };
        let transaction_id = TransactionId::new();
        let entry = InventoryTransaction::new(
            transaction_id,
            tenant_id,
            transaction_type,
            cmd.item_id,
            cmd.quantity,
            item.default_uom.clone(),
            cmd.location_id,
            tracking.as_ref().map(|t| t.id),
            now,
        )
        .with_source_ref(cmd.source_ref)
        .with_reason_code(cmd.reason_code)
        .with_idempotency_key(cmd.idempotency_key);

        match tx.insert_transaction(&entry).await.map_err(DomainError::from)? {
            LedgerAppend::Inserted(_) => {}
            LedgerAppend::Existing(existing) => {
                tx.rollback().await.map_err(DomainError::from)?;
                return replay_outcome(self.store.as_ref(), &existing, &[key]).await;
            }
        }

        if let Some(outcome) = self
            .commit_with_replay(tx, tenant_id, entry.idempotency_key.as_deref(), &[key])
            .await?
        {
            return Ok(outcome);
        }
        self.notify_audit("adjust", tenant_id, transaction_id, cmd.item_id, cmd.quantity)
            .await;
        Ok(OperationOutcome {
            transaction_id,
            balance_ids: vec![balance.id],
            quantity: cmd.quantity,
        })
    }

    /// Move stock between two locations. The source decrement and the
    /// destination increment are separate aggregates; this one unit of work
    /// is what makes the pair atomic.
    #[instrument(skip(self, ctx, cmd), fields(item_id = %cmd.item_id), err)]
    pub async fn move_stock(
        &self,
        ctx: &RequestContext,
        cmd: MoveStock,
    ) -> DomainResult<OperationOutcome> {
        let tenant_id = ctx.tenant()?;
        cmd.validate()?;
        let item = self.load_item(tenant_id, cmd.item_id).await?;
        let now = Utc::now();

        let mut tx = self.store.begin().await.map_err(DomainError::from)?;
        let tracking = self
            .resolve_tracking(tx.as_mut(), tenant_id, &item, &cmd.tracking)
            .await?;
        let tracking_id = tracking.as_ref().map(|t| t.id);
        let source_key =
            BalanceKey::available(tenant_id, cmd.item_id, cmd.from_location_id, tracking_id);
        let dest_key =
            BalanceKey::available(tenant_id, cmd.item_id, cmd.to_location_id, tracking_id);
        let keys = [source_key, dest_key];

        if let Some(existing) = self
            .find_replay(tx.as_mut(), tenant_id, cmd.idempotency_key.as_deref())
            .await?
        {
            tx.rollback().await.map_err(DomainError::from)?;
            return replay_outcome(self.store.as_ref(), &existing, &keys).await;
        }

        let mut source = require_balance(tx.as_mut(), &source_key).await?;
        let source_version = source.version;
        source.move_out(cmd.quantity, now)?;
        persist_balance(tx.as_mut(), &source, false, source_version).await?;

        let (mut dest, dest_created) = load_or_open(tx.as_mut(), &dest_key, now).await?;
        let dest_version = dest.version;
        dest.receive(cmd.quantity, None, now)?;
        persist_balance(tx.as_mut(), &dest, dest_created, dest_version).await?;

        let transaction_id = TransactionId::new();
        // The single MOVE row records the destination; the source balance is
        // identified through the outcome.
        let entry = InventoryTransaction::new(
            transaction_id,
            tenant_id,
            TransactionType::Move,
            cmd.item_id,
            cmd.quantity,
            item.default_uom.clone(),
            cmd.to_location_id,
            tracking_id,
            now,
        )
        .with_source_ref(cmd.source_ref)
        .with_reason_code(cmd.reason_code)
        .with_idempotency_key(cmd.idempotency_key);

        match tx.insert_transaction(&entry).await.map_err(DomainError::from)? {
            LedgerAppend::Inserted(_) => {}
            LedgerAppend::Existing(existing) => {
                tx.rollback().await.map_err(DomainError::from)?;
                return replay_outcome(self.store.as_ref(), &existing, &keys).await;
            }
        }

        if let Some(outcome) = self
            .commit_with_replay(tx, tenant_id, entry.idempotency_key.as_deref(), &keys)
            .await?
        {
            return Ok(outcome);
        }
        self.notify_audit("move", tenant_id, transaction_id, cmd.item_id, cmd.quantity)
            .await;
        Ok(OperationOutcome {
            transaction_id,
            balance_ids: vec![source.id, dest.id],
            quantity: cmd.quantity,
        })
    }

    /// Advisory reservation: verifies availability without mutating stock.
    #[instrument(skip(self, ctx, cmd), fields(item_id = %cmd.item_id), err)]
    pub async fn reserve(
        &self,
        ctx: &RequestContext,
        cmd: ReserveStock,
    ) -> DomainResult<ReservationDescriptor> {
        let tenant_id = ctx.tenant()?;
        cmd.validate()?;
        let item = self.load_item(tenant_id, cmd.item_id).await?;
        let now = Utc::now();

        // Read-only scope: tracking is looked up, never created, and the
        // scope is always rolled back.
        let mut tx = self.store.begin().await.map_err(DomainError::from)?;
        let dimension = cmd.tracking.select_for_item(&item, now.date_naive())?;
        let tracking_id = match &dimension {
            Some(dim) => {
                let found = tx
                    .find_tracking(tenant_id, cmd.item_id, dim.tracking_type(), &dim.identifier())
                    .await
                    .map_err(DomainError::from)?;
                match found {
                    Some(t) => Some(t.id),
                    None => {
                        tx.rollback().await.map_err(DomainError::from)?;
                        return Err(DomainError::business_rule(
                            "insufficient inventory: tracking dimension has no stock",
                        ));
                    }
                }
            }
            None => None,
        };

        let key = BalanceKey::available(tenant_id, cmd.item_id, cmd.location_id, tracking_id);
        let balance = tx.find_balance(&key).await.map_err(DomainError::from)?;
        tx.rollback().await.map_err(DomainError::from)?;

        let balance = balance.ok_or_else(|| {
            DomainError::business_rule("insufficient inventory: no balance at location")
        })?;
        if balance.available_quantity() < cmd.quantity {
            return Err(DomainError::business_rule(format!(
                "insufficient inventory: requested {}, available {}",
                cmd.quantity,
                balance.available_quantity()
            )));
        }

        Ok(ReservationDescriptor {
            reservation_id: Uuid::now_v7(),
            tenant_id,
            item_id: cmd.item_id,
            location_id: cmd.location_id,
            tracking_id,
            balance_id: balance.id,
            quantity: cmd.quantity,
            reserved_at: now,
        })
    }

    /// Release an advisory reservation. Nothing was deducted, so nothing is
    /// restored; the descriptor is validated and dropped.
    #[instrument(skip(self, ctx, descriptor), err)]
    pub async fn release(
        &self,
        ctx: &RequestContext,
        descriptor: &ReservationDescriptor,
    ) -> DomainResult<()> {
        let tenant_id = ctx.tenant()?;
        if descriptor.tenant_id != tenant_id {
            return Err(DomainError::not_found("reservation"));
        }
        Ok(())
    }

    async fn load_item(&self, tenant_id: TenantId, item_id: ItemId) -> DomainResult<Item> {
        let item = self
            .catalog
            .get_by_id(tenant_id, item_id)
            .await
            .map_err(DomainError::from)?
            .ok_or_else(|| DomainError::not_found(format!("item {item_id}")))?;
        if !item.active {
            return Err(DomainError::business_rule(format!(
                "item {} is not active",
                item.code
            )));
        }
        Ok(item)
    }

    async fn resolve_tracking(
        &self,
        tx: &mut dyn InventoryTx,
        tenant_id: TenantId,
        item: &Item,
        input: &TrackingInput,
    ) -> DomainResult<Option<InventoryTracking>> {
        let now = Utc::now();
        let dimension = input.select_for_item(item, now.date_naive())?;
        match dimension {
            Some(dim) => {
                let record = resolve_or_create(tx, tenant_id, item.id, &dim, now)
                    .await
                    .map_err(DomainError::from)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn find_replay(
        &self,
        tx: &mut dyn InventoryTx,
        tenant_id: TenantId,
        idempotency_key: Option<&str>,
    ) -> DomainResult<Option<InventoryTransaction>> {
        match idempotency_key {
            Some(key) => tx
                .find_transaction_by_idempotency_key(tenant_id, key)
                .await
                .map_err(DomainError::from),
            None => Ok(None),
        }
    }

    /// Commit the unit of work. A conflict caused by a concurrent writer
    /// committing the same idempotency key after our dedup check resolves to
    /// that writer's outcome; every other conflict propagates.
    async fn commit_with_replay(
        &self,
        tx: Box<dyn InventoryTx>,
        tenant_id: TenantId,
        idempotency_key: Option<&str>,
        keys: &[BalanceKey],
    ) -> DomainResult<Option<OperationOutcome>> {
        match tx.commit().await {
            Ok(()) => Ok(None),
            Err(StoreError::Conflict(msg)) => {
                let Some(key) = idempotency_key else {
                    return Err(DomainError::business_rule(msg));
                };
                match self
                    .store
                    .get_transaction_by_idempotency_key(tenant_id, key)
                    .await
                    .map_err(DomainError::from)?
                {
                    Some(existing) => replay_outcome(self.store.as_ref(), &existing, keys)
                        .await
                        .map(Some),
                    None => Err(DomainError::business_rule(msg)),
                }
            }
            Err(other) => Err(DomainError::from(other)),
        }
    }

    async fn notify_audit(
        &self,
        operation: &'static str,
        tenant_id: TenantId,
        transaction_id: TransactionId,
        item_id: ItemId,
        quantity: Decimal,
    ) {
        let event = AuditEvent {
            tenant_id,
            operation,
            transaction_id,
            item_id,
            quantity,
        };
        if let Err(error) = self.audit.record(event).await {
            warn!(%error, operation, "audit sink failed; operation outcome is unaffected");
        }
    }
}

async fn load_or_open(
    tx: &mut dyn InventoryTx,
    key: &BalanceKey,
    now: chrono::DateTime<Utc>,
) -> DomainResult<(InventoryBalance, bool)> {
    match tx.find_balance(key).await.map_err(DomainError::from)? {
        Some(balance) => Ok((balance, false)),
        None => Ok((InventoryBalance::open(*key, now), true)),
    }
}

async fn persist_balance(
    tx: &mut dyn InventoryTx,
    balance: &InventoryBalance,
    created: bool,
    expected_version: u64,
) -> DomainResult<()> {
    if created {
        tx.insert_balance(balance).await.map_err(DomainError::from)
    } else {
        tx.update_balance(balance, expected_version)
            .await
            .map_err(DomainError::from)
    }
}

async fn require_balance(
    tx: &mut dyn InventoryTx,
    key: &BalanceKey,
) -> DomainResult<InventoryBalance> {
    tx.find_balance(key)
        .await
        .map_err(DomainError::from)?
        .ok_or_else(|| {
            DomainError::business_rule("insufficient inventory: no balance at location")
        })
}

/// Rebuild the outcome of a previously committed transaction so a retried
/// request observes exactly what the first attempt returned, including every
/// balance the operation touched.
async fn replay_outcome(
    store: &dyn InventoryStore,
    existing: &InventoryTransaction,
    keys: &[BalanceKey],
) -> DomainResult<OperationOutcome> {
    let mut balance_ids = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(balance) = store.get_balance(key).await.map_err(DomainError::from)? {
            balance_ids.push(balance.id);
        }
    }
    Ok(OperationOutcome {
        transaction_id: existing.id,
        balance_ids,
        quantity: existing.quantity,
    })
}
