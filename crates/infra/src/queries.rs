//! Read-side queries over the store's snapshot reads.
//!
//! Queries never open a unit of work; they observe committed state only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::instrument;
use uuid::Uuid;

use stockbook_core::{BalanceId, DomainError, DomainResult, ItemId, LocationId, RequestContext, TrackingId};
use stockbook_inventory::{BalanceKey, InventoryBalance, InventoryTracking, InventoryTransaction};

use crate::store::r#trait::InventoryStore;

pub struct InventoryQueries {
    store: Arc<dyn InventoryStore>,
}

impl InventoryQueries {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Balance for a specific (item, location, tracking) key, if one exists.
    #[instrument(skip(self, ctx), err)]
    pub async fn get_balance(
        &self,
        ctx: &RequestContext,
        item_id: ItemId,
        location_id: LocationId,
        tracking_id: Option<TrackingId>,
    ) -> DomainResult<Option<InventoryBalance>> {
        let tenant_id = ctx.tenant()?;
        let key = BalanceKey::available(tenant_id, item_id, location_id, tracking_id);
        self.store
            .get_balance(&key)
            .await
            .map_err(DomainError::from)
    }

    /// Available quantity at a key; zero when no balance exists.
    #[instrument(skip(self, ctx), err)]
    pub async fn get_available_quantity(
        &self,
        ctx: &RequestContext,
        item_id: ItemId,
        location_id: LocationId,
        tracking_id: Option<TrackingId>,
    ) -> DomainResult<Decimal> {
        let balance = self
            .get_balance(ctx, item_id, location_id, tracking_id)
            .await?;
        Ok(balance
            .map(|b| b.available_quantity())
            .unwrap_or(Decimal::ZERO))
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn get_balance_by_id(
        &self,
        ctx: &RequestContext,
        balance_id: BalanceId,
    ) -> DomainResult<Option<InventoryBalance>> {
        let tenant_id = ctx.tenant()?;
        self.store
            .get_balance_by_id(tenant_id, balance_id)
            .await
            .map_err(DomainError::from)
    }

    /// All balances of an item across locations and tracking records.
    #[instrument(skip(self, ctx), err)]
    pub async fn get_balances_by_item(
        &self,
        ctx: &RequestContext,
        item_id: ItemId,
    ) -> DomainResult<Vec<InventoryBalance>> {
        let tenant_id = ctx.tenant()?;
        self.store
            .get_balances_by_item(tenant_id, item_id)
            .await
            .map_err(DomainError::from)
    }

    /// Ledger history of an item, most recent first.
    #[instrument(skip(self, ctx), err)]
    pub async fn get_transaction_history(
        &self,
        ctx: &RequestContext,
        item_id: ItemId,
    ) -> DomainResult<Vec<InventoryTransaction>> {
        let tenant_id = ctx.tenant()?;
        self.store
            .get_transactions_by_item(tenant_id, item_id)
            .await
            .map_err(DomainError::from)
    }

    /// Ledger rows caused by a source document (order, ticket, count).
    #[instrument(skip(self, ctx), err)]
    pub async fn get_transactions_by_reference(
        &self,
        ctx: &RequestContext,
        ref_type: &str,
        ref_id: Uuid,
    ) -> DomainResult<Vec<InventoryTransaction>> {
        let tenant_id = ctx.tenant()?;
        self.store
            .get_transactions_by_reference(tenant_id, ref_type, ref_id)
            .await
            .map_err(DomainError::from)
    }

    /// Ledger rows whose `occurred_at` falls within `[from, to)`.
    #[instrument(skip(self, ctx), err)]
    pub async fn get_transactions_by_date_range(
        &self,
        ctx: &RequestContext,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<InventoryTransaction>> {
        let tenant_id = ctx.tenant()?;
        self.store
            .get_transactions_by_date_range(tenant_id, from, to)
            .await
            .map_err(DomainError::from)
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn get_tracking(
        &self,
        ctx: &RequestContext,
        tracking_id: TrackingId,
    ) -> DomainResult<Option<InventoryTracking>> {
        let tenant_id = ctx.tenant()?;
        self.store
            .get_tracking_by_id(tenant_id, tracking_id)
            .await
            .map_err(DomainError::from)
    }
}
