//! Item catalog port.
//!
//! The catalog is maintained by another subsystem; the engine only reads item
//! configuration (default UOM, tracking scope/requirements). Lookups are
//! tenant-scoped: an item belonging to another tenant is simply not found.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use stockbook_core::{ItemId, TenantId};
use stockbook_inventory::{Item, ItemType, ItemUsage, TrackingRequirement, TrackingScope};

use crate::store::StoreError;

/// Read-only item lookup.
#[async_trait]
pub trait ItemCatalog: Send + Sync {
    async fn get_by_id(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Option<Item>, StoreError>;
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Clone, Default)]
pub struct InMemoryItemCatalog {
    items: Arc<RwLock<HashMap<(TenantId, ItemId), Item>>>,
}

impl InMemoryItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, item: Item) {
        if let Ok(mut items) = self.items.write() {
            items.insert((item.tenant_id, item.id), item);
        }
    }
}

#[async_trait]
impl ItemCatalog for InMemoryItemCatalog {
    async fn get_by_id(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Option<Item>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        Ok(items.get(&(tenant_id, item_id)).cloned())
    }
}

/// Postgres-backed catalog reading the `items` table the catalog subsystem
/// maintains.
#[derive(Debug, Clone)]
pub struct PostgresItemCatalog {
    pool: Arc<PgPool>,
}

impl PostgresItemCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ItemCatalog for PostgresItemCatalog {
    async fn get_by_id(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Option<Item>, StoreError> {
        let row: Option<ItemRow> = sqlx::query_as(
            "SELECT id, tenant_id, code, name, default_uom, item_type, item_usage, \
                    tracking_scope, tracking_requirements, perishable, active \
             FROM items WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(item_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("database error in get_by_id: {e}")))?;
        row.map(ItemRow::into_domain).transpose()
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: Uuid,
    tenant_id: Uuid,
    code: String,
    name: String,
    default_uom: String,
    item_type: String,
    item_usage: String,
    tracking_scope: String,
    tracking_requirements: Vec<String>,
    perishable: bool,
    active: bool,
}

impl ItemRow {
    fn into_domain(self) -> Result<Item, StoreError> {
        let corrupt = |e: stockbook_core::DomainError| {
            StoreError::Storage(format!("corrupt item row '{}': {e}", self.code))
        };
        Ok(Item {
            id: ItemId::from_uuid(self.id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            code: self.code.clone(),
            name: self.name.clone(),
            default_uom: self.default_uom.clone(),
            item_type: ItemType::parse(&self.item_type).map_err(corrupt)?,
            item_usage: ItemUsage::parse(&self.item_usage).map_err(corrupt)?,
            tracking_scope: TrackingScope::parse(&self.tracking_scope).map_err(corrupt)?,
            tracking_requirements: self
                .tracking_requirements
                .iter()
                .map(|r| TrackingRequirement::parse(r))
                .collect::<Result<_, _>>()
                .map_err(corrupt)?,
            perishable: self.perishable,
            active: self.active,
        })
    }
}
