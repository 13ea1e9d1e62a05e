//! Tracking resolver: idempotent get-or-create of tracking identity records.
//!
//! Lookup by natural key first; on a miss, a conflict-tolerant insert. Two
//! concurrent first references to the same (tenant, item, type, identifier)
//! both end up holding the same record — the race never propagates.

use chrono::{DateTime, Utc};
use tracing::debug;

use stockbook_core::{ItemId, TenantId};
use stockbook_inventory::{InventoryTracking, TrackingDimension};

use crate::store::r#trait::{InventoryTx, StoreError};

/// Resolve the tracking record for a dimension, creating it on first
/// reference.
pub async fn resolve_or_create(
    tx: &mut dyn InventoryTx,
    tenant_id: TenantId,
    item_id: ItemId,
    dimension: &TrackingDimension,
    now: DateTime<Utc>,
) -> Result<InventoryTracking, StoreError> {
    let identifier = dimension.identifier();
    if let Some(existing) = tx
        .find_tracking(tenant_id, item_id, dimension.tracking_type(), &identifier)
        .await?
    {
        return Ok(existing);
    }

    debug!(
        tenant_id = %tenant_id,
        item_id = %item_id,
        tracking_type = dimension.tracking_type().as_str(),
        identifier = %identifier,
        "creating tracking record on first reference"
    );
    let candidate = InventoryTracking::new(tenant_id, item_id, dimension.clone(), now);
    // insert_tracking returns the stored record, ours or a racing winner's.
    tx.insert_tracking(&candidate).await
}
