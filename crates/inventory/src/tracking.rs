//! Tracking dimensions: lot/serial/batch/expiration identity below
//! item+location granularity.
//!
//! A dimension is a sum type; the field each variant needs exists by
//! construction, so a tracking record can never be missing its serial or its
//! date. Identifiers are canonical (uppercase, trimmed; date variants derive
//! `EXP-<date>` / `MFG-<date>`) and unique per (tenant, item, tracking_type).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockbook_core::{DomainError, DomainResult, Entity, ItemId, TenantId, TrackingId};

use crate::item::{Item, TrackingRequirement};

/// Discriminant of a tracking dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingType {
    Serial,
    SupplierBatch,
    Expiration,
    ManufacturingDate,
}

impl TrackingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingType::Serial => "serial",
            TrackingType::SupplierBatch => "supplier_batch",
            TrackingType::Expiration => "expiration",
            TrackingType::ManufacturingDate => "manufacturing_date",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "serial" => Ok(TrackingType::Serial),
            "supplier_batch" => Ok(TrackingType::SupplierBatch),
            "expiration" => Ok(TrackingType::Expiration),
            "manufacturing_date" => Ok(TrackingType::ManufacturingDate),
            other => Err(DomainError::validation(format!(
                "unknown tracking_type: {other}"
            ))),
        }
    }
}

/// One tracking identity. Required fields are enforced at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingDimension {
    Serial { serial: String },
    SupplierBatch { batch: String },
    Expiration { date: NaiveDate },
    ManufacturingDate { date: NaiveDate },
}

impl TrackingDimension {
    /// Serial number dimension. The value is canonicalized (trimmed,
    /// uppercased) before it becomes an identifier.
    pub fn serial(value: &str) -> DomainResult<Self> {
        let canonical = canonicalize(value)?;
        Ok(TrackingDimension::Serial { serial: canonical })
    }

    /// Supplier batch dimension, canonicalized like serials.
    pub fn supplier_batch(value: &str) -> DomainResult<Self> {
        let canonical = canonicalize(value)?;
        Ok(TrackingDimension::SupplierBatch { batch: canonical })
    }

    pub fn expiration(date: NaiveDate) -> Self {
        TrackingDimension::Expiration { date }
    }

    pub fn manufacturing(date: NaiveDate) -> Self {
        TrackingDimension::ManufacturingDate { date }
    }

    pub fn tracking_type(&self) -> TrackingType {
        match self {
            TrackingDimension::Serial { .. } => TrackingType::Serial,
            TrackingDimension::SupplierBatch { .. } => TrackingType::SupplierBatch,
            TrackingDimension::Expiration { .. } => TrackingType::Expiration,
            TrackingDimension::ManufacturingDate { .. } => TrackingType::ManufacturingDate,
        }
    }

    /// Canonical identifier, unique per (tenant, item, tracking_type).
    ///
    /// Date variants derive it deterministically so two receipts of the same
    /// expiry date land on the same tracking record.
    pub fn identifier(&self) -> String {
        match self {
            TrackingDimension::Serial { serial } => serial.clone(),
            TrackingDimension::SupplierBatch { batch } => batch.clone(),
            TrackingDimension::Expiration { date } => format!("EXP-{date}"),
            TrackingDimension::ManufacturingDate { date } => format!("MFG-{date}"),
        }
    }
}

fn canonicalize(value: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("tracking identifier cannot be empty"));
    }
    Ok(trimmed.to_uppercase())
}

/// Raw tracking fields as they arrive on an operation.
///
/// At most one dimension attaches per operation, chosen by priority
/// serial > supplier_batch > expiration > manufacturing_date.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackingInput {
    pub serial: Option<String>,
    pub supplier_batch: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub manufacturing_date: Option<NaiveDate>,
}

impl TrackingInput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.serial.is_none()
            && self.supplier_batch.is_none()
            && self.expiration_date.is_none()
            && self.manufacturing_date.is_none()
    }

    /// Validate this input against the item's configuration and select the
    /// dimension to attach.
    ///
    /// - tracking supplied on an untracked item is a validation error;
    /// - every requirement the item mandates must be supplied (even when a
    ///   higher-priority dimension is the one that attaches);
    /// - expiration dates must not be in the past (relative to `today`).
    pub fn select_for_item(
        &self,
        item: &Item,
        today: NaiveDate,
    ) -> DomainResult<Option<TrackingDimension>> {
        item.validate()?;

        if !item.tracking_enabled() {
            if self.is_empty() {
                return Ok(None);
            }
            return Err(DomainError::validation(
                "tracking supplied but item does not use tracking",
            ));
        }

        for requirement in &item.tracking_requirements {
            let satisfied = match requirement {
                TrackingRequirement::Serial => self.serial.is_some(),
                TrackingRequirement::Expiration => self.expiration_date.is_some(),
                TrackingRequirement::ManufacturingDate => self.manufacturing_date.is_some(),
                TrackingRequirement::SupplierBatch => self.supplier_batch.is_some(),
                TrackingRequirement::Combined => !self.is_empty(),
            };
            if !satisfied {
                return Err(DomainError::validation(format!(
                    "item requires {} tracking but none was supplied",
                    requirement.as_str()
                )));
            }
        }

        if let Some(date) = self.expiration_date {
            if date < today {
                return Err(DomainError::validation(format!(
                    "expiration date {date} is in the past"
                )));
            }
        }

        // Priority order; exactly one dimension attaches.
        if let Some(serial) = &self.serial {
            return TrackingDimension::serial(serial).map(Some);
        }
        if let Some(batch) = &self.supplier_batch {
            return TrackingDimension::supplier_batch(batch).map(Some);
        }
        if let Some(date) = self.expiration_date {
            return Ok(Some(TrackingDimension::expiration(date)));
        }
        if let Some(date) = self.manufacturing_date {
            return Ok(Some(TrackingDimension::manufacturing(date)));
        }

        Ok(None)
    }
}

/// Lifecycle status of a tracking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Active,
    Expired,
    Blocked,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Active => "active",
            TrackingStatus::Expired => "expired",
            TrackingStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "active" => Ok(TrackingStatus::Active),
            "expired" => Ok(TrackingStatus::Expired),
            "blocked" => Ok(TrackingStatus::Blocked),
            other => Err(DomainError::validation(format!(
                "unknown tracking status: {other}"
            ))),
        }
    }
}

/// Persisted tracking identity record.
///
/// Created lazily on first reference, never deleted; only `status` moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTracking {
    pub id: TrackingId,
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub dimension: TrackingDimension,
    pub parent_tracking_id: Option<TrackingId>,
    pub status: TrackingStatus,
    pub created_at: DateTime<Utc>,
}

impl InventoryTracking {
    pub fn new(
        tenant_id: TenantId,
        item_id: ItemId,
        dimension: TrackingDimension,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TrackingId::new(),
            tenant_id,
            item_id,
            dimension,
            parent_tracking_id: None,
            status: TrackingStatus::Active,
            created_at: now,
        }
    }

    pub fn tracking_type(&self) -> TrackingType {
        self.dimension.tracking_type()
    }

    pub fn identifier(&self) -> String {
        self.dimension.identifier()
    }

    /// Transition to expired. Records are never deleted; an expired lot keeps
    /// its history and its balances.
    pub fn mark_expired(&mut self) -> DomainResult<()> {
        match self.status {
            TrackingStatus::Active | TrackingStatus::Blocked => {
                self.status = TrackingStatus::Expired;
                Ok(())
            }
            TrackingStatus::Expired => Err(DomainError::business_rule(
                "tracking record is already expired",
            )),
        }
    }
}

impl Entity for InventoryTracking {
    type Id = TrackingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
