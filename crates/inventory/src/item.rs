//! Catalog item metadata (external entity, referenced read-only).
//!
//! The item catalog itself is maintained elsewhere; the inventory engine only
//! consumes item configuration to decide which tracking dimensions an
//! operation must carry.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use stockbook_core::{DomainError, DomainResult, Entity, ItemId, TenantId};

/// Broad classification of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Good,
    RawMaterial,
    FinishedGood,
    Service,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Good => "good",
            ItemType::RawMaterial => "raw_material",
            ItemType::FinishedGood => "finished_good",
            ItemType::Service => "service",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "good" => Ok(ItemType::Good),
            "raw_material" => Ok(ItemType::RawMaterial),
            "finished_good" => Ok(ItemType::FinishedGood),
            "service" => Ok(ItemType::Service),
            other => Err(DomainError::validation(format!("unknown item_type: {other}"))),
        }
    }
}

/// How the item participates in stock flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemUsage {
    Stock,
    Consumable,
    Resale,
}

impl ItemUsage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemUsage::Stock => "stock",
            ItemUsage::Consumable => "consumable",
            ItemUsage::Resale => "resale",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "stock" => Ok(ItemUsage::Stock),
            "consumable" => Ok(ItemUsage::Consumable),
            "resale" => Ok(ItemUsage::Resale),
            other => Err(DomainError::validation(format!("unknown item_usage: {other}"))),
        }
    }
}

/// Granularity at which the item's stock is subdivided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingScope {
    None,
    Lot,
    Serial,
    Full,
}

impl TrackingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingScope::None => "none",
            TrackingScope::Lot => "lot",
            TrackingScope::Serial => "serial",
            TrackingScope::Full => "full",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "none" => Ok(TrackingScope::None),
            "lot" => Ok(TrackingScope::Lot),
            "serial" => Ok(TrackingScope::Serial),
            "full" => Ok(TrackingScope::Full),
            other => Err(DomainError::validation(format!(
                "unknown tracking_scope: {other}"
            ))),
        }
    }
}

/// A tracking dimension the item mandates on every stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingRequirement {
    Serial,
    Expiration,
    ManufacturingDate,
    SupplierBatch,
    /// Any supplied dimension satisfies this tag; merging several dimensions
    /// into one record is deliberately not implemented (see DESIGN.md).
    Combined,
}

impl TrackingRequirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingRequirement::Serial => "serial",
            TrackingRequirement::Expiration => "expiration",
            TrackingRequirement::ManufacturingDate => "manufacturing_date",
            TrackingRequirement::SupplierBatch => "supplier_batch",
            TrackingRequirement::Combined => "combined",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "serial" => Ok(TrackingRequirement::Serial),
            "expiration" => Ok(TrackingRequirement::Expiration),
            "manufacturing_date" => Ok(TrackingRequirement::ManufacturingDate),
            "supplier_batch" => Ok(TrackingRequirement::SupplierBatch),
            "combined" => Ok(TrackingRequirement::Combined),
            other => Err(DomainError::validation(format!(
                "unknown tracking_requirement: {other}"
            ))),
        }
    }
}

/// Catalog item (read-only collaborator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub default_uom: String,
    pub item_type: ItemType,
    pub item_usage: ItemUsage,
    pub tracking_scope: TrackingScope,
    pub tracking_requirements: BTreeSet<TrackingRequirement>,
    pub perishable: bool,
    pub active: bool,
}

impl Item {
    /// Check configuration invariants.
    ///
    /// Items arrive from the external catalog; a misconfigured item is a
    /// business-rule failure for the operation referencing it, not a panic.
    pub fn validate(&self) -> DomainResult<()> {
        if self.code.trim().is_empty() {
            return Err(DomainError::validation("item code cannot be empty"));
        }
        if self.tracking_scope == TrackingScope::None && !self.tracking_requirements.is_empty() {
            return Err(DomainError::business_rule(
                "item with tracking_scope=none must not declare tracking requirements",
            ));
        }
        if self.item_type == ItemType::Service && self.tracking_enabled() {
            return Err(DomainError::business_rule(
                "service items cannot carry stock tracking",
            ));
        }
        let stocked_perishable = self.perishable
            && matches!(self.item_type, ItemType::RawMaterial | ItemType::FinishedGood);
        if stocked_perishable && !self.requires(TrackingRequirement::Expiration) {
            return Err(DomainError::business_rule(
                "perishable stocked items must require expiration tracking",
            ));
        }
        Ok(())
    }

    pub fn tracking_enabled(&self) -> bool {
        self.tracking_scope != TrackingScope::None
    }

    pub fn requires(&self, requirement: TrackingRequirement) -> bool {
        self.tracking_requirements.contains(&requirement)
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_item() -> Item {
        Item {
            id: ItemId::new(),
            tenant_id: TenantId::new(),
            code: "WID-001".to_string(),
            name: "Widget".to_string(),
            default_uom: "EA".to_string(),
            item_type: ItemType::Good,
            item_usage: ItemUsage::Stock,
            tracking_scope: TrackingScope::None,
            tracking_requirements: BTreeSet::new(),
            perishable: false,
            active: true,
        }
    }

    #[test]
    fn untracked_item_is_valid() {
        assert!(base_item().validate().is_ok());
    }

    #[test]
    fn scope_none_with_requirements_is_rejected() {
        let mut item = base_item();
        item.tracking_requirements.insert(TrackingRequirement::Serial);
        let err = item.validate().unwrap_err();
        assert!(matches!(err, DomainError::BusinessRule(_)));
    }

    #[test]
    fn service_item_with_tracking_is_rejected() {
        let mut item = base_item();
        item.item_type = ItemType::Service;
        item.tracking_scope = TrackingScope::Serial;
        item.tracking_requirements.insert(TrackingRequirement::Serial);
        assert!(item.validate().is_err());
    }

    #[test]
    fn perishable_finished_good_requires_expiration() {
        let mut item = base_item();
        item.item_type = ItemType::FinishedGood;
        item.perishable = true;
        item.tracking_scope = TrackingScope::Lot;
        item.tracking_requirements.insert(TrackingRequirement::SupplierBatch);
        assert!(item.validate().is_err());

        item.tracking_requirements.insert(TrackingRequirement::Expiration);
        assert!(item.validate().is_ok());
    }
}
