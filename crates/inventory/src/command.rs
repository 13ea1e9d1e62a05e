//! Operation commands: the five inputs the engine accepts, with their
//! self-contained validation (positive quantities, required ids, source ≠
//! destination). Rules that need the item configuration or current stock are
//! enforced later, by the tracking selector and the balance aggregate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{DomainError, DomainResult, ItemId, LocationId};

use crate::tracking::TrackingInput;
use crate::transaction::SourceRef;

/// Direction of a stock adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentDirection {
    #[serde(rename = "ADJUST_IN")]
    In,
    #[serde(rename = "ADJUST_OUT")]
    Out,
}

/// Command: receive stock into a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub cost_per_unit: Option<Decimal>,
    pub uom: Option<String>,
    pub tracking: TrackingInput,
    pub source_ref: Option<SourceRef>,
    pub reason_code: Option<String>,
    pub idempotency_key: Option<String>,
}

impl ReceiveStock {
    pub fn validate(&self) -> DomainResult<()> {
        require_positive_quantity(self.quantity)?;
        if let Some(cost) = self.cost_per_unit {
            if cost < Decimal::ZERO {
                return Err(DomainError::validation("cost_per_unit cannot be negative"));
            }
        }
        validate_idempotency_key(self.idempotency_key.as_deref())
    }
}

/// Command: issue stock out of a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStock {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub tracking: TrackingInput,
    pub source_ref: Option<SourceRef>,
    pub reason_code: Option<String>,
    pub idempotency_key: Option<String>,
}

impl IssueStock {
    pub fn validate(&self) -> DomainResult<()> {
        require_positive_quantity(self.quantity)?;
        validate_idempotency_key(self.idempotency_key.as_deref())
    }
}

/// Command: correct stock up or down (cycle count, damage write-off).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub direction: AdjustmentDirection,
    pub tracking: TrackingInput,
    pub source_ref: Option<SourceRef>,
    pub reason_code: Option<String>,
    pub idempotency_key: Option<String>,
}

impl AdjustStock {
    pub fn validate(&self) -> DomainResult<()> {
        require_positive_quantity(self.quantity)?;
        // A reason code is optional but must carry content when supplied.
        if self.reason_code.as_deref().is_some_and(|r| r.trim().is_empty()) {
            return Err(DomainError::validation("reason code cannot be blank"));
        }
        validate_idempotency_key(self.idempotency_key.as_deref())
    }
}

/// Command: move stock between two locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveStock {
    pub item_id: ItemId,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub quantity: Decimal,
    pub tracking: TrackingInput,
    pub source_ref: Option<SourceRef>,
    pub reason_code: Option<String>,
    pub idempotency_key: Option<String>,
}

impl MoveStock {
    pub fn validate(&self) -> DomainResult<()> {
        require_positive_quantity(self.quantity)?;
        if self.from_location_id == self.to_location_id {
            return Err(DomainError::validation(
                "move source and destination must differ",
            ));
        }
        validate_idempotency_key(self.idempotency_key.as_deref())
    }
}

/// Command: reserve stock (advisory check, no mutation; see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub tracking: TrackingInput,
    pub source_ref: Option<SourceRef>,
}

impl ReserveStock {
    pub fn validate(&self) -> DomainResult<()> {
        require_positive_quantity(self.quantity)
    }
}

fn require_positive_quantity(quantity: Decimal) -> DomainResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation("quantity must be positive"));
    }
    Ok(())
}

fn validate_idempotency_key(key: Option<&str>) -> DomainResult<()> {
    if let Some(key) = key {
        if key.trim().is_empty() {
            return Err(DomainError::validation("idempotency key cannot be blank"));
        }
    }
    Ok(())
}
