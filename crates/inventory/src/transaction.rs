//! Ledger entries: immutable records of inventory-affecting events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockbook_core::{DomainError, DomainResult, Entity, ItemId, LocationId, TenantId, TrackingId, TransactionId};

/// Kind of inventory movement a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Receive,
    Issue,
    Move,
    AdjustIn,
    AdjustOut,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Receive => "RECEIVE",
            TransactionType::Issue => "ISSUE",
            TransactionType::Move => "MOVE",
            TransactionType::AdjustIn => "ADJUST_IN",
            TransactionType::AdjustOut => "ADJUST_OUT",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "RECEIVE" => Ok(TransactionType::Receive),
            "ISSUE" => Ok(TransactionType::Issue),
            "MOVE" => Ok(TransactionType::Move),
            "ADJUST_IN" => Ok(TransactionType::AdjustIn),
            "ADJUST_OUT" => Ok(TransactionType::AdjustOut),
            other => Err(DomainError::validation(format!(
                "unknown transaction type: {other}"
            ))),
        }
    }
}

/// Reference to the document that caused a movement (order, ticket, count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub ref_type: String,
    pub ref_id: Uuid,
}

/// One ledger row. Immutable after creation.
///
/// When `idempotency_key` is present it identifies at most one transaction
/// per tenant across retries; the storage layer deduplicates on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: TransactionId,
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
    pub transaction_type: TransactionType,
    pub item_id: ItemId,
    pub quantity: Decimal,
    pub uom: String,
    pub location_id: LocationId,
    pub tracking_id: Option<TrackingId>,
    pub cost_per_unit: Option<Decimal>,
    pub source_ref: Option<SourceRef>,
    pub reason_code: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InventoryTransaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TransactionId,
        tenant_id: TenantId,
        transaction_type: TransactionType,
        item_id: ItemId,
        quantity: Decimal,
        uom: String,
        location_id: LocationId,
        tracking_id: Option<TrackingId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            occurred_at: now,
            transaction_type,
            item_id,
            quantity,
            uom,
            location_id,
            tracking_id,
            cost_per_unit: None,
            source_ref: None,
            reason_code: None,
            idempotency_key: None,
            created_at: now,
        }
    }

    pub fn with_cost(mut self, cost_per_unit: Option<Decimal>) -> Self {
        self.cost_per_unit = cost_per_unit;
        self
    }

    pub fn with_source_ref(mut self, source_ref: Option<SourceRef>) -> Self {
        self.source_ref = source_ref;
        self
    }

    pub fn with_reason_code(mut self, reason_code: Option<String>) -> Self {
        self.reason_code = reason_code;
        self
    }

    pub fn with_idempotency_key(mut self, idempotency_key: Option<String>) -> Self {
        self.idempotency_key = idempotency_key;
        self
    }
}

impl Entity for InventoryTransaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
