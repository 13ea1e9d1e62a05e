//! Balance aggregate: on-hand quantity per (tenant, item, location,
//! tracking, status) key, optimistically versioned.
//!
//! The aggregate is pure: it validates and mutates in memory. The
//! compare-and-swap against the stored version happens at the storage
//! boundary (conditional update on id+version); a mismatch there fails the
//! whole operation and is never retried automatically.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{BalanceId, DomainError, DomainResult, Entity, ItemId, LocationId, TenantId, TrackingId};

use crate::command::AdjustmentDirection;

/// Stock status dimension of a balance key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Available,
    Quarantine,
    Damaged,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Available => "available",
            StockStatus::Quarantine => "quarantine",
            StockStatus::Damaged => "damaged",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "available" => Ok(StockStatus::Available),
            "quarantine" => Ok(StockStatus::Quarantine),
            "damaged" => Ok(StockStatus::Damaged),
            other => Err(DomainError::validation(format!(
                "unknown stock status: {other}"
            ))),
        }
    }
}

/// Identity key of a balance. At most one balance exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub tracking_id: Option<TrackingId>,
    pub status: StockStatus,
}

impl BalanceKey {
    pub fn available(
        tenant_id: TenantId,
        item_id: ItemId,
        location_id: LocationId,
        tracking_id: Option<TrackingId>,
    ) -> Self {
        Self {
            tenant_id,
            item_id,
            location_id,
            tracking_id,
            status: StockStatus::Available,
        }
    }
}

/// Mutable on-hand quantity record.
///
/// Created on first movement into a key, mutated on every operation, never
/// deleted; a balance may rest at zero indefinitely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryBalance {
    pub id: BalanceId,
    pub key: BalanceKey,
    pub quantity: Decimal,
    /// Monotonic; bumped by every successful mutation. The storage layer
    /// conditions its UPDATE on the pre-mutation value.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryBalance {
    /// Open a zero-quantity balance for a key that has no row yet.
    pub fn open(key: BalanceKey, now: DateTime<Utc>) -> Self {
        Self {
            id: BalanceId::new(),
            key,
            quantity: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Quantity available to new operations.
    ///
    /// Reservations are advisory-only and do not deduct from this figure
    /// (see DESIGN.md); today this is simply the on-hand quantity.
    pub fn available_quantity(&self) -> Decimal {
        self.quantity
    }

    /// Increase on-hand quantity.
    pub fn receive(
        &mut self,
        quantity: Decimal,
        cost_per_unit: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        require_positive(quantity)?;
        if let Some(cost) = cost_per_unit {
            if cost < Decimal::ZERO {
                return Err(DomainError::validation("cost_per_unit cannot be negative"));
            }
        }
        self.quantity += quantity;
        self.touch(now);
        Ok(())
    }

    /// Decrease on-hand quantity; never below zero.
    pub fn issue(&mut self, quantity: Decimal, now: DateTime<Utc>) -> DomainResult<()> {
        require_positive(quantity)?;
        if quantity > self.quantity {
            return Err(DomainError::business_rule(format!(
                "insufficient quantity: requested {quantity}, available {}",
                self.quantity
            )));
        }
        self.quantity -= quantity;
        self.touch(now);
        Ok(())
    }

    /// Signed adjustment; delegates to receive/issue.
    pub fn adjust(
        &mut self,
        quantity: Decimal,
        direction: AdjustmentDirection,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        match direction {
            AdjustmentDirection::In => self.receive(quantity, None, now),
            AdjustmentDirection::Out => self.issue(quantity, now),
        }
    }

    /// Outbound half of a move. The inbound increment happens on a separate
    /// aggregate instance; only the unit of work makes the pair atomic.
    pub fn move_out(&mut self, quantity: Decimal, now: DateTime<Utc>) -> DomainResult<()> {
        self.issue(quantity, now)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

fn require_positive(quantity: Decimal) -> DomainResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation("quantity must be positive"));
    }
    Ok(())
}

impl Entity for InventoryBalance {
    type Id = BalanceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn test_key() -> BalanceKey {
        BalanceKey::available(TenantId::new(), ItemId::new(), LocationId::new(), None)
    }

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn receive_then_issue_tracks_quantity_and_version() {
        let mut balance = InventoryBalance::open(test_key(), Utc::now());
        balance.receive(dec(10), Some(dec(2)), Utc::now()).unwrap();
        balance.issue(dec(4), Utc::now()).unwrap();
        assert_eq!(balance.quantity, dec(6));
        assert_eq!(balance.version, 2);
    }

    #[test]
    fn receive_rejects_non_positive_quantity() {
        let mut balance = InventoryBalance::open(test_key(), Utc::now());
        assert!(matches!(
            balance.receive(dec(0), None, Utc::now()),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            balance.receive(dec(-1), None, Utc::now()),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(balance.version, 0);
    }

    #[test]
    fn receive_rejects_negative_cost() {
        let mut balance = InventoryBalance::open(test_key(), Utc::now());
        assert!(balance.receive(dec(1), Some(dec(-1)), Utc::now()).is_err());
    }

    #[test]
    fn issue_beyond_available_is_a_business_rule_error() {
        let mut balance = InventoryBalance::open(test_key(), Utc::now());
        balance.receive(dec(6), None, Utc::now()).unwrap();
        let err = balance.issue(dec(100), Utc::now()).unwrap_err();
        match err {
            DomainError::BusinessRule(msg) => assert!(msg.contains("insufficient quantity")),
            other => panic!("expected business rule error, got {other:?}"),
        }
        // Failed mutation leaves state untouched.
        assert_eq!(balance.quantity, dec(6));
        assert_eq!(balance.version, 1);
    }

    #[test]
    fn adjust_delegates_by_direction() {
        let mut balance = InventoryBalance::open(test_key(), Utc::now());
        balance.adjust(dec(5), AdjustmentDirection::In, Utc::now()).unwrap();
        balance.adjust(dec(3), AdjustmentDirection::Out, Utc::now()).unwrap();
        assert_eq!(balance.quantity, dec(2));
        assert_eq!(balance.version, 2);
    }

    #[test]
    fn move_out_requires_sufficient_quantity() {
        let mut balance = InventoryBalance::open(test_key(), Utc::now());
        balance.receive(dec(3), None, Utc::now()).unwrap();
        assert!(balance.move_out(dec(4), Utc::now()).is_err());
        balance.move_out(dec(3), Utc::now()).unwrap();
        assert_eq!(balance.quantity, Decimal::ZERO);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Receive(u32),
        Issue(u32),
        AdjustIn(u32),
        AdjustOut(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1..1000u32).prop_map(Op::Receive),
            (1..1000u32).prop_map(Op::Issue),
            (1..1000u32).prop_map(Op::AdjustIn),
            (1..1000u32).prop_map(Op::AdjustOut),
        ]
    }

    proptest! {
        /// No sequence of operations can drive a balance negative; every
        /// accepted mutation bumps the version exactly once.
        #[test]
        fn quantity_never_goes_negative(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut balance = InventoryBalance::open(test_key(), Utc::now());
            let mut accepted = 0u64;
            for op in ops {
                let result = match op {
                    Op::Receive(q) => balance.receive(Decimal::from(q), None, Utc::now()),
                    Op::Issue(q) => balance.issue(Decimal::from(q), Utc::now()),
                    Op::AdjustIn(q) => balance.adjust(Decimal::from(q), AdjustmentDirection::In, Utc::now()),
                    Op::AdjustOut(q) => balance.adjust(Decimal::from(q), AdjustmentDirection::Out, Utc::now()),
                };
                if result.is_ok() {
                    accepted += 1;
                }
                prop_assert!(balance.quantity >= Decimal::ZERO);
            }
            prop_assert_eq!(balance.version, accepted);
        }
    }
}
