//! End-to-end operation tests against the in-memory store.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use stockbook_core::{
    BalanceId, DomainError, ItemId, LocationId, RequestContext, TenantId, TrackingId,
    TransactionId,
};
use stockbook_inventory::{
    AdjustStock, AdjustmentDirection, BalanceKey, InventoryBalance, InventoryTracking,
    InventoryTransaction, IssueStock, Item, ItemType, ItemUsage, MoveStock, ReceiveStock,
    ReserveStock, TrackingInput, TrackingRequirement, TrackingScope, TrackingType,
    TransactionType,
};

use crate::audit::{FailingAuditSink, RecordingAuditSink};
use crate::catalog::InMemoryItemCatalog;
use crate::handlers::InventoryService;
use crate::queries::InventoryQueries;
use crate::store::in_memory::InMemoryInventoryStore;
use crate::store::r#trait::{InventoryStore, InventoryTx, LedgerAppend, StoreError};

fn dec(v: i64) -> Decimal {
    Decimal::from(v)
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn plain_item(tenant_id: TenantId) -> Item {
    Item {
        id: ItemId::new(),
        tenant_id,
        code: "WIDGET".to_string(),
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

fn perishable_item(tenant_id: TenantId) -> Item {
    Item {
        code: "SERUM".to_string(),
        name: "Serum".to_string(),
        item_type: ItemType::Good,
        tracking_scope: TrackingScope::Lot,
        tracking_requirements: [TrackingRequirement::Expiration].into_iter().collect(),
        perishable: true,
        ..plain_item(tenant_id)
    }
}

struct Harness {
    service: InventoryService,
    queries: InventoryQueries,
    catalog: InMemoryItemCatalog,
    audit: RecordingAuditSink,
}

fn harness() -> Harness {
    let store = InMemoryInventoryStore::new();
    let catalog = InMemoryItemCatalog::new();
    let audit = RecordingAuditSink::new();
    let service = InventoryService::new(
        Arc::new(store.clone()),
        Arc::new(catalog.clone()),
        Arc::new(audit.clone()),
    );
    let queries = InventoryQueries::new(Arc::new(store.clone()));
    Harness {
        service,
        queries,
        catalog,
        audit,
    }
}

fn receive_cmd(item: &Item, location_id: LocationId, quantity: Decimal) -> ReceiveStock {
    ReceiveStock {
        item_id: item.id,
        location_id,
        quantity,
        cost_per_unit: None,
        uom: None,
        tracking: TrackingInput::none(),
        source_ref: None,
        reason_code: None,
        idempotency_key: None,
    }
}

fn issue_cmd(item: &Item, location_id: LocationId, quantity: Decimal) -> IssueStock {
    IssueStock {
        item_id: item.id,
        location_id,
        quantity,
        tracking: TrackingInput::none(),
        source_ref: None,
        reason_code: None,
        idempotency_key: None,
    }
}

#[tokio::test]
async fn receive_then_issue_updates_balance_and_ledger() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    h.catalog.put(item.clone());
    let location = LocationId::new();

    let mut cmd = receive_cmd(&item, location, dec(10));
    cmd.cost_per_unit = Some(dec(2));
    let received = h.service.receive(&ctx, cmd).await.unwrap();
    assert_eq!(received.quantity, dec(10));

    let issued = h
        .service
        .issue(&ctx, issue_cmd(&item, location, dec(4)))
        .await
        .unwrap();
    assert_ne!(received.transaction_id, issued.transaction_id);

    let balance = h
        .queries
        .get_balance(&ctx, item.id, location, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.quantity, dec(6));
    assert_eq!(balance.version, 2);

    let history = h.queries.get_transaction_history(&ctx, item.id).await.unwrap();
    assert_eq!(history.len(), 2);
    let types: Vec<_> = history.iter().map(|t| t.transaction_type).collect();
    assert!(types.contains(&TransactionType::Receive));
    assert!(types.contains(&TransactionType::Issue));
    let receipt = history
        .iter()
        .find(|t| t.transaction_type == TransactionType::Receive)
        .unwrap();
    assert_eq!(receipt.cost_per_unit, Some(dec(2)));
    assert_eq!(receipt.uom, "EA");

    assert_eq!(h.audit.events().len(), 2);
}

#[tokio::test]
async fn move_decrements_source_and_increments_destination_atomically() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    h.catalog.put(item.clone());
    let location_a = LocationId::new();
    let location_b = LocationId::new();

    h.service
        .receive(&ctx, receive_cmd(&item, location_a, dec(6)))
        .await
        .unwrap();

    let outcome = h
        .service
        .move_stock(
            &ctx,
            MoveStock {
                item_id: item.id,
                from_location_id: location_a,
                to_location_id: location_b,
                quantity: dec(3),
                tracking: TrackingInput::none(),
                source_ref: None,
                reason_code: None,
                idempotency_key: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.balance_ids.len(), 2);

    let at_a = h
        .queries
        .get_available_quantity(&ctx, item.id, location_a, None)
        .await
        .unwrap();
    let at_b = h
        .queries
        .get_available_quantity(&ctx, item.id, location_b, None)
        .await
        .unwrap();
    assert_eq!(at_a, dec(3));
    assert_eq!(at_b, dec(3));
    assert_eq!(at_a + at_b, dec(6));

    let moves: Vec<_> = h
        .queries
        .get_transaction_history(&ctx, item.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.transaction_type == TransactionType::Move)
        .collect();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].location_id, location_b);
}

#[tokio::test]
async fn past_expiration_fails_validation_and_writes_nothing() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = perishable_item(tenant);
    h.catalog.put(item.clone());
    let location = LocationId::new();

    let mut cmd = receive_cmd(&item, location, dec(5));
    cmd.tracking = TrackingInput {
        expiration_date: Some(date("2001-01-01")),
        ..TrackingInput::none()
    };
    let err = h.service.receive(&ctx, cmd).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let history = h.queries.get_transaction_history(&ctx, item.id).await.unwrap();
    assert!(history.is_empty());
    let balances = h.queries.get_balances_by_item(&ctx, item.id).await.unwrap();
    assert!(balances.is_empty());
    assert!(h.audit.events().is_empty());
}

#[tokio::test]
async fn over_issue_rolls_back_the_whole_operation() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    h.catalog.put(item.clone());
    let location = LocationId::new();

    h.service
        .receive(&ctx, receive_cmd(&item, location, dec(6)))
        .await
        .unwrap();

    let err = h
        .service
        .issue(&ctx, issue_cmd(&item, location, dec(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::BusinessRule(_)));

    let balance = h
        .queries
        .get_balance(&ctx, item.id, location, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.quantity, dec(6));
    assert_eq!(balance.version, 1);
    let history = h.queries.get_transaction_history(&ctx, item.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn issue_against_an_empty_location_is_a_business_rule_error() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    h.catalog.put(item.clone());

    let err = h
        .service
        .issue(&ctx, issue_cmd(&item, LocationId::new(), dec(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::BusinessRule(_)));
}

#[tokio::test]
async fn idempotent_replay_returns_the_original_outcome_once() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    h.catalog.put(item.clone());
    let location = LocationId::new();

    let mut cmd = receive_cmd(&item, location, dec(10));
    cmd.idempotency_key = Some("po-1001-line-1".to_string());

    let first = h.service.receive(&ctx, cmd.clone()).await.unwrap();
    let second = h.service.receive(&ctx, cmd).await.unwrap();
    assert_eq!(first.transaction_id, second.transaction_id);
    assert_eq!(first.quantity, second.quantity);

    // One ledger row, one increment.
    let history = h.queries.get_transaction_history(&ctx, item.id).await.unwrap();
    assert_eq!(history.len(), 1);
    let quantity = h
        .queries
        .get_available_quantity(&ctx, item.id, location, None)
        .await
        .unwrap();
    assert_eq!(quantity, dec(10));
}

#[tokio::test]
async fn adjustments_create_and_drain_balances() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    h.catalog.put(item.clone());
    let location = LocationId::new();

    let adjust = |direction, quantity| AdjustStock {
        item_id: item.id,
        location_id: location,
        quantity,
        direction,
        tracking: TrackingInput::none(),
        source_ref: None,
        reason_code: Some("CYCLE-COUNT".to_string()),
        idempotency_key: None,
    };

    // Upward adjustment opens the balance.
    h.service
        .adjust(&ctx, adjust(AdjustmentDirection::In, dec(8)))
        .await
        .unwrap();
    h.service
        .adjust(&ctx, adjust(AdjustmentDirection::Out, dec(5)))
        .await
        .unwrap();

    let quantity = h
        .queries
        .get_available_quantity(&ctx, item.id, location, None)
        .await
        .unwrap();
    assert_eq!(quantity, dec(3));

    let types: Vec<_> = h
        .queries
        .get_transaction_history(&ctx, item.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.transaction_type)
        .collect();
    assert!(types.contains(&TransactionType::AdjustIn));
    assert!(types.contains(&TransactionType::AdjustOut));
}

#[tokio::test]
async fn tracked_receipts_share_one_tracking_record_per_lot() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = perishable_item(tenant);
    h.catalog.put(item.clone());
    let location = LocationId::new();

    let lot = TrackingInput {
        expiration_date: Some(date("2099-12-31")),
        ..TrackingInput::none()
    };
    let mut cmd = receive_cmd(&item, location, dec(4));
    cmd.tracking = lot.clone();
    h.service.receive(&ctx, cmd).await.unwrap();
    let mut cmd = receive_cmd(&item, location, dec(2));
    cmd.tracking = lot;
    h.service.receive(&ctx, cmd).await.unwrap();

    // Both receipts landed on the same tracking record, hence one balance.
    let balances = h.queries.get_balances_by_item(&ctx, item.id).await.unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].quantity, dec(6));
    let tracking_id = balances[0].key.tracking_id.unwrap();
    let record = h.queries.get_tracking(&ctx, tracking_id).await.unwrap().unwrap();
    assert_eq!(record.identifier(), "EXP-2099-12-31");

    // The untracked key is a different balance and holds nothing.
    let untracked = h
        .queries
        .get_available_quantity(&ctx, item.id, location, None)
        .await
        .unwrap();
    assert_eq!(untracked, Decimal::ZERO);
}

#[tokio::test]
async fn missing_tenant_context_is_rejected_before_any_work() {
    let h = harness();
    let ctx = RequestContext::unscoped();
    let item = plain_item(TenantId::new());

    let err = h
        .service
        .receive(&ctx, receive_cmd(&item, LocationId::new(), dec(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
}

#[tokio::test]
async fn cross_tenant_item_lookup_is_not_found() {
    let h = harness();
    let owner = TenantId::new();
    let intruder = TenantId::new();
    let item = plain_item(owner);
    h.catalog.put(item.clone());

    let ctx = RequestContext::for_tenant(intruder);
    let err = h
        .service
        .receive(&ctx, receive_cmd(&item, LocationId::new(), dec(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));
}

#[tokio::test]
async fn inactive_item_rejects_operations() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let mut item = plain_item(tenant);
    item.active = false;
    h.catalog.put(item.clone());

    let err = h
        .service
        .receive(&ctx, receive_cmd(&item, LocationId::new(), dec(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::BusinessRule(_)));
}

#[tokio::test]
async fn audit_sink_failure_does_not_fail_the_operation() {
    let store = InMemoryInventoryStore::new();
    let catalog = InMemoryItemCatalog::new();
    let service = InventoryService::new(
        Arc::new(store.clone()),
        Arc::new(catalog.clone()),
        Arc::new(FailingAuditSink),
    );
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    catalog.put(item.clone());
    let location = LocationId::new();

    let outcome = service
        .receive(&ctx, receive_cmd(&item, location, dec(7)))
        .await
        .unwrap();
    assert_eq!(outcome.quantity, dec(7));

    // The commit happened even though the sink errored.
    let key = BalanceKey::available(tenant, item.id, location, None);
    let balance = store.get_balance(&key).await.unwrap().unwrap();
    assert_eq!(balance.quantity, dec(7));
}

#[tokio::test]
async fn reserve_checks_availability_without_deducting() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    h.catalog.put(item.clone());
    let location = LocationId::new();

    h.service
        .receive(&ctx, receive_cmd(&item, location, dec(5)))
        .await
        .unwrap();

    let reserve = |quantity| ReserveStock {
        item_id: item.id,
        location_id: location,
        quantity,
        tracking: TrackingInput::none(),
        source_ref: None,
    };

    let descriptor = h.service.reserve(&ctx, reserve(dec(3))).await.unwrap();
    assert_eq!(descriptor.quantity, dec(3));

    // Advisory only: the on-hand figure is untouched.
    let quantity = h
        .queries
        .get_available_quantity(&ctx, item.id, location, None)
        .await
        .unwrap();
    assert_eq!(quantity, dec(5));

    let err = h.service.reserve(&ctx, reserve(dec(6))).await.unwrap_err();
    assert!(matches!(err, DomainError::BusinessRule(_)));

    h.service.release(&ctx, &descriptor).await.unwrap();
}

#[tokio::test]
async fn quantity_is_conserved_across_a_mixed_sequence() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    h.catalog.put(item.clone());
    let location_a = LocationId::new();
    let location_b = LocationId::new();

    h.service
        .receive(&ctx, receive_cmd(&item, location_a, dec(20)))
        .await
        .unwrap();
    h.service
        .move_stock(
            &ctx,
            MoveStock {
                item_id: item.id,
                from_location_id: location_a,
                to_location_id: location_b,
                quantity: dec(8),
                tracking: TrackingInput::none(),
                source_ref: None,
                reason_code: None,
                idempotency_key: None,
            },
        )
        .await
        .unwrap();
    h.service
        .issue(&ctx, issue_cmd(&item, location_b, dec(3)))
        .await
        .unwrap();

    let total: Decimal = h
        .queries
        .get_balances_by_item(&ctx, item.id)
        .await
        .unwrap()
        .iter()
        .map(|b| b.quantity)
        .sum();
    assert_eq!(total, dec(17));
}

// -- commit-time races ----------------------------------------------------
//
// The wrapper below lets a competing writer commit between an operation's
// staged writes and its commit, which is the window where idempotency and
// version races surface.

enum CompetingWrite {
    LedgerRow(InventoryTransaction),
    IssueStock {
        key: BalanceKey,
        quantity: Decimal,
        entry: InventoryTransaction,
    },
}

#[derive(Clone)]
struct ContendedStore {
    inner: InMemoryInventoryStore,
    competing: Arc<Mutex<Option<CompetingWrite>>>,
}

impl ContendedStore {
    fn new(inner: InMemoryInventoryStore) -> Self {
        Self {
            inner,
            competing: Arc::new(Mutex::new(None)),
        }
    }

    fn contend_with(&self, write: CompetingWrite) {
        *self.competing.lock().unwrap() = Some(write);
    }
}

#[async_trait]
impl InventoryStore for ContendedStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        let competing = self.competing.lock().unwrap().take();
        Ok(Box::new(ContendedTx {
            inner: self.inner.begin().await?,
            store: self.inner.clone(),
            competing,
        }))
    }

    async fn get_balance(
        &self,
        key: &BalanceKey,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        self.inner.get_balance(key).await
    }

    async fn get_balance_by_id(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        self.inner.get_balance_by_id(tenant_id, balance_id).await
    }

    async fn get_balances_by_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Vec<InventoryBalance>, StoreError> {
        self.inner.get_balances_by_item(tenant_id, item_id).await
    }

    async fn get_transaction_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        self.inner
            .get_transaction_by_idempotency_key(tenant_id, key)
            .await
    }

    async fn get_transactions_by_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        self.inner.get_transactions_by_item(tenant_id, item_id).await
    }

    async fn get_transactions_by_reference(
        &self,
        tenant_id: TenantId,
        ref_type: &str,
        ref_id: Uuid,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        self.inner
            .get_transactions_by_reference(tenant_id, ref_type, ref_id)
            .await
    }

    async fn get_transactions_by_date_range(
        &self,
        tenant_id: TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        self.inner
            .get_transactions_by_date_range(tenant_id, from, to)
            .await
    }

    async fn get_tracking_by_id(
        &self,
        tenant_id: TenantId,
        tracking_id: TrackingId,
    ) -> Result<Option<InventoryTracking>, StoreError> {
        self.inner.get_tracking_by_id(tenant_id, tracking_id).await
    }
}

struct ContendedTx {
    inner: Box<dyn InventoryTx>,
    store: InMemoryInventoryStore,
    competing: Option<CompetingWrite>,
}

#[async_trait]
impl InventoryTx for ContendedTx {
    async fn find_balance(
        &mut self,
        key: &BalanceKey,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        self.inner.find_balance(key).await
    }

    async fn insert_balance(&mut self, balance: &InventoryBalance) -> Result<(), StoreError> {
        self.inner.insert_balance(balance).await
    }

    async fn update_balance(
        &mut self,
        balance: &InventoryBalance,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        self.inner.update_balance(balance, expected_version).await
    }

    async fn find_transaction_by_idempotency_key(
        &mut self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        self.inner
            .find_transaction_by_idempotency_key(tenant_id, key)
            .await
    }

    async fn insert_transaction(
        &mut self,
        transaction: &InventoryTransaction,
    ) -> Result<LedgerAppend, StoreError> {
        self.inner.insert_transaction(transaction).await
    }

    async fn find_tracking(
        &mut self,
        tenant_id: TenantId,
        item_id: ItemId,
        tracking_type: TrackingType,
        identifier: &str,
    ) -> Result<Option<InventoryTracking>, StoreError> {
        self.inner
            .find_tracking(tenant_id, item_id, tracking_type, identifier)
            .await
    }

    async fn insert_tracking(
        &mut self,
        tracking: &InventoryTracking,
    ) -> Result<InventoryTracking, StoreError> {
        self.inner.insert_tracking(tracking).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let ContendedTx {
            inner,
            store,
            competing,
        } = *self;
        if let Some(write) = competing {
            let mut tx = store.begin().await?;
            match write {
                CompetingWrite::LedgerRow(entry) => {
                    tx.insert_transaction(&entry).await?;
                }
                CompetingWrite::IssueStock {
                    key,
                    quantity,
                    entry,
                } => {
                    let mut balance = tx.find_balance(&key).await?.unwrap();
                    let loaded_version = balance.version;
                    balance.issue(quantity, Utc::now()).unwrap();
                    tx.update_balance(&balance, loaded_version).await?;
                    tx.insert_transaction(&entry).await?;
                }
            }
            tx.commit().await?;
        }
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn idempotency_race_at_commit_resolves_to_the_winner() {
    let inner = InMemoryInventoryStore::new();
    let store = ContendedStore::new(inner.clone());
    let catalog = InMemoryItemCatalog::new();
    let service = InventoryService::new(
        Arc::new(store.clone()),
        Arc::new(catalog.clone()),
        Arc::new(RecordingAuditSink::new()),
    );
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    catalog.put(item.clone());
    let location = LocationId::new();

    // A writer carrying the same key commits after our dedup check passes.
    let winner = InventoryTransaction::new(
        TransactionId::new(),
        tenant,
        TransactionType::Receive,
        item.id,
        dec(10),
        "EA".to_string(),
        location,
        None,
        Utc::now(),
    )
    .with_idempotency_key(Some("po-77".to_string()));
    store.contend_with(CompetingWrite::LedgerRow(winner.clone()));

    let mut cmd = receive_cmd(&item, location, dec(10));
    cmd.idempotency_key = Some("po-77".to_string());
    let outcome = service.receive(&ctx, cmd).await.unwrap();

    // The loser hands back the winner's record instead of an error.
    assert_eq!(outcome.transaction_id, winner.id);
    assert_eq!(outcome.quantity, dec(10));
    let history = inner.get_transactions_by_item(tenant, item.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, winner.id);
}

#[tokio::test]
async fn concurrent_issues_on_one_balance_yield_one_success_and_one_conflict() {
    let inner = InMemoryInventoryStore::new();
    let store = ContendedStore::new(inner.clone());
    let catalog = InMemoryItemCatalog::new();
    let service = InventoryService::new(
        Arc::new(store.clone()),
        Arc::new(catalog.clone()),
        Arc::new(RecordingAuditSink::new()),
    );
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    catalog.put(item.clone());
    let location = LocationId::new();

    service
        .receive(&ctx, receive_cmd(&item, location, dec(10)))
        .await
        .unwrap();

    // Another issue commits between our staged update and our commit.
    let key = BalanceKey::available(tenant, item.id, location, None);
    let competing_entry = InventoryTransaction::new(
        TransactionId::new(),
        tenant,
        TransactionType::Issue,
        item.id,
        dec(4),
        "EA".to_string(),
        location,
        None,
        Utc::now(),
    );
    store.contend_with(CompetingWrite::IssueStock {
        key,
        quantity: dec(4),
        entry: competing_entry,
    });

    let err = service
        .issue(&ctx, issue_cmd(&item, location, dec(5)))
        .await
        .unwrap_err();
    match err {
        DomainError::BusinessRule(msg) => assert!(msg.contains("concurrent modification")),
        other => panic!("expected business rule error, got {other:?}"),
    }

    // Only the competing decrement landed; our writes rolled back whole.
    let balance = inner.get_balance(&key).await.unwrap().unwrap();
    assert_eq!(balance.quantity, dec(6));
    assert_eq!(balance.version, 2);
    let history = inner.get_transactions_by_item(tenant, item.id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn replayed_move_returns_the_same_balance_ids() {
    let h = harness();
    let tenant = TenantId::new();
    let ctx = RequestContext::for_tenant(tenant);
    let item = plain_item(tenant);
    h.catalog.put(item.clone());
    let location_a = LocationId::new();
    let location_b = LocationId::new();

    h.service
        .receive(&ctx, receive_cmd(&item, location_a, dec(10)))
        .await
        .unwrap();

    let cmd = MoveStock {
        item_id: item.id,
        from_location_id: location_a,
        to_location_id: location_b,
        quantity: dec(4),
        tracking: TrackingInput::none(),
        source_ref: None,
        reason_code: None,
        idempotency_key: Some("mv-9".to_string()),
    };
    let first = h.service.move_stock(&ctx, cmd.clone()).await.unwrap();
    let second = h.service.move_stock(&ctx, cmd).await.unwrap();

    // Retry observes the whole original outcome, source and destination.
    assert_eq!(first, second);
    assert_eq!(second.balance_ids.len(), 2);

    let moves = h
        .queries
        .get_transaction_history(&ctx, item.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.transaction_type == TransactionType::Move)
        .count();
    assert_eq!(moves, 1);
    let at_a = h
        .queries
        .get_available_quantity(&ctx, item.id, location_a, None)
        .await
        .unwrap();
    let at_b = h
        .queries
        .get_available_quantity(&ctx, item.id, location_b, None)
        .await
        .unwrap();
    assert_eq!(at_a, dec(6));
    assert_eq!(at_b, dec(4));
}
