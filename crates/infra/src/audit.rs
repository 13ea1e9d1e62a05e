//! Audit/event sink port.
//!
//! Invoked fire-and-forget after a successful commit. A sink failure is a
//! warning, never an operation failure; callers log and move on.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use stockbook_core::{ItemId, TenantId, TransactionId};

/// What an operation reports after it commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub tenant_id: TenantId,
    pub operation: &'static str,
    pub transaction_id: TransactionId,
    pub item_id: ItemId,
    pub quantity: Decimal,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()>;
}

/// Default sink: structured log line per committed operation.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()> {
        info!(
            tenant_id = %event.tenant_id,
            operation = event.operation,
            transaction_id = %event.transaction_id,
            item_id = %event.item_id,
            quantity = %event.quantity,
            "inventory operation committed"
        );
        Ok(())
    }
}

/// Test sink that records events in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("lock poisoned"))?
            .push(event);
        Ok(())
    }
}

/// Test sink that always fails; operations must still succeed.
#[derive(Debug, Clone, Default)]
pub struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn record(&self, _event: AuditEvent) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("audit sink unavailable"))
    }
}
