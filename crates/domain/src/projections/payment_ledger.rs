//! Payment ledger read model: payment status by gateway order code.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, Version};
use event_bus::{EventEnvelope, EventHandler, HandlerError};
use tokio::sync::RwLock;

use crate::payment::{PaymentEvent, PaymentStatus};
use crate::value_objects::{Money, OrderCode};

use super::ReadModel;

/// One row of the payment ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub payment_id: AggregateId,
    pub order_code: OrderCode,
    pub user_id: Option<AggregateId>,
    pub vendor_id: Option<AggregateId>,
    pub amount: Money,
    pub status: PaymentStatus,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
    version: Version,
}

/// Payment status by order code, for webhook reconciliation and support
/// lookups.
///
/// The async bus gives no ordering between events, so every entry keeps the
/// version of the last event it applied and ignores older ones. A status
/// event seen before the creation event opens a partial entry that the
/// creation event fills in later.
#[derive(Clone, Default)]
pub struct PaymentLedgerView {
    entries: Arc<RwLock<HashMap<OrderCode, LedgerEntry>>>,
}

impl PaymentLedgerView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, order_code: OrderCode) -> Option<LedgerEntry> {
        self.entries.read().await.get(&order_code).cloned()
    }

    pub async fn by_status(&self, status: PaymentStatus) -> Vec<LedgerEntry> {
        let mut found: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.order_code);
        found
    }

    /// Sum of all paid amounts, or `None` if it overflows.
    pub async fn total_paid(&self) -> Option<Money> {
        let entries = self.entries.read().await;
        Money::checked_sum(
            entries
                .values()
                .filter(|e| e.status == PaymentStatus::Paid)
                .map(|e| e.amount),
        )
    }

    async fn apply(&self, envelope: &EventEnvelope, event: PaymentEvent) {
        let payment_id = envelope.aggregate_id;
        let version = envelope.version;
        let mut entries = self.entries.write().await;

        let (order_code, status, amount, reason, at) = match event {
            PaymentEvent::PaymentCreated(data) => {
                let entry = entries.entry(data.order_code).or_insert_with(|| LedgerEntry {
                    payment_id,
                    order_code: data.order_code,
                    user_id: None,
                    vendor_id: None,
                    amount: data.amount,
                    status: PaymentStatus::Pending,
                    reason: None,
                    updated_at: data.created_at,
                    version,
                });
                entry.user_id = Some(data.user_id);
                entry.vendor_id = Some(data.vendor_id);
                entry.amount = data.amount;
                return;
            }
            PaymentEvent::PaymentPaid(data) => (
                data.order_code,
                PaymentStatus::Paid,
                Some(data.amount),
                None,
                data.paid_at,
            ),
            PaymentEvent::PaymentCancelled(data) => (
                data.order_code,
                PaymentStatus::Cancelled,
                None,
                data.reason,
                data.cancelled_at,
            ),
            PaymentEvent::PaymentExpired(data) => (
                data.order_code,
                PaymentStatus::Expired,
                None,
                None,
                data.expired_at,
            ),
        };

        let entry = entries.entry(order_code).or_insert_with(|| LedgerEntry {
            payment_id,
            order_code,
            user_id: None,
            vendor_id: None,
            amount: Money::zero(),
            status: PaymentStatus::Pending,
            reason: None,
            updated_at: at,
            version: Version::initial(),
        });
        if entry.version >= version {
            tracing::debug!(%order_code, %version, "stale ledger event ignored");
            return;
        }
        entry.status = status;
        entry.reason = reason;
        entry.updated_at = at;
        entry.version = version;
        if let Some(amount) = amount {
            entry.amount = amount;
        }
    }
}

#[async_trait]
impl EventHandler for PaymentLedgerView {
    fn name(&self) -> &'static str {
        "PaymentLedgerView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        if event.aggregate_type != "Payment" {
            return Ok(());
        }
        let payment_event: PaymentEvent = event.payload_as()?;
        self.apply(event, payment_event).await;
        Ok(())
    }
}

impl ReadModel for PaymentLedgerView {
    fn name(&self) -> &'static str {
        "PaymentLedgerView"
    }

    fn count(&self) -> Option<usize> {
        self.entries.try_read().ok().map(|e| e.len())
    }
}
