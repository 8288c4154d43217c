//! Payment domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::value_objects::{Money, OrderCode, PaymentItem};

/// Events that can occur on a payment aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    /// Checkout link issued and payment recorded.
    PaymentCreated(PaymentCreatedData),

    /// Gateway confirmed the payment.
    PaymentPaid(PaymentPaidData),

    /// Payment was cancelled.
    PaymentCancelled(PaymentCancelledData),

    /// Checkout link expired unpaid.
    PaymentExpired(PaymentExpiredData),
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCreated(_) => "PaymentCreated",
            PaymentEvent::PaymentPaid(_) => "PaymentPaid",
            PaymentEvent::PaymentCancelled(_) => "PaymentCancelled",
            PaymentEvent::PaymentExpired(_) => "PaymentExpired",
        }
    }
}

/// Data for PaymentCreated event.
///
/// Carries the full booking snapshot so subscribers never need to read the payment back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCreatedData {
    pub payment_id: AggregateId,
    pub order_code: OrderCode,
    pub user_id: AggregateId,
    pub vendor_id: AggregateId,
    pub pet_id: AggregateId,
    pub service_ids: Vec<AggregateId>,
    pub amount: Money,
    pub items: Vec<PaymentItem>,
    pub description: String,
    pub checkout_url: String,
    pub qr_code: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Data for PaymentPaid event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentPaidData {
    pub order_code: OrderCode,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
}

/// Data for PaymentCancelled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCancelledData {
    pub order_code: OrderCode,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

/// Data for PaymentExpired event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentExpiredData {
    pub order_code: OrderCode,
    pub expired_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn paid(order_code: OrderCode, amount: Money) -> Self {
        PaymentEvent::PaymentPaid(PaymentPaidData {
            order_code,
            amount,
            paid_at: Utc::now(),
        })
    }

    pub fn cancelled(order_code: OrderCode, reason: Option<String>) -> Self {
        PaymentEvent::PaymentCancelled(PaymentCancelledData {
            order_code,
            reason,
            cancelled_at: Utc::now(),
        })
    }

    pub fn expired(order_code: OrderCode) -> Self {
        PaymentEvent::PaymentExpired(PaymentExpiredData {
            order_code,
            expired_at: Utc::now(),
        })
    }
}
