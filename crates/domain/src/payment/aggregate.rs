//! Payment aggregate implementation.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use store::UniqueKey;

use crate::aggregate::Aggregate;
use crate::gateway::{GatewayStatus, PaymentLink};
use crate::value_objects::{Money, OrderCode, PaymentItem};

use super::events::PaymentCreatedData;
use super::{CreatePayment, PaymentError, PaymentEvent, PaymentStatus};

/// Payment aggregate root.
///
/// Created once per checkout with the booking snapshot it pays for; only its
/// status changes afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payment {
    id: Option<AggregateId>,
    order_code: Option<OrderCode>,
    user_id: Option<AggregateId>,
    vendor_id: Option<AggregateId>,
    pet_id: Option<AggregateId>,
    service_ids: Vec<AggregateId>,
    amount: Money,
    items: Vec<PaymentItem>,
    description: String,
    status: PaymentStatus,
    checkout_url: String,
    qr_code: String,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
}

impl Aggregate for Payment {
    type Event = PaymentEvent;
    type Error = PaymentError;

    fn aggregate_type() -> &'static str {
        "Payment"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            PaymentEvent::PaymentCreated(data) => self.apply_created(data),
            PaymentEvent::PaymentPaid(data) => {
                self.status = PaymentStatus::Paid;
                self.paid_at = Some(data.paid_at);
            }
            PaymentEvent::PaymentCancelled(data) => {
                self.status = PaymentStatus::Cancelled;
                self.cancellation_reason = data.reason;
            }
            PaymentEvent::PaymentExpired(_) => {
                self.status = PaymentStatus::Expired;
            }
        }
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        self.order_code
            .map(Self::order_code_key)
            .into_iter()
            .collect()
    }
}

// Query methods
impl Payment {
    /// Unique key under which a payment is found by its gateway order code.
    pub fn order_code_key(order_code: OrderCode) -> UniqueKey {
        UniqueKey::new("order_code", order_code)
    }

    pub fn order_code(&self) -> Option<OrderCode> {
        self.order_code
    }

    pub fn user_id(&self) -> Option<AggregateId> {
        self.user_id
    }

    pub fn vendor_id(&self) -> Option<AggregateId> {
        self.vendor_id
    }

    pub fn pet_id(&self) -> Option<AggregateId> {
        self.pet_id
    }

    pub fn service_ids(&self) -> &[AggregateId] {
        &self.service_ids
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn items(&self) -> &[PaymentItem] {
        &self.items
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn checkout_url(&self) -> &str {
        &self.checkout_url
    }

    pub fn qr_code(&self) -> &str {
        &self.qr_code
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn expired_at(&self) -> Option<DateTime<Utc>> {
        self.expired_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Command methods (return events)
impl Payment {
    /// Records a new payment for the checkout link the gateway issued.
    pub fn create(
        &self,
        payment_id: AggregateId,
        cmd: &CreatePayment,
        link: &PaymentLink,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.id.is_some() {
            return Err(PaymentError::AlreadyCreated);
        }
        cmd.validate()?;

        Ok(vec![PaymentEvent::PaymentCreated(PaymentCreatedData {
            payment_id,
            order_code: link.order_code,
            user_id: cmd.user_id,
            vendor_id: cmd.vendor_id,
            pet_id: cmd.pet_id,
            service_ids: cmd.service_ids.clone(),
            amount: cmd.amount,
            items: cmd.items.clone(),
            description: cmd.description.clone(),
            checkout_url: link.checkout_url.clone(),
            qr_code: link.qr_code.clone(),
            start_time: cmd.start_time,
            end_time: cmd.end_time,
            expired_at: link.expires_at,
            created_at: Utc::now(),
        })])
    }

    /// Marks the payment as paid.
    pub fn mark_paid(&self) -> Result<Vec<PaymentEvent>, PaymentError> {
        let order_code = self.transition(PaymentStatus::Paid)?;
        Ok(vec![PaymentEvent::paid(order_code, self.amount)])
    }

    /// Cancels the payment.
    pub fn cancel(&self, reason: Option<String>) -> Result<Vec<PaymentEvent>, PaymentError> {
        let order_code = self.transition(PaymentStatus::Cancelled)?;
        Ok(vec![PaymentEvent::cancelled(order_code, reason)])
    }

    /// Marks the payment as expired.
    pub fn expire(&self) -> Result<Vec<PaymentEvent>, PaymentError> {
        let order_code = self.transition(PaymentStatus::Expired)?;
        Ok(vec![PaymentEvent::expired(order_code)])
    }

    /// Applies the gateway's authoritative status.
    ///
    /// A terminal payment, or a gateway status that implies no transition,
    /// produces no events.
    pub fn apply_gateway_status(
        &self,
        status: &GatewayStatus,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.is_terminal() {
            return Ok(vec![]);
        }
        match PaymentStatus::from_gateway(status) {
            Some(PaymentStatus::Paid) => self.mark_paid(),
            Some(PaymentStatus::Cancelled) => {
                self.cancel(Some(format!("gateway reported {status}")))
            }
            Some(PaymentStatus::Expired) => self.expire(),
            Some(PaymentStatus::Pending) | None => Ok(vec![]),
        }
    }

    fn transition(&self, next: PaymentStatus) -> Result<OrderCode, PaymentError> {
        let order_code = self.order_code.ok_or(PaymentError::NotCreated)?;
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        Ok(order_code)
    }
}

// Apply helpers
impl Payment {
    fn apply_created(&mut self, data: PaymentCreatedData) {
        self.id = Some(data.payment_id);
        self.order_code = Some(data.order_code);
        self.user_id = Some(data.user_id);
        self.vendor_id = Some(data.vendor_id);
        self.pet_id = Some(data.pet_id);
        self.service_ids = data.service_ids;
        self.amount = data.amount;
        self.items = data.items;
        self.description = data.description;
        self.checkout_url = data.checkout_url;
        self.qr_code = data.qr_code;
        self.start_time = Some(data.start_time);
        self.end_time = Some(data.end_time);
        self.expired_at = Some(data.expired_at);
        self.status = PaymentStatus::Pending;
    }
}
