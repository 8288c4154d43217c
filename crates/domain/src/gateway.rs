//! Remote collaborators: the payment gateway and the payout (bank transfer)
//! provider, with in-memory implementations for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::AggregateId;
use thiserror::Error;

use crate::value_objects::{BankAccount, Money, OrderCode, PaymentItem};

/// Errors returned by remote collaborators.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The remote service could not be reached or timed out.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The remote service refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The gateway has no payment link for this order code.
    #[error("unknown order code: {0}")]
    UnknownOrder(OrderCode),
}

/// Authoritative payment status reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Pending,
    Paid,
    Cancelled,
    Expired,
    /// Any status the domain does not act on (e.g. "PROCESSING").
    Other(String),
}

impl GatewayStatus {
    /// Parses the gateway's status string.
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "PENDING" => GatewayStatus::Pending,
            "PAID" => GatewayStatus::Paid,
            "CANCELLED" => GatewayStatus::Cancelled,
            "EXPIRED" => GatewayStatus::Expired,
            other => GatewayStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GatewayStatus::Pending => "PENDING",
            GatewayStatus::Paid => "PAID",
            GatewayStatus::Cancelled => "CANCELLED",
            GatewayStatus::Expired => "EXPIRED",
            GatewayStatus::Other(status) => status,
        }
    }
}

impl std::fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request to open a checkout link.
#[derive(Debug, Clone)]
pub struct PaymentLinkRequest {
    pub amount: Money,
    pub description: String,
    pub items: Vec<PaymentItem>,
}

/// A checkout link issued by the gateway.
#[derive(Debug, Clone)]
pub struct PaymentLink {
    pub order_code: OrderCode,
    pub checkout_url: String,
    pub qr_code: String,
    pub expires_at: DateTime<Utc>,
}

/// Current state of a checkout link.
#[derive(Debug, Clone)]
pub struct PaymentLinkInfo {
    pub order_code: OrderCode,
    pub amount: Money,
    pub status: GatewayStatus,
}

/// Payment gateway client.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a checkout link; the gateway issues the order code.
    async fn create_payment_link(
        &self,
        request: PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError>;

    /// Fetches the authoritative status of a link.
    async fn get_payment_link_information(
        &self,
        order_code: OrderCode,
    ) -> Result<PaymentLinkInfo, GatewayError>;

    /// Cancels an open link.
    async fn cancel_payment_link(
        &self,
        order_code: OrderCode,
        reason: Option<String>,
    ) -> Result<(), GatewayError>;
}

/// Request to transfer a payout to a vendor's bank account.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub payout_id: AggregateId,
    pub amount: Money,
    pub bank_account: BankAccount,
}

/// Status of a bank transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Accepted, settlement pending.
    Processing,
    Completed,
    Failed(String),
}

/// Provider acknowledgement of a transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub status: TransferStatus,
}

/// Payout (bank transfer) provider client.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    async fn process_payout(&self, request: TransferRequest)
    -> Result<TransferReceipt, GatewayError>;
}

#[derive(Debug)]
struct LinkState {
    amount: Money,
    status: GatewayStatus,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    links: HashMap<OrderCode, LinkState>,
    next_order_code: i64,
    cancelled: Vec<OrderCode>,
    fail_on_create: bool,
    fail_on_status: bool,
}

/// In-memory payment gateway for testing.
///
/// Order codes are issued sequentially. Link statuses start as PENDING and
/// are scripted with [`set_status`](Self::set_status).
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status the gateway reports for an order code.
    pub fn set_status(&self, order_code: OrderCode, status: &str) {
        if let Some(link) = self.state.write().unwrap().links.get_mut(&order_code) {
            link.status = GatewayStatus::parse(status);
        }
    }

    /// Configures the gateway to fail link creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Configures the gateway to fail status lookups.
    pub fn set_fail_on_status(&self, fail: bool) {
        self.state.write().unwrap().fail_on_status = fail;
    }

    /// Returns the number of links issued.
    pub fn link_count(&self) -> usize {
        self.state.read().unwrap().links.len()
    }

    /// Returns the order codes whose links were cancelled.
    pub fn cancelled_links(&self) -> Vec<OrderCode> {
        self.state.read().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_payment_link(
        &self,
        request: PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(GatewayError::Unavailable("gateway is down".to_string()));
        }
        if !request.amount.is_positive() {
            return Err(GatewayError::Rejected("amount must be positive".to_string()));
        }

        state.next_order_code += 1;
        let order_code = OrderCode::new(100_000 + state.next_order_code);
        state.links.insert(
            order_code,
            LinkState {
                amount: request.amount,
                status: GatewayStatus::Pending,
            },
        );

        Ok(PaymentLink {
            order_code,
            checkout_url: format!("https://pay.local/checkout/{order_code}"),
            qr_code: format!("QR-{order_code}"),
            expires_at: Utc::now() + Duration::minutes(15),
        })
    }

    async fn get_payment_link_information(
        &self,
        order_code: OrderCode,
    ) -> Result<PaymentLinkInfo, GatewayError> {
        let state = self.state.read().unwrap();

        if state.fail_on_status {
            return Err(GatewayError::Unavailable("gateway is down".to_string()));
        }

        let link = state
            .links
            .get(&order_code)
            .ok_or(GatewayError::UnknownOrder(order_code))?;
        Ok(PaymentLinkInfo {
            order_code,
            amount: link.amount,
            status: link.status.clone(),
        })
    }

    async fn cancel_payment_link(
        &self,
        order_code: OrderCode,
        _reason: Option<String>,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.write().unwrap();
        let link = state
            .links
            .get_mut(&order_code)
            .ok_or(GatewayError::UnknownOrder(order_code))?;
        link.status = GatewayStatus::Cancelled;
        state.cancelled.push(order_code);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryPayoutState {
    scripted: VecDeque<Result<TransferStatus, GatewayError>>,
    requests: Vec<TransferRequest>,
    next_id: u32,
}

/// In-memory payout provider for testing.
///
/// Transfers complete immediately unless outcomes are scripted with
/// [`push_outcome`](Self::push_outcome), consumed one per request.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPayoutProvider {
    state: Arc<RwLock<InMemoryPayoutState>>,
}

impl InMemoryPayoutProvider {
    /// Creates a new in-memory payout provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outcome of the next unscripted transfer.
    pub fn push_outcome(&self, outcome: Result<TransferStatus, GatewayError>) {
        self.state.write().unwrap().scripted.push_back(outcome);
    }

    /// Returns the number of transfers requested.
    pub fn request_count(&self) -> usize {
        self.state.read().unwrap().requests.len()
    }
}

#[async_trait]
impl PayoutProvider for InMemoryPayoutProvider {
    async fn process_payout(
        &self,
        request: TransferRequest,
    ) -> Result<TransferReceipt, GatewayError> {
        let mut state = self.state.write().unwrap();
        state.requests.push(request);

        let status = state
            .scripted
            .pop_front()
            .unwrap_or(Ok(TransferStatus::Completed))?;

        state.next_id += 1;
        Ok(TransferReceipt {
            transfer_id: format!("TRF-{:04}", state.next_id),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_request(amount: i64) -> PaymentLinkRequest {
        PaymentLinkRequest {
            amount: Money::new(amount),
            description: "Grooming".to_string(),
            items: vec![PaymentItem::new("Grooming", Money::new(amount), 1)],
        }
    }

    #[test]
    fn parses_gateway_statuses() {
        assert_eq!(GatewayStatus::parse("PAID"), GatewayStatus::Paid);
        assert_eq!(GatewayStatus::parse("cancelled"), GatewayStatus::Cancelled);
        assert_eq!(GatewayStatus::parse("EXPIRED"), GatewayStatus::Expired);
        assert_eq!(GatewayStatus::parse("PENDING"), GatewayStatus::Pending);
        assert_eq!(
            GatewayStatus::parse("PROCESSING"),
            GatewayStatus::Other("PROCESSING".to_string())
        );
    }

    #[tokio::test]
    async fn issues_sequential_order_codes() {
        let gateway = InMemoryPaymentGateway::new();

        let first = gateway.create_payment_link(link_request(1000)).await.unwrap();
        let second = gateway.create_payment_link(link_request(1000)).await.unwrap();

        assert_eq!(first.order_code, OrderCode::new(100_001));
        assert_eq!(second.order_code, OrderCode::new(100_002));
        assert_eq!(gateway.link_count(), 2);
    }

    #[tokio::test]
    async fn scripted_status_is_reported() {
        let gateway = InMemoryPaymentGateway::new();
        let link = gateway.create_payment_link(link_request(1000)).await.unwrap();

        gateway.set_status(link.order_code, "PAID");
        let info = gateway
            .get_payment_link_information(link.order_code)
            .await
            .unwrap();

        assert_eq!(info.status, GatewayStatus::Paid);
        assert_eq!(info.amount, Money::new(1000));
    }

    #[tokio::test]
    async fn cancel_marks_link_cancelled() {
        let gateway = InMemoryPaymentGateway::new();
        let link = gateway.create_payment_link(link_request(1000)).await.unwrap();

        gateway
            .cancel_payment_link(link.order_code, None)
            .await
            .unwrap();

        assert_eq!(gateway.cancelled_links(), vec![link.order_code]);
        let unknown = gateway.cancel_payment_link(OrderCode::new(1), None).await;
        assert!(matches!(unknown, Err(GatewayError::UnknownOrder(_))));
    }

    #[tokio::test]
    async fn payout_provider_follows_script() {
        let provider = InMemoryPayoutProvider::new();
        provider.push_outcome(Ok(TransferStatus::Failed("account closed".into())));
        let request = TransferRequest {
            payout_id: AggregateId::new(),
            amount: Money::new(500),
            bank_account: BankAccount::new("ACB", "0123", "Pet Spa"),
        };

        let first = provider.process_payout(request.clone()).await.unwrap();
        let second = provider.process_payout(request).await.unwrap();

        assert_eq!(
            first.status,
            TransferStatus::Failed("account closed".into())
        );
        assert_eq!(second.status, TransferStatus::Completed);
        assert_eq!(provider.request_count(), 2);
    }
}
