//! Payment state machine.

use serde::{Deserialize, Serialize};

use crate::gateway::GatewayStatus;

/// The status of a payment.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Paid
///           ├──► Cancelled
///           └──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    /// Checkout link issued, awaiting payment.
    #[default]
    Pending,

    /// Gateway confirmed the payment (terminal state).
    Paid,

    /// Cancelled by the customer or the gateway (terminal state).
    Cancelled,

    /// Checkout link expired unpaid (terminal state).
    Expired,
}

impl PaymentStatus {
    /// Returns true if the transition is in the table above.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (
                PaymentStatus::Pending,
                PaymentStatus::Paid | PaymentStatus::Cancelled | PaymentStatus::Expired
            )
        )
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Maps an authoritative gateway status to the payment status it implies.
    ///
    /// Pending and unrecognized gateway statuses imply no transition.
    pub fn from_gateway(status: &GatewayStatus) -> Option<PaymentStatus> {
        match status {
            GatewayStatus::Paid => Some(PaymentStatus::Paid),
            GatewayStatus::Cancelled => Some(PaymentStatus::Cancelled),
            GatewayStatus::Expired => Some(PaymentStatus::Expired),
            GatewayStatus::Pending | GatewayStatus::Other(_) => None,
        }
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Cancelled => "Cancelled",
            PaymentStatus::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
