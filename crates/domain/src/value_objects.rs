//! Value objects shared by the booking aggregates.

use serde::{Deserialize, Serialize};

/// Money amount in minor currency units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new amount.
    pub fn new(amount: i64) -> Self {
        Self(amount)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the raw amount.
    pub fn amount(&self) -> i64 {
        self.0
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Multiplies by a quantity, or `None` on overflow.
    pub fn checked_mul(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    /// Adds two amounts, or `None` on overflow.
    pub fn checked_add(&self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Sums amounts, or `None` if the total overflows.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Money>) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, m| acc.checked_add(m))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Money {
    fn from(amount: i64) -> Self {
        Self(amount)
    }
}

/// Gateway-issued payment order code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderCode(i64);

impl OrderCode {
    pub fn new(code: i64) -> Self {
        Self(code)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OrderCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderCode {
    fn from(code: i64) -> Self {
        Self(code)
    }
}

/// A line item of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentItem {
    /// Human-readable item name.
    pub name: String,

    /// Price per unit.
    pub price: Money,

    /// Quantity purchased.
    pub quantity: u32,
}

impl PaymentItem {
    /// Creates a new payment item.
    pub fn new(name: impl Into<String>, price: Money, quantity: u32) -> Self {
        Self {
            name: name.into(),
            price,
            quantity,
        }
    }

    /// Returns price * quantity, or `None` on overflow.
    pub fn total_price(&self) -> Option<Money> {
        self.price.checked_mul(self.quantity)
    }
}

/// Bank account a vendor receives payouts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub bank_name: String,
    pub account_number: String,
    pub account_holder: String,
}

impl BankAccount {
    pub fn new(
        bank_name: impl Into<String>,
        account_number: impl Into<String>,
        account_holder: impl Into<String>,
    ) -> Self {
        Self {
            bank_name: bank_name.into(),
            account_number: account_number.into(),
            account_holder: account_holder.into(),
        }
    }

    /// Returns true when every field is filled in.
    pub fn is_complete(&self) -> bool {
        !self.bank_name.trim().is_empty()
            && !self.account_number.trim().is_empty()
            && !self.account_holder.trim().is_empty()
    }
}
