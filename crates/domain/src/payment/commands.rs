//! Payment commands.

use chrono::{DateTime, Utc};
use common::AggregateId;

use crate::value_objects::{Money, PaymentItem};

use super::PaymentError;

/// Command to create a payment for a booking.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    /// The paying customer.
    pub user_id: AggregateId,

    /// The vendor being booked.
    pub vendor_id: AggregateId,

    /// The pet receiving the services.
    pub pet_id: AggregateId,

    /// The vendor's offerings being booked.
    pub service_ids: Vec<AggregateId>,

    /// Amount to charge; must equal the item total.
    pub amount: Money,

    pub items: Vec<PaymentItem>,

    pub description: String,

    pub start_time: DateTime<Utc>,

    pub end_time: DateTime<Utc>,
}

impl CreatePayment {
    /// Checks the command shape without touching any aggregate.
    pub fn validate(&self) -> Result<(), PaymentError> {
        if !self.amount.is_positive() {
            return Err(PaymentError::InvalidAmount(self.amount));
        }
        if self.items.is_empty() {
            return Err(PaymentError::NoItems);
        }
        for item in &self.items {
            if item.quantity == 0 {
                return Err(PaymentError::InvalidItemQuantity {
                    name: item.name.clone(),
                });
            }
            if !item.price.is_positive() {
                return Err(PaymentError::InvalidItemPrice {
                    name: item.name.clone(),
                });
            }
        }

        let total = self
            .items
            .iter()
            .try_fold(Money::zero(), |acc, item| {
                item.total_price().and_then(|line| acc.checked_add(line))
            })
            .ok_or(PaymentError::TotalOverflow)?;
        if total != self.amount {
            return Err(PaymentError::AmountMismatch {
                total,
                amount: self.amount,
            });
        }

        if self.service_ids.is_empty() {
            return Err(PaymentError::NoServices);
        }
        if self.start_time >= self.end_time {
            return Err(PaymentError::InvalidTimeWindow);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn command(price: i64, quantity: u32, amount: i64) -> CreatePayment {
        let start = Utc::now() + Duration::days(1);
        CreatePayment {
            user_id: AggregateId::new(),
            vendor_id: AggregateId::new(),
            pet_id: AggregateId::new(),
            service_ids: vec![AggregateId::new()],
            amount: Money::new(amount),
            items: vec![PaymentItem::new("Grooming", Money::new(price), quantity)],
            description: "Grooming".into(),
            start_time: start,
            end_time: start + Duration::hours(1),
        }
    }

    #[test]
    fn matching_total_is_valid() {
        assert!(command(50_000, 2, 100_000).validate().is_ok());
    }

    #[test]
    fn mismatched_total_is_rejected() {
        let err = command(40_000, 2, 100_000).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "total item amount (80000) does not match payment amount (100000)"
        );
    }

    #[test]
    fn shape_errors() {
        assert!(matches!(
            command(50_000, 2, 0).validate(),
            Err(PaymentError::InvalidAmount(_))
        ));
        assert!(matches!(
            command(50_000, 0, 100_000).validate(),
            Err(PaymentError::InvalidItemQuantity { .. })
        ));

        let mut cmd = command(50_000, 2, 100_000);
        cmd.end_time = cmd.start_time;
        assert!(matches!(cmd.validate(), Err(PaymentError::InvalidTimeWindow)));

        let mut cmd = command(50_000, 2, 100_000);
        cmd.service_ids.clear();
        assert!(matches!(cmd.validate(), Err(PaymentError::NoServices)));

        let mut cmd = command(50_000, 2, 100_000);
        cmd.items.clear();
        assert!(matches!(cmd.validate(), Err(PaymentError::NoItems)));
    }

    #[test]
    fn overflowing_item_total_is_rejected() {
        let err = command(i64::MAX / 2, 3, i64::MAX).validate().unwrap_err();
        assert!(matches!(err, PaymentError::TotalOverflow));

        let mut cmd = command(i64::MAX / 2, 1, i64::MAX);
        cmd.items
            .push(PaymentItem::new("Boarding", Money::new(i64::MAX / 2 + 2), 1));
        assert!(matches!(cmd.validate(), Err(PaymentError::TotalOverflow)));
    }
}
