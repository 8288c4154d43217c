//! Schedule aggregate implementation.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use store::UniqueKey;

use crate::aggregate::Aggregate;
use crate::value_objects::Money;

use super::events::{
    ScheduleCancelledData, ScheduleCompletedData, ScheduleConfirmedData, ScheduleCreatedData,
};
use super::{
    AssignedPet, BookedUser, BookedVendor, ScheduleError, ScheduleEvent, ScheduleStatus,
};

/// Everything a schedule is created from, captured at booking time.
#[derive(Debug, Clone)]
pub struct ScheduleDraft {
    pub payment_id: Option<AggregateId>,
    pub booking_user: BookedUser,
    pub booked_vendor: BookedVendor,
    pub assigned_pet: AssignedPet,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_price: Money,
}

/// Schedule aggregate root.
///
/// Holds value copies of the user, vendor, services and pet; later changes
/// to those aggregates never alter a schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    id: Option<AggregateId>,
    payment_id: Option<AggregateId>,
    booking_user: Option<BookedUser>,
    booked_vendor: Option<BookedVendor>,
    assigned_pet: Option<AssignedPet>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    total_price: Money,
    status: ScheduleStatus,
    cancellation_reason: Option<String>,
}

impl Aggregate for Schedule {
    type Event = ScheduleEvent;
    type Error = ScheduleError;

    fn aggregate_type() -> &'static str {
        "Schedule"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ScheduleEvent::ScheduleCreated(data) => {
                self.id = Some(data.schedule_id);
                self.payment_id = data.payment_id;
                self.booking_user = Some(data.booking_user);
                self.booked_vendor = Some(data.booked_vendor);
                self.assigned_pet = Some(data.assigned_pet);
                self.start_time = Some(data.start_time);
                self.end_time = Some(data.end_time);
                self.total_price = data.total_price;
                self.status = ScheduleStatus::Pending;
            }
            ScheduleEvent::ScheduleConfirmed(_) => self.status = ScheduleStatus::Confirmed,
            ScheduleEvent::ScheduleCompleted(_) => self.status = ScheduleStatus::Completed,
            ScheduleEvent::ScheduleCancelled(data) => {
                self.status = ScheduleStatus::Cancelled;
                self.cancellation_reason = data.reason;
            }
        }
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        self.payment_id
            .map(Self::payment_key)
            .into_iter()
            .collect()
    }
}

impl Schedule {
    /// Unique key tying a schedule to the payment it was booked through.
    pub fn payment_key(payment_id: AggregateId) -> UniqueKey {
        UniqueKey::new("payment_id", payment_id)
    }

    pub fn payment_id(&self) -> Option<AggregateId> {
        self.payment_id
    }

    pub fn booking_user(&self) -> Option<&BookedUser> {
        self.booking_user.as_ref()
    }

    pub fn booked_vendor(&self) -> Option<&BookedVendor> {
        self.booked_vendor.as_ref()
    }

    pub fn vendor_id(&self) -> Option<AggregateId> {
        self.booked_vendor.as_ref().map(|vendor| vendor.vendor_id)
    }

    pub fn assigned_pet(&self) -> Option<&AssignedPet> {
        self.assigned_pet.as_ref()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn status(&self) -> ScheduleStatus {
        self.status
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    /// Creates the schedule from a booking snapshot.
    pub fn create(
        &self,
        schedule_id: AggregateId,
        draft: ScheduleDraft,
    ) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        if self.id.is_some() {
            return Err(ScheduleError::AlreadyCreated);
        }
        if draft.booked_vendor.services.is_empty() {
            return Err(ScheduleError::NoServices);
        }
        if draft.start_time >= draft.end_time {
            return Err(ScheduleError::InvalidTimeWindow);
        }

        Ok(vec![ScheduleEvent::ScheduleCreated(ScheduleCreatedData {
            schedule_id,
            payment_id: draft.payment_id,
            booking_user: draft.booking_user,
            booked_vendor: draft.booked_vendor,
            assigned_pet: draft.assigned_pet,
            start_time: draft.start_time,
            end_time: draft.end_time,
            total_price: draft.total_price,
            created_at: Utc::now(),
        })])
    }

    pub fn confirm(&self) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        self.transition(ScheduleStatus::Confirmed)?;
        Ok(vec![ScheduleEvent::ScheduleConfirmed(ScheduleConfirmedData {
            confirmed_at: Utc::now(),
        })])
    }

    pub fn complete(&self) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        self.transition(ScheduleStatus::Completed)?;
        Ok(vec![ScheduleEvent::ScheduleCompleted(ScheduleCompletedData {
            completed_at: Utc::now(),
        })])
    }

    pub fn cancel(&self, reason: Option<String>) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        self.transition(ScheduleStatus::Cancelled)?;
        Ok(vec![ScheduleEvent::ScheduleCancelled(ScheduleCancelledData {
            reason,
            cancelled_at: Utc::now(),
        })])
    }

    fn transition(&self, next: ScheduleStatus) -> Result<(), ScheduleError> {
        if self.id.is_none() {
            return Err(ScheduleError::NotCreated);
        }
        if !self.status.can_transition_to(next) {
            return Err(ScheduleError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateRoot;
    use crate::schedule::BookedService;
    use chrono::Duration;

    fn draft(payment_id: Option<AggregateId>) -> ScheduleDraft {
        let start = Utc::now() + Duration::days(2);
        ScheduleDraft {
            payment_id,
            booking_user: BookedUser {
                user_id: AggregateId::new(),
                full_name: "Linh Tran".into(),
                email: "linh@example.com".into(),
                phone: None,
            },
            booked_vendor: BookedVendor {
                vendor_id: AggregateId::new(),
                name: "Pet Spa".into(),
                phone: Some("0281234567".into()),
                address: None,
                services: vec![BookedService {
                    service_id: AggregateId::new(),
                    name: "Bath".into(),
                    price: Money::new(100_000),
                    duration_minutes: 60,
                }],
            },
            assigned_pet: AssignedPet {
                pet_id: AggregateId::new(),
                name: "Mochi".into(),
                species: "dog".into(),
                breed: None,
            },
            start_time: start,
            end_time: start + Duration::hours(1),
            total_price: Money::new(100_000),
        }
    }

    #[test]
    fn payment_key_only_for_paid_bookings() {
        let payment_id = AggregateId::new();
        let mut root = AggregateRoot::<Schedule>::new();
        root.execute(|s| s.create(AggregateId::new(), draft(Some(payment_id))))
            .unwrap();
        assert_eq!(root.unique_keys(), vec![Schedule::payment_key(payment_id)]);

        let mut direct = AggregateRoot::<Schedule>::new();
        direct
            .execute(|s| s.create(AggregateId::new(), draft(None)))
            .unwrap();
        assert!(direct.unique_keys().is_empty());
    }

    #[test]
    fn lifecycle_follows_table() {
        let mut root = AggregateRoot::<Schedule>::new();
        root.execute(|s| s.create(AggregateId::new(), draft(None)))
            .unwrap();

        assert!(matches!(
            root.complete(),
            Err(ScheduleError::InvalidTransition {
                from: ScheduleStatus::Pending,
                to: ScheduleStatus::Completed
            })
        ));
        root.execute(Schedule::confirm).unwrap();
        root.execute(Schedule::complete).unwrap();

        assert_eq!(root.status(), ScheduleStatus::Completed);
        assert!(root.cancel(None).is_err());
    }

    #[test]
    fn rejects_inverted_window() {
        let mut bad = draft(None);
        bad.end_time = bad.start_time;
        let root = AggregateRoot::<Schedule>::new();

        assert!(matches!(
            root.create(AggregateId::new(), bad),
            Err(ScheduleError::InvalidTimeWindow)
        ));
    }
}
