//! Schedule domain events and booking snapshots.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::value_objects::Money;

/// The customer as they were at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedUser {
    pub user_id: AggregateId,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// A booked offering as it was at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedService {
    pub service_id: AggregateId,
    pub name: String,
    pub price: Money,
    pub duration_minutes: u32,
}

/// The vendor and booked services as they were at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedVendor {
    pub vendor_id: AggregateId,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub services: Vec<BookedService>,
}

/// The pet as it was at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedPet {
    pub pet_id: AggregateId,
    pub name: String,
    pub species: String,
    pub breed: Option<String>,
}

/// Events that can occur on a schedule aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ScheduleEvent {
    ScheduleCreated(ScheduleCreatedData),
    ScheduleConfirmed(ScheduleConfirmedData),
    ScheduleCompleted(ScheduleCompletedData),
    ScheduleCancelled(ScheduleCancelledData),
}

impl DomainEvent for ScheduleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ScheduleEvent::ScheduleCreated(_) => "ScheduleCreated",
            ScheduleEvent::ScheduleConfirmed(_) => "ScheduleConfirmed",
            ScheduleEvent::ScheduleCompleted(_) => "ScheduleCompleted",
            ScheduleEvent::ScheduleCancelled(_) => "ScheduleCancelled",
        }
    }
}

/// Data for ScheduleCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleCreatedData {
    pub schedule_id: AggregateId,
    /// Set when the schedule was booked through a payment.
    pub payment_id: Option<AggregateId>,
    pub booking_user: BookedUser,
    pub booked_vendor: BookedVendor,
    pub assigned_pet: AssignedPet,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfirmedData {
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleCompletedData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleCancelledData {
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}
