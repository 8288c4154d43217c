//! Fixtures shared by the service tests.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::AggregateId;
use event_bus::EventBus;
use store::InMemoryStore;

use crate::aggregate::Aggregate;
use crate::command::{CommandPipeline, PipelineConfig, PublishMode};
use crate::context::CommandContext;
use crate::offering::{CreateOffering, OfferingService};
use crate::payment::CreatePayment;
use crate::pet::{PetDetails, PetService};
use crate::user::{RegisterUser, UserRole, UserService};
use crate::value_objects::{BankAccount, Money, PaymentItem};
use crate::vendor::{RegisterVendor, VendorService};

pub(crate) async fn pipeline() -> (InMemoryStore, CommandPipeline<InMemoryStore>, Arc<EventBus>) {
    let store = InMemoryStore::new();
    let config = PipelineConfig {
        publish_mode: PublishMode::Sync,
        ..PipelineConfig::default()
    };
    let bus = Arc::new(EventBus::new(config.error_channel_capacity));
    let pipeline = CommandPipeline::new(store.clone(), Arc::clone(&bus), &config);
    (store, pipeline, bus)
}

pub(crate) async fn seed_user(pipeline: &CommandPipeline<InMemoryStore>, email: &str) -> AggregateId {
    UserService::new(pipeline.clone())
        .register_user(
            &CommandContext::new(),
            RegisterUser {
                email: email.to_string(),
                full_name: "Minh Pham".to_string(),
                phone: None,
                role: UserRole::Customer,
                credential_hash: "argon2$seed".to_string(),
            },
        )
        .await
        .unwrap()
        .id()
        .unwrap()
}

pub(crate) async fn seed_vendor(
    pipeline: &CommandPipeline<InMemoryStore>,
    bank_account: Option<BankAccount>,
) -> AggregateId {
    let owner_id = seed_user(pipeline, &format!("owner-{}@example.com", AggregateId::new())).await;
    VendorService::new(pipeline.clone())
        .register_vendor(
            &CommandContext::new(),
            RegisterVendor {
                owner_id,
                name: "Happy Paws Spa".to_string(),
                phone: Some("0283900000".to_string()),
                address: Some("12 Le Loi".to_string()),
                bank_account,
            },
        )
        .await
        .unwrap()
        .id()
        .unwrap()
}

/// A customer with a pet, a vendor selling one offering, and an unrelated
/// vendor.
pub(crate) struct Booking {
    pub user_id: AggregateId,
    pub vendor_id: AggregateId,
    pub pet_id: AggregateId,
    pub offering_id: AggregateId,
    pub other_vendor_id: AggregateId,
}

pub(crate) async fn seed_booking(
    pipeline: &CommandPipeline<InMemoryStore>,
    bank_account: Option<BankAccount>,
) -> Booking {
    let ctx = CommandContext::new();
    let user_id = seed_user(pipeline, &format!("customer-{}@example.com", AggregateId::new())).await;
    let vendor_id = seed_vendor(pipeline, bank_account).await;
    let other_vendor_id = seed_vendor(pipeline, None).await;

    let pet_id = PetService::new(pipeline.clone())
        .register_pet(
            &ctx,
            user_id,
            PetDetails {
                name: "Mochi".to_string(),
                species: "dog".to_string(),
                breed: Some("shiba".to_string()),
            },
        )
        .await
        .unwrap()
        .id()
        .unwrap();

    let offering_id = OfferingService::new(pipeline.clone())
        .create_offering(
            &ctx,
            CreateOffering {
                vendor_id,
                name: "Full grooming".to_string(),
                price: Money::new(100_000),
                duration_minutes: 60,
            },
        )
        .await
        .unwrap()
        .id()
        .unwrap();

    Booking {
        user_id,
        vendor_id,
        pet_id,
        offering_id,
        other_vendor_id,
    }
}

/// A booking for tomorrow, one hour long, with a single item line.
pub(crate) fn payment_command(booking: &Booking, price: i64, quantity: u32, amount: i64) -> CreatePayment {
    let start = Utc::now() + Duration::days(1);
    CreatePayment {
        user_id: booking.user_id,
        vendor_id: booking.vendor_id,
        pet_id: booking.pet_id,
        service_ids: vec![booking.offering_id],
        amount: Money::new(amount),
        items: vec![PaymentItem::new("Full grooming", Money::new(price), quantity)],
        description: "Grooming for Mochi".to_string(),
        start_time: start,
        end_time: start + Duration::hours(1),
    }
}
