//! Integration tests for the command pipeline.
//!
//! These tests drive the services end to end over the in-memory store and
//! check what a subscriber and a later reader can observe: events only after
//! commit, nothing after a failed commit, and all-or-nothing writes across
//! aggregate types.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::AggregateId;
use domain::{
    Aggregate, AggregateRoot, BankAccount, CommandContext, CommandPipeline, CreateOffering,
    CreatePayment, DomainError, ErrorKind, InMemoryPaymentGateway, Money, OfferingService,
    PaymentItem, PaymentLedgerView, PaymentService, PaymentStatus, PetDetails, PetService,
    PipelineConfig, PublishMode, RegisterUser, RegisterVendor, User, UserRole, UserService,
    Vendor, VendorService,
};
use event_bus::{EventBus, EventEnvelope, EventHandler, HandlerError};
use store::InMemoryStore;

/// Records the type of every event it receives.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl Recorder {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    fn name(&self) -> &'static str {
        "Recorder"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(event.event_type.clone());
        Ok(())
    }
}

struct Harness {
    store: InMemoryStore,
    pipeline: CommandPipeline<InMemoryStore>,
    bus: Arc<EventBus>,
    gateway: InMemoryPaymentGateway,
    payments: PaymentService<InMemoryStore>,
}

fn harness(publish_mode: PublishMode) -> Harness {
    let store = InMemoryStore::new();
    let config = PipelineConfig {
        publish_mode,
        ..PipelineConfig::default()
    };
    let bus = Arc::new(EventBus::new(config.error_channel_capacity));
    let pipeline = CommandPipeline::new(store.clone(), Arc::clone(&bus), &config);
    let gateway = InMemoryPaymentGateway::new();
    let payments = PaymentService::new(pipeline.clone(), Arc::new(gateway.clone()));
    Harness {
        store,
        pipeline,
        bus,
        gateway,
        payments,
    }
}

struct Refs {
    user_id: AggregateId,
    vendor_id: AggregateId,
    pet_id: AggregateId,
    offering_id: AggregateId,
}

async fn seed(pipeline: &CommandPipeline<InMemoryStore>) -> Refs {
    let ctx = CommandContext::new();
    let user_id = UserService::new(pipeline.clone())
        .register_user(&ctx, register("customer@example.com"))
        .await
        .unwrap()
        .id()
        .unwrap();
    let owner_id = UserService::new(pipeline.clone())
        .register_user(&ctx, register("owner@example.com"))
        .await
        .unwrap()
        .id()
        .unwrap();
    let vendor_id = VendorService::new(pipeline.clone())
        .register_vendor(
            &ctx,
            RegisterVendor {
                owner_id,
                name: "Happy Paws Spa".into(),
                phone: None,
                address: None,
                bank_account: Some(BankAccount::new("VCB", "0071000123", "HAPPY PAWS")),
            },
        )
        .await
        .unwrap()
        .id()
        .unwrap();
    let pet_id = PetService::new(pipeline.clone())
        .register_pet(
            &ctx,
            user_id,
            PetDetails {
                name: "Bun".into(),
                species: "cat".into(),
                breed: None,
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
                name: "Bath and trim".into(),
                price: Money::new(100_000),
                duration_minutes: 90,
            },
        )
        .await
        .unwrap()
        .id()
        .unwrap();

    Refs {
        user_id,
        vendor_id,
        pet_id,
        offering_id,
    }
}

fn register(email: &str) -> RegisterUser {
    RegisterUser {
        email: email.into(),
        full_name: "Test User".into(),
        phone: None,
        role: UserRole::Customer,
        credential_hash: "argon2$test".into(),
    }
}

fn create_payment(refs: &Refs, price: i64, quantity: u32, amount: i64) -> CreatePayment {
    let start = Utc::now() + chrono::Duration::days(1);
    CreatePayment {
        user_id: refs.user_id,
        vendor_id: refs.vendor_id,
        pet_id: refs.pet_id,
        service_ids: vec![refs.offering_id],
        amount: Money::new(amount),
        items: vec![PaymentItem::new("Bath and trim", Money::new(price), quantity)],
        description: "Bath for Bun".into(),
        start_time: start,
        end_time: start + chrono::Duration::hours(2),
    }
}

mod payment_flow {
    use super::*;

    #[tokio::test]
    async fn mismatched_total_is_rejected_without_persisting() {
        let h = harness(PublishMode::Sync);
        let refs = seed(&h.pipeline).await;

        let err = h
            .payments
            .create_payment(&CommandContext::new(), create_payment(&refs, 40_000, 2, 100_000))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            err.to_string(),
            "total item amount (80000) does not match payment amount (100000)"
        );
        assert_eq!(h.store.record_count("Payment").await, 0);
        assert_eq!(h.gateway.link_count(), 0);
    }

    #[tokio::test]
    async fn confirm_paid_emits_one_event_and_repeats_as_no_op() {
        let h = harness(PublishMode::Sync);
        let refs = seed(&h.pipeline).await;
        let recorder = Arc::new(Recorder::default());
        h.bus.subscribe("PaymentPaid", recorder.clone()).await;
        let ctx = CommandContext::new();

        let payment = h
            .payments
            .create_payment(&ctx, create_payment(&refs, 50_000, 2, 100_000))
            .await
            .unwrap();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        let code = payment.order_code().unwrap();
        h.gateway.set_status(code, "PAID");

        let first = h.payments.confirm_payment(&ctx, code).await.unwrap();
        let second = h.payments.confirm_payment(&ctx, code).await.unwrap();

        assert!(first.became_paid());
        assert_eq!(second.transitioned, None);
        assert_eq!(second.payment.status(), PaymentStatus::Paid);
        assert_eq!(recorder.seen(), vec!["PaymentPaid".to_string()]);
    }

    #[tokio::test]
    async fn pending_gateway_status_changes_nothing() {
        let h = harness(PublishMode::Sync);
        let refs = seed(&h.pipeline).await;
        let ctx = CommandContext::new();
        let payment = h
            .payments
            .create_payment(&ctx, create_payment(&refs, 50_000, 2, 100_000))
            .await
            .unwrap();

        let confirmation = h
            .payments
            .confirm_payment(&ctx, payment.order_code().unwrap())
            .await
            .unwrap();

        assert_eq!(confirmation.transitioned, None);
        assert_eq!(confirmation.payment.status(), PaymentStatus::Pending);
    }
}

mod atomicity {
    use super::*;

    #[tokio::test]
    async fn failed_commit_publishes_nothing() {
        let h = harness(PublishMode::Sync);
        let refs = seed(&h.pipeline).await;
        let recorder = Arc::new(Recorder::default());
        h.bus.subscribe_all(recorder.clone()).await;
        h.store.fail_next_commit();

        let err = h
            .payments
            .create_payment(&CommandContext::new(), create_payment(&refs, 50_000, 2, 100_000))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(recorder.seen().is_empty());
        assert_eq!(h.store.record_count("Payment").await, 0);
        assert_eq!(h.gateway.cancelled_links().len(), 1);
    }

    #[tokio::test]
    async fn writes_across_aggregate_types_commit_together_or_not_at_all() {
        let h = harness(PublishMode::Sync);
        h.store.fail_writes_for("Vendor");

        let mut uow = h.pipeline.factory().create();
        uow.begin(&CommandContext::new()).await.unwrap();

        let user_id = AggregateId::new();
        let mut user = AggregateRoot::<User>::new();
        user.execute(|u| u.register(user_id, &register("atomic@example.com")))
            .unwrap();
        uow.users().unwrap().save(&mut user).await.unwrap();

        let mut vendor = AggregateRoot::<Vendor>::new();
        vendor
            .execute(|v| {
                v.register(
                    AggregateId::new(),
                    user_id,
                    &RegisterVendor {
                        owner_id: user_id,
                        name: "Atomic Grooming".into(),
                        phone: None,
                        address: None,
                        bank_account: None,
                    },
                )
            })
            .unwrap();
        let saved = uow.vendors().unwrap().save(&mut vendor).await;
        assert!(saved.is_err());
        assert!(vendor.has_changes());

        uow.rollback().await.unwrap();
        uow.close().await;

        assert_eq!(h.store.record_count("User").await, 0);
        assert_eq!(h.store.record_count("Vendor").await, 0);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let h = harness(PublishMode::Sync);
        let users = UserService::new(h.pipeline.clone());
        let ctx = CommandContext::new();
        users
            .register_user(&ctx, register("dup@example.com"))
            .await
            .unwrap();

        let err = users
            .register_user(&ctx, register("DUP@example.com"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(h.store.record_count("User").await, 1);
    }
}

mod context {
    use super::*;

    #[tokio::test]
    async fn cancelled_context_never_opens_a_transaction() {
        let h = harness(PublishMode::Sync);
        let refs = seed(&h.pipeline).await;
        let ctx = CommandContext::new();
        ctx.cancel();

        let err = h
            .payments
            .create_payment(&ctx, create_payment(&refs, 50_000, 2, 100_000))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Cancelled));
        assert_eq!(h.gateway.link_count(), 0);
    }
}

mod projections {
    use super::*;

    #[tokio::test]
    async fn ledger_follows_async_publication() {
        let h = harness(PublishMode::Async);
        let refs = seed(&h.pipeline).await;
        let ledger = Arc::new(PaymentLedgerView::new());
        h.bus.subscribe_all(ledger.clone()).await;
        let ctx = CommandContext::new();

        let payment = h
            .payments
            .create_payment(&ctx, create_payment(&refs, 50_000, 2, 100_000))
            .await
            .unwrap();
        let code = payment.order_code().unwrap();
        h.gateway.set_status(code, "PAID");
        h.payments.confirm_payment(&ctx, code).await.unwrap();

        let mut status = None;
        for _ in 0..50 {
            status = ledger.get(code).await.map(|e| e.status);
            if status == Some(PaymentStatus::Paid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, Some(PaymentStatus::Paid));
        assert_eq!(ledger.total_paid().await, Some(Money::new(100_000)));
    }
}
