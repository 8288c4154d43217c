//! Integration tests for the booking saga.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::AggregateId;
use domain::{
    Aggregate, BankAccount, CommandContext, CommandPipeline, CreateOffering, CreatePayment,
    GatewayError, InMemoryPaymentGateway, InMemoryPayoutProvider, Money, OfferingService,
    OrderCode, PaymentItem, PaymentStatus, PayoutStatus, PetDetails, PetService, PipelineConfig,
    PublishMode, RegisterUser, RegisterVendor, ScheduleStatus, TransferStatus, UserRole,
    UserService, VendorService,
};
use event_bus::EventBus;
use saga::{BookingSagaCoordinator, SagaStatus, SagaStep};
use store::InMemoryStore;

struct TestHarness {
    store: InMemoryStore,
    coordinator: BookingSagaCoordinator<InMemoryStore>,
    gateway: InMemoryPaymentGateway,
    provider: InMemoryPayoutProvider,
    pipeline: CommandPipeline<InMemoryStore>,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryStore::new();
        let config = PipelineConfig {
            publish_mode: PublishMode::Sync,
            ..PipelineConfig::default()
        };
        let bus = Arc::new(EventBus::new(config.error_channel_capacity));
        let pipeline = CommandPipeline::new(store.clone(), bus, &config);
        let gateway = InMemoryPaymentGateway::new();
        let provider = InMemoryPayoutProvider::new();
        let coordinator = BookingSagaCoordinator::new(
            pipeline.clone(),
            Arc::new(gateway.clone()),
            Arc::new(provider.clone()),
        );

        Self {
            store,
            coordinator,
            gateway,
            provider,
            pipeline,
        }
    }

    async fn register(&self, email: String) -> AggregateId {
        UserService::new(self.pipeline.clone())
            .register_user(
                &CommandContext::new(),
                RegisterUser {
                    email,
                    full_name: "Lan Tran".to_string(),
                    phone: None,
                    role: UserRole::Customer,
                    credential_hash: "argon2$it".to_string(),
                },
            )
            .await
            .unwrap()
            .id()
            .unwrap()
    }

    /// Creates a pending payment for a fresh customer, pet, vendor and offering.
    async fn create_payment(&self, bank_account: Option<BankAccount>) -> CreatePayment {
        let ctx = CommandContext::new();
        let user_id = self
            .register(format!("customer-{}@example.com", AggregateId::new()))
            .await;
        let owner_id = self
            .register(format!("owner-{}@example.com", AggregateId::new()))
            .await;

        let vendor_id = VendorService::new(self.pipeline.clone())
            .register_vendor(
                &ctx,
                RegisterVendor {
                    owner_id,
                    name: "Meow House".to_string(),
                    phone: None,
                    address: Some("8 Nguyen Hue".to_string()),
                    bank_account,
                },
            )
            .await
            .unwrap()
            .id()
            .unwrap();
        let pet_id = PetService::new(self.pipeline.clone())
            .register_pet(
                &ctx,
                user_id,
                PetDetails {
                    name: "Bong".to_string(),
                    species: "cat".to_string(),
                    breed: None,
                },
            )
            .await
            .unwrap()
            .id()
            .unwrap();
        let offering_id = OfferingService::new(self.pipeline.clone())
            .create_offering(
                &ctx,
                CreateOffering {
                    vendor_id,
                    name: "Bath".to_string(),
                    price: Money::new(150_000),
                    duration_minutes: 45,
                },
            )
            .await
            .unwrap()
            .id()
            .unwrap();

        let start = Utc::now() + Duration::days(2);
        CreatePayment {
            user_id,
            vendor_id,
            pet_id,
            service_ids: vec![offering_id],
            amount: Money::new(150_000),
            items: vec![PaymentItem::new("Bath", Money::new(150_000), 1)],
            description: "Bath for Bong".to_string(),
            start_time: start,
            end_time: start + Duration::minutes(45),
        }
    }

    /// Creates a payment and marks it paid at the gateway.
    async fn paid_order(&self, bank_account: Option<BankAccount>) -> OrderCode {
        let cmd = self.create_payment(bank_account).await;
        let payment = self
            .coordinator
            .payments()
            .create_payment(&CommandContext::new(), cmd)
            .await
            .unwrap();
        let order_code = payment.order_code().unwrap();
        self.gateway.set_status(order_code, "PAID");
        order_code
    }
}

fn bank() -> BankAccount {
    BankAccount::new("VCB", "0071000123456", "MEOW HOUSE")
}

#[tokio::test]
async fn test_paid_payment_books_schedule_and_payout() {
    let h = TestHarness::new();
    let order_code = h.paid_order(Some(bank())).await;
    let ctx = CommandContext::new();

    let report = h.coordinator.confirm_payment(&ctx, order_code).await.unwrap();

    assert!(report.driven);
    assert_eq!(report.payment.status(), PaymentStatus::Paid);
    let saga = report.saga.clone().unwrap();
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert_eq!(saga.step(), SagaStep::Done);
    assert_eq!(saga.attempts(), 1);

    let schedule = h
        .coordinator
        .schedules()
        .get_schedule(&ctx, report.schedule_id().unwrap())
        .await
        .unwrap();
    assert_eq!(schedule.status(), ScheduleStatus::Pending);
    assert_eq!(schedule.payment_id(), report.payment.id());

    let payout = h
        .coordinator
        .payouts()
        .get_payout(&ctx, report.payout_id().unwrap())
        .await
        .unwrap();
    assert_eq!(payout.amount(), Money::new(150_000));
    assert_eq!(payout.schedule_id(), report.schedule_id());
}

#[tokio::test]
async fn test_confirming_again_books_nothing_new() {
    let h = TestHarness::new();
    let order_code = h.paid_order(Some(bank())).await;
    let ctx = CommandContext::new();

    let first = h.coordinator.confirm_payment(&ctx, order_code).await.unwrap();
    let second = h.coordinator.confirm_payment(&ctx, order_code).await.unwrap();

    assert!(!second.driven);
    assert_eq!(second.transitioned, None);
    assert_eq!(second.schedule_id(), first.schedule_id());
    assert_eq!(h.store.record_count("Schedule").await, 1);
    assert_eq!(h.store.record_count("Payout").await, 1);
    assert_eq!(h.store.record_count("BookingSaga").await, 1);
}

#[tokio::test]
async fn test_vendor_without_bank_skips_payout() {
    let h = TestHarness::new();
    let order_code = h.paid_order(None).await;

    let report = h
        .coordinator
        .confirm_payment(&CommandContext::new(), order_code)
        .await
        .unwrap();

    let saga = report.saga.unwrap();
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert!(saga.payout_skipped());
    assert!(saga.schedule_id().is_some());
    assert_eq!(h.store.record_count("Payout").await, 0);
}

#[tokio::test]
async fn test_schedule_failure_keeps_payment_paid_and_resumes_on_recheck() {
    let h = TestHarness::new();
    let order_code = h.paid_order(Some(bank())).await;
    let ctx = CommandContext::new();

    h.store.fail_writes_for("Schedule");
    let report = h.coordinator.confirm_payment(&ctx, order_code).await.unwrap();

    assert_eq!(report.payment.status(), PaymentStatus::Paid);
    let saga = report.saga.unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(saga.failed_step(), Some(SagaStep::CreateSchedule));
    assert!(saga.last_error().is_some());
    assert_eq!(h.store.record_count("Schedule").await, 0);

    h.store.clear_faults();
    let retried = h.coordinator.confirm_payment(&ctx, order_code).await.unwrap();

    assert!(retried.driven);
    assert_eq!(retried.transitioned, None);
    let saga = retried.saga.unwrap();
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert_eq!(saga.attempts(), 2);
    assert_eq!(h.store.record_count("Schedule").await, 1);
    assert_eq!(h.store.record_count("Payout").await, 1);
}

#[tokio::test]
async fn test_payout_failure_keeps_schedule_and_resume_finishes() {
    let h = TestHarness::new();
    let order_code = h.paid_order(Some(bank())).await;
    let ctx = CommandContext::new();

    h.store.fail_writes_for("Payout");
    let report = h.coordinator.confirm_payment(&ctx, order_code).await.unwrap();

    let failed = report.saga.unwrap();
    assert_eq!(failed.status(), SagaStatus::Failed);
    assert_eq!(failed.step(), SagaStep::CreatePayout);
    assert!(failed.schedule_id().is_some());
    assert_eq!(h.store.record_count("Schedule").await, 1);
    assert_eq!(h.store.record_count("Payout").await, 0);

    h.store.clear_faults();
    let payment_id = report.payment.id().unwrap();
    let resumed = h.coordinator.resume(&ctx, payment_id).await.unwrap();

    assert_eq!(resumed.status(), SagaStatus::Completed);
    assert_eq!(resumed.schedule_id(), failed.schedule_id());
    assert!(resumed.payout_id().is_some());
    assert_eq!(h.store.record_count("Schedule").await, 1);

    let again = h.coordinator.resume(&ctx, payment_id).await.unwrap();
    assert_eq!(again.attempts(), resumed.attempts());
}

#[tokio::test]
async fn test_gateway_outage_fails_confirmation_without_saga() {
    let h = TestHarness::new();
    let order_code = h.paid_order(Some(bank())).await;
    h.gateway.set_fail_on_status(true);

    let err = h
        .coordinator
        .confirm_payment(&CommandContext::new(), order_code)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), domain::ErrorKind::Internal);
    assert_eq!(h.store.record_count("BookingSaga").await, 0);
}

#[tokio::test]
async fn test_rejected_payout_retries_to_completion() {
    let h = TestHarness::new();
    let order_code = h.paid_order(Some(bank())).await;
    let ctx = CommandContext::new();
    h.provider
        .push_outcome(Err(GatewayError::Rejected("account closed".to_string())));
    h.provider.push_outcome(Ok(TransferStatus::Completed));

    let report = h.coordinator.confirm_payment(&ctx, order_code).await.unwrap();
    let payout = h
        .coordinator
        .payouts()
        .process_payout(&ctx, report.payout_id().unwrap())
        .await
        .unwrap();
    assert_eq!(payout.status(), PayoutStatus::Failed);
    assert_eq!(payout.failure_reason(), Some("account closed"));

    let payout = h
        .coordinator
        .payouts()
        .retry_payout(&ctx, report.payout_id().unwrap())
        .await
        .unwrap();
    assert_eq!(payout.status(), PayoutStatus::Completed);
    assert!(payout.transfer_id().is_some());
    assert_eq!(h.provider.request_count(), 2);

    let err = h
        .coordinator
        .payouts()
        .retry_payout(&ctx, report.payout_id().unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), domain::ErrorKind::Validation);
}
