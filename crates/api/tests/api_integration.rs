//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::AppState;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::AggregateId;
use domain::{
    Aggregate, BankAccount, CommandContext, CreateOffering, InMemoryPaymentGateway,
    InMemoryPayoutProvider, Money, OfferingService, OrderCode, PetDetails, PetService,
    RegisterUser, RegisterVendor, UserRole, UserService, VendorService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    state: Arc<AppState<InMemoryStore>>,
    gateway: InMemoryPaymentGateway,
}

/// Ids of a customer, pet, vendor and offering ready to be booked.
struct Seeded {
    user_id: AggregateId,
    pet_id: AggregateId,
    vendor_id: AggregateId,
    offering_id: AggregateId,
}

async fn setup() -> TestApp {
    let gateway = InMemoryPaymentGateway::new();
    let state = api::create_state(
        InMemoryStore::new(),
        Arc::new(gateway.clone()),
        Arc::new(InMemoryPayoutProvider::new()),
        &Config::default(),
    )
    .await;
    let app = api::create_app(state.clone(), get_metrics_handle());
    TestApp { app, state, gateway }
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn seed(&self, bank_account: Option<BankAccount>) -> Seeded {
        let pipeline = self.state.pipeline.clone();
        let ctx = CommandContext::new();
        let users = UserService::new(pipeline.clone());
        let register = |email: String| RegisterUser {
            email,
            full_name: "Hoa Le".to_string(),
            phone: None,
            role: UserRole::Customer,
            credential_hash: "argon2$api".to_string(),
        };

        let user_id = users
            .register_user(&ctx, register(format!("c-{}@example.com", AggregateId::new())))
            .await
            .unwrap()
            .id()
            .unwrap();
        let owner_id = users
            .register_user(&ctx, register(format!("o-{}@example.com", AggregateId::new())))
            .await
            .unwrap()
            .id()
            .unwrap();
        let vendor_id = VendorService::new(pipeline.clone())
            .register_vendor(
                &ctx,
                RegisterVendor {
                    owner_id,
                    name: "Bark Park".to_string(),
                    phone: None,
                    address: None,
                    bank_account,
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
                    name: "Lu".to_string(),
                    species: "dog".to_string(),
                    breed: None,
                },
            )
            .await
            .unwrap()
            .id()
            .unwrap();
        let offering_id = OfferingService::new(pipeline)
            .create_offering(
                &ctx,
                CreateOffering {
                    vendor_id,
                    name: "Nail trim".to_string(),
                    price: Money::new(80_000),
                    duration_minutes: 20,
                },
            )
            .await
            .unwrap()
            .id()
            .unwrap();

        Seeded {
            user_id,
            pet_id,
            vendor_id,
            offering_id,
        }
    }

    async fn create_payment(&self, seeded: &Seeded, amount: i64) -> (StatusCode, Value) {
        let start = chrono::Utc::now() + chrono::Duration::days(1);
        let body = json!({
            "user_id": seeded.user_id,
            "vendor_id": seeded.vendor_id,
            "pet_id": seeded.pet_id,
            "service_ids": [seeded.offering_id],
            "amount": amount,
            "items": [{ "name": "Nail trim", "price": 80_000, "quantity": 1 }],
            "description": "Nail trim for Lu",
            "start_time": start,
            "end_time": start + chrono::Duration::minutes(20),
        });
        self.send("POST", "/payments", Some(body)).await
    }

    /// Creates a payment and marks it paid at the gateway.
    async fn paid_payment(&self, seeded: &Seeded) -> i64 {
        let (status, payment) = self.create_payment(seeded, 80_000).await;
        assert_eq!(status, StatusCode::CREATED);
        let order_code = payment["order_code"].as_i64().unwrap();
        self.gateway.set_status(OrderCode::new(order_code), "PAID");
        order_code
    }
}

fn bank() -> BankAccount {
    BankAccount::new("ACB", "2210000999", "BARK PARK")
}

#[tokio::test]
async fn test_health_check() {
    let t = setup().await;
    let (status, json) = t.send("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup().await;
    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_and_get_payment() {
    let t = setup().await;
    let seeded = t.seed(Some(bank())).await;

    let (status, created) = t.create_payment(&seeded, 80_000).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "Pending");
    assert!(created["checkout_url"].as_str().unwrap().contains("checkout"));

    let order_code = created["order_code"].as_i64().unwrap();
    let (status, fetched) = t
        .send("GET", &format!("/payments/{order_code}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);
    assert_eq!(fetched["amount"], 80_000);
}

#[tokio::test]
async fn test_amount_mismatch_is_bad_request() {
    let t = setup().await;
    let seeded = t.seed(Some(bank())).await;

    let (status, json) = t.create_payment(&seeded, 100_000).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json["error"],
        "total item amount (80000) does not match payment amount (100000)"
    );
}

#[tokio::test]
async fn test_unknown_order_code_is_not_found() {
    let t = setup().await;
    let (status, json) = t.send("GET", "/payments/424242", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_webhook_confirms_and_books() {
    let t = setup().await;
    let seeded = t.seed(Some(bank())).await;
    let order_code = t.paid_payment(&seeded).await;

    let (status, json) = t
        .send("POST", "/payments/webhook", Some(json!({ "order_code": order_code })))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["payment"]["status"], "Paid");
    assert_eq!(json["transitioned"], "Paid");
    assert_eq!(json["saga"]["status"], "Completed");
    assert!(json["saga"]["schedule_id"].as_str().is_some());
    assert!(json["saga"]["payout_id"].as_str().is_some());

    let payment_id = json["payment"]["id"].as_str().unwrap().to_string();
    let (status, saga) = t.send("GET", &format!("/sagas/{payment_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saga["step"], "done");

    let (status, again) = t
        .send("POST", &format!("/payments/{order_code}/check"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["transitioned"], Value::Null);
    assert_eq!(again["saga"]["saga_id"], saga["saga_id"]);
}

#[tokio::test]
async fn test_cancel_payment() {
    let t = setup().await;
    let seeded = t.seed(None).await;
    let (_, created) = t.create_payment(&seeded, 80_000).await;
    let order_code = created["order_code"].as_i64().unwrap();

    let (status, json) = t
        .send(
            "POST",
            &format!("/payments/{order_code}/cancel"),
            Some(json!({ "reason": "changed plans" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "Cancelled");
    assert_eq!(json["cancellation_reason"], "changed plans");
}

#[tokio::test]
async fn test_saga_lookup_errors() {
    let t = setup().await;

    let (status, _) = t.send("GET", "/sagas/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .send("GET", &format!("/sagas/{}", AggregateId::new()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resume_unpaid_payment_is_bad_request() {
    let t = setup().await;
    let seeded = t.seed(Some(bank())).await;
    let (_, created) = t.create_payment(&seeded, 80_000).await;
    let payment_id = created["id"].as_str().unwrap();

    let (status, json) = t
        .send("POST", &format!("/sagas/{payment_id}/resume"), None)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Pending"));
}

#[tokio::test]
async fn test_payout_lifecycle() {
    let t = setup().await;
    let seeded = t.seed(Some(bank())).await;

    let (status, json) = t
        .send(
            "POST",
            "/payouts",
            Some(json!({ "vendor_id": seeded.vendor_id, "amount": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());

    let (status, created) = t
        .send(
            "POST",
            "/payouts",
            Some(json!({ "vendor_id": seeded.vendor_id, "amount": 50_000 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "Pending");

    let id = created["id"].as_str().unwrap();
    let (status, processed) = t
        .send("POST", &format!("/payouts/{id}/process"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(processed["status"], "Completed");
    assert!(processed["transfer_id"].as_str().is_some());

    let (status, _) = t.send("POST", &format!("/payouts/{id}/retry"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_payout_without_bank_account_is_bad_request() {
    let t = setup().await;
    let seeded = t.seed(None).await;

    let (status, _) = t
        .send(
            "POST",
            "/payouts",
            Some(json!({ "vendor_id": seeded.vendor_id, "amount": 50_000 })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ledger_follows_paid_payment() {
    let t = setup().await;
    let seeded = t.seed(Some(bank())).await;
    let order_code = t.paid_payment(&seeded).await;
    t.send("POST", &format!("/payments/{order_code}/check"), None)
        .await;

    // Handlers run after the response, so poll briefly.
    let mut entry = Value::Null;
    for _ in 0..50 {
        let (status, json) = t.send("GET", &format!("/ledger/{order_code}"), None).await;
        if status == StatusCode::OK && json["status"] == "Paid" {
            entry = json;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(entry["status"], "Paid");
    assert_eq!(entry["amount"], 80_000);
}
