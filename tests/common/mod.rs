//! Shared harness for integration tests.
//!
//! Wires the real application graph over the in-memory store, the scripted
//! processor mock and a fixed clock.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

use subscription_sync::adapters::http::{subscription_router, SubscriptionAppState};
use subscription_sync::adapters::{FixedClock, InMemorySubscriptionStore, MockPaymentProcessor};
use subscription_sync::application::{
    EventRouter, HandleWebhookHandler, RenewalSweeper, SubscriptionReconciler,
};
use subscription_sync::domain::foundation::{Timestamp, UserId};
use subscription_sync::domain::subscription::{
    signature_header, EventAuthenticator, PlanCatalog, SubscriptionPayload, User,
};
use subscription_sync::ports::Clock;

pub const SECRET: &str = "whsec_integration";
pub const MONTHLY: &str = "price_monthly";
pub const YEARLY: &str = "price_yearly";

pub fn ts(value: &str) -> Timestamp {
    Timestamp::parse_rfc3339(value).unwrap()
}

pub fn user_id(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

pub struct Harness {
    pub store: Arc<InMemorySubscriptionStore>,
    pub processor: Arc<MockPaymentProcessor>,
    pub clock: Arc<FixedClock>,
    pub reconciler: Arc<SubscriptionReconciler>,
    pub sweeper: Arc<RenewalSweeper>,
    pub app: Router,
}

impl Harness {
    pub async fn new(now: &str) -> Self {
        let store = Arc::new(InMemorySubscriptionStore::new());
        for (id, customer) in [("user-1", "cus_1"), ("user-2", "cus_2")] {
            store
                .add_user(
                    User::new(user_id(id), format!("{}@example.com", id), id)
                        .with_customer_id(customer),
                )
                .await;
        }
        let processor = Arc::new(MockPaymentProcessor::new());
        let clock = Arc::new(FixedClock::new(ts(now)));
        let catalog = Arc::new(PlanCatalog::standard(MONTHLY, YEARLY).unwrap());
        let reconciler = Arc::new(SubscriptionReconciler::new(
            store.clone(),
            catalog,
            clock.clone(),
        ));
        let sweeper = Arc::new(
            RenewalSweeper::new(store.clone(), processor.clone(), reconciler.clone())
                .with_concurrency(2),
        );
        let authenticator = Arc::new(EventAuthenticator::new(
            SecretString::new(SECRET.to_string()),
            300,
            clock.clone(),
        ));
        let webhook_handler = Arc::new(HandleWebhookHandler::new(
            authenticator,
            Arc::new(EventRouter::new(reconciler.clone())),
        ));
        let app = subscription_router().with_state(SubscriptionAppState {
            webhook_handler,
            sweeper: sweeper.clone(),
            clock: clock.clone(),
        });

        Self {
            store,
            processor,
            clock,
            reconciler,
            sweeper,
            app,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Delivers a correctly signed notification.
    pub async fn deliver(&self, event_id: &str, event_type: &str, object: Value) -> Response {
        let body = envelope(event_id, event_type, object);
        let signature = signature_header(SECRET, self.now().as_unix_secs(), &body);
        self.post_webhook(body, Some(signature)).await
    }

    pub async fn post_webhook(&self, body: Vec<u8>, signature: Option<String>) -> Response {
        let mut builder = Request::builder().method("POST").uri("/webhooks/stripe");
        if let Some(signature) = signature {
            builder = builder.header("Stripe-Signature", signature);
        }
        self.app
            .clone()
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }
}

pub fn envelope(event_id: &str, event_type: &str, object: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": event_type,
        "created": 1_704_067_200,
        "livemode": false,
        "data": { "object": object }
    }))
    .unwrap()
}

/// Processor subscription object with the period on its first item.
pub fn subscription_object(
    id: &str,
    customer: &str,
    status: &str,
    price: &str,
    start: &str,
    end: &str,
) -> Value {
    json!({
        "id": id,
        "customer": customer,
        "status": status,
        "items": { "data": [{
            "price": { "id": price },
            "current_period_start": ts(start).as_unix_secs(),
            "current_period_end": ts(end).as_unix_secs()
        }]}
    })
}

pub fn payload(object: Value) -> SubscriptionPayload {
    serde_json::from_value(object).unwrap()
}

pub fn invoice_object(id: &str, subscription: &str) -> Value {
    json!({ "id": id, "customer": "cus_1", "subscription": subscription })
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
