//! Axum router configuration for the subscription endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    check_renewal, get_renewal_status, handle_stripe_webhook, SubscriptionAppState,
};

/// Create the webhook router.
///
/// Webhooks carry no user authentication; they are verified via signature.
///
/// # Routes
/// - `POST /stripe` - Handle processor notifications
pub fn webhook_routes() -> Router<SubscriptionAppState> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// Create the renewal router.
///
/// # Routes
/// - `GET /:user_id` - Read-only renewal status
/// - `POST /:user_id/check` - Reconcile the user against the processor
pub fn renewal_routes() -> Router<SubscriptionAppState> {
    Router::new()
        .route("/:user_id", get(get_renewal_status))
        .route("/:user_id/check", post(check_renewal))
}

/// Create the complete subscription module router.
///
/// - `/webhooks/*` - Notification endpoints
/// - `/renewals/*` - Renewal endpoints
pub fn subscription_router() -> Router<SubscriptionAppState> {
    Router::new()
        .nest("/webhooks", webhook_routes())
        .nest("/renewals", renewal_routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::adapters::clock::FixedClock;
    use crate::adapters::memory::InMemorySubscriptionStore;
    use crate::adapters::stripe::MockPaymentProcessor;
    use crate::application::handlers::subscription::{
        EventRouter, HandleWebhookHandler, RenewalSweeper, SubscriptionReconciler,
    };
    use crate::domain::foundation::{Timestamp, UserId};
    use crate::domain::subscription::{
        signature_header, EventAuthenticator, PlanCatalog, SubscriptionPayload, User,
    };

    const SECRET: &str = "whsec_test";

    // ───────────────────────────────────────────────────────────────
    // Fixture
    // ───────────────────────────────────────────────────────────────

    struct Fixture {
        store: Arc<InMemorySubscriptionStore>,
        processor: Arc<MockPaymentProcessor>,
        clock: Arc<FixedClock>,
        app: Router,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemorySubscriptionStore::new());
        store
            .add_user(
                User::new(UserId::new("user-1").unwrap(), "u@example.com", "U")
                    .with_customer_id("cus_1"),
            )
            .await;
        let processor = Arc::new(MockPaymentProcessor::new());
        let clock = Arc::new(FixedClock::new(
            Timestamp::parse_rfc3339("2024-01-03T00:00:00Z").unwrap(),
        ));
        let catalog = Arc::new(PlanCatalog::standard("price_month", "price_year").unwrap());
        let reconciler = Arc::new(SubscriptionReconciler::new(
            store.clone(),
            catalog,
            clock.clone(),
        ));
        let authenticator = Arc::new(EventAuthenticator::new(
            SecretString::new(SECRET.to_string()),
            300,
            clock.clone(),
        ));
        let router = Arc::new(EventRouter::new(reconciler.clone()));
        let state = SubscriptionAppState {
            webhook_handler: Arc::new(HandleWebhookHandler::new(authenticator, router)),
            sweeper: Arc::new(RenewalSweeper::new(
                store.clone(),
                processor.clone(),
                reconciler,
            )),
            clock: clock.clone(),
        };
        Fixture {
            store,
            processor,
            clock,
            app: subscription_router().with_state(state),
        }
    }

    fn subscription_object(status: &str) -> Value {
        json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": status,
            "items": { "data": [{
                "price": { "id": "price_month" },
                "current_period_start": 1_704_067_200,
                "current_period_end": 1_706_745_600
            }]}
        })
    }

    fn notification(event_type: &str, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": event_type,
            "created": 1_704_240_000,
            "livemode": false,
            "data": { "object": object }
        }))
        .unwrap()
    }

    fn webhook_request(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/webhooks/stripe");
        if let Some(signature) = signature {
            builder = builder.header("Stripe-Signature", signature);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn signed(f: &Fixture, body: &[u8]) -> String {
        use crate::ports::Clock;
        signature_header(SECRET, f.clock.now().as_unix_secs(), body)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    // ───────────────────────────────────────────────────────────────
    // Webhook
    // ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn signed_created_event_is_acknowledged_and_applied() {
        let f = fixture().await;
        let body = notification("customer.subscription.created", subscription_object("active"));
        let signature = signed(&f, &body);

        let response = f
            .app
            .clone()
            .oneshot(webhook_request(body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["received"], true);
        assert_eq!(json["event_id"], "evt_1");
        assert_eq!(f.store.count().await, 1);
    }

    #[tokio::test]
    async fn missing_signature_is_rejected_without_store_access() {
        let f = fixture().await;
        let body = notification("customer.subscription.created", subscription_object("active"));

        let response = f.app.clone().oneshot(webhook_request(body, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "INVALID_SIGNATURE");
        assert_eq!(f.store.count().await, 0);
    }

    #[tokio::test]
    async fn tampered_body_is_rejected() {
        let f = fixture().await;
        let body = notification("customer.subscription.created", subscription_object("active"));
        let signature = signed(&f, &body);
        let tampered = notification("customer.subscription.created", subscription_object("trialing"));

        let response = f
            .app
            .clone()
            .oneshot(webhook_request(tampered, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(f.store.count().await, 0);
    }

    #[tokio::test]
    async fn unknown_customer_is_acknowledged() {
        let f = fixture().await;
        let mut object = subscription_object("active");
        object["customer"] = json!("cus_unknown");
        let body = notification("customer.subscription.created", object);
        let signature = signed(&f, &body);

        let response = f
            .app
            .clone()
            .oneshot(webhook_request(body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(f.store.count().await, 0);
    }

    #[tokio::test]
    async fn store_outage_is_a_server_error() {
        let f = fixture().await;
        f.store.set_unavailable(true).await;
        let body = notification("customer.subscription.created", subscription_object("active"));
        let signature = signed(&f, &body);

        let response = f
            .app
            .clone()
            .oneshot(webhook_request(body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ───────────────────────────────────────────────────────────────
    // Renewals
    // ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn renewal_status_reports_active_subscription() {
        let f = fixture().await;
        let body = notification("customer.subscription.created", subscription_object("active"));
        let signature = signed(&f, &body);
        let _ = f
            .app
            .clone()
            .oneshot(webhook_request(body, Some(signature)))
            .await
            .unwrap();

        let response = f
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/renewals/user-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "active");
        assert_eq!(json["external_id"], "sub_1");
        assert_eq!(json["days_remaining"], 29);
    }

    #[tokio::test]
    async fn renewal_check_expires_when_processor_reports_canceled() {
        let f = fixture().await;
        let body = notification("customer.subscription.created", subscription_object("active"));
        let signature = signed(&f, &body);
        let _ = f
            .app
            .clone()
            .oneshot(webhook_request(body, Some(signature)))
            .await
            .unwrap();
        f.clock
            .set(Timestamp::parse_rfc3339("2024-02-02T00:00:00Z").unwrap());
        let canceled: SubscriptionPayload =
            serde_json::from_value(subscription_object("canceled")).unwrap();
        f.processor.set_subscription(canceled);

        let response = f
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/renewals/user-1/check")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["user_id"], "user-1");
        assert_eq!(json["result"], "expired");
    }

    #[tokio::test]
    async fn renewal_check_without_subscription() {
        let f = fixture().await;

        let response = f
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/renewals/user-1/check")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["result"], "no_subscription");
    }
}
