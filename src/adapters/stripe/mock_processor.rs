//! Scripted payment processor for tests.
//!
//! Supports:
//! - Per-subscription responses
//! - Error injection, per subscription or for every call
//! - Call tracking, including the peak number of calls in flight
//! - An optional delay per call, for concurrency tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::subscription::{ProcessorStatus, SubscriptionPayload};
use crate::ports::{PaymentProcessor, ProcessorError};

/// Recorded call for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorCall {
    pub method: &'static str,
    pub subscription_id: String,
}

#[derive(Default)]
struct MockState {
    subscriptions: HashMap<String, SubscriptionPayload>,
    errors: HashMap<String, ProcessorError>,
    global_error: Option<ProcessorError>,
    delay: Option<Duration>,
    calls: Vec<ProcessorCall>,
    in_flight: usize,
    max_in_flight: usize,
}

#[derive(Clone, Default)]
pub struct MockPaymentProcessor {
    inner: Arc<Mutex<MockState>>,
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration
    // ════════════════════════════════════════════════════════════════════════════

    /// Makes `get_subscription(payload.id)` return `payload`.
    pub fn set_subscription(&self, payload: SubscriptionPayload) {
        self.state().subscriptions.insert(payload.id.clone(), payload);
    }

    /// Makes calls for `subscription_id` fail with `error`.
    pub fn set_error(&self, subscription_id: &str, error: ProcessorError) {
        self.state().errors.insert(subscription_id.to_string(), error);
    }

    /// Makes every call fail with `error` until cleared.
    pub fn fail_all(&self, error: ProcessorError) {
        self.state().global_error = Some(error);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.errors.clear();
        state.global_error = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call tracking
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<ProcessorCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state().calls.iter().filter(|c| c.method == method).count()
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and returns the scripted error, if any.
    async fn begin(&self, method: &'static str, subscription_id: &str) -> Result<(), ProcessorError> {
        let delay = {
            let mut state = self.state();
            state.calls.push(ProcessorCall {
                method,
                subscription_id: subscription_id.to_string(),
            });
            if let Some(error) = state.global_error.clone() {
                return Err(error);
            }
            if let Some(error) = state.errors.get(subscription_id) {
                return Err(error.clone());
            }
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state().in_flight -= 1;
        Ok(())
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionPayload>, ProcessorError> {
        self.begin("get_subscription", subscription_id).await?;
        Ok(self.state().subscriptions.get(subscription_id).cloned())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionPayload, ProcessorError> {
        self.begin("cancel_subscription", subscription_id).await?;
        let mut state = self.state();
        let payload = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| ProcessorError::not_found("subscription"))?;
        payload.status = ProcessorStatus::Canceled;
        Ok(payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(id: &str) -> SubscriptionPayload {
        serde_json::from_value(json!({ "id": id, "customer": "cus_1", "status": "active" })).unwrap()
    }

    #[tokio::test]
    async fn returns_scripted_subscription_and_tracks_calls() {
        let mock = MockPaymentProcessor::new();
        mock.set_subscription(payload("sub_1"));

        assert!(mock.get_subscription("sub_1").await.unwrap().is_some());
        assert!(mock.get_subscription("sub_2").await.unwrap().is_none());
        assert_eq!(mock.call_count("get_subscription"), 2);
    }

    #[tokio::test]
    async fn cancel_marks_subscription_canceled() {
        let mock = MockPaymentProcessor::new();
        mock.set_subscription(payload("sub_1"));

        let canceled = mock.cancel_subscription("sub_1").await.unwrap();

        assert_eq!(canceled.status, ProcessorStatus::Canceled);
        let fetched = mock.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(fetched.status, ProcessorStatus::Canceled);
    }

    #[tokio::test]
    async fn tracks_peak_concurrent_calls() {
        let mock = MockPaymentProcessor::new();
        mock.set_delay(Duration::from_millis(20));

        let _ = futures::join!(mock.get_subscription("sub_1"), mock.get_subscription("sub_2"));
        let _ = mock.get_subscription("sub_3").await;

        assert_eq!(mock.max_in_flight(), 2);
        assert_eq!(mock.call_count("get_subscription"), 3);
    }

    #[tokio::test]
    async fn injected_errors_apply_per_subscription() {
        let mock = MockPaymentProcessor::new();
        mock.set_subscription(payload("sub_1"));
        mock.set_subscription(payload("sub_2"));
        mock.set_error("sub_1", ProcessorError::timeout("slow"));

        assert!(mock.get_subscription("sub_1").await.is_err());
        assert!(mock.get_subscription("sub_2").await.is_ok());

        mock.clear_errors();
        assert!(mock.get_subscription("sub_1").await.is_ok());
    }
}
