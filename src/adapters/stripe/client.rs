//! Stripe REST client implementing `PaymentProcessor`.
//!
//! Authenticates with HTTP basic auth using the secret key as the username.
//! Every request carries the configured timeout, so one slow call cannot
//! stall a sweep.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::subscription::SubscriptionPayload;
use crate::ports::{PaymentProcessor, ProcessorError, ProcessorErrorCode};

pub const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    api_base_url: String,

    request_timeout: Duration,
}

impl StripeConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Overrides the API base URL (for stubs and test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Error body Stripe returns on non-2xx responses.
#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

pub struct StripeClient {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeClient {
    /// # Errors
    ///
    /// `NetworkError` if the underlying HTTP client cannot be built.
    pub fn new(config: StripeConfig) -> Result<Self, ProcessorError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProcessorError::network(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn subscription_url(&self, subscription_id: &str) -> String {
        format!("{}/v1/subscriptions/{}", self.config.api_base_url, subscription_id)
    }

    async fn decode(response: reqwest::Response) -> Result<SubscriptionPayload, ProcessorError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body));
        }
        response.json().await.map_err(|e| {
            ProcessorError::new(
                ProcessorErrorCode::InvalidResponse,
                format!("failed to parse subscription: {}", e),
            )
        })
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionPayload>, ProcessorError> {
        let response = self
            .http_client
            .get(self.subscription_url(subscription_id))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(subscription_id, "Processor does not know subscription");
            return Ok(None);
        }

        Self::decode(response).await.map(Some)
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionPayload, ProcessorError> {
        let response = self
            .http_client
            .delete(self.subscription_url(subscription_id))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .send()
            .await
            .map_err(transport_error)?;

        Self::decode(response).await
    }
}

fn transport_error(err: reqwest::Error) -> ProcessorError {
    if err.is_timeout() {
        ProcessorError::timeout(err.to_string())
    } else {
        ProcessorError::network(err.to_string())
    }
}

/// Maps a non-2xx response to a `ProcessorError`.
fn error_for_status(status: StatusCode, body: &str) -> ProcessorError {
    let code = match status {
        StatusCode::NOT_FOUND => ProcessorErrorCode::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ProcessorErrorCode::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProcessorErrorCode::AuthenticationError,
        s if s.is_server_error() => ProcessorErrorCode::ProcessorUnavailable,
        _ => ProcessorErrorCode::InvalidRequest,
    };

    match serde_json::from_str::<StripeErrorBody>(body) {
        Ok(parsed) => {
            let message = parsed
                .error
                .message
                .unwrap_or_else(|| format!("stripe returned {}", status));
            let error = ProcessorError::new(code, message);
            match parsed.error.code.or(parsed.error.error_type) {
                Some(processor_code) => error.with_processor_code(processor_code),
                None => error,
            }
        }
        Err(_) => {
            warn!(status = %status, "Unparseable error body from processor");
            ProcessorError::new(code, format!("stripe returned {}", status))
        }
    }
}
