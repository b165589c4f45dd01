//! Payment configuration

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;
use crate::adapters::stripe::DEFAULT_API_BASE_URL;
use crate::domain::subscription::DEFAULT_TOLERANCE_SECS;

const MAX_WEBHOOK_TOLERANCE_SECS: i64 = 3600;

/// Payment configuration (Stripe)
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Stripe secret API key
    pub stripe_api_key: SecretString,

    /// Stripe webhook signing secret
    pub stripe_webhook_secret: SecretString,

    /// Stripe price ID for the monthly plan
    pub stripe_monthly_price_id: String,

    /// Stripe price ID for the yearly plan
    pub stripe_yearly_price_id: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Allowed distance between a signature timestamp and now, in seconds
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: i64,

    /// Timeout for each processor API call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl PaymentConfig {
    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.expose_secret().starts_with("sk_test_")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let api_key = self.stripe_api_key.expose_secret();
        let webhook_secret = self.stripe_webhook_secret.expose_secret();

        if api_key.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE_API_KEY"));
        }
        if webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE_WEBHOOK_SECRET"));
        }

        // Verify key prefixes for safety
        if !api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }

        for price_id in [&self.stripe_monthly_price_id, &self.stripe_yearly_price_id] {
            if !price_id.starts_with("price_") {
                return Err(ValidationError::InvalidPriceId(price_id.clone()));
            }
        }

        if self.webhook_tolerance_secs <= 0
            || self.webhook_tolerance_secs > MAX_WEBHOOK_TOLERANCE_SECS
        {
            return Err(ValidationError::InvalidWebhookTolerance);
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("payment.request_timeout_secs"));
        }

        Ok(())
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_webhook_tolerance() -> i64 {
    DEFAULT_TOLERANCE_SECS
}

fn default_request_timeout() -> u64 {
    10
}
