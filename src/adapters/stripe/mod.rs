//! Stripe payment processor adapter.
//!
//! - `StripeClient` - REST client for subscription reads and cancellation
//! - `MockPaymentProcessor` - scripted processor for tests
//!
//! # Configuration
//!
//! The secret key comes from `payment.stripe_api_key`. Webhook verification
//! lives in the domain (`EventAuthenticator`), not here.

mod client;
mod mock_processor;

pub use client::{StripeClient, StripeConfig, DEFAULT_API_BASE_URL};
pub use mock_processor::{MockPaymentProcessor, ProcessorCall};
