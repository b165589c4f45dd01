//! Payment processor port.
//!
//! The processor is the system of record for billing. This port covers the
//! two calls reconciliation needs: reading a subscription's authoritative
//! state and canceling it. Checkout and portal sessions live elsewhere.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::subscription::SubscriptionPayload;

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Fetches a subscription by processor reference.
    ///
    /// Returns `Ok(None)` if the processor does not know the reference.
    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionPayload>, ProcessorError>;

    /// Cancels a subscription immediately and returns its final state.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionPayload, ProcessorError>;
}

/// Errors from payment processor calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorError {
    pub code: ProcessorErrorCode,
    pub message: String,

    /// Processor's own error code, when it sent one.
    pub processor_code: Option<String>,

    pub retryable: bool,
}

impl ProcessorError {
    pub fn new(code: ProcessorErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            processor_code: None,
            retryable: code.is_retryable(),
        }
    }

    pub fn with_processor_code(mut self, code: impl Into<String>) -> Self {
        self.processor_code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProcessorErrorCode::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProcessorErrorCode::Timeout, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(ProcessorErrorCode::NotFound, format!("{} not found", resource))
    }
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProcessorError {}

impl From<ProcessorError> for DomainError {
    fn from(err: ProcessorError) -> Self {
        let code = match err.code {
            ProcessorErrorCode::NotFound => ErrorCode::SubscriptionNotFound,
            _ => ErrorCode::PaymentProcessorError,
        };
        DomainError::new(code, err.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorErrorCode {
    NetworkError,
    Timeout,
    RateLimited,
    AuthenticationError,
    NotFound,
    InvalidRequest,
    InvalidResponse,
    ProcessorUnavailable,
}

impl ProcessorErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessorErrorCode::NetworkError
                | ProcessorErrorCode::Timeout
                | ProcessorErrorCode::RateLimited
                | ProcessorErrorCode::ProcessorUnavailable
        )
    }
}

impl std::fmt::Display for ProcessorErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessorErrorCode::NetworkError => "network_error",
            ProcessorErrorCode::Timeout => "timeout",
            ProcessorErrorCode::RateLimited => "rate_limited",
            ProcessorErrorCode::AuthenticationError => "authentication_error",
            ProcessorErrorCode::NotFound => "not_found",
            ProcessorErrorCode::InvalidRequest => "invalid_request",
            ProcessorErrorCode::InvalidResponse => "invalid_response",
            ProcessorErrorCode::ProcessorUnavailable => "processor_unavailable",
        };
        write!(f, "{}", s)
    }
}
