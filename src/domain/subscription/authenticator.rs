//! Inbound notification authentication.
//!
//! Verifies the processor's HMAC-SHA256 signature over the raw body and
//! rejects timestamps outside the skew window. Nothing downstream runs
//! unless this succeeds.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::notification::Notification;
use super::ReconcileError;
use crate::ports::Clock;

/// Default skew window, matching the processor's own client libraries.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Parsed components of the signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp the processor signed.
    pub timestamp: i64,

    /// Every `v1` signature present; the processor sends several while a
    /// secret is being rolled.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses `t=<timestamp>,v1=<hex>[,v1=<hex>..][,v0=<hex>]`.
    ///
    /// Unknown keys (including legacy `v0`) are skipped.
    pub fn parse(header: &str) -> Result<Self, ReconcileError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or(ReconcileError::InvalidSignature)?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| ReconcileError::InvalidSignature)?);
                }
                "v1" => {
                    v1_signatures
                        .push(hex::decode(value).map_err(|_| ReconcileError::InvalidSignature)?);
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(ReconcileError::InvalidSignature)?;
        if v1_signatures.is_empty() {
            return Err(ReconcileError::InvalidSignature);
        }

        Ok(SignatureHeader {
            timestamp,
            v1_signatures,
        })
    }
}

/// Authenticates inbound notifications against the shared webhook secret.
pub struct EventAuthenticator {
    secret: SecretString,
    tolerance_secs: i64,
    clock: Arc<dyn Clock>,
}

impl EventAuthenticator {
    pub fn new(secret: SecretString, tolerance_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret,
            tolerance_secs,
            clock,
        }
    }

    /// Verifies the signature and parses the envelope.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` - header unreadable, no matching `v1`, or
    ///   timestamp more than the tolerance away from now in either direction
    /// - `MalformedPayload` - authentic body that is not a notification envelope
    pub fn authenticate(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<Notification, ReconcileError> {
        let header = SignatureHeader::parse(signature_header)?;

        let now = self.clock.now().as_unix_secs();
        let skew = now.abs_diff(header.timestamp);
        if skew > self.tolerance_secs.unsigned_abs() {
            debug!(skew_secs = skew, "Signature timestamp outside tolerance");
            return Err(ReconcileError::InvalidSignature);
        }

        let expected = compute_signature(self.secret.expose_secret(), header.timestamp, payload)?;
        let matched = header
            .v1_signatures
            .iter()
            .any(|candidate| constant_time_eq(&expected, candidate));
        if !matched {
            return Err(ReconcileError::InvalidSignature);
        }

        serde_json::from_slice(payload).map_err(|e| ReconcileError::MalformedPayload(e.to_string()))
    }
}

/// Builds a valid signature header for `payload`, as the processor would.
///
/// Used by tests and local replay tooling.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    match compute_signature(secret, timestamp, payload) {
        Ok(signature) => format!("t={},v1={}", timestamp, hex::encode(signature)),
        Err(_) => format!("t={}", timestamp),
    }
}

fn compute_signature(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<Vec<u8>, ReconcileError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ReconcileError::Store(format!("hmac key rejected: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
