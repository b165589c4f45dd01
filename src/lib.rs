//! Subscription Sync - Payment processor reconciliation engine
//!
//! Keeps local subscription records consistent with the payment processor
//! from two directions: signed webhook notifications pushed by the
//! processor, and a renewal sweep that pulls the processor's view of
//! subscriptions whose local period has elapsed.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
