//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors)
//! - `subscription` - Subscription lifecycle and processor reconciliation rules

pub mod foundation;
pub mod subscription;
