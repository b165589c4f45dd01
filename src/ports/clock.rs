//! Clock port.

use crate::domain::foundation::Timestamp;

/// Source of the current instant.
///
/// Reconciliation and sweep logic read time only through this trait.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}
