//! Core type definitions for Entitle.
//!
//! This crate defines the plain data shared by the persistence layer, the
//! licensing engine and any presentation code:
//! - `LicenseState`, the tagged entitlement state, and its `ErrorKind`
//! - `TrialClock`, the derived trial countdown
//! - `ActivationRecord`, a key bound to this device
//! - `DeviceId`, the per-installation identifier

mod activation;
mod ids;
mod state;
mod trial;

pub use activation::ActivationRecord;
pub use ids::DeviceId;
pub use state::{ErrorKind, LicenseState};
pub use trial::{TrialClock, TRIAL_PERIOD_DAYS};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Parses an RFC 3339 timestamp as stored by the persistence layer.
pub fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::InvalidTimestamp(format!("{s:?}: {e}")))
}
