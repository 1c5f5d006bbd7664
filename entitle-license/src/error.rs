//! Error types for the licensing module.

use entitle_store::StoreError;
use entitle_types::ErrorKind;
use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Transport failure, timeout or server-side outage. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The key was rejected, or the response could not be understood.
    #[error("license validation failed: {0}")]
    ValidationFailed(String),

    /// The server refused the request itself rather than the key: bad
    /// credentials, a protocol mismatch or an unreadable response body.
    #[error("unexpected response from license server: {0}")]
    Protocol(String),

    /// The server refused the activation.
    #[error("activation failed: {0}")]
    ActivationFailed(String),

    /// The key already has its maximum number of activations.
    #[error("activation limit reached (max {limit} devices)")]
    ActivationLimitReached { limit: u32 },

    /// The key is valid without binding it to a device.
    #[error("license does not require activation")]
    ActivationNotRequired,

    /// Another check or activation is already in flight.
    #[error("a license request is already in progress")]
    InFlight,

    /// The license changed while the request was in flight; its result was
    /// discarded.
    #[error("license request superseded")]
    Superseded,

    /// Persistence error.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Maps this error onto the kind carried by `LicenseState::ActivationFailed`.
    ///
    /// `InFlight`, `Superseded` and `Config` never reach the state and map
    /// to `None`.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Network(_) => Some(ErrorKind::NetworkError),
            Self::ValidationFailed(_) | Self::Protocol(_) | Self::Serialization(_) => {
                Some(ErrorKind::ValidationFailed)
            }
            Self::ActivationFailed(_) | Self::Storage(_) => Some(ErrorKind::ActivationFailed),
            Self::ActivationLimitReached { .. } => Some(ErrorKind::ActivationLimitReached),
            Self::ActivationNotRequired => Some(ErrorKind::ActivationNotRequired),
            Self::InFlight | Self::Superseded | Self::Config(_) => None,
        }
    }

    /// Returns true if the server definitively rejected the license key, as
    /// opposed to failing to answer or refusing the request itself.
    #[must_use]
    pub fn is_key_rejection(&self) -> bool {
        matches!(self, Self::ValidationFailed(_))
    }

    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::InFlight)
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
