//! Entitlement state and the error kinds it can carry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason code carried by [`LicenseState::ActivationFailed`].
///
/// This is the serializable, presentation-facing classification of a
/// failure. Richer error values live in the licensing crate and map onto
/// these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure or timeout. Retryable.
    NetworkError,
    /// The key was rejected, or the server response could not be understood.
    ValidationFailed,
    /// The server rejected the activation for a reason other than the limit.
    ActivationFailed,
    /// The key already has its maximum number of live activations.
    ActivationLimitReached,
    /// Informational: the key is valid without a device activation.
    ActivationNotRequired,
}

impl ErrorKind {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError)
    }

    /// Returns true if this kind represents an actual failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::ActivationNotRequired)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NetworkError => "network error",
            Self::ValidationFailed => "validation failed",
            Self::ActivationFailed => "activation failed",
            Self::ActivationLimitReached => "activation limit reached",
            Self::ActivationNotRequired => "activation not required",
        };
        f.write_str(s)
    }
}

/// The resolved answer to "may this installation use the application now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LicenseState {
    /// No license; the trial window is still open.
    TrialActive {
        /// Whole days left in the trial.
        days_remaining: u32,
    },
    /// No license and the trial window has closed.
    TrialExpired,
    /// A check or activation request is in flight.
    Validating,
    /// A license key is in effect on this device.
    Licensed {
        /// Server activation id, absent for licenses that need no activation.
        activation_id: Option<String>,
        /// Maximum concurrent devices for the key; 0 when not tracked.
        activations_limit: u32,
    },
    /// The last submission failed. Cleared by acknowledgement.
    ActivationFailed {
        /// Why the submission failed.
        reason: ErrorKind,
    },
}

impl LicenseState {
    /// Returns true if the application may be used in this state.
    #[must_use]
    pub fn can_use_app(&self) -> bool {
        matches!(self, Self::TrialActive { .. } | Self::Licensed { .. })
    }

    /// Returns true for `Licensed`.
    #[must_use]
    pub fn is_licensed(&self) -> bool {
        matches!(self, Self::Licensed { .. })
    }

    /// Returns true for the short-lived `Validating` and `ActivationFailed`
    /// states, which never survive a restart.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Validating | Self::ActivationFailed { .. })
    }

    /// Days left in the trial, or `None` outside the trial states.
    #[must_use]
    pub fn trial_days_remaining(&self) -> Option<u32> {
        match self {
            Self::TrialActive { days_remaining } => Some(*days_remaining),
            Self::TrialExpired => Some(0),
            _ => None,
        }
    }
}

impl fmt::Display for LicenseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrialActive { days_remaining: 1 } => write!(f, "trial (1 day remaining)"),
            Self::TrialActive { days_remaining } => {
                write!(f, "trial ({days_remaining} days remaining)")
            }
            Self::TrialExpired => write!(f, "trial expired"),
            Self::Validating => write!(f, "validating"),
            Self::Licensed {
                activations_limit: 0,
                ..
            } => write!(f, "licensed"),
            Self::Licensed {
                activations_limit, ..
            } => write!(f, "licensed (up to {activations_limit} devices)"),
            Self::ActivationFailed { reason } => write!(f, "activation failed: {reason}"),
        }
    }
}
