use serde::{Deserialize, Serialize};

/// A license key bound to this device by the server.
///
/// Persisted only when the server required an activation step. Licenses that
/// need no activation never produce a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRecord {
    /// The license key as submitted (trimmed).
    pub license_key: String,
    /// Activation id issued by the server.
    pub activation_id: String,
    /// Maximum concurrent devices for the key; 0 when unlimited or not tracked.
    pub activations_limit: u32,
}

impl ActivationRecord {
    /// Creates a new record.
    pub fn new(
        license_key: impl Into<String>,
        activation_id: impl Into<String>,
        activations_limit: u32,
    ) -> Self {
        Self {
            license_key: license_key.into(),
            activation_id: activation_id.into(),
            activations_limit,
        }
    }
}
