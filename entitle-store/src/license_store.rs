//! Typed access to the persisted licensing values.
//!
//! Key names are part of the on-disk format and must stay stable across
//! versions. Reads never fail: an unreadable or unparsable value is logged
//! and reported as absent, so a damaged store degrades to "no license"
//! instead of taking the state machine down.

use crate::error::StoreResult;
use crate::kv::{KeyValueStore, MemoryStore};
use chrono::{DateTime, Utc};
use entitle_types::{parse_timestamp, ActivationRecord, DeviceId};
use std::sync::Arc;
use tracing::warn;

/// Persisted key names.
pub mod keys {
    pub const DEVICE_ID: &str = "deviceId";
    pub const ACTIVATION_ID: &str = "activationId";
    pub const LICENSE_KEY: &str = "licenseKey";
    pub const ACTIVATIONS_LIMIT: &str = "activationsLimit";
    pub const TRIAL_STARTED_AT: &str = "trialStartedAt";
    pub const LICENSE_REQUIRES_ACTIVATION: &str = "licenseRequiresActivation";
    pub const NEEDS_REVALIDATION: &str = "needsRevalidation";
    pub const REVALIDATION_FAILURES: &str = "revalidationFailures";
    pub const LAST_VALIDATED_AT: &str = "lastValidatedAt";
}

/// Typed facade over a [`KeyValueStore`].
#[derive(Clone)]
pub struct LicenseStore {
    kv: Arc<dyn KeyValueStore>,
}

impl LicenseStore {
    /// Wraps an existing key/value store.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Creates a store backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Returns the underlying key/value store.
    pub fn raw(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.kv.get(key) {
            Ok(Some(value)) if !value.trim().is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read {key} from license store, treating as absent: {e}");
                None
            }
        }
    }

    // ── Device identity ──────────────────────────────────────────

    /// The persisted generated device id.
    pub fn device_id(&self) -> Option<DeviceId> {
        self.read(keys::DEVICE_ID)
            .and_then(|raw| raw.parse::<DeviceId>().ok())
    }

    /// Persists the generated device id.
    pub fn set_device_id(&self, id: &DeviceId) -> StoreResult<()> {
        self.kv.set(keys::DEVICE_ID, id.as_str())
    }

    // ── License ──────────────────────────────────────────────────

    /// The cached license key, whatever kind of license it belongs to.
    pub fn license_key(&self) -> Option<String> {
        self.read(keys::LICENSE_KEY)
    }

    /// Loads the activation record.
    ///
    /// Both-or-neither: an activation id with no license key is an
    /// inconsistent store and reads as no record.
    pub fn activation_record(&self) -> Option<ActivationRecord> {
        let activation_id = self.read(keys::ACTIVATION_ID)?;
        let Some(license_key) = self.read(keys::LICENSE_KEY) else {
            warn!("Activation id present without a license key, ignoring");
            return None;
        };
        let activations_limit = match self.read(keys::ACTIVATIONS_LIMIT) {
            None => 0,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!("Unparsable activations limit {raw:?}, using 0");
                0
            }),
        };
        Some(ActivationRecord {
            license_key,
            activation_id,
            activations_limit,
        })
    }

    /// Persists an activation record.
    ///
    /// Any previous activation id is removed first and the new one written
    /// last, so an interrupted write never pairs a key with a stale or
    /// missing activation id.
    pub fn save_activation_record(&self, record: &ActivationRecord) -> StoreResult<()> {
        self.kv.remove(keys::ACTIVATION_ID)?;
        self.kv.remove(keys::LICENSE_REQUIRES_ACTIVATION)?;
        self.kv.set(keys::LICENSE_KEY, &record.license_key)?;
        self.kv
            .set(keys::ACTIVATIONS_LIMIT, &record.activations_limit.to_string())?;
        self.kv.set(keys::ACTIVATION_ID, &record.activation_id)
    }

    /// The cached key of a license that needed no activation.
    ///
    /// A key on its own (no activation id, no marker) is the remains of an
    /// interrupted activation write and reads as nothing.
    pub fn stateless_license_key(&self) -> Option<String> {
        if self.read(keys::ACTIVATION_ID).is_some() {
            return None;
        }
        let marker = self.read(keys::LICENSE_REQUIRES_ACTIVATION)?;
        if marker.trim() != "false" {
            return None;
        }
        self.license_key()
    }

    /// Caches the key of a license that needed no activation.
    pub fn save_stateless_license(&self, license_key: &str) -> StoreResult<()> {
        self.kv.remove(keys::ACTIVATION_ID)?;
        self.kv.remove(keys::ACTIVATIONS_LIMIT)?;
        self.kv.set(keys::LICENSE_KEY, license_key)?;
        self.kv.set(keys::LICENSE_REQUIRES_ACTIVATION, "false")
    }

    /// Removes every trace of the current license, activation id first.
    ///
    /// The trial start and the device id are kept.
    pub fn clear_license(&self) -> StoreResult<()> {
        self.kv.remove(keys::ACTIVATION_ID)?;
        self.kv.remove(keys::LICENSE_REQUIRES_ACTIVATION)?;
        self.kv.remove(keys::LICENSE_KEY)?;
        self.kv.remove(keys::ACTIVATIONS_LIMIT)?;
        self.kv.remove(keys::NEEDS_REVALIDATION)?;
        self.kv.remove(keys::REVALIDATION_FAILURES)?;
        self.kv.remove(keys::LAST_VALIDATED_AT)
    }

    // ── Trial ────────────────────────────────────────────────────

    /// When the trial was started, if ever.
    pub fn trial_started_at(&self) -> Option<DateTime<Utc>> {
        self.read_timestamp(keys::TRIAL_STARTED_AT)
    }

    /// Records the trial start.
    pub fn set_trial_started_at(&self, at: DateTime<Utc>) -> StoreResult<()> {
        self.kv.set(keys::TRIAL_STARTED_AT, &at.to_rfc3339())
    }

    // ── Revalidation bookkeeping ─────────────────────────────────

    /// Whether a previous background revalidation did not complete.
    pub fn needs_revalidation(&self) -> bool {
        self.read(keys::NEEDS_REVALIDATION)
            .is_some_and(|v| v.trim() == "true")
    }

    /// Consecutive failed revalidation attempts.
    pub fn revalidation_failures(&self) -> u32 {
        self.read(keys::REVALIDATION_FAILURES)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// When the license was last confirmed by the server.
    pub fn last_validated_at(&self) -> Option<DateTime<Utc>> {
        self.read_timestamp(keys::LAST_VALIDATED_AT)
    }

    /// Flags a pending revalidation and bumps the failure counter.
    /// Returns the new consecutive failure count.
    pub fn record_revalidation_failure(&self) -> StoreResult<u32> {
        let failures = self.revalidation_failures().saturating_add(1);
        self.kv.set(keys::NEEDS_REVALIDATION, "true")?;
        self.kv
            .set(keys::REVALIDATION_FAILURES, &failures.to_string())?;
        Ok(failures)
    }

    /// Clears the pending flag and failure counter and stamps the time.
    pub fn record_revalidation_success(&self, at: DateTime<Utc>) -> StoreResult<()> {
        self.kv.set(keys::LAST_VALIDATED_AT, &at.to_rfc3339())?;
        self.kv.remove(keys::REVALIDATION_FAILURES)?;
        self.kv.remove(keys::NEEDS_REVALIDATION)
    }

    fn read_timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.read(key)?;
        match parse_timestamp(&raw) {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!("Ignoring unparsable {key}: {e}");
                None
            }
        }
    }
}

impl std::fmt::Debug for LicenseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseStore").finish_non_exhaustive()
    }
}
