//! Licensing configuration.

use crate::error::{LicenseError, LicenseResult};
use entitle_types::TRIAL_PERIOD_DAYS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default license server.
pub const DEFAULT_API_BASE_URL: &str = "https://api.polar.sh";

/// Configuration for the license client and state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Base URL of the license server (no trailing slash).
    pub api_base_url: String,
    /// Organization the license keys belong to.
    pub organization_id: String,
    /// Optional bearer token sent with every request.
    pub api_token: Option<String>,
    /// Upper bound on any single server round trip (seconds).
    pub request_timeout_secs: u64,
    /// Length of the local trial (days).
    pub trial_period_days: u32,
    /// How often a licensed install re-confirms its activation (seconds).
    pub revalidation_interval_secs: u64,
    /// Consecutive failed revalidations tolerated before the user is asked
    /// to reconnect.
    pub max_revalidation_failures: u32,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            organization_id: String::new(),
            api_token: None,
            request_timeout_secs: 10,
            trial_period_days: TRIAL_PERIOD_DAYS,
            revalidation_interval_secs: 24 * 60 * 60,
            max_revalidation_failures: 3,
        }
    }
}

impl LicenseConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> LicenseResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LicenseError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| LicenseError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Applies `ENTITLE_*` environment overrides.
    ///
    /// Recognized: `ENTITLE_API_BASE_URL`, `ENTITLE_ORGANIZATION_ID`,
    /// `ENTITLE_API_TOKEN`, `ENTITLE_REQUEST_TIMEOUT_SECS`,
    /// `ENTITLE_TRIAL_PERIOD_DAYS`. Unparsable numbers are ignored.
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = var("ENTITLE_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(org) = var("ENTITLE_ORGANIZATION_ID") {
            self.organization_id = org;
        }
        if let Some(token) = var("ENTITLE_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(raw) = var("ENTITLE_REQUEST_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(_) => warn!("Ignoring ENTITLE_REQUEST_TIMEOUT_SECS={raw:?}"),
            }
        }
        if let Some(raw) = var("ENTITLE_TRIAL_PERIOD_DAYS") {
            match raw.parse() {
                Ok(days) => self.trial_period_days = days,
                Err(_) => warn!("Ignoring ENTITLE_TRIAL_PERIOD_DAYS={raw:?}"),
            }
        }
        self
    }

    /// Request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Revalidation interval as a `Duration`.
    #[must_use]
    pub fn revalidation_interval(&self) -> Duration {
        Duration::from_secs(self.revalidation_interval_secs)
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }
}
