//! License server client.
//!
//! Stateless request/response calls against the remote entitlement service.
//! All calls are organization-scoped JSON POSTs:
//!
//! - `POST /v1/licenses/validate` `{key, organization_id}` checks a key
//! - `POST /v1/licenses/activate` `{key, organization_id, label, meta}` binds
//!   the key to this device
//! - `POST /v1/licenses/validate` with `activation_id` confirms an existing
//!   activation

use crate::config::LicenseConfig;
use crate::device::DeviceInfo;
use crate::error::{LicenseError, LicenseResult};
use async_trait::async_trait;
use entitle_types::DeviceId;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

const VALIDATE_PATH: &str = "/v1/licenses/validate";
const ACTIVATE_PATH: &str = "/v1/licenses/activate";

/// Result of checking a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseCheck {
    /// The server granted the key.
    pub valid: bool,
    /// The key must be bound to a device before use.
    pub requires_activation: bool,
    /// Device limit reported by the server, if any.
    pub activations_limit: Option<u32>,
}

/// A successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Server-issued activation id.
    pub activation_id: String,
    /// Device limit of the key; 0 when unlimited.
    pub activations_limit: u32,
}

/// Remote entitlement service.
#[async_trait]
pub trait LicenseServer: Send + Sync {
    /// Checks whether `key` is valid and whether it needs activation.
    async fn check_license(&self, key: &str) -> LicenseResult<LicenseCheck>;

    /// Binds `key` to `device_id`. Idempotent per device on the server side.
    async fn activate(&self, key: &str, device_id: &DeviceId) -> LicenseResult<Activation>;

    /// Confirms a previously issued activation is still valid.
    async fn revalidate(&self, key: &str, activation_id: &str) -> LicenseResult<bool>;
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    key: &'a str,
    organization_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    activation_id: Option<&'a str>,
}

/// Response from the validate endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateResponse {
    /// `"granted"` for a usable key.
    pub status: String,
    /// Device limit, absent when the key is not device-bound.
    #[serde(default)]
    pub limit_activations: Option<u32>,
    /// License key id.
    #[serde(default)]
    pub id: Option<String>,
    /// Echo of the activation when one was validated.
    #[serde(default)]
    pub activation: Option<ActivationRef>,
}

/// Activation reference embedded in a validate response.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivationRef {
    pub id: String,
}

#[derive(Debug, Serialize)]
struct ActivateRequest<'a> {
    key: &'a str,
    organization_id: &'a str,
    label: String,
    meta: HashMap<String, String>,
}

/// Response from the activate endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivateResponse {
    pub id: String,
    pub license_key: LicenseKeyInfo,
}

/// License key summary embedded in an activate response.
#[derive(Debug, Clone, Deserialize)]
pub struct LicenseKeyInfo {
    #[serde(default)]
    pub limit_activations: Option<u32>,
    pub status: String,
}

/// Error body returned with 4xx responses.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

impl ApiErrorBody {
    fn reason(&self, status: StatusCode) -> String {
        match &self.detail {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self
                .error
                .clone()
                .unwrap_or_else(|| format!("server returned {status}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Validate,
    Activate,
}

// ── HTTP client ──────────────────────────────────────────────────

/// reqwest implementation of [`LicenseServer`].
pub struct HttpLicenseClient {
    config: LicenseConfig,
    client: Client,
    device_info: DeviceInfo,
}

impl HttpLicenseClient {
    /// Creates a client. Requests time out after `config.request_timeout()`.
    pub fn new(config: LicenseConfig) -> LicenseResult<Self> {
        Self::with_device_info(config, DeviceInfo::collect())
    }

    /// Creates a client that reports the given device information.
    pub fn with_device_info(config: LicenseConfig, device_info: DeviceInfo) -> LicenseResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LicenseError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            device_info,
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &LicenseConfig {
        &self.config
    }

    async fn send<B: Serialize>(&self, path: &str, body: &B) -> LicenseResult<(StatusCode, Vec<u8>)> {
        let url = format!("{}{path}", self.config.base_url());
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LicenseError::Network(format!("request to {path} failed: {e}")))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| LicenseError::Network(format!("reading {path} response failed: {e}")))?;
        debug!("{path} -> {status}");
        Ok((status, body.to_vec()))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        endpoint: Endpoint,
    ) -> LicenseResult<T> {
        let (status, bytes) = self.send(path, body).await?;
        if status.is_success() {
            return decode(path, &bytes);
        }
        Err(rejection(endpoint, status, &bytes))
    }
}

#[async_trait]
impl LicenseServer for HttpLicenseClient {
    async fn check_license(&self, key: &str) -> LicenseResult<LicenseCheck> {
        let request = ValidateRequest {
            key,
            organization_id: &self.config.organization_id,
            activation_id: None,
        };
        let response: ValidateResponse = self
            .post(VALIDATE_PATH, &request, Endpoint::Validate)
            .await?;

        Ok(LicenseCheck {
            valid: response.status == "granted",
            requires_activation: response.limit_activations.is_some_and(|limit| limit > 0),
            activations_limit: response.limit_activations,
        })
    }

    async fn activate(&self, key: &str, device_id: &DeviceId) -> LicenseResult<Activation> {
        let request = ActivateRequest {
            key,
            organization_id: &self.config.organization_id,
            label: self.device_info.label(),
            meta: self.device_info.meta(device_id),
        };
        let response: ActivateResponse = self
            .post(ACTIVATE_PATH, &request, Endpoint::Activate)
            .await?;

        if response.license_key.status != "granted" {
            return Err(LicenseError::ActivationFailed(format!(
                "license key is {}",
                response.license_key.status
            )));
        }

        Ok(Activation {
            activation_id: response.id,
            activations_limit: response.license_key.limit_activations.unwrap_or(0),
        })
    }

    async fn revalidate(&self, key: &str, activation_id: &str) -> LicenseResult<bool> {
        let request = ValidateRequest {
            key,
            organization_id: &self.config.organization_id,
            activation_id: Some(activation_id),
        };
        let (status, bytes) = self.send(VALIDATE_PATH, &request).await?;

        if is_transient(status) {
            return Err(LicenseError::Network(format!("server returned {status}")));
        }
        if is_gone(status) {
            debug!("Activation {activation_id} rejected with {status}");
            return Ok(false);
        }
        if !status.is_success() {
            return Err(rejection(Endpoint::Validate, status, &bytes));
        }

        let response: ValidateResponse = decode(VALIDATE_PATH, &bytes)?;
        let same_activation = response
            .activation
            .as_ref()
            .map_or(true, |a| a.id == activation_id);
        Ok(response.status == "granted" && same_activation)
    }
}

fn decode<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> LicenseResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        warn!("Malformed response from {path}: {e}");
        LicenseError::Protocol(format!("malformed response from {path}: {e}"))
    })
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// The key or activation no longer exists on the server.
fn is_gone(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::UNPROCESSABLE_ENTITY
}

/// Maps a non-2xx response onto a specific error.
///
/// Only 404 and 422 reject the key itself. Other refusals (bad token,
/// malformed request) are protocol errors.
fn rejection(endpoint: Endpoint, status: StatusCode, bytes: &[u8]) -> LicenseError {
    if is_transient(status) {
        return LicenseError::Network(format!("server returned {status}"));
    }

    let body: ApiErrorBody = serde_json::from_slice(bytes).unwrap_or_default();
    let reason = body.reason(status);
    let code = body.error.as_deref().unwrap_or_default();
    let lowered = reason.to_lowercase();

    if code == "ActivationLimitReached"
        || (lowered.contains("activation") && lowered.contains("limit"))
        || lowered.contains("only allows")
    {
        return LicenseError::ActivationLimitReached {
            limit: first_number(&reason).unwrap_or(0),
        };
    }

    match endpoint {
        _ if status == StatusCode::UNAUTHORIZED => LicenseError::Protocol(reason),
        Endpoint::Activate
            if code == "ActivationNotRequired" || lowered.contains("not require activation") =>
        {
            LicenseError::ActivationNotRequired
        }
        Endpoint::Activate => LicenseError::ActivationFailed(reason),
        Endpoint::Validate if is_gone(status) => LicenseError::ValidationFailed(reason),
        Endpoint::Validate => LicenseError::Protocol(reason),
    }
}

fn first_number(text: &str) -> Option<u32> {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}
