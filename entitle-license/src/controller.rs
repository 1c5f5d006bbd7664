//! Presentation-facing facade over the state machine.
//!
//! Exposes the current state, a user-facing validation message and the
//! public operations, and owns the background revalidation task.

use crate::client::{HttpLicenseClient, LicenseServer};
use crate::config::LicenseConfig;
use crate::error::{LicenseError, LicenseResult};
use crate::machine::{EntitlementMachine, RevalidationOutcome, StatusChanges};
use entitle_store::LicenseStore;
use entitle_types::LicenseState;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::info;

/// Shown after a successful activation.
pub const MSG_ACTIVATED: &str = "License activated successfully!";
/// Shown when the server no longer honours the stored license.
pub const MSG_REVOKED: &str = "Your license is no longer valid on this device.";
/// Shown when revalidation keeps failing. Takes priority over other messages.
pub const MSG_RECONNECT: &str =
    "Could not confirm your license for a while. Please connect to the internet to keep it active.";

/// Thin orchestrator used by the presentation layer.
pub struct LicenseController {
    machine: Arc<EntitlementMachine>,
    message: Arc<Mutex<Option<String>>>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl LicenseController {
    /// Wraps an existing machine. No background work is started.
    pub fn new(machine: Arc<EntitlementMachine>) -> Self {
        Self {
            machine,
            message: Arc::new(Mutex::new(None)),
            background: Mutex::new(None),
        }
    }

    /// Builds a controller talking to the configured HTTP server.
    pub fn open(store: LicenseStore, config: LicenseConfig) -> LicenseResult<Self> {
        let server: Arc<dyn LicenseServer> = Arc::new(HttpLicenseClient::new(config.clone())?);
        Ok(Self::new(Arc::new(EntitlementMachine::new(
            store, server, config,
        ))))
    }

    /// Spawns background revalidation on the current tokio runtime.
    /// Calling it again replaces the previous task.
    pub fn start(&self) {
        let message = Arc::clone(&self.message);
        let task = tokio::spawn(
            Arc::clone(&self.machine)
                .run_revalidation_with(move |outcome| note_outcome(&message, outcome)),
        );
        if let Some(previous) = self.background_slot().replace(task) {
            previous.abort();
        }
        info!("Background license revalidation started");
    }

    /// The underlying machine.
    pub fn machine(&self) -> &Arc<EntitlementMachine> {
        &self.machine
    }

    pub fn state(&self) -> LicenseState {
        self.machine.state()
    }

    pub fn can_use_app(&self) -> bool {
        self.machine.can_use_app()
    }

    pub fn subscribe(&self) -> StatusChanges {
        self.machine.subscribe()
    }

    /// The message to show next to the license form, if any.
    pub fn validation_message(&self) -> Option<String> {
        if self.machine.revalidation_overdue() {
            return Some(MSG_RECONNECT.to_string());
        }
        self.message_slot().clone()
    }

    pub fn start_trial(&self) -> LicenseResult<LicenseState> {
        self.set_message(None);
        self.machine.start_trial()
    }

    /// Submits a key and updates the validation message.
    ///
    /// A rejection caused by a request already in flight leaves the message
    /// untouched.
    pub async fn submit_key(&self, key: &str) -> LicenseResult<LicenseState> {
        match self.machine.submit_key(key).await {
            Ok(state) => {
                self.set_message(Some(MSG_ACTIVATED.to_string()));
                Ok(state)
            }
            Err(e) => {
                if !matches!(e, LicenseError::InFlight | LicenseError::Superseded) {
                    self.set_message(Some(message_for(&e)));
                }
                Err(e)
            }
        }
    }

    /// Dismisses a failed submission and its message.
    pub fn acknowledge(&self) -> LicenseState {
        self.set_message(None);
        self.machine.acknowledge_failure()
    }

    pub fn remove_license(&self) -> LicenseResult<LicenseState> {
        self.set_message(None);
        self.machine.remove_license()
    }

    /// Revalidates now. A revocation is reported through the message.
    pub async fn revalidate(&self) -> LicenseResult<RevalidationOutcome> {
        let outcome = self.machine.revalidate().await?;
        note_outcome(&self.message, &outcome);
        Ok(outcome)
    }

    fn set_message(&self, message: Option<String>) {
        *self.message_slot() = message;
    }

    fn message_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        lock_message(&self.message)
    }

    fn background_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.background.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LicenseController {
    fn drop(&mut self) {
        if let Some(task) = self.background_slot().take() {
            task.abort();
        }
    }
}

fn lock_message(message: &Mutex<Option<String>>) -> std::sync::MutexGuard<'_, Option<String>> {
    message.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records what a revalidation means for the user. A confirmation retires
/// the activation notice; a revocation replaces whatever was shown.
fn note_outcome(message: &Mutex<Option<String>>, outcome: &RevalidationOutcome) {
    let mut slot = lock_message(message);
    match outcome {
        RevalidationOutcome::Revoked => *slot = Some(MSG_REVOKED.to_string()),
        RevalidationOutcome::Confirmed if slot.as_deref() == Some(MSG_ACTIVATED) => *slot = None,
        _ => {}
    }
}

/// User-facing text for a failed license operation.
pub fn message_for(err: &LicenseError) -> String {
    match err {
        LicenseError::Network(_) => {
            "Could not reach the license server. Please try again.".to_string()
        }
        LicenseError::ValidationFailed(_) => "Invalid license key.".to_string(),
        LicenseError::Protocol(_) | LicenseError::Serialization(_) => {
            "The license server sent an unexpected response. Please try again later.".to_string()
        }
        LicenseError::ActivationLimitReached { limit: 0 } => {
            "This license has reached its maximum number of activations. \
             Deactivate another device and try again."
                .to_string()
        }
        LicenseError::ActivationLimitReached { limit } => format!(
            "This license is already active on {limit} device(s), its maximum. \
             Deactivate another device and try again."
        ),
        LicenseError::ActivationNotRequired => {
            "This license does not require activation.".to_string()
        }
        LicenseError::InFlight => "A license check is already in progress.".to_string(),
        LicenseError::ActivationFailed(_)
        | LicenseError::Storage(_)
        | LicenseError::Superseded
        | LicenseError::Config(_) => "Failed to activate license on this device.".to_string(),
    }
}
