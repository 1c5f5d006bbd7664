//! Entitlement state machine.
//!
//! The single owner of [`LicenseState`]. Every transition goes through this
//! type; everything else reads the state or subscribes to changes.
//!
//! ```text
//! startup ─▶ TrialActive | TrialExpired | Licensed
//! TrialActive | TrialExpired | Licensed ─submit_key─▶ Validating
//! Validating ─▶ Licensed | ActivationFailed
//! ActivationFailed ─acknowledge─▶ (state before the submission)
//! Licensed ─remove_license / revocation─▶ TrialActive | TrialExpired
//! ```
//!
//! At most one server request is in flight at a time. A license change made
//! while a request is in flight bumps an epoch counter, and the late result
//! of the older request is discarded.

use crate::client::{Activation, LicenseServer};
use crate::clock::{Clock, SystemClock};
use crate::config::LicenseConfig;
use crate::device::DeviceIdentity;
use crate::error::{LicenseError, LicenseResult};
use entitle_store::LicenseStore;
use entitle_types::{ActivationRecord, DeviceId, ErrorKind, LicenseState, TrialClock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Upper bound between background revalidation checks.
const REVALIDATION_POLL: Duration = Duration::from_secs(60 * 60);

/// What a background revalidation concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// The server confirmed the license.
    Confirmed,
    /// The server no longer honours the license; it was removed locally.
    Revoked,
    /// The server could not be reached. The license stays in effect.
    Deferred {
        /// Consecutive failed attempts so far.
        consecutive_failures: u32,
    },
    /// Nothing to revalidate.
    NotLicensed,
}

/// Payload-free "license status changed" signal.
///
/// Fires after every transition; call [`EntitlementMachine::state`] to read
/// the new state.
pub struct StatusChanges {
    rx: watch::Receiver<LicenseState>,
}

impl StatusChanges {
    /// Waits for the next transition. Returns false once the machine is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

enum Outcome {
    Activated(Activation),
    Stateless,
}

/// Owns the authoritative [`LicenseState`].
pub struct EntitlementMachine {
    store: LicenseStore,
    device: DeviceIdentity,
    server: Arc<dyn LicenseServer>,
    clock: Arc<dyn Clock>,
    config: LicenseConfig,
    state: watch::Sender<LicenseState>,
    /// State to fall back to while `Validating` or `ActivationFailed`.
    resume: Mutex<Option<LicenseState>>,
    in_flight: AtomicBool,
    epoch: AtomicU64,
}

impl EntitlementMachine {
    /// Creates a machine using the system clock and the platform hardware id.
    pub fn new(store: LicenseStore, server: Arc<dyn LicenseServer>, config: LicenseConfig) -> Self {
        let device = DeviceIdentity::new(store.clone());
        Self::with_parts(store, device, server, Arc::new(SystemClock), config)
    }

    /// Creates a machine from explicit collaborators.
    ///
    /// Performs the startup transition: a persisted license yields `Licensed`
    /// without touching the network, otherwise the trial clock decides.
    pub fn with_parts(
        store: LicenseStore,
        device: DeviceIdentity,
        server: Arc<dyn LicenseServer>,
        clock: Arc<dyn Clock>,
        config: LicenseConfig,
    ) -> Self {
        let initial = restore_state(&store, clock.as_ref(), config.trial_period_days);
        info!("License state at startup: {initial}");
        let (state, _) = watch::channel(initial);

        Self {
            store,
            device,
            server,
            clock,
            config,
            state,
            resume: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    // ── Reads ────────────────────────────────────────────────────

    /// The current state. Never blocks on an in-flight request.
    pub fn state(&self) -> LicenseState {
        self.state.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> StatusChanges {
        StatusChanges {
            rx: self.state.subscribe(),
        }
    }

    /// Whether the application may be used. While a request is in flight or
    /// a failure is unacknowledged, the state before the submission decides.
    pub fn can_use_app(&self) -> bool {
        match self.state() {
            LicenseState::Validating | LicenseState::ActivationFailed { .. } => self
                .resume_slot()
                .as_ref()
                .is_some_and(LicenseState::can_use_app),
            state => state.can_use_app(),
        }
    }

    /// This installation's device id.
    pub fn device_id(&self) -> DeviceId {
        self.device.resolve()
    }

    /// The persisted activation, if any.
    pub fn activation_record(&self) -> Option<ActivationRecord> {
        self.store.activation_record()
    }

    /// The configuration in use.
    pub fn config(&self) -> &LicenseConfig {
        &self.config
    }

    // ── Trial ────────────────────────────────────────────────────

    /// Starts the trial if it was never started. Never resets an existing
    /// start.
    pub fn start_trial(&self) -> LicenseResult<LicenseState> {
        if self.store.trial_started_at().is_none() {
            let now = self.clock.now();
            self.store.set_trial_started_at(now)?;
            info!("Trial started at {now}");
        }
        self.refresh();
        Ok(self.state())
    }

    /// Recomputes the trial countdown. Does nothing outside the trial states.
    pub fn refresh(&self) {
        let next = self.trial_state();
        self.state.send_if_modified(|state| {
            let in_trial = matches!(
                state,
                LicenseState::TrialActive { .. } | LicenseState::TrialExpired
            );
            if in_trial && *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    // ── Submission ───────────────────────────────────────────────

    /// Validates `key` and, if the server requires it, activates it on this
    /// device.
    ///
    /// Rejected with [`LicenseError::InFlight`] (no network call) while
    /// another request is running. On failure the state becomes
    /// `ActivationFailed` and nothing is persisted.
    pub async fn submit_key(&self, key: &str) -> LicenseResult<LicenseState> {
        let mut flight = self.begin_flight()?;
        let key = key.trim();

        let result = if key.is_empty() {
            Err(LicenseError::ValidationFailed("license key is empty".to_string()))
        } else {
            let device_id = self.device.resolve();
            self.bounded(self.activate_key(key, &device_id)).await
        };

        if !flight.is_current() {
            flight.settled = true;
            info!("Discarding result of a superseded license request");
            return Err(LicenseError::Superseded);
        }

        match result.and_then(|outcome| self.commit(key, outcome)) {
            Ok(state) => {
                info!("License accepted: {state}");
                *self.resume_slot() = None;
                flight.settle(state.clone());
                Ok(state)
            }
            Err(e) => {
                warn!("License submission failed: {e}");
                let reason = e.kind().unwrap_or(ErrorKind::ActivationFailed);
                flight.settle(LicenseState::ActivationFailed { reason });
                Err(e)
            }
        }
    }

    /// Clears an `ActivationFailed` state, returning to the state before the
    /// failed submission.
    pub fn acknowledge_failure(&self) -> LicenseState {
        let fallback = self
            .resume_slot()
            .clone()
            .unwrap_or_else(|| self.restore());
        let acknowledged = self.state.send_if_modified(|state| {
            if matches!(state, LicenseState::ActivationFailed { .. }) {
                *state = fallback;
                true
            } else {
                false
            }
        });
        if acknowledged {
            *self.resume_slot() = None;
        }
        self.state()
    }

    /// Removes the license locally. No network call is made.
    ///
    /// The state moves to the trial state even if clearing storage fails;
    /// the storage error is still returned.
    pub fn remove_license(&self) -> LicenseResult<LicenseState> {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let cleared = self.store.clear_license();
        *self.resume_slot() = None;

        let next = self.trial_state();
        self.publish(next.clone());
        info!("License removed, now {next}");

        cleared?;
        Ok(next)
    }

    // ── Revalidation ─────────────────────────────────────────────

    /// Whether a persisted license should be re-confirmed now: a previous
    /// attempt failed, it was never confirmed, or the interval has passed.
    pub fn revalidation_due(&self) -> bool {
        if self.store.activation_record().is_none() && self.store.stateless_license_key().is_none()
        {
            return false;
        }
        if self.store.needs_revalidation() {
            return true;
        }
        match self.store.last_validated_at() {
            None => true,
            Some(at) => {
                let elapsed = (self.clock.now() - at).num_seconds();
                elapsed < 0 || elapsed as u64 >= self.config.revalidation_interval_secs
            }
        }
    }

    /// Whether revalidation has failed often enough that the user should be
    /// asked to reconnect. The license stays in effect regardless.
    pub fn revalidation_overdue(&self) -> bool {
        self.store.revalidation_failures() >= self.config.max_revalidation_failures
            && self.state().is_licensed()
    }

    /// Re-confirms the persisted license with the server.
    ///
    /// Transport failures never leave `Licensed`; they are recorded as a
    /// pending revalidation for the next attempt. A definitive rejection
    /// removes the license.
    pub async fn revalidate(&self) -> LicenseResult<RevalidationOutcome> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;
        let epoch = self.epoch.load(Ordering::Acquire);

        let result = if let Some(record) = self.store.activation_record() {
            self.bounded(
                self.server
                    .revalidate(&record.license_key, &record.activation_id),
            )
            .await
        } else if let Some(key) = self.store.stateless_license_key() {
            self.bounded(async {
                match self.server.check_license(&key).await {
                    Ok(check) => Ok(check.valid),
                    Err(e) if e.is_key_rejection() => {
                        debug!("License key rejected on revalidation: {e}");
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            })
            .await
        } else {
            return Ok(RevalidationOutcome::NotLicensed);
        };

        if self.epoch.load(Ordering::Acquire) != epoch {
            return Err(LicenseError::Superseded);
        }

        match result {
            Ok(true) => {
                self.store.record_revalidation_success(self.clock.now())?;
                debug!("License revalidated");
                Ok(RevalidationOutcome::Confirmed)
            }
            Ok(false) => {
                warn!("License no longer valid on the server, removing it");
                self.epoch.fetch_add(1, Ordering::AcqRel);
                self.store.clear_license()?;
                *self.resume_slot() = None;
                self.publish(self.trial_state());
                Ok(RevalidationOutcome::Revoked)
            }
            Err(e) => {
                let consecutive_failures = match self.store.record_revalidation_failure() {
                    Ok(n) => n,
                    Err(store_err) => {
                        warn!("Failed to record revalidation failure: {store_err}");
                        self.store.revalidation_failures().saturating_add(1)
                    }
                };
                warn!("License revalidation deferred ({consecutive_failures} in a row): {e}");
                Ok(RevalidationOutcome::Deferred {
                    consecutive_failures,
                })
            }
        }
    }

    /// Runs until the owning task is aborted: revalidates immediately if due,
    /// then re-checks periodically.
    pub async fn run_revalidation(self: Arc<Self>) {
        self.run_revalidation_with(|_| {}).await;
    }

    /// Like [`run_revalidation`](Self::run_revalidation), reporting every
    /// completed revalidation to `on_outcome`.
    pub async fn run_revalidation_with<F>(self: Arc<Self>, on_outcome: F)
    where
        F: Fn(&RevalidationOutcome) + Send + Sync + 'static,
    {
        let period = self.config.revalidation_interval().min(REVALIDATION_POLL);
        let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.refresh();
            if !self.revalidation_due() {
                continue;
            }
            match self.revalidate().await {
                Ok(outcome) => {
                    debug!("Background revalidation: {outcome:?}");
                    on_outcome(&outcome);
                }
                Err(e) => debug!("Background revalidation skipped: {e}"),
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────

    async fn activate_key(&self, key: &str, device_id: &DeviceId) -> LicenseResult<Outcome> {
        let check = self.server.check_license(key).await?;
        if !check.valid {
            return Err(LicenseError::ValidationFailed(
                "license key was not granted".to_string(),
            ));
        }
        if !check.requires_activation {
            return Ok(Outcome::Stateless);
        }

        match self.server.activate(key, device_id).await {
            Ok(activation) => Ok(Outcome::Activated(activation)),
            Err(LicenseError::ActivationNotRequired) => Ok(Outcome::Stateless),
            Err(e) => Err(e),
        }
    }

    fn commit(&self, key: &str, outcome: Outcome) -> LicenseResult<LicenseState> {
        let state = match outcome {
            Outcome::Activated(activation) => {
                let record = ActivationRecord::new(
                    key,
                    activation.activation_id,
                    activation.activations_limit,
                );
                self.store.save_activation_record(&record)?;
                LicenseState::Licensed {
                    activation_id: Some(record.activation_id),
                    activations_limit: record.activations_limit,
                }
            }
            Outcome::Stateless => {
                self.store.save_stateless_license(key)?;
                LicenseState::Licensed {
                    activation_id: None,
                    activations_limit: 0,
                }
            }
        };

        if let Err(e) = self.store.record_revalidation_success(self.clock.now()) {
            warn!("Failed to stamp license validation time: {e}");
        }
        Ok(state)
    }

    fn begin_flight(&self) -> LicenseResult<Flight<'_>> {
        let guard = InFlightGuard::acquire(&self.in_flight)?;
        let prior = match self.state() {
            LicenseState::ActivationFailed { .. } | LicenseState::Validating => self
                .resume_slot()
                .clone()
                .unwrap_or_else(|| self.restore()),
            state => state,
        };
        *self.resume_slot() = Some(prior);
        self.publish(LicenseState::Validating);

        Ok(Flight {
            machine: self,
            epoch: self.epoch.load(Ordering::Acquire),
            settled: false,
            _guard: guard,
        })
    }

    async fn bounded<T>(&self, fut: impl Future<Output = LicenseResult<T>>) -> LicenseResult<T> {
        let limit = self.config.request_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(LicenseError::Network(format!(
                "license server did not answer within {}s",
                limit.as_secs()
            ))),
        }
    }

    fn publish(&self, next: LicenseState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    fn restore(&self) -> LicenseState {
        restore_state(&self.store, self.clock.as_ref(), self.config.trial_period_days)
    }

    fn trial_state(&self) -> LicenseState {
        trial_state(&self.store, self.clock.as_ref(), self.config.trial_period_days)
    }

    fn resume_slot(&self) -> std::sync::MutexGuard<'_, Option<LicenseState>> {
        self.resume.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the single-flight slot; releases it on drop.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> LicenseResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LicenseError::InFlight)?;
        Ok(Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// An in-flight submission. Dropping it unsettled (the caller stopped
/// awaiting) restores the state before the submission.
struct Flight<'a> {
    machine: &'a EntitlementMachine,
    epoch: u64,
    settled: bool,
    _guard: InFlightGuard<'a>,
}

impl Flight<'_> {
    fn is_current(&self) -> bool {
        self.machine.epoch.load(Ordering::Acquire) == self.epoch
    }

    fn settle(&mut self, state: LicenseState) {
        self.settled = true;
        self.machine.publish(state);
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if self.settled || !self.is_current() {
            return;
        }
        let prior = self.machine.resume_slot().take();
        let prior = prior.unwrap_or_else(|| self.machine.restore());
        debug!("License request abandoned, restoring {prior}");
        self.machine.publish(prior);
    }
}

fn restore_state(store: &LicenseStore, clock: &dyn Clock, period_days: u32) -> LicenseState {
    if let Some(record) = store.activation_record() {
        return LicenseState::Licensed {
            activation_id: Some(record.activation_id),
            activations_limit: record.activations_limit,
        };
    }
    if store.stateless_license_key().is_some() {
        return LicenseState::Licensed {
            activation_id: None,
            activations_limit: 0,
        };
    }
    trial_state(store, clock, period_days)
}

fn trial_state(store: &LicenseStore, clock: &dyn Clock, period_days: u32) -> LicenseState {
    match store.trial_started_at() {
        Some(started_at) => TrialClock::with_period(started_at, period_days).state_at(clock.now()),
        // Trial not started yet: the whole period is still ahead.
        None if period_days == 0 => LicenseState::TrialExpired,
        None => LicenseState::TrialActive {
            days_remaining: period_days,
        },
    }
}
