#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use entitle_license::{
    Activation, Clock, DeviceIdentity, EntitlementMachine, LicenseCheck, LicenseConfig,
    LicenseError, LicenseResult, LicenseServer, MockClock, NoHardwareId,
};
use entitle_store::LicenseStore;
use entitle_types::DeviceId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

struct FakeKey {
    limit: u32,
    revoked: bool,
    deleted: bool,
    /// device id → activation id
    activations: HashMap<String, String>,
}

/// In-process license server. Activations are idempotent per device id.
#[derive(Default)]
pub struct FakeServer {
    keys: Mutex<HashMap<String, FakeKey>>,
    pub check_calls: AtomicUsize,
    pub activate_calls: AtomicUsize,
    pub revalidate_calls: AtomicUsize,
    offline: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    entered: Notify,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a key. A limit of 0 means no activation is required.
    pub fn add_key(&self, key: &str, limit: u32) {
        self.keys.lock().unwrap().insert(
            key.to_string(),
            FakeKey {
                limit,
                revoked: false,
                deleted: false,
                activations: HashMap::new(),
            },
        );
    }

    pub fn revoke(&self, key: &str) {
        if let Some(k) = self.keys.lock().unwrap().get_mut(key) {
            k.revoked = true;
        }
    }

    /// The server answers "not found" for the key from now on.
    pub fn delete(&self, key: &str) {
        if let Some(k) = self.keys.lock().unwrap().get_mut(key) {
            k.deleted = true;
        }
    }

    pub fn activation_count(&self, key: &str) -> usize {
        self.keys
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, |k| k.activations.len())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Holds every `check_license` call until the returned handle is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Resolves once a held `check_license` call has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn network_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
            + self.activate_calls.load(Ordering::SeqCst)
            + self.revalidate_calls.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> LicenseResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LicenseError::Network("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LicenseServer for FakeServer {
    async fn check_license(&self, key: &str) -> LicenseResult<LicenseCheck> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.entered.notify_one();
            gate.notified().await;
        }
        self.ensure_online()?;

        let keys = self.keys.lock().unwrap();
        if keys.get(key).is_some_and(|k| k.deleted) {
            return Err(LicenseError::ValidationFailed("License key not found".to_string()));
        }
        Ok(match keys.get(key) {
            Some(k) if !k.revoked => LicenseCheck {
                valid: true,
                requires_activation: k.limit > 0,
                activations_limit: Some(k.limit),
            },
            _ => LicenseCheck {
                valid: false,
                requires_activation: false,
                activations_limit: None,
            },
        })
    }

    async fn activate(&self, key: &str, device_id: &DeviceId) -> LicenseResult<Activation> {
        self.activate_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        let mut keys = self.keys.lock().unwrap();
        let Some(k) = keys.get_mut(key) else {
            return Err(LicenseError::ActivationFailed("unknown key".to_string()));
        };
        if k.limit == 0 {
            return Err(LicenseError::ActivationNotRequired);
        }
        if let Some(existing) = k.activations.get(device_id.as_str()) {
            return Ok(Activation {
                activation_id: existing.clone(),
                activations_limit: k.limit,
            });
        }
        if k.activations.len() as u32 >= k.limit {
            return Err(LicenseError::ActivationLimitReached { limit: k.limit });
        }
        let activation_id = format!("act-{}", k.activations.len() + 1);
        k.activations
            .insert(device_id.to_string(), activation_id.clone());
        Ok(Activation {
            activation_id,
            activations_limit: k.limit,
        })
    }

    async fn revalidate(&self, key: &str, activation_id: &str) -> LicenseResult<bool> {
        self.revalidate_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        let keys = self.keys.lock().unwrap();
        Ok(keys.get(key).is_some_and(|k| {
            !k.revoked && k.activations.values().any(|id| id == activation_id)
        }))
    }
}

/// A machine with no hardware serial, so the device id comes from `store`.
pub fn machine_with(
    store: &LicenseStore,
    server: &Arc<FakeServer>,
    clock: &Arc<MockClock>,
    config: LicenseConfig,
) -> EntitlementMachine {
    let device = DeviceIdentity::with_hardware(store.clone(), Arc::new(NoHardwareId));
    let server: Arc<dyn LicenseServer> = server.clone();
    let clock: Arc<dyn Clock> = clock.clone();
    EntitlementMachine::with_parts(store.clone(), device, server, clock, config)
}

pub fn machine(
    store: &LicenseStore,
    server: &Arc<FakeServer>,
    clock: &Arc<MockClock>,
) -> EntitlementMachine {
    machine_with(store, server, clock, LicenseConfig::default())
}

pub fn clock() -> Arc<MockClock> {
    Arc::new(MockClock::new(t0()))
}
