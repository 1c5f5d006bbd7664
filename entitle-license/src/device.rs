//! Device identity for license binding.
//!
//! Resolves the stable per-installation identifier an activation is scoped
//! to. A hardware serial is preferred; without one, a random UUID is
//! generated on first run and persisted so it never changes afterwards.

use entitle_store::LicenseStore;
use entitle_types::DeviceId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Platform capability that may yield a hardware serial.
pub trait HardwareIdSource: Send + Sync {
    /// The raw hardware serial, or `None` if the platform does not expose one.
    /// Must not have side effects.
    fn hardware_serial(&self) -> Option<String>;
}

/// Reads the serial through the host platform's registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformHardwareId;

impl HardwareIdSource for PlatformHardwareId {
    fn hardware_serial(&self) -> Option<String> {
        get_machine_serial()
    }
}

/// Never yields a serial; forces the generated-identifier path.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHardwareId;

impl HardwareIdSource for NoHardwareId {
    fn hardware_serial(&self) -> Option<String> {
        None
    }
}

/// Resolves and memoizes this installation's [`DeviceId`].
pub struct DeviceIdentity {
    store: LicenseStore,
    hardware: Arc<dyn HardwareIdSource>,
    resolved: Mutex<Option<DeviceId>>,
}

impl DeviceIdentity {
    /// Uses the platform hardware serial when available.
    pub fn new(store: LicenseStore) -> Self {
        Self::with_hardware(store, Arc::new(PlatformHardwareId))
    }

    /// Uses a custom hardware source.
    pub fn with_hardware(store: LicenseStore, hardware: Arc<dyn HardwareIdSource>) -> Self {
        Self {
            store,
            hardware,
            resolved: Mutex::new(None),
        }
    }

    /// Returns the device id. Always succeeds.
    ///
    /// Order: hashed hardware serial, then the persisted generated id, then a
    /// freshly generated UUID that is persisted before returning. If the
    /// write fails the id is still used for the rest of the run.
    pub fn resolve(&self) -> DeviceId {
        let mut resolved = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = resolved.as_ref() {
            return id.clone();
        }

        let id = self.resolve_uncached();
        *resolved = Some(id.clone());
        id
    }

    fn resolve_uncached(&self) -> DeviceId {
        if let Some(serial) = self
            .hardware
            .hardware_serial()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            debug!("Using hardware serial for device id");
            return fingerprint(&serial);
        }

        if let Some(id) = self.store.device_id() {
            return id;
        }

        let id = DeviceId::generate();
        match self.store.set_device_id(&id) {
            Ok(()) => info!("Generated new device id {id}"),
            Err(e) => warn!("Failed to persist generated device id {id}: {e}"),
        }
        id
    }
}

/// Hashes a hardware serial so the raw value never leaves the machine.
fn fingerprint(serial: &str) -> DeviceId {
    let mut hasher = Sha256::new();
    hasher.update(serial.as_bytes());
    let hash = hasher.finalize();
    DeviceId::from_raw(hex::encode(&hash[..16]))
}

/// Information about the current device, sent with an activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Operating system name.
    pub os_name: String,
    /// Operating system version.
    pub os_version: String,
    /// Hostname.
    pub hostname: String,
    /// CPU architecture.
    pub arch: String,
}

impl DeviceInfo {
    /// Collects information about the current device.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            os_name: env::consts::OS.to_string(),
            os_version: get_os_version(),
            hostname: get_hostname(),
            arch: env::consts::ARCH.to_string(),
        }
    }

    /// Human-readable activation label.
    #[must_use]
    pub fn label(&self) -> String {
        self.hostname.clone()
    }

    /// Activation metadata, including the device id the server keys
    /// idempotent activations on.
    #[must_use]
    pub fn meta(&self, device_id: &DeviceId) -> HashMap<String, String> {
        HashMap::from([
            ("device_id".to_string(), device_id.to_string()),
            ("os".to_string(), self.os_name.clone()),
            ("os_version".to_string(), self.os_version.clone()),
            ("arch".to_string(), self.arch.clone()),
        ])
    }
}

/// Gets the machine hostname.
fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Gets the OS version string.
fn get_os_version() -> String {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("VERSION_ID="))
                    .map(|l| {
                        l.trim_start_matches("VERSION_ID=")
                            .trim_matches('"')
                            .to_string()
                    })
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        "unknown".to_string()
    }
}

/// Gets the hardware serial (platform-specific).
fn get_machine_serial() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformSerialNumber"))
                    .and_then(|l| l.split('"').nth(3))
                    .map(String::from)
            })
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("reg")
            .args([
                "query",
                r"HKLM\SOFTWARE\Microsoft\Cryptography",
                "/v",
                "MachineGuid",
            ])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("MachineGuid"))
                    .and_then(|l| l.split_whitespace().last())
                    .map(String::from)
            })
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}
