//! Device-bound license activation and entitlement.
//!
//! This crate handles:
//! - Checking and activating license keys against a remote service
//! - Binding activations to a stable per-installation device id
//! - A local trial countdown when no key is present
//! - Background revalidation of a persisted activation
//!
//! # Design Principles
//!
//! - **Single owner**: [`EntitlementMachine`] is the only writer of
//!   [`LicenseState`]; everything else reads or subscribes
//! - **Optimistic startup**: a persisted license is honoured immediately,
//!   then re-confirmed in the background
//! - **Single flight**: at most one server request at a time
//! - **No forced logout**: network failures never evict a license in-session

mod client;
mod clock;
mod config;
mod controller;
mod device;
mod error;
mod machine;

pub use client::{
    Activation, ActivateResponse, ActivationRef, HttpLicenseClient, LicenseCheck, LicenseKeyInfo,
    LicenseServer, ValidateResponse,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{DEFAULT_API_BASE_URL, LicenseConfig};
pub use controller::{LicenseController, MSG_ACTIVATED, MSG_RECONNECT, MSG_REVOKED, message_for};
pub use device::{DeviceIdentity, DeviceInfo, HardwareIdSource, NoHardwareId, PlatformHardwareId};
pub use error::{LicenseError, LicenseResult};
pub use machine::{EntitlementMachine, RevalidationOutcome, StatusChanges};

pub use entitle_types::{ActivationRecord, DeviceId, ErrorKind, LicenseState};
