//! Shared pieces of the `entitle` command-line tool.

use anyhow::{Context, Result};
use entitle_license::{LicenseConfig, LicenseController};
use entitle_store::{LicenseStore, SqliteStore};
use entitle_types::LicenseState;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Database file inside the data directory.
pub const DB_FILE: &str = "license.db";
/// Configuration file looked up in the data directory when `--config` is not
/// given.
pub const CONFIG_FILE: &str = "config.json";

/// `<platform data dir>/entitle`, or `./entitle` if the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("entitle")
}

/// Loads the configuration.
///
/// An explicit path must exist. Otherwise `<data_dir>/config.json` is used
/// when present, then defaults. `ENTITLE_*` variables are applied last.
pub fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<LicenseConfig> {
    let config = match explicit {
        Some(path) => LicenseConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let fallback = data_dir.join(CONFIG_FILE);
            if fallback.is_file() {
                LicenseConfig::from_file(&fallback)
                    .with_context(|| format!("loading config from {}", fallback.display()))?
            } else {
                debug!("No config file, using defaults");
                LicenseConfig::default()
            }
        }
    };
    Ok(config.apply_env())
}

/// Opens the license database in `data_dir`, creating it if needed.
pub fn open_store(data_dir: &Path) -> Result<LicenseStore> {
    let path = data_dir.join(DB_FILE);
    let kv = SqliteStore::open(&path)
        .with_context(|| format!("opening license database {}", path.display()))?;
    Ok(LicenseStore::new(Arc::new(kv)))
}

/// Snapshot printed by every command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub state: LicenseState,
    pub can_use_app: bool,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub revalidation_due: bool,
}

impl StatusReport {
    pub fn capture(controller: &LicenseController) -> Self {
        let machine = controller.machine();
        Self {
            state: controller.state(),
            can_use_app: controller.can_use_app(),
            device_id: machine.device_id().to_string(),
            message: controller.validation_message(),
            revalidation_due: machine.revalidation_due(),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "License:    {}", self.state)?;
        writeln!(
            f,
            "App usable: {}",
            if self.can_use_app { "yes" } else { "no" }
        )?;
        write!(f, "Device:     {}", self.device_id)?;
        if self.revalidation_due {
            write!(f, "\nRevalidation pending")?;
        }
        if let Some(message) = &self.message {
            write!(f, "\n\n{message}")?;
        }
        Ok(())
    }
}
