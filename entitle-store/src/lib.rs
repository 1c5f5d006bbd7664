//! Persistence layer for Entitle.
//!
//! Licensing state is a handful of small string values (device id, license
//! key, activation id, trial start, revalidation bookkeeping). They are kept
//! in a single-table SQLite database so each write is atomic, behind the
//! [`KeyValueStore`] trait so the engine can run against an in-memory fake.
//!
//! [`LicenseStore`] layers the typed, crash-tolerant reads on top.

mod error;
mod kv;
mod license_store;

pub use error::{StoreError, StoreResult};
pub use kv::{KeyValueStore, MemoryStore, SqliteStore};
pub use license_store::{keys, LicenseStore};
