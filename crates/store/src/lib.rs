//! Versioned record store for the checkout core.
//!
//! Records are JSON payloads addressed by `(kind, id)` and carry a version
//! that every update must match. That compare-and-swap is the single
//! concurrency primitive the checkout services build on.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryRecordStore;
pub use postgres::PostgresRecordStore;
pub use record::{StoredRecord, Version};
pub use store::{RecordStore, RecordStoreExt};
