//! # Persistence
//!
//! Durable, checksum-verified storage for execution state and checkpoints.
//!
//! ## Storage layout
//!
//! ```text
//! <root>/
//!   .lock                                advisory writer lock
//!   states/<id>.json                     current record
//!   backups/<id>/<millis>_<seq>.json     previous versions, newest last
//!   checkpoints/<execution_id>/<checkpoint_id>.json
//! ```
//!
//! Every file holds a [`StoredRecord`] envelope: the data plus its timestamp and
//! a SHA-256 checksum over both. Writes go to a temporary file that is renamed
//! into place, so readers never observe a partial record.

pub mod errors;
pub mod manager;

pub use errors::{PersistenceError, PersistenceResult};
pub use manager::{
    CheckpointInfo, PersistenceConfig, PersistenceManager, StorageStats, StoredRecord,
};
