//! `hearth-store` – durable anchor records.
//!
//! # Modules
//!
//! - [`storage`] – [`KeyValueStorage`][storage::KeyValueStorage]: the
//!   preference-style cell contract, with SQLite and in-memory backends.
//! - [`records`] – [`PersistentRecordStore`][records::PersistentRecordStore]:
//!   the dense `identity;label` record list kept compatible with existing
//!   saved data.
//! - [`saved_names`] – [`SavedNameIndex`][saved_names::SavedNameIndex]:
//!   the in-memory `identity → label` map derived from the records.

pub mod records;
pub mod saved_names;
pub mod storage;

pub use records::{PersistedRecord, PersistentRecordStore};
pub use saved_names::SavedNameIndex;
pub use storage::{KeyValueStorage, MemoryStorage, SqliteStorage, StorageError};
