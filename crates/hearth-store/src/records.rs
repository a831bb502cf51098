//! Persistent anchor record store.
//!
//! Keeps an ordered, dense list of `(identity, label)` records on top of a
//! [`KeyValueStorage`].  The cell layout is fixed for compatibility with
//! data written by earlier clients:
//!
//! | key                    | kind   | contents                 |
//! |------------------------|--------|--------------------------|
//! | `numUuids`             | int    | number of records `n`    |
//! | `uuid0` … `uuid{n-1}`  | string | `"<identity>;<label>"`   |
//!
//! Slots `0..n` are always contiguous: [`PersistentRecordStore::remove`]
//! shifts every later slot down by one before deleting the vacated tail.
//! Every mutation is flushed before it returns.
//!
//! Encoded strings never leave this module; callers only see
//! [`PersistedRecord`]s.
//!
//! # Example
//!
//! ```rust
//! use hearth_store::{MemoryStorage, PersistentRecordStore};
//! use hearth_types::AnchorIdentity;
//!
//! let backing = MemoryStorage::new();
//! let mut store = PersistentRecordStore::new(Box::new(backing.clone()));
//!
//! let id = AnchorIdentity::new_v4();
//! assert!(store.append(id, "Lamp").unwrap());
//! assert!(!store.append(id, "Lamp").unwrap()); // already present
//!
//! // A "restarted" process sees the same record.
//! let reopened = PersistentRecordStore::new(Box::new(backing));
//! let records = reopened.load_all().unwrap();
//! assert_eq!(records[0].label, "Lamp");
//! ```

use std::collections::HashSet;

use hearth_types::{AnchorIdentity, HearthError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::{KeyValueStorage, StorageError};

/// Key holding the record count.
pub const COUNT_KEY: &str = "numUuids";

/// Prefix of every record slot key.
pub const SLOT_PREFIX: &str = "uuid";

const FIELD_SEPARATOR: char = ';';

fn slot_key(index: usize) -> String {
    format!("{SLOT_PREFIX}{index}")
}

// ─────────────────────────────────────────────────────────────────────────────
// PersistedRecord
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub identity: AnchorIdentity,
    pub label: String,
}

impl PersistedRecord {
    pub fn new(identity: AnchorIdentity, label: impl Into<String>) -> Self {
        Self {
            identity,
            label: label.into(),
        }
    }

    fn encode(&self) -> String {
        format!("{}{FIELD_SEPARATOR}{}", self.identity, self.label)
    }

    /// Split on the first separator; the label keeps any later `;`.
    fn decode(raw: &str) -> Result<Self, HearthError> {
        let (id, label) = raw.split_once(FIELD_SEPARATOR).ok_or_else(|| {
            HearthError::Storage(format!("record {raw:?} has no '{FIELD_SEPARATOR}' separator"))
        })?;
        Ok(Self {
            identity: id.parse()?,
            label: label.to_string(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PersistentRecordStore
// ─────────────────────────────────────────────────────────────────────────────

/// Durable, dense, identity-unique list of anchor records.
pub struct PersistentRecordStore {
    storage: Box<dyn KeyValueStorage>,
}

impl PersistentRecordStore {
    pub fn new(storage: Box<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Number of slots the count cell claims.  A missing or negative count
    /// reads as zero.
    pub fn count(&self) -> Result<usize, StorageError> {
        Ok(self.storage.get_int(COUNT_KEY)?.unwrap_or(0).max(0) as usize)
    }

    /// Append `(identity, label)` unless a record for `identity` already
    /// exists.  Returns `true` when a record was written.
    pub fn append(&mut self, identity: AnchorIdentity, label: &str) -> Result<bool, StorageError> {
        if self.slot_of(&identity)?.is_some() {
            debug!(%identity, "record already persisted; append skipped");
            return Ok(false);
        }
        let count = self.count()?;
        let record = PersistedRecord::new(identity, label);
        self.storage.set_string(&slot_key(count), &record.encode())?;
        self.storage.set_int(COUNT_KEY, (count + 1) as i64)?;
        self.storage.save()?;
        debug!(%identity, label, slot = count, "record appended");
        Ok(true)
    }

    /// Remove the record for `identity`, compacting later slots down by one.
    /// Returns `false` when no such record exists.
    pub fn remove(&mut self, identity: &AnchorIdentity) -> Result<bool, StorageError> {
        let Some(slot) = self.slot_of(identity)? else {
            return Ok(false);
        };
        let count = self.count()?;
        for index in slot + 1..count {
            match self.storage.get_string(&slot_key(index))? {
                Some(raw) => self.storage.set_string(&slot_key(index - 1), &raw)?,
                None => self.storage.delete_key(&slot_key(index - 1))?,
            }
        }
        self.storage.delete_key(&slot_key(count - 1))?;
        self.storage.set_int(COUNT_KEY, (count - 1) as i64)?;
        self.storage.save()?;
        debug!(%identity, slot, remaining = count - 1, "record removed");
        Ok(true)
    }

    /// Rewrite the label of an existing record in place.  Returns `false`
    /// when no record for `identity` exists.
    pub fn update_label(
        &mut self,
        identity: &AnchorIdentity,
        label: &str,
    ) -> Result<bool, StorageError> {
        let Some(slot) = self.slot_of(identity)? else {
            return Ok(false);
        };
        let record = PersistedRecord::new(*identity, label);
        self.storage.set_string(&slot_key(slot), &record.encode())?;
        self.storage.save()?;
        Ok(true)
    }

    /// Decode every record in slot order.
    ///
    /// Slots that are missing or fail to decode are skipped with a warning,
    /// as are later repeats of an identity already seen (the leftover of an
    /// interrupted compaction).
    pub fn load_all(&self) -> Result<Vec<PersistedRecord>, StorageError> {
        let count = self.count()?;
        let mut seen = HashSet::with_capacity(count);
        let mut records = Vec::with_capacity(count);
        for index in 0..count {
            let Some(raw) = self.storage.get_string(&slot_key(index))? else {
                warn!(slot = index, count, "record slot missing; skipping");
                continue;
            };
            match PersistedRecord::decode(&raw) {
                Ok(record) if seen.insert(record.identity) => records.push(record),
                Ok(record) => {
                    warn!(slot = index, identity = %record.identity, "duplicate record; skipping");
                }
                Err(e) => warn!(slot = index, error = %e, "corrupt record; skipping"),
            }
        }
        Ok(records)
    }

    /// Delete every slot and reset the count to zero.
    pub fn clear_all(&mut self) -> Result<(), StorageError> {
        let count = self.count()?;
        for index in 0..count {
            self.storage.delete_key(&slot_key(index))?;
        }
        self.storage.set_int(COUNT_KEY, 0)?;
        self.storage.save()?;
        debug!(cleared = count, "record store cleared");
        Ok(())
    }

    /// First identity whose record label equals `label` exactly.
    pub fn identity_for_label(&self, label: &str) -> Result<Option<AnchorIdentity>, StorageError> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|r| r.label == label)
            .map(|r| r.identity))
    }

    /// Label recorded for `identity`, if any.
    pub fn label_for_identity(&self, identity: &AnchorIdentity) -> Result<Option<String>, StorageError> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|r| r.identity == *identity)
            .map(|r| r.label))
    }

    /// Slot index holding `identity`, scanning raw cells so that a corrupt
    /// label never hides a matching identity.
    fn slot_of(&self, identity: &AnchorIdentity) -> Result<Option<usize>, StorageError> {
        let count = self.count()?;
        for index in 0..count {
            let Some(raw) = self.storage.get_string(&slot_key(index))? else {
                continue;
            };
            let id_part = raw.split(FIELD_SEPARATOR).next().unwrap_or_default();
            if id_part.parse::<AnchorIdentity>().ok().as_ref() == Some(identity) {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
