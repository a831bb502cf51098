//! Label-based query index over live anchors.
//!
//! The voice layer addresses anchors by what they are called ("delete the
//! lamp", "rename the sofa").  [`AnchorFinder`] keeps a flat list of every
//! realized anchor and its current label, refreshed wholesale by
//! [`rebuild`][AnchorFinder::rebuild] and patched incrementally as anchors
//! are registered, renamed and erased.
//!
//! Labels are not unique: two lamps are two results.  Live lookups are exact
//! and case-sensitive.  They match either the base label (`"Lamp"`) or the
//! label currently shown, which is the base label plus the multiplicity
//! suffix once an anchor has been seen again (`"Lamp (x2)"`).  The durable
//! lookups scan the record store linearly.

use hearth_store::{PersistentRecordStore, StorageError};
use hearth_types::{AnchorHandle, AnchorIdentity};

use crate::dedup::AnchorEntry;

#[derive(Debug, Clone, PartialEq)]
struct TrackedAnchor {
    handle: AnchorHandle,
    identity: AnchorIdentity,
    label: String,
    shown: String,
}

impl From<&AnchorEntry> for TrackedAnchor {
    fn from(entry: &AnchorEntry) -> Self {
        Self {
            handle: entry.handle,
            identity: entry.identity,
            label: entry.label.clone(),
            shown: entry.display_label(),
        }
    }
}

/// Secondary read index: label → live handles.
#[derive(Debug, Default)]
pub struct AnchorFinder {
    anchors: Vec<TrackedAnchor>,
}

impl AnchorFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked list with `entries`.
    pub fn rebuild<'a>(&mut self, entries: impl IntoIterator<Item = &'a AnchorEntry>) {
        self.anchors = entries.into_iter().map(TrackedAnchor::from).collect();
    }

    /// Start tracking `entry`, or refresh its labels if its handle is already
    /// known.
    pub fn track(&mut self, entry: &AnchorEntry) {
        let tracked = TrackedAnchor::from(entry);
        match self.anchors.iter_mut().find(|a| a.handle == entry.handle) {
            Some(existing) => *existing = tracked,
            None => self.anchors.push(tracked),
        }
    }

    pub fn untrack(&mut self, handle: AnchorHandle) {
        self.anchors.retain(|a| a.handle != handle);
    }

    pub fn clear(&mut self) {
        self.anchors.clear();
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Every live handle whose base or shown label equals `label` exactly.
    pub fn find_by_label(&self, label: &str) -> Vec<AnchorHandle> {
        self.anchors
            .iter()
            .filter(|a| a.label == label || a.shown == label)
            .map(|a| a.handle)
            .collect()
    }

    /// Live identity bound to `handle`, if realized.
    pub fn identity_of(&self, handle: AnchorHandle) -> Option<AnchorIdentity> {
        self.anchors
            .iter()
            .find(|a| a.handle == handle)
            .map(|a| a.identity)
    }

    /// First durable identity recorded under `label`.
    pub fn resolve_identity_by_label(
        store: &PersistentRecordStore,
        label: &str,
    ) -> Result<Option<AnchorIdentity>, StorageError> {
        store.identity_for_label(label)
    }

    /// Durable label recorded for `identity`.
    pub fn resolve_label_by_identity(
        store: &PersistentRecordStore,
        identity: &AnchorIdentity,
    ) -> Result<Option<String>, StorageError> {
        store.label_for_identity(identity)
    }
}
