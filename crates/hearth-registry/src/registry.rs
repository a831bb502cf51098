//! [`AnchorRegistry`] – the single entry point for creating, finding,
//! renaming and erasing spatial anchors.
//!
//! The registry owns every in-memory index (deduplication, finder, saved
//! names) and the durable record store, and drives the platform through one
//! cooperative [`tick`][AnchorRegistry::tick] per host frame.  Façade calls
//! never block: anything the platform completes later is picked up by a
//! subsequent tick.
//!
//! Platform and storage failures are absorbed here.  They are logged with
//! `tracing` and published on the [`AnchorEventBus`], never returned to the
//! caller.
//!
//! # Example
//!
//! ```rust
//! use hearth_platform::SimulatedPlatform;
//! use hearth_registry::{AnchorRegistry, CreateOutcome, CreateRequest, RegistryConfig};
//! use hearth_store::{MemoryStorage, PersistentRecordStore};
//! use hearth_types::{Pose, Vec3};
//!
//! let store = PersistentRecordStore::new(Box::new(MemoryStorage::new()));
//! let mut registry = AnchorRegistry::new(
//!     RegistryConfig::default(),
//!     Box::new(SimulatedPlatform::new()),
//!     store,
//! );
//!
//! let outcome = registry.create_or_reuse(CreateRequest::new("Lamp", Pose::at(Vec3::zero())));
//! assert!(matches!(outcome, CreateOutcome::Pending(_)));
//!
//! while registry.has_pending_work() {
//!     registry.tick();
//! }
//! assert_eq!(registry.find_by_label("Lamp").len(), 1);
//! ```

use std::collections::HashMap;

use hearth_platform::{AnchorPlatform, Completion, poll_completion};
use hearth_spatial::{AnchorEntry, AnchorFinder, DeduplicationIndex, Persistence};
use hearth_store::{PersistentRecordStore, SavedNameIndex};
use hearth_types::{
    AnchorEventPayload, AnchorHandle, AnchorIdentity, Pose, PresentationTarget, Vec3,
};
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::coordinator::{
    AnchorLifecycleCoordinator, CreationMetadata, CreationState, LabelSources, resolve_label,
};
use crate::events::{AnchorEventBus, AnchorEventReceiver};

const SOURCE: &str = "hearth-registry::registry";

// ─────────────────────────────────────────────────────────────────────────────
// Requests and outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// A detection to anchor.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Label proposed by the detector.
    pub label: String,
    pub pose: Pose,
    /// Surface normal at the detection.  `None` uses the pose's up axis.
    pub normal: Option<Vec3>,
    pub presentation_target: Option<PresentationTarget>,
    /// User-supplied name; beats every other label source.
    pub explicit_name: Option<String>,
}

impl CreateRequest {
    pub fn new(label: impl Into<String>, pose: Pose) -> Self {
        Self {
            label: label.into(),
            pose,
            normal: None,
            presentation_target: None,
            explicit_name: None,
        }
    }

    pub fn with_normal(mut self, normal: Vec3) -> Self {
        self.normal = Some(normal);
        self
    }

    pub fn with_presentation_target(mut self, target: PresentationTarget) -> Self {
        self.presentation_target = Some(target);
        self
    }

    pub fn with_explicit_name(mut self, name: impl Into<String>) -> Self {
        self.explicit_name = Some(name.into());
        self
    }

    fn surface_normal(&self) -> Vec3 {
        self.normal.unwrap_or_else(|| self.pose.up())
    }
}

/// Result of [`AnchorRegistry::create_or_reuse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// An equivalent live anchor absorbed the detection.
    Reused {
        handle: AnchorHandle,
        identity: AnchorIdentity,
        seen_count: u32,
    },
    /// A platform anchor was requested; its identity arrives on a later tick.
    Pending(AnchorHandle),
    /// The platform refused to instantiate.
    Rejected,
}

impl CreateOutcome {
    pub fn handle(&self) -> Option<AnchorHandle> {
        match self {
            Self::Reused { handle, .. } | Self::Pending(handle) => Some(*handle),
            Self::Rejected => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

/// Indices and storage the coordinator mutates alongside the façade.
pub(crate) struct RegistryState {
    pub(crate) dedup: DeduplicationIndex,
    pub(crate) finder: AnchorFinder,
    pub(crate) saved_names: SavedNameIndex,
    pub(crate) store: PersistentRecordStore,
    pub(crate) bus: AnchorEventBus,
}

impl RegistryState {
    pub(crate) fn set_persistence(&mut self, identity: &AnchorIdentity, persistence: Persistence) {
        if let Some(entry) = self.dedup.get_mut(identity) {
            entry.persistence = persistence;
        }
    }

    /// Drop `identity` from every index and the durable store.
    fn forget_anchor(&mut self, identity: &AnchorIdentity) -> Option<AnchorEntry> {
        let entry = self.dedup.remove(identity)?;
        self.finder.untrack(entry.handle);
        self.saved_names.remove(identity);
        if let Err(e) = self.store.remove(identity) {
            warn!(%identity, error = %e, "failed to remove durable record");
        }
        Some(entry)
    }
}

struct PendingErase {
    identity: AnchorIdentity,
    /// Issued by `erase_all`; the indices were already cleared.
    bulk: bool,
    done: Completion<()>,
}

// ─────────────────────────────────────────────────────────────────────────────
// AnchorRegistry
// ─────────────────────────────────────────────────────────────────────────────

pub struct AnchorRegistry {
    config: RegistryConfig,
    platform: Box<dyn AnchorPlatform>,
    state: RegistryState,
    coordinator: AnchorLifecycleCoordinator,
    erasing: HashMap<AnchorHandle, PendingErase>,
    ticks: u64,
}

impl AnchorRegistry {
    pub fn new(
        config: RegistryConfig,
        platform: Box<dyn AnchorPlatform>,
        store: PersistentRecordStore,
    ) -> Self {
        let state = RegistryState {
            dedup: DeduplicationIndex::new(config.dedup_settings()),
            finder: AnchorFinder::new(),
            saved_names: SavedNameIndex::new(),
            store,
            bus: AnchorEventBus::default(),
        };
        Self {
            config,
            platform,
            state,
            coordinator: AnchorLifecycleCoordinator::new(),
            erasing: HashMap::new(),
            ticks: 0,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn events(&self) -> &AnchorEventBus {
        &self.state.bus
    }

    pub fn subscribe(&self) -> AnchorEventReceiver {
        self.state.bus.subscribe()
    }

    pub fn set_dedup_enabled(&mut self, enabled: bool) {
        self.config.dedup_enabled = enabled;
        self.state.dedup.set_enabled(enabled);
    }

    // ── Creation ─────────────────────────────────────────────────────────────

    /// Reuse a matching live anchor, or request a new one from the platform.
    ///
    /// The deduplication lookup happens before any platform call; on a match
    /// nothing is instantiated.  Creations still awaiting readiness are not
    /// matched against.
    pub fn create_or_reuse(&mut self, request: CreateRequest) -> CreateOutcome {
        let normal = request.surface_normal();
        let match_label = resolve_label(
            LabelSources {
                explicit_name: request.explicit_name.as_deref(),
                proposed_label: Some(&request.label),
                saved_label: None,
                presented_text: request
                    .presentation_target
                    .as_ref()
                    .and_then(|t| t.text.as_deref()),
            },
            &self.config.fallback_label,
        );

        if let Some(outcome) = self.absorb(&match_label, request.pose.position, normal) {
            return outcome;
        }

        match self.platform.instantiate(request.pose) {
            Ok(inst) => {
                let handle = inst.handle;
                let metadata = CreationMetadata {
                    proposed_label: Some(request.label),
                    explicit_name: request.explicit_name,
                    surface_normal: Some(normal),
                    presentation_target: request.presentation_target,
                    expected_identity: None,
                };
                self.coordinator.begin(inst, metadata, self.ticks);
                CreateOutcome::Pending(handle)
            }
            Err(e) => {
                warn!(label = %match_label, error = %e, "platform rejected anchor instantiation");
                CreateOutcome::Rejected
            }
        }
    }

    fn absorb(&mut self, label: &str, point: Vec3, normal: Vec3) -> Option<CreateOutcome> {
        let (identity, handle, seen_count) = self
            .state
            .dedup
            .absorb_duplicate(label, point, normal)
            .map(|e| (e.identity, e.handle, e.seen_count))?;

        let entry = self.state.dedup.get_mut(&identity)?;
        entry.sync_presented_text();
        let display_label = entry.display_label();
        self.state.finder.track(entry);
        debug!(%identity, seen_count, "detection matched live anchor");
        self.state.bus.publish(
            SOURCE,
            AnchorEventPayload::Reobserved {
                handle,
                identity,
                seen_count,
                display_label,
            },
        );
        Some(CreateOutcome::Reused {
            handle,
            identity,
            seen_count,
        })
    }

    // ── Reload ───────────────────────────────────────────────────────────────

    /// Read every durable record, rebuild the saved-name index and request
    /// re-localization of each identity that is not already live.
    ///
    /// Returns the identities for which a resolve was issued.
    pub fn load_saved(&mut self) -> Vec<AnchorIdentity> {
        let records = match self.state.store.load_all() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to read saved anchors");
                return Vec::new();
            }
        };
        self.state.saved_names.rebuild(&records);
        info!(count = records.len(), "loading saved anchors");

        records
            .iter()
            .filter_map(|r| self.restore(r.identity, None).map(|_| r.identity))
            .collect()
    }

    /// Request re-localization of one saved identity.  `explicit_name`
    /// overrides the saved label.
    ///
    /// Returns `None` when the identity is already live or being restored,
    /// or when the platform refuses.
    pub fn restore(
        &mut self,
        identity: AnchorIdentity,
        explicit_name: Option<String>,
    ) -> Option<AnchorHandle> {
        if self.state.dedup.get(&identity).is_some() || self.coordinator.is_restoring(&identity) {
            debug!(%identity, "anchor already live or restoring");
            return None;
        }
        if self.state.saved_names.get(&identity).is_none() {
            if let Some(label) = self.label_for_identity(&identity) {
                self.state.saved_names.insert(identity, label);
            }
        }
        match self.platform.resolve(identity) {
            Ok(inst) => {
                let handle = inst.handle;
                let metadata = CreationMetadata {
                    explicit_name,
                    expected_identity: Some(identity),
                    ..CreationMetadata::default()
                };
                self.coordinator.begin(inst, metadata, self.ticks);
                Some(handle)
            }
            Err(e) => {
                warn!(%identity, error = %e, "platform refused to resolve saved anchor");
                None
            }
        }
    }

    pub fn try_get_saved_label(&self, identity: &AnchorIdentity) -> Option<String> {
        self.state.saved_names.get(identity).map(str::to_string)
    }

    // ── Rename ───────────────────────────────────────────────────────────────

    /// Relabel a live anchor everywhere: entry, finder, saved names and the
    /// durable record (when one exists).  Blank labels are refused.
    pub fn rename(&mut self, handle: AnchorHandle, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() {
            return false;
        }
        let Some(identity) = self.state.dedup.by_handle(handle).map(|e| e.identity) else {
            debug!(%handle, "rename of unknown handle ignored");
            return false;
        };
        if let Some(entry) = self.state.dedup.get_mut(&identity) {
            entry.label = label.to_string();
            entry.sync_presented_text();
            self.state.finder.track(entry);
        }

        match self.state.store.update_label(&identity, label) {
            Ok(true) => self.state.saved_names.insert(identity, label),
            Ok(false) => {}
            Err(e) => warn!(%identity, error = %e, "failed to rename durable record"),
        }
        info!(%identity, label, "anchor renamed");
        self.state.bus.publish(
            SOURCE,
            AnchorEventPayload::Renamed {
                identity,
                label: label.to_string(),
            },
        );
        true
    }

    // ── Erase ────────────────────────────────────────────────────────────────

    /// Ask the platform to erase a registered anchor.
    ///
    /// The indices and the durable record are only touched once the platform
    /// confirms; a failed erase leaves everything as it was.  Returns `true`
    /// when an erase was issued.
    pub fn erase(&mut self, handle: AnchorHandle) -> bool {
        if self.erasing.contains_key(&handle) {
            debug!(%handle, "erase already in flight");
            return false;
        }
        let Some(identity) = self.state.dedup.by_handle(handle).map(|e| e.identity) else {
            if matches!(
                self.coordinator.state(handle),
                Some(CreationState::AwaitingReadiness)
            ) {
                warn!(%handle, "cannot erase an anchor that is not realized yet");
            } else {
                debug!(%handle, "erase of unknown handle ignored");
            }
            return false;
        };
        let done = self.platform.erase(handle);
        self.erasing.insert(
            handle,
            PendingErase {
                identity,
                bulk: false,
                done,
            },
        );
        true
    }

    /// Erase every registered anchor and clear all durable records.
    ///
    /// The indices, saved names and record store are cleared immediately,
    /// without waiting for the individual platform erases.  Creations still
    /// awaiting readiness are cancelled and their handles destroyed, so
    /// nothing requested before the call is registered or saved after it.
    /// A save already in flight writes no record.  Returns the number of
    /// erases issued.
    pub fn erase_all(&mut self) -> usize {
        let cancelled = self
            .coordinator
            .cancel_pending(self.platform.as_mut(), &mut self.state);
        let entries = self.state.dedup.drain();
        let mut issued = 0;
        for entry in &entries {
            if self.erasing.contains_key(&entry.handle) {
                continue;
            }
            let done = self.platform.erase(entry.handle);
            self.erasing.insert(
                entry.handle,
                PendingErase {
                    identity: entry.identity,
                    bulk: true,
                    done,
                },
            );
            issued += 1;
        }
        for entry in self.erasing.values_mut() {
            entry.bulk = true;
        }

        self.state.finder.clear();
        self.state.saved_names.clear();
        if let Err(e) = self.state.store.clear_all() {
            warn!(error = %e, "failed to clear durable records");
        }
        info!(erased = entries.len(), cancelled, "all anchors cleared");
        self.state.bus.publish(
            SOURCE,
            AnchorEventPayload::Cleared {
                erased: entries.len(),
            },
        );
        issued
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// One cooperative step.
    pub fn tick(&mut self) {
        self.ticks += 1;
        self.platform.update();
        self.coordinator.tick(
            self.platform.as_mut(),
            &mut self.state,
            &self.config,
            self.ticks,
        );
        self.poll_erases();

        let interval = self.config.finder_rebuild_interval_ticks;
        if interval > 0 && self.ticks % interval == 0 {
            self.state.finder.rebuild(self.state.dedup.iter());
        }
    }

    fn poll_erases(&mut self) {
        let handles: Vec<AnchorHandle> = self.erasing.keys().copied().collect();
        for handle in handles {
            let Some(pending) = self.erasing.get_mut(&handle) else {
                continue;
            };
            let Some(result) = poll_completion(&mut pending.done) else {
                continue;
            };
            let Some(pending) = self.erasing.remove(&handle) else {
                continue;
            };
            let identity = pending.identity;

            match result {
                Ok(()) => {
                    if !pending.bulk {
                        self.state.forget_anchor(&identity);
                    }
                    self.platform.destroy(handle);
                    self.coordinator.forget(handle);
                    info!(%identity, %handle, "anchor erased");
                    self.state
                        .bus
                        .publish(SOURCE, AnchorEventPayload::Erased { identity });
                }
                Err(e) => {
                    warn!(%identity, %handle, error = %e, "platform erase failed");
                    if pending.bulk {
                        // Already gone from every index; do not leak the object.
                        self.platform.destroy(handle);
                        self.coordinator.forget(handle);
                    }
                    self.state.bus.publish(
                        SOURCE,
                        AnchorEventPayload::EraseFailed {
                            identity,
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Live handles whose base label or shown label (with the `(xN)`
    /// suffix) equals `label` exactly.
    pub fn find_by_label(&self, label: &str) -> Vec<AnchorHandle> {
        self.state.finder.find_by_label(label)
    }

    /// First saved identity recorded under `label`.
    pub fn identity_for_label(&self, label: &str) -> Option<AnchorIdentity> {
        AnchorFinder::resolve_identity_by_label(&self.state.store, label).unwrap_or_else(|e| {
            warn!(label, error = %e, "durable lookup failed");
            None
        })
    }

    /// Saved label recorded for `identity`.
    pub fn label_for_identity(&self, identity: &AnchorIdentity) -> Option<String> {
        AnchorFinder::resolve_label_by_identity(&self.state.store, identity).unwrap_or_else(|e| {
            warn!(%identity, error = %e, "durable lookup failed");
            None
        })
    }

    pub fn entry(&self, identity: &AnchorIdentity) -> Option<&AnchorEntry> {
        self.state.dedup.get(identity)
    }

    pub fn entry_by_handle(&self, handle: AnchorHandle) -> Option<&AnchorEntry> {
        self.state.dedup.by_handle(handle)
    }

    /// Live entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &AnchorEntry> {
        self.state.dedup.iter()
    }

    pub fn len(&self) -> usize {
        self.state.dedup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.dedup.is_empty()
    }

    pub fn creation_state(&self, handle: AnchorHandle) -> Option<CreationState> {
        self.coordinator.state(handle)
    }

    pub fn pending_count(&self) -> usize {
        self.coordinator.pending_count()
    }

    /// `true` while any readiness, save or erase confirmation is outstanding.
    pub fn has_pending_work(&self) -> bool {
        !self.coordinator.is_idle() || !self.erasing.is_empty()
    }

    /// Number of durable records, or zero when the store cannot be read.
    pub fn saved_count(&self) -> usize {
        self.state.store.count().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read record count");
            0
        })
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
