//! [`AnchorLifecycleCoordinator`] – drives each creation request from the
//! platform instantiate call to a terminal outcome.
//!
//! ```text
//! Requested ─▶ AwaitingReadiness ─▶ Resolved ─▶ Registered ─▶ PersistRequested ─▶ Terminal
//!                     │                                                │
//!                     └── timeout / platform error ─▶ Terminal(Abandoned)   └─ save failure ─▶ Terminal(PersistFailed)
//! ```
//!
//! Nothing here blocks.  Each [`tick`][AnchorLifecycleCoordinator::tick]
//! checks every outstanding [`Completion`] once and advances whatever the
//! platform has confirmed since the previous tick.  Other registry calls may
//! run between ticks while creations are still in flight.
//!
//! Ordering guarantees:
//!
//! - An anchor enters the deduplication index **before** its save is
//!   requested, so a duplicate detection arriving while the save is in
//!   flight already matches the in-memory entry.
//! - The durable record is appended only after the platform confirms the
//!   save, and never for an anchor erased in the meantime.
//!
//! A failed save is logged and not retried.  The anchor stays live and
//! registered with [`Persistence::SaveFailed`].

use std::collections::{HashMap, VecDeque};

use hearth_platform::{AnchorPlatform, Completion, Instantiation, Realized, poll_completion};
use hearth_spatial::{AnchorEntry, Persistence};
use hearth_types::{AnchorEventPayload, AnchorHandle, AnchorIdentity, PresentationTarget, Vec3};
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::registry::RegistryState;

const SOURCE: &str = "hearth-registry::coordinator";

/// Terminal outcomes kept for [`AnchorLifecycleCoordinator::state`]; the
/// oldest is evicted first.
pub const DEFAULT_OUTCOME_CAPACITY: usize = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Observable state
// ─────────────────────────────────────────────────────────────────────────────

/// Where a creation request currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationState {
    /// Instantiate issued; waiting for the platform to create or localize.
    AwaitingReadiness,
    /// Registered in memory; platform save in flight.
    PersistRequested { identity: AnchorIdentity },
    /// The coordinator is done with this handle.
    Terminal(CreationOutcome),
}

/// How a creation request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationOutcome {
    /// Saved and a new durable record was written.
    Persisted,
    /// Saved; a record for the identity already existed.
    AlreadyPersisted,
    /// Registered in memory only; the save failed.
    PersistFailed,
    /// Erased before the save confirmation arrived, or cancelled by an
    /// erase-all while still awaiting readiness.
    ErasedBeforePersist,
    /// Never became ready (timeout or platform error); handle destroyed.
    Abandoned,
}

// ─────────────────────────────────────────────────────────────────────────────
// Label resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Candidate names for an anchor, highest priority first.
#[derive(Debug, Default, Clone, Copy)]
pub struct LabelSources<'a> {
    pub explicit_name: Option<&'a str>,
    pub proposed_label: Option<&'a str>,
    pub saved_label: Option<&'a str>,
    pub presented_text: Option<&'a str>,
}

/// First non-blank source in priority order, otherwise `fallback`.
pub fn resolve_label(sources: LabelSources<'_>, fallback: &str) -> String {
    [
        sources.explicit_name,
        sources.proposed_label,
        sources.saved_label,
        sources.presented_text,
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|s| !s.is_empty())
    .unwrap_or(fallback)
    .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending records
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata captured when instantiation is requested.
#[derive(Debug, Clone, Default)]
pub struct CreationMetadata {
    pub proposed_label: Option<String>,
    pub explicit_name: Option<String>,
    /// Surface normal from the detection; `None` uses the realized pose's up
    /// axis.
    pub surface_normal: Option<Vec3>,
    pub presentation_target: Option<PresentationTarget>,
    /// Set when re-localizing a saved anchor.
    pub expected_identity: Option<AnchorIdentity>,
}

/// A creation awaiting platform readiness.  At most one per handle.
#[derive(Debug)]
pub struct PendingCreation {
    pub handle: AnchorHandle,
    pub metadata: CreationMetadata,
    pub requested_at_tick: u64,
    ready: Completion<Realized>,
}

struct PendingSave {
    identity: AnchorIdentity,
    done: Completion<()>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Owns every in-flight creation and its save.
pub struct AnchorLifecycleCoordinator {
    pending: HashMap<AnchorHandle, PendingCreation>,
    saving: HashMap<AnchorHandle, PendingSave>,
    outcomes: HashMap<AnchorHandle, CreationOutcome>,
    /// Insertion order of `outcomes`, oldest first.
    outcome_order: VecDeque<AnchorHandle>,
    outcome_capacity: usize,
}

impl Default for AnchorLifecycleCoordinator {
    fn default() -> Self {
        Self::with_outcome_capacity(DEFAULT_OUTCOME_CAPACITY)
    }
}

impl AnchorLifecycleCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` terminal outcomes (minimum 1).
    pub fn with_outcome_capacity(capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            saving: HashMap::new(),
            outcomes: HashMap::new(),
            outcome_order: VecDeque::new(),
            outcome_capacity: capacity.max(1),
        }
    }

    fn record_outcome(&mut self, handle: AnchorHandle, outcome: CreationOutcome) {
        self.drop_outcome(handle);
        while self.outcome_order.len() >= self.outcome_capacity {
            let Some(oldest) = self.outcome_order.pop_front() else {
                break;
            };
            self.outcomes.remove(&oldest);
        }
        self.outcomes.insert(handle, outcome);
        self.outcome_order.push_back(handle);
    }

    fn drop_outcome(&mut self, handle: AnchorHandle) {
        if self.outcomes.remove(&handle).is_some() {
            self.outcome_order.retain(|h| *h != handle);
        }
    }

    /// Track a freshly instantiated handle.
    pub fn begin(&mut self, inst: Instantiation, metadata: CreationMetadata, tick: u64) {
        debug!(handle = %inst.handle, label = ?metadata.proposed_label, "creation requested");
        self.drop_outcome(inst.handle);
        self.pending.insert(
            inst.handle,
            PendingCreation {
                handle: inst.handle,
                metadata,
                requested_at_tick: tick,
                ready: inst.ready,
            },
        );
    }

    pub fn state(&self, handle: AnchorHandle) -> Option<CreationState> {
        if self.pending.contains_key(&handle) {
            return Some(CreationState::AwaitingReadiness);
        }
        if let Some(save) = self.saving.get(&handle) {
            return Some(CreationState::PersistRequested {
                identity: save.identity,
            });
        }
        self.outcomes
            .get(&handle)
            .copied()
            .map(CreationState::Terminal)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// `true` when no readiness or save confirmation is outstanding.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.saving.is_empty()
    }

    /// Whether a re-localization of `identity` is already waiting.
    pub fn is_restoring(&self, identity: &AnchorIdentity) -> bool {
        self.pending
            .values()
            .any(|p| p.metadata.expected_identity.as_ref() == Some(identity))
    }

    /// Drop everything known about `handle` (after an erase).
    pub fn forget(&mut self, handle: AnchorHandle) {
        self.drop_outcome(handle);
    }

    /// Destroy every creation still awaiting readiness.  Returns how many
    /// were cancelled.
    pub(crate) fn cancel_pending(
        &mut self,
        platform: &mut dyn AnchorPlatform,
        state: &mut RegistryState,
    ) -> usize {
        let handles: Vec<AnchorHandle> = self.pending.keys().copied().collect();
        for &handle in &handles {
            debug!(%handle, "cancelling creation awaiting readiness");
            self.pending.remove(&handle);
            platform.destroy(handle);
            self.record_outcome(handle, CreationOutcome::ErasedBeforePersist);
            state
                .bus
                .publish(SOURCE, AnchorEventPayload::Abandoned { handle });
        }
        handles.len()
    }

    /// Advance every in-flight creation by at most one step.
    pub(crate) fn tick(
        &mut self,
        platform: &mut dyn AnchorPlatform,
        state: &mut RegistryState,
        config: &RegistryConfig,
        now: u64,
    ) {
        self.poll_readiness(platform, state, config, now);
        self.poll_saves(state);
    }

    fn poll_readiness(
        &mut self,
        platform: &mut dyn AnchorPlatform,
        state: &mut RegistryState,
        config: &RegistryConfig,
        now: u64,
    ) {
        let handles: Vec<AnchorHandle> = self.pending.keys().copied().collect();
        for handle in handles {
            let Some(pending) = self.pending.get_mut(&handle) else {
                continue;
            };
            match poll_completion(&mut pending.ready) {
                None => {
                    let waited = now.saturating_sub(pending.requested_at_tick);
                    if config
                        .readiness_timeout_ticks
                        .is_some_and(|limit| waited >= limit)
                    {
                        warn!(%handle, waited, "anchor never became ready; abandoning");
                        self.abandon(handle, platform, state);
                    }
                }
                Some(Err(e)) => {
                    warn!(%handle, error = %e, "platform failed to realize anchor; abandoning");
                    self.abandon(handle, platform, state);
                }
                Some(Ok(realized)) => {
                    if let Some(pending) = self.pending.remove(&handle) {
                        self.register(pending, realized, platform, state, config);
                    }
                }
            }
        }
    }

    fn abandon(
        &mut self,
        handle: AnchorHandle,
        platform: &mut dyn AnchorPlatform,
        state: &mut RegistryState,
    ) {
        self.pending.remove(&handle);
        platform.destroy(handle);
        self.record_outcome(handle, CreationOutcome::Abandoned);
        state
            .bus
            .publish(SOURCE, AnchorEventPayload::Abandoned { handle });
    }

    fn register(
        &mut self,
        pending: PendingCreation,
        realized: Realized,
        platform: &mut dyn AnchorPlatform,
        state: &mut RegistryState,
        config: &RegistryConfig,
    ) {
        let handle = pending.handle;
        let identity = realized.identity;

        if let Some(existing) = state.dedup.get(&identity) {
            // Localized an anchor that is already live under another handle.
            warn!(%handle, %identity, live_handle = %existing.handle, "identity already live; discarding duplicate handle");
            platform.destroy(handle);
            self.record_outcome(handle, CreationOutcome::Abandoned);
            state
                .bus
                .publish(SOURCE, AnchorEventPayload::Abandoned { handle });
            return;
        }

        let meta = pending.metadata;
        let label = resolve_label(
            LabelSources {
                explicit_name: meta.explicit_name.as_deref(),
                proposed_label: meta.proposed_label.as_deref(),
                saved_label: state.saved_names.get(&identity),
                presented_text: meta
                    .presentation_target
                    .as_ref()
                    .and_then(|t| t.text.as_deref()),
            },
            &config.fallback_label,
        );
        let normal = meta
            .surface_normal
            .unwrap_or_else(|| realized.pose.up());

        let mut entry = AnchorEntry::new(identity, handle, &label, realized.pose.position, normal)
            .with_presentation_target(meta.presentation_target);
        entry.sync_presented_text();
        entry.persistence = Persistence::Saving;
        state.finder.track(&entry);
        state.dedup.register(entry);
        info!(%handle, %identity, label = %label, "anchor registered");
        state.bus.publish(
            SOURCE,
            AnchorEventPayload::Registered {
                handle,
                identity,
                label,
            },
        );

        let done = platform.save(handle);
        self.saving.insert(handle, PendingSave { identity, done });
    }

    fn poll_saves(&mut self, state: &mut RegistryState) {
        let handles: Vec<AnchorHandle> = self.saving.keys().copied().collect();
        for handle in handles {
            let Some(save) = self.saving.get_mut(&handle) else {
                continue;
            };
            let Some(result) = poll_completion(&mut save.done) else {
                continue;
            };
            let Some(save) = self.saving.remove(&handle) else {
                continue;
            };
            let outcome = self.finish_save(handle, save, result, state);
            self.record_outcome(handle, outcome);
        }
    }

    fn finish_save(
        &mut self,
        handle: AnchorHandle,
        save: PendingSave,
        result: Result<(), hearth_platform::PlatformError>,
        state: &mut RegistryState,
    ) -> CreationOutcome {
        let identity = save.identity;
        // A rename while the save was in flight wins over the label the
        // anchor was registered with.
        let Some(label) = state.dedup.get(&identity).map(|e| e.label.clone()) else {
            debug!(%handle, %identity, "save confirmed for an erased anchor; not recording");
            return CreationOutcome::ErasedBeforePersist;
        };

        if let Err(e) = result {
            warn!(%handle, %identity, error = %e, "anchor save failed; anchor stays live but unpersisted");
            state.set_persistence(&identity, Persistence::SaveFailed);
            state.bus.publish(
                SOURCE,
                AnchorEventPayload::PersistFailed {
                    identity,
                    reason: e.to_string(),
                },
            );
            return CreationOutcome::PersistFailed;
        }

        match state.store.append(identity, &label) {
            Ok(appended) => {
                if appended {
                    state.saved_names.insert(identity, label);
                }
                state.set_persistence(&identity, Persistence::Saved);
                state
                    .bus
                    .publish(SOURCE, AnchorEventPayload::Persisted { identity });
                if appended {
                    CreationOutcome::Persisted
                } else {
                    CreationOutcome::AlreadyPersisted
                }
            }
            Err(e) => {
                warn!(%handle, %identity, error = %e, "durable record write failed");
                state.set_persistence(&identity, Persistence::SaveFailed);
                state.bus.publish(
                    SOURCE,
                    AnchorEventPayload::PersistFailed {
                        identity,
                        reason: e.to_string(),
                    },
                );
                CreationOutcome::PersistFailed
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sources<'a>(
        explicit: Option<&'a str>,
        proposed: Option<&'a str>,
        saved: Option<&'a str>,
        presented: Option<&'a str>,
    ) -> LabelSources<'a> {
        LabelSources {
            explicit_name: explicit,
            proposed_label: proposed,
            saved_label: saved,
            presented_text: presented,
        }
    }

    #[test]
    fn explicit_name_wins() {
        let label = resolve_label(
            sources(Some("DeskLamp"), Some("Lamp"), Some("Old lamp"), Some("Text")),
            "Object",
        );
        assert_eq!(label, "DeskLamp");
    }

    #[test]
    fn proposed_label_beats_saved_name() {
        let label = resolve_label(sources(None, Some("Lamp"), Some("Old lamp"), None), "Object");
        assert_eq!(label, "Lamp");
    }

    #[test]
    fn saved_name_beats_presented_text() {
        let label = resolve_label(sources(None, None, Some("Sofa"), Some("Couch")), "Object");
        assert_eq!(label, "Sofa");
    }

    #[test]
    fn presented_text_beats_fallback() {
        let label = resolve_label(sources(None, None, None, Some("Couch")), "Object");
        assert_eq!(label, "Couch");
    }

    #[test]
    fn fallback_when_nothing_else() {
        assert_eq!(resolve_label(LabelSources::default(), "Object"), "Object");
    }

    #[test]
    fn blank_sources_are_skipped() {
        let label = resolve_label(sources(Some("  "), Some(""), Some("Sofa"), None), "Object");
        assert_eq!(label, "Sofa");
    }

    #[test]
    fn unknown_handle_has_no_state() {
        let coordinator = AnchorLifecycleCoordinator::new();
        assert_eq!(coordinator.state(AnchorHandle(1)), None);
        assert!(coordinator.is_idle());
    }

    #[test]
    fn terminal_outcomes_are_bounded() {
        let mut coordinator = AnchorLifecycleCoordinator::with_outcome_capacity(2);
        coordinator.record_outcome(AnchorHandle(1), CreationOutcome::Abandoned);
        coordinator.record_outcome(AnchorHandle(2), CreationOutcome::Persisted);
        coordinator.record_outcome(AnchorHandle(3), CreationOutcome::Abandoned);

        assert_eq!(coordinator.state(AnchorHandle(1)), None);
        assert_eq!(
            coordinator.state(AnchorHandle(3)),
            Some(CreationState::Terminal(CreationOutcome::Abandoned))
        );
        assert_eq!(coordinator.outcomes.len(), 2);

        // Re-recording a handle does not count twice.
        coordinator.record_outcome(AnchorHandle(3), CreationOutcome::Abandoned);
        assert!(coordinator.state(AnchorHandle(2)).is_some());

        coordinator.forget(AnchorHandle(2));
        assert_eq!(coordinator.outcome_order, VecDeque::from([AnchorHandle(3)]));
    }
}
