//! In-process simulated anchor platform for tests and headless runs.
//!
//! [`SimulatedPlatform`] realizes anchors after a configurable number of
//! [`update`][AnchorPlatform::update] ticks and resolves save/erase requests
//! on the tick after they were issued, which reproduces the deferred
//! completion pattern of a real device without any tracking hardware.
//!
//! The type is a cheap, cloneable handle: every clone shares the same state,
//! so a test can hand one clone to the registry and keep another to inject
//! failures and inspect what the registry asked for.
//!
//! # Example
//!
//! ```rust
//! use hearth_platform::{AnchorPlatform, SimulatedPlatform, poll_completion};
//! use hearth_types::{Pose, Vec3};
//!
//! let sim = SimulatedPlatform::new();
//! let mut platform = sim.clone();
//!
//! let mut inst = platform.instantiate(Pose::at(Vec3::zero())).unwrap();
//! assert!(poll_completion(&mut inst.ready).is_none());
//!
//! platform.update();
//! let realized = poll_completion(&mut inst.ready).unwrap().unwrap();
//! assert_eq!(sim.identity_of(inst.handle), Some(realized.identity));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use hearth_types::{AnchorHandle, AnchorIdentity, Pose};
use tracing::debug;

use crate::platform::{
    AnchorPlatform, Completer, Completion, Instantiation, PlatformError, Realized, completed,
    completion,
};

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

struct SimAnchor {
    identity: AnchorIdentity,
    pose: Pose,
    realized: bool,
}

struct PendingReady {
    handle: AnchorHandle,
    remaining_ticks: u32,
    completer: Completer<Realized>,
}

enum OpKind {
    Save,
    Erase,
}

struct PendingOp {
    handle: AnchorHandle,
    kind: OpKind,
    completer: Completer<()>,
}

#[derive(Default)]
struct SimState {
    next_handle: u64,
    ready_delay_ticks: u32,
    stalled: bool,
    reject_instantiate: u32,
    fail_saves: u32,
    fail_erases: u32,
    anchors: HashMap<AnchorHandle, SimAnchor>,
    known_poses: HashMap<AnchorIdentity, Pose>,
    saved: HashSet<AnchorIdentity>,
    pending_ready: Vec<PendingReady>,
    pending_ops: Vec<PendingOp>,
    stalled_completers: Vec<Completer<Realized>>,
    instantiate_calls: usize,
    resolve_calls: usize,
    destroyed: HashSet<AnchorHandle>,
}

impl SimState {
    fn spawn(&mut self, identity: AnchorIdentity, pose: Pose) -> Instantiation {
        self.next_handle += 1;
        let handle = AnchorHandle(self.next_handle);
        self.anchors.insert(
            handle,
            SimAnchor {
                identity,
                pose,
                realized: false,
            },
        );
        let (completer, ready) = completion();
        if !self.stalled {
            self.pending_ready.push(PendingReady {
                handle,
                remaining_ticks: self.ready_delay_ticks,
                completer,
            });
        } else {
            // Held, never sent: the completion stays pending.
            self.stalled_completers.push(completer);
        }
        Instantiation { handle, ready }
    }

    fn tick(&mut self) {
        // Operations issued before this tick resolve now.
        for op in std::mem::take(&mut self.pending_ops) {
            let result = self.apply_op(op.handle, &op.kind);
            let _ = op.completer.send(result);
        }

        let mut still_pending = Vec::new();
        for mut p in std::mem::take(&mut self.pending_ready) {
            if p.remaining_ticks > 0 {
                p.remaining_ticks -= 1;
                still_pending.push(p);
                continue;
            }
            match self.anchors.get_mut(&p.handle) {
                Some(anchor) => {
                    anchor.realized = true;
                    self.known_poses.insert(anchor.identity, anchor.pose);
                    let _ = p.completer.send(Ok(Realized {
                        identity: anchor.identity,
                        pose: anchor.pose,
                    }));
                }
                None => {
                    let _ = p.completer.send(Err(PlatformError::UnknownHandle(p.handle)));
                }
            }
        }
        self.pending_ready = still_pending;
    }

    fn apply_op(&mut self, handle: AnchorHandle, kind: &OpKind) -> Result<(), PlatformError> {
        let anchor = self
            .anchors
            .get(&handle)
            .ok_or(PlatformError::UnknownHandle(handle))?;
        if !anchor.realized {
            return Err(PlatformError::NotRealized(handle));
        }
        let identity = anchor.identity;
        match kind {
            OpKind::Save => {
                if self.fail_saves > 0 {
                    self.fail_saves -= 1;
                    return Err(PlatformError::rejected("save", "simulated save failure"));
                }
                self.saved.insert(identity);
            }
            OpKind::Erase => {
                if self.fail_erases > 0 {
                    self.fail_erases -= 1;
                    return Err(PlatformError::rejected("erase", "simulated erase failure"));
                }
                self.saved.remove(&identity);
            }
        }
        Ok(())
    }

    fn queue_op(&mut self, handle: AnchorHandle, kind: OpKind) -> Completion<()> {
        if !self.anchors.contains_key(&handle) {
            return completed(Err(PlatformError::UnknownHandle(handle)));
        }
        let (completer, done) = completion();
        self.pending_ops.push(PendingOp {
            handle,
            kind,
            completer,
        });
        done
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimulatedPlatform
// ────────────────────────────────────────────────────────────────────────────

/// Shared-state simulated [`AnchorPlatform`].
#[derive(Clone, Default)]
pub struct SimulatedPlatform {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPlatform {
    /// A platform that realizes anchors on the first update after creation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of extra updates an anchor waits before it is realized.
    pub fn with_ready_delay(self, ticks: u32) -> Self {
        self.lock().ready_delay_ticks = ticks;
        self
    }

    /// While set, newly instantiated or resolved anchors never become ready.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Refuse the next `n` instantiate/resolve requests outright.
    pub fn reject_next_instantiations(&self, n: u32) {
        self.lock().reject_instantiate = n;
    }

    /// Fail the next `n` save operations.
    pub fn fail_next_saves(&self, n: u32) {
        self.lock().fail_saves = n;
    }

    /// Fail the next `n` erase operations.
    pub fn fail_next_erases(&self, n: u32) {
        self.lock().fail_erases = n;
    }

    pub fn instantiate_calls(&self) -> usize {
        self.lock().instantiate_calls
    }

    pub fn resolve_calls(&self) -> usize {
        self.lock().resolve_calls
    }

    /// Handles that exist and have not been destroyed.
    pub fn live_count(&self) -> usize {
        self.lock().anchors.len()
    }

    pub fn is_destroyed(&self, handle: AnchorHandle) -> bool {
        self.lock().destroyed.contains(&handle)
    }

    /// Identity assigned to `handle`, known from instantiation onward.
    pub fn identity_of(&self, handle: AnchorHandle) -> Option<AnchorIdentity> {
        self.lock().anchors.get(&handle).map(|a| a.identity)
    }

    /// Whether the platform holds saved data for `identity`.
    pub fn is_saved(&self, identity: &AnchorIdentity) -> bool {
        self.lock().saved.contains(identity)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock leaves the maps consistent enough
        // for a simulator; keep going with the inner state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AnchorPlatform for SimulatedPlatform {
    fn instantiate(&mut self, pose: Pose) -> Result<Instantiation, PlatformError> {
        let mut state = self.lock();
        state.instantiate_calls += 1;
        if state.reject_instantiate > 0 {
            state.reject_instantiate -= 1;
            return Err(PlatformError::rejected("instantiate", "simulated rejection"));
        }
        let inst = state.spawn(AnchorIdentity::new_v4(), pose);
        debug!(handle = %inst.handle, "sim anchor instantiated");
        Ok(inst)
    }

    fn resolve(&mut self, identity: AnchorIdentity) -> Result<Instantiation, PlatformError> {
        let mut state = self.lock();
        state.resolve_calls += 1;
        if state.reject_instantiate > 0 {
            state.reject_instantiate -= 1;
            return Err(PlatformError::rejected("resolve", "simulated rejection"));
        }
        let pose = state.known_poses.get(&identity).copied().unwrap_or_default();
        state.saved.insert(identity);
        let inst = state.spawn(identity, pose);
        debug!(handle = %inst.handle, %identity, "sim anchor resolving");
        Ok(inst)
    }

    fn save(&mut self, handle: AnchorHandle) -> Completion<()> {
        self.lock().queue_op(handle, OpKind::Save)
    }

    fn erase(&mut self, handle: AnchorHandle) -> Completion<()> {
        self.lock().queue_op(handle, OpKind::Erase)
    }

    fn destroy(&mut self, handle: AnchorHandle) {
        let mut state = self.lock();
        if state.anchors.remove(&handle).is_some() {
            state.destroyed.insert(handle);
        }
    }

    fn update(&mut self) {
        self.lock().tick();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::poll_completion;
    use hearth_types::Vec3;

    fn realize(platform: &mut SimulatedPlatform, inst: &mut Instantiation) -> Realized {
        platform.update();
        poll_completion(&mut inst.ready)
            .expect("ready after one update")
            .expect("realized")
    }

    #[test]
    fn anchors_realize_after_delay() {
        let mut sim = SimulatedPlatform::new().with_ready_delay(2);
        let mut inst = sim.instantiate(Pose::at(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        sim.update();
        sim.update();
        assert!(poll_completion(&mut inst.ready).is_none());
        sim.update();
        let realized = poll_completion(&mut inst.ready).unwrap().unwrap();
        assert_eq!(realized.pose.position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn save_and_erase_resolve_on_next_update() {
        let mut sim = SimulatedPlatform::new();
        let mut inst = sim.instantiate(Pose::default()).unwrap();
        let realized = realize(&mut sim, &mut inst);

        let mut save = sim.save(inst.handle);
        assert!(poll_completion(&mut save).is_none());
        sim.update();
        assert_eq!(poll_completion(&mut save), Some(Ok(())));
        assert!(sim.is_saved(&realized.identity));

        let mut erase = sim.erase(inst.handle);
        sim.update();
        assert_eq!(poll_completion(&mut erase), Some(Ok(())));
        assert!(!sim.is_saved(&realized.identity));
    }

    #[test]
    fn injected_save_failure() {
        let mut sim = SimulatedPlatform::new();
        let mut inst = sim.instantiate(Pose::default()).unwrap();
        realize(&mut sim, &mut inst);
        sim.fail_next_saves(1);

        let mut save = sim.save(inst.handle);
        sim.update();
        assert!(matches!(
            poll_completion(&mut save),
            Some(Err(PlatformError::Rejected { .. }))
        ));
    }

    #[test]
    fn save_before_realized_fails() {
        let mut sim = SimulatedPlatform::new().with_ready_delay(5);
        let inst = sim.instantiate(Pose::default()).unwrap();
        let mut save = sim.save(inst.handle);
        sim.update();
        assert_eq!(
            poll_completion(&mut save),
            Some(Err(PlatformError::NotRealized(inst.handle)))
        );
    }

    #[test]
    fn unknown_handle_fails_immediately() {
        let mut sim = SimulatedPlatform::new();
        let mut erase = sim.erase(AnchorHandle(99));
        assert_eq!(
            poll_completion(&mut erase),
            Some(Err(PlatformError::UnknownHandle(AnchorHandle(99))))
        );
    }

    #[test]
    fn stalled_anchor_never_ready() {
        let mut sim = SimulatedPlatform::new();
        sim.set_stalled(true);
        let mut inst = sim.instantiate(Pose::default()).unwrap();
        for _ in 0..10 {
            sim.update();
        }
        assert!(poll_completion(&mut inst.ready).is_none());
    }

    #[test]
    fn resolve_reuses_identity() {
        let mut sim = SimulatedPlatform::new();
        let identity = AnchorIdentity::new_v4();
        let mut inst = sim.resolve(identity).unwrap();
        let realized = realize(&mut sim, &mut inst);
        assert_eq!(realized.identity, identity);
        assert_eq!(sim.resolve_calls(), 1);
    }

    #[test]
    fn rejected_instantiation_creates_no_handle() {
        let mut sim = SimulatedPlatform::new();
        sim.reject_next_instantiations(1);
        assert!(sim.instantiate(Pose::default()).is_err());
        assert_eq!(sim.live_count(), 0);
        assert!(sim.instantiate(Pose::default()).is_ok());
    }

    #[test]
    fn destroy_removes_handle() {
        let mut sim = SimulatedPlatform::new();
        let inst = sim.instantiate(Pose::default()).unwrap();
        sim.destroy(inst.handle);
        assert!(sim.is_destroyed(inst.handle));
        assert_eq!(sim.live_count(), 0);
    }
}
