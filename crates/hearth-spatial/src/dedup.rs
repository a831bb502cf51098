//! Spatial + label deduplication over live anchors.
//!
//! Detection pipelines report the same physical object many times.  Before a
//! new platform anchor is requested the registry asks the
//! [`DeduplicationIndex`] whether an equivalent anchor is already live.  A
//! candidate matches an entry when **all** of the following hold:
//!
//! 1. the labels are equal ignoring case,
//! 2. the Euclidean distance between positions is `<= radius`,
//! 3. the angle between surface normals is `<= normal_angle_threshold_deg`.
//!
//! Entries are scanned in registration order and the first match wins; no
//! attempt is made to pick the nearest of several matches.
//!
//! # Example
//!
//! ```rust
//! use hearth_spatial::dedup::{AnchorEntry, DedupSettings, DeduplicationIndex};
//! use hearth_types::{AnchorHandle, AnchorIdentity, Vec3};
//!
//! let mut index = DeduplicationIndex::new(DedupSettings::default());
//! let id = AnchorIdentity::new_v4();
//! index.register(AnchorEntry::new(id, AnchorHandle(1), "Chair", Vec3::zero(), Vec3::up()));
//!
//! let hit = index
//!     .absorb_duplicate("chair", Vec3::new(0.5, 0.0, 0.0), Vec3::up())
//!     .unwrap();
//! assert_eq!(hit.identity, id);
//! assert_eq!(hit.seen_count, 2);
//! assert_eq!(hit.display_label(), "Chair (x2)");
//! ```

use hearth_types::{AnchorHandle, AnchorIdentity, PresentationTarget, Vec3};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Matching thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DedupSettings {
    /// When `false`, [`DeduplicationIndex::find_nearby`] never matches.
    pub enabled: bool,
    /// Maximum distance between positions, in world units.
    pub radius: f32,
    /// Maximum angle between surface normals, in degrees.
    pub normal_angle_threshold_deg: f32,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: 1.2,
            normal_angle_threshold_deg: 30.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AnchorEntry
// ─────────────────────────────────────────────────────────────────────────────

/// Durability of a live anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    /// Registered in memory; no save requested yet.
    SceneOnly,
    /// Platform save in flight.
    Saving,
    /// Durable record written.
    Saved,
    /// The platform rejected the save.  Not retried.
    SaveFailed,
}

/// A registered, identity-bound anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorEntry {
    pub identity: AnchorIdentity,
    pub handle: AnchorHandle,
    pub label: String,
    pub position: Vec3,
    pub surface_normal: Vec3,
    /// Number of detections folded into this anchor, at least 1.
    pub seen_count: u32,
    pub presentation_target: Option<PresentationTarget>,
    pub persistence: Persistence,
}

impl AnchorEntry {
    pub fn new(
        identity: AnchorIdentity,
        handle: AnchorHandle,
        label: impl Into<String>,
        position: Vec3,
        surface_normal: Vec3,
    ) -> Self {
        Self {
            identity,
            handle,
            label: label.into(),
            position,
            surface_normal,
            seen_count: 1,
            presentation_target: None,
            persistence: Persistence::SceneOnly,
        }
    }

    pub fn with_presentation_target(mut self, target: Option<PresentationTarget>) -> Self {
        self.presentation_target = target;
        self
    }

    /// Label as presented to the user, with a multiplicity suffix once the
    /// object has been seen more than once (`"Lamp (x3)"`).
    pub fn display_label(&self) -> String {
        if self.seen_count > 1 {
            format!("{} (x{})", self.label, self.seen_count)
        } else {
            self.label.clone()
        }
    }

    /// Write [`display_label`][Self::display_label] into the presentation
    /// target's text, if the entry has a target.
    pub fn sync_presented_text(&mut self) {
        let shown = self.display_label();
        if let Some(target) = self.presentation_target.as_mut() {
            target.text = Some(shown);
        }
    }

    fn matches(&self, label: &str, point: Vec3, normal: Vec3, settings: &DedupSettings) -> bool {
        self.label.to_lowercase() == label.to_lowercase()
            && self.position.distance(point) <= settings.radius
            && self.surface_normal.angle_deg(normal) <= settings.normal_angle_threshold_deg
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DeduplicationIndex
// ─────────────────────────────────────────────────────────────────────────────

/// Registration-ordered set of live [`AnchorEntry`]s, unique by identity.
#[derive(Debug, Default)]
pub struct DeduplicationIndex {
    settings: DedupSettings,
    entries: Vec<AnchorEntry>,
}

impl DeduplicationIndex {
    pub fn new(settings: DedupSettings) -> Self {
        Self {
            settings,
            entries: Vec::new(),
        }
    }

    pub fn settings(&self) -> &DedupSettings {
        &self.settings
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    /// First live entry equivalent to the candidate, without side effects.
    pub fn find_nearby(&self, label: &str, point: Vec3, normal: Vec3) -> Option<&AnchorEntry> {
        if !self.settings.enabled {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.matches(label, point, normal, &self.settings))
    }

    /// Like [`find_nearby`][Self::find_nearby], but counts the detection
    /// against the matched entry and returns its updated state.
    pub fn absorb_duplicate(&mut self, label: &str, point: Vec3, normal: Vec3) -> Option<&AnchorEntry> {
        if !self.settings.enabled {
            return None;
        }
        let settings = self.settings;
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.matches(label, point, normal, &settings))?;
        entry.seen_count = entry.seen_count.saturating_add(1);
        debug!(identity = %entry.identity, seen_count = entry.seen_count, "duplicate detection absorbed");
        Some(entry)
    }

    /// Insert `entry`, replacing (in place) any entry with the same identity.
    pub fn register(&mut self, entry: AnchorEntry) -> &AnchorEntry {
        let index = match self.entries.iter().position(|e| e.identity == entry.identity) {
            Some(i) => {
                self.entries[i] = entry;
                i
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        &self.entries[index]
    }

    pub fn remove(&mut self, identity: &AnchorIdentity) -> Option<AnchorEntry> {
        let index = self.entries.iter().position(|e| e.identity == *identity)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, identity: &AnchorIdentity) -> Option<&AnchorEntry> {
        self.entries.iter().find(|e| e.identity == *identity)
    }

    pub fn get_mut(&mut self, identity: &AnchorIdentity) -> Option<&mut AnchorEntry> {
        self.entries.iter_mut().find(|e| e.identity == *identity)
    }

    pub fn by_handle(&self, handle: AnchorHandle) -> Option<&AnchorEntry> {
        self.entries.iter().find(|e| e.handle == handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnchorEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, returning them in registration order.
    pub fn drain(&mut self) -> Vec<AnchorEntry> {
        std::mem::take(&mut self.entries)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_types::{Pose, Quaternion};

    fn entry(label: &str, position: Vec3, normal: Vec3) -> AnchorEntry {
        AnchorEntry::new(AnchorIdentity::new_v4(), AnchorHandle(1), label, position, normal)
    }

    #[test]
    fn case_insensitive_match_within_radius() {
        let mut index = DeduplicationIndex::new(DedupSettings::default());
        let chair = entry("Chair", Vec3::zero(), Vec3::up());
        let id = chair.identity;
        index.register(chair);

        let hit = index
            .absorb_duplicate("chair", Vec3::new(0.5, 0.0, 0.0), Vec3::up())
            .expect("should match");
        assert_eq!(hit.identity, id);
        assert_eq!(hit.seen_count, 2);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn radius_boundary_is_inclusive() {
        let mut index = DeduplicationIndex::new(DedupSettings::default());
        index.register(entry("Lamp", Vec3::zero(), Vec3::up()));
        assert!(index.find_nearby("Lamp", Vec3::new(1.2, 0.0, 0.0), Vec3::up()).is_some());
        assert!(index.find_nearby("Lamp", Vec3::new(1.21, 0.0, 0.0), Vec3::up()).is_none());
    }

    #[test]
    fn different_label_does_not_match() {
        let mut index = DeduplicationIndex::new(DedupSettings::default());
        index.register(entry("Lamp", Vec3::zero(), Vec3::up()));
        assert!(index.find_nearby("Table", Vec3::zero(), Vec3::up()).is_none());
    }

    #[test]
    fn normals_beyond_threshold_do_not_match() {
        let mut index = DeduplicationIndex::new(DedupSettings::default());
        index.register(entry("Picture", Vec3::zero(), Vec3::up()));

        // 45° tilt: rejected.
        let tilted = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 45f32.to_radians());
        let normal = Pose::new(Vec3::zero(), tilted).up();
        assert!(index.find_nearby("Picture", Vec3::zero(), normal).is_none());

        // 20° tilt: accepted.
        let slight = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 20f32.to_radians());
        let normal = Pose::new(Vec3::zero(), slight).up();
        assert!(index.find_nearby("Picture", Vec3::zero(), normal).is_some());
    }

    #[test]
    fn first_registered_match_wins() {
        let mut index = DeduplicationIndex::new(DedupSettings::default());
        let far = entry("Cup", Vec3::new(1.0, 0.0, 0.0), Vec3::up());
        let near = entry("Cup", Vec3::new(0.1, 0.0, 0.0), Vec3::up());
        let far_id = far.identity;
        index.register(far);
        index.register(near);

        let hit = index.find_nearby("Cup", Vec3::zero(), Vec3::up()).unwrap();
        assert_eq!(hit.identity, far_id);
    }

    #[test]
    fn disabled_index_never_matches() {
        let mut index = DeduplicationIndex::new(DedupSettings {
            enabled: false,
            ..DedupSettings::default()
        });
        index.register(entry("Lamp", Vec3::zero(), Vec3::up()));
        assert!(index.find_nearby("Lamp", Vec3::zero(), Vec3::up()).is_none());
        assert!(index.absorb_duplicate("Lamp", Vec3::zero(), Vec3::up()).is_none());
        assert_eq!(index.iter().next().unwrap().seen_count, 1);
    }

    #[test]
    fn display_label_shows_multiplicity() {
        let mut e = entry("Lamp", Vec3::zero(), Vec3::up());
        assert_eq!(e.display_label(), "Lamp");
        e.seen_count = 3;
        assert_eq!(e.display_label(), "Lamp (x3)");
    }

    #[test]
    fn presented_text_follows_display_label() {
        let mut bare = entry("Lamp", Vec3::zero(), Vec3::up());
        bare.sync_presented_text();
        assert!(bare.presentation_target.is_none());

        let mut e = entry("Lamp", Vec3::zero(), Vec3::up())
            .with_presentation_target(Some(PresentationTarget::new("card-1").with_text("stale")));
        e.sync_presented_text();
        assert_eq!(e.presentation_target.as_ref().unwrap().text.as_deref(), Some("Lamp"));

        e.seen_count = 2;
        e.label = "Desk lamp".into();
        e.sync_presented_text();
        assert_eq!(
            e.presentation_target.as_ref().unwrap().text.as_deref(),
            Some("Desk lamp (x2)")
        );
    }

    #[test]
    fn register_same_identity_replaces_in_place() {
        let mut index = DeduplicationIndex::new(DedupSettings::default());
        let first = entry("A", Vec3::zero(), Vec3::up());
        let second = entry("B", Vec3::zero(), Vec3::up());
        let id = first.identity;
        index.register(first);
        index.register(second);

        let mut renamed = index.get(&id).unwrap().clone();
        renamed.label = "A2".to_string();
        index.register(renamed);

        let labels: Vec<_> = index.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["A2", "B"]);
    }

    #[test]
    fn remove_drops_entry() {
        let mut index = DeduplicationIndex::new(DedupSettings::default());
        let e = entry("Lamp", Vec3::zero(), Vec3::up());
        let id = e.identity;
        index.register(e);
        assert!(index.remove(&id).is_some());
        assert!(index.remove(&id).is_none());
        assert!(index.is_empty());
    }
}
