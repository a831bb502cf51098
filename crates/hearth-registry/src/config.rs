//! Registry tuning knobs.
//!
//! Every field has a default, so an empty TOML table (or no table at all)
//! yields a working configuration.

use hearth_spatial::DedupSettings;
use serde::{Deserialize, Serialize};

/// Configuration bundle for [`AnchorRegistry`][crate::AnchorRegistry].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// When `false`, every creation request produces a new anchor.
    #[serde(default = "default_dedup_enabled")]
    pub dedup_enabled: bool,

    /// Maximum distance (world units) between a detection and a live anchor
    /// for the two to be considered the same object.
    #[serde(default = "default_dedup_radius")]
    pub dedup_radius: f32,

    /// Maximum angle (degrees) between surface normals for a match.
    #[serde(default = "default_normal_angle_threshold_deg")]
    pub normal_angle_threshold_deg: f32,

    /// Label used when no other source names an anchor.
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,

    /// Abandon a pending creation after this many ticks without platform
    /// readiness.  `None` waits indefinitely.
    #[serde(default)]
    pub readiness_timeout_ticks: Option<u64>,

    /// Rebuild the finder from the live entries every N ticks.  `0` turns
    /// the periodic rebuild off (incremental updates still apply).
    #[serde(default = "default_finder_rebuild_interval_ticks")]
    pub finder_rebuild_interval_ticks: u64,
}

fn default_dedup_enabled() -> bool {
    true
}
fn default_dedup_radius() -> f32 {
    1.2
}
fn default_normal_angle_threshold_deg() -> f32 {
    30.0
}
fn default_fallback_label() -> String {
    "Object".to_string()
}
fn default_finder_rebuild_interval_ticks() -> u64 {
    60
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dedup_enabled: default_dedup_enabled(),
            dedup_radius: default_dedup_radius(),
            normal_angle_threshold_deg: default_normal_angle_threshold_deg(),
            fallback_label: default_fallback_label(),
            readiness_timeout_ticks: None,
            finder_rebuild_interval_ticks: default_finder_rebuild_interval_ticks(),
        }
    }
}

impl RegistryConfig {
    pub fn dedup_settings(&self) -> DedupSettings {
        DedupSettings {
            enabled: self.dedup_enabled,
            radius: self.dedup_radius,
            normal_angle_threshold_deg: self.normal_angle_threshold_deg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RegistryConfig::default();
        assert!(cfg.dedup_enabled);
        assert!((cfg.dedup_radius - 1.2).abs() < f32::EPSILON);
        assert!((cfg.normal_angle_threshold_deg - 30.0).abs() < f32::EPSILON);
        assert_eq!(cfg.fallback_label, "Object");
        assert_eq!(cfg.readiness_timeout_ticks, None);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: RegistryConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, RegistryConfig::default());
    }

    #[test]
    fn partial_toml_overrides_only_given_fields() {
        let cfg: RegistryConfig =
            toml::from_str("dedup_enabled = false\nreadiness_timeout_ticks = 300\n").unwrap();
        assert!(!cfg.dedup_enabled);
        assert_eq!(cfg.readiness_timeout_ticks, Some(300));
        assert!((cfg.dedup_radius - 1.2).abs() < f32::EPSILON);
    }

    #[test]
    fn dedup_settings_mirror_config() {
        let cfg = RegistryConfig {
            dedup_radius: 2.0,
            ..RegistryConfig::default()
        };
        let settings = cfg.dedup_settings();
        assert!(settings.enabled);
        assert!((settings.radius - 2.0).abs() < f32::EPSILON);
    }
}
