//! Shell configuration – reads/writes `~/.hearth/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use hearth_registry::RegistryConfig;

/// Persisted shell configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite file holding the anchor records.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Extra ticks the simulated platform waits before realizing an anchor.
    #[serde(default = "default_sim_ready_delay_ticks")]
    pub sim_ready_delay_ticks: u32,

    #[serde(default)]
    pub registry: RegistryConfig,
}

fn default_storage_path() -> PathBuf {
    hearth_dir_for_home(&home_dir()).join("anchors.db")
}
fn default_sim_ready_delay_ticks() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            sim_ready_delay_ticks: default_sim_ready_delay_ticks(),
            registry: RegistryConfig::default(),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn hearth_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".hearth")
}

/// Return the path to `~/.hearth/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    hearth_dir_for_home(home).join("config.toml")
}

/// Load the config from disk with `HEARTH_*` overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    Ok(load_from(&config_path())?.map(|mut cfg| {
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `HEARTH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HEARTH_STORAGE_PATH` | `storage_path` |
/// | `HEARTH_DEDUP_ENABLED` | `registry.dedup_enabled` (`true`/`false`/`1`/`0`) |
/// | `HEARTH_DEDUP_RADIUS` | `registry.dedup_radius` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HEARTH_STORAGE_PATH")
        && !v.trim().is_empty()
    {
        cfg.storage_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("HEARTH_DEDUP_ENABLED")
        && let Some(enabled) = parse_flag(&v)
    {
        cfg.registry.dedup_enabled = enabled;
    }
    if let Ok(v) = std::env::var("HEARTH_DEDUP_RADIUS")
        && let Ok(radius) = v.trim().parse::<f32>()
        && radius.is_finite()
        && radius >= 0.0
    {
        cfg.registry.dedup_radius = radius;
    }
}

pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.hearth/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_custom_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config {
            storage_path: dir.path().join("anchors.db"),
            sim_ready_delay_ticks: 3,
            ..Config::default()
        };
        cfg.registry.readiness_timeout_ticks = Some(120);
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.storage_path, cfg.storage_path);
        assert_eq!(loaded.sim_ready_delay_ticks, 3);
        assert_eq!(loaded.registry.readiness_timeout_ticks, Some(120));
    }

    #[test]
    fn registry_table_may_be_partial() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "sim_ready_delay_ticks = 0\n[registry]\ndedup_radius = 0.5\n")
            .unwrap();

        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.sim_ready_delay_ticks, 0);
        assert!((loaded.registry.dedup_radius - 0.5).abs() < f32::EPSILON);
        assert_eq!(loaded.registry.fallback_label, "Object");
    }

    #[test]
    fn config_path_points_to_hearth_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.hearth/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn parse_flag_accepts_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    // Env overrides share process state, so they are exercised in one test.
    #[test]
    fn apply_env_overrides_reads_hearth_variables() {
        // SAFETY: no other test reads or writes these variables.
        unsafe {
            std::env::set_var("HEARTH_STORAGE_PATH", "/tmp/hearth-test.db");
            std::env::set_var("HEARTH_DEDUP_ENABLED", "false");
            std::env::set_var("HEARTH_DEDUP_RADIUS", "2.5");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.storage_path, PathBuf::from("/tmp/hearth-test.db"));
        assert!(!cfg.registry.dedup_enabled);
        assert!((cfg.registry.dedup_radius - 2.5).abs() < f32::EPSILON);

        unsafe { std::env::set_var("HEARTH_DEDUP_RADIUS", "-1") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!((cfg.registry.dedup_radius - 1.2).abs() < f32::EPSILON);

        unsafe {
            std::env::remove_var("HEARTH_STORAGE_PATH");
            std::env::remove_var("HEARTH_DEDUP_ENABLED");
            std::env::remove_var("HEARTH_DEDUP_RADIUS");
        }
    }
}
