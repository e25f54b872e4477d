//! Configuration layer for the Agent Manager and Suggestion Execution
//! Pipeline. A `ConfigToml` (all-`Option` fields deserialized from disk) +
//! `ConfigOverrides` (CLI-supplied) + `Config::load_from_base_config_with_overrides`
//! merge pattern, scaled to this core's option set.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

const CONFIG_TOML_FILE: &str = "config.toml";

/// Effective, fully-resolved configuration. Every field has a value: either
/// supplied on disk, overridden on the command line, or defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Hard cap on concurrent task executions (default 8).
    pub max_concurrent_slots: usize,
    /// Per-slot memory headroom multiplier (default 1.5).
    pub safety_factor: f64,
    /// Subtracted from free memory before sizing slots, in MiB (default 2048).
    pub os_reserved_memory_mb: u64,
    /// Default per-task timeout (default 300_000 ms).
    pub task_timeout_ms: u64,
    /// Default per-task retry cap (default 3).
    pub max_retries: u32,
    /// Periodic health-check cadence (default 30_000 ms).
    pub health_check_interval_ms: u64,
    /// Periodic slot-capacity recompute cadence (default 5_000 ms).
    pub slot_recompute_interval_ms: u64,
    /// Whether crossing `critical_threshold` triggers emergency mode (default true).
    pub emergency_stop_enabled: bool,
    /// Admission-pause memory-pressure fraction (default 0.85).
    pub soft_threshold: f64,
    /// Emergency-eviction memory-pressure fraction (default 0.95).
    pub hard_threshold: f64,
    /// Emergency-stop memory-pressure fraction (default 0.98).
    pub critical_threshold: f64,
    /// Upper bound on how much of a file `FileAnalysis` reads into a prompt.
    pub max_content_bytes: usize,
    /// Directory the Transactional File Manager stages backups in.
    pub backup_dir: PathBuf,
    /// Maximum operations per batch in the Suggestion Execution Pipeline
    /// (default 50; halved to 25 for selective/filtered runs).
    pub max_batch_size: usize,
    /// Bounded ring size for `TaskResult` history (default 1000).
    pub task_result_history_capacity: usize,
    /// Minimum retention for JournalEntries, in days (default 30; advisory —
    /// this core keeps the full in-process journal for the process lifetime).
    pub journal_retention_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_slots: 8,
            safety_factor: 1.5,
            os_reserved_memory_mb: 2048,
            task_timeout_ms: 300_000,
            max_retries: 3,
            health_check_interval_ms: 30_000,
            slot_recompute_interval_ms: 5_000,
            emergency_stop_enabled: true,
            soft_threshold: 0.85,
            hard_threshold: 0.95,
            critical_threshold: 0.98,
            max_content_bytes: 64 * 1024,
            backup_dir: std::env::temp_dir().join("curator").join("backups"),
            max_batch_size: 50,
            task_result_history_capacity: 1000,
            journal_retention_days: 30,
        }
    }
}

/// Base config deserialized from `~/.config/curator/config.toml`. Every
/// field is optional: absence means "use the default, or whatever
/// `ConfigOverrides` supplies".
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ConfigToml {
    pub max_concurrent_slots: Option<usize>,
    pub safety_factor: Option<f64>,
    pub os_reserved_memory_mb: Option<u64>,
    pub task_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub health_check_interval_ms: Option<u64>,
    pub slot_recompute_interval_ms: Option<u64>,
    pub emergency_stop_enabled: Option<bool>,
    pub soft_threshold: Option<f64>,
    pub hard_threshold: Option<f64>,
    pub critical_threshold: Option<f64>,
    pub max_content_bytes: Option<usize>,
    pub backup_dir: Option<PathBuf>,
    pub max_batch_size: Option<usize>,
    pub task_result_history_capacity: Option<usize>,
    pub journal_retention_days: Option<u32>,
}

impl ConfigToml {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Load `config.toml` from `curator_home`, if present. A missing file is
    /// not an error: it means "use defaults", a lenient-first-run behavior.
    pub fn load_from_home(curator_home: &Path) -> std::io::Result<Self> {
        let path = curator_home.join(CONFIG_TOML_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Self::from_toml_str(&raw).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("failed to parse {}: {e}", path.display()),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }
}

/// Returns the directory Curator reads `config.toml` and writes its journal
/// export from, honoring `CURATOR_HOME` when set; otherwise
/// `~/.config/curator`. Does not verify the directory exists.
pub fn find_curator_home() -> std::io::Result<PathBuf> {
    if let Ok(val) = std::env::var("CURATOR_HOME") {
        if !val.is_empty() {
            return Ok(PathBuf::from(val));
        }
    }
    dirs::config_dir()
        .map(|p| p.join("curator"))
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "could not find config directory")
        })
}

/// CLI-supplied overrides, applied on top of `ConfigToml` values.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_concurrent_slots: Option<usize>,
    pub safety_factor: Option<f64>,
    pub task_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub emergency_stop_enabled: Option<bool>,
    pub backup_dir: Option<PathBuf>,
}

impl Config {
    /// Merge a `ConfigToml` with `ConfigOverrides`, falling back to
    /// `Config::default()` for anything neither supplies. Both inputs are
    /// destructured fully so a newly added field cannot silently go
    /// unapplied.
    pub fn load_from_base_config_with_overrides(cfg: ConfigToml, overrides: ConfigOverrides) -> Self {
        let defaults = Config::default();
        let ConfigOverrides {
            max_concurrent_slots,
            safety_factor,
            task_timeout_ms,
            max_retries,
            emergency_stop_enabled,
            backup_dir,
        } = overrides;

        Config {
            max_concurrent_slots: max_concurrent_slots
                .or(cfg.max_concurrent_slots)
                .unwrap_or(defaults.max_concurrent_slots),
            safety_factor: safety_factor.or(cfg.safety_factor).unwrap_or(defaults.safety_factor),
            os_reserved_memory_mb: cfg
                .os_reserved_memory_mb
                .unwrap_or(defaults.os_reserved_memory_mb),
            task_timeout_ms: task_timeout_ms
                .or(cfg.task_timeout_ms)
                .unwrap_or(defaults.task_timeout_ms),
            max_retries: max_retries.or(cfg.max_retries).unwrap_or(defaults.max_retries),
            health_check_interval_ms: cfg
                .health_check_interval_ms
                .unwrap_or(defaults.health_check_interval_ms),
            slot_recompute_interval_ms: cfg
                .slot_recompute_interval_ms
                .unwrap_or(defaults.slot_recompute_interval_ms),
            emergency_stop_enabled: emergency_stop_enabled
                .or(cfg.emergency_stop_enabled)
                .unwrap_or(defaults.emergency_stop_enabled),
            soft_threshold: cfg.soft_threshold.unwrap_or(defaults.soft_threshold),
            hard_threshold: cfg.hard_threshold.unwrap_or(defaults.hard_threshold),
            critical_threshold: cfg.critical_threshold.unwrap_or(defaults.critical_threshold),
            max_content_bytes: cfg.max_content_bytes.unwrap_or(defaults.max_content_bytes),
            backup_dir: backup_dir.or(cfg.backup_dir).unwrap_or(defaults.backup_dir),
            max_batch_size: cfg.max_batch_size.unwrap_or(defaults.max_batch_size),
            task_result_history_capacity: cfg
                .task_result_history_capacity
                .unwrap_or(defaults.task_result_history_capacity),
            journal_retention_days: cfg
                .journal_retention_days
                .unwrap_or(defaults.journal_retention_days),
        }
    }

    /// Apply a partial update in place. Returns `true` if any
    /// memory-sizing-relevant field changed, so the caller knows whether to
    /// trigger a slot recompute.
    pub fn apply_partial(&mut self, partial: ConfigOverrides) -> bool {
        let mut memory_relevant_changed = false;
        if let Some(v) = partial.max_concurrent_slots {
            memory_relevant_changed |= self.max_concurrent_slots != v;
            self.max_concurrent_slots = v;
        }
        if let Some(v) = partial.safety_factor {
            memory_relevant_changed |= self.safety_factor != v;
            self.safety_factor = v;
        }
        if let Some(v) = partial.task_timeout_ms {
            self.task_timeout_ms = v;
        }
        if let Some(v) = partial.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = partial.emergency_stop_enabled {
            self.emergency_stop_enabled = v;
        }
        if let Some(v) = partial.backup_dir {
            self.backup_dir = v;
        }
        memory_relevant_changed
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_concurrent_slots, 8);
        assert_eq!(cfg.safety_factor, 1.5);
        assert_eq!(cfg.soft_threshold, 0.85);
        assert_eq!(cfg.hard_threshold, 0.95);
        assert_eq!(cfg.critical_threshold, 0.98);
    }

    #[test]
    fn overrides_take_priority_over_toml_which_takes_priority_over_defaults() {
        let toml_cfg = ConfigToml {
            max_concurrent_slots: Some(4),
            safety_factor: Some(2.0),
            ..ConfigToml::default()
        };
        let overrides = ConfigOverrides {
            max_concurrent_slots: Some(16),
            ..ConfigOverrides::default()
        };
        let cfg = Config::load_from_base_config_with_overrides(toml_cfg, overrides);
        let expected = Config {
            max_concurrent_slots: 16, // override wins
            safety_factor: 2.0,       // toml wins over default
            ..Config::default()
        };
        assert_eq!(cfg, expected);
    }

    #[test]
    fn apply_partial_reports_whether_memory_sizing_changed() {
        let mut cfg = Config::default();
        let changed = cfg.apply_partial(ConfigOverrides {
            task_timeout_ms: Some(60_000),
            ..ConfigOverrides::default()
        });
        assert!(!changed);
        let changed = cfg.apply_partial(ConfigOverrides {
            max_concurrent_slots: Some(2),
            ..ConfigOverrides::default()
        });
        assert!(changed);
        assert_eq!(cfg.max_concurrent_slots, 2);
    }
}
