//! Configuration Module
//!
//! Loads cache, memory, monitoring and cleanup settings. Values come from an
//! optional JSON settings file (camelCase keys, e.g. `cache.maxSizeMB`),
//! then environment variable overrides, then validation. Nothing is
//! reloaded after startup.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::{CacheError, Result};

/// Environment variable naming the JSON settings file.
pub const SETTINGS_PATH_ENV: &str = "PIXEL_CACHE_SETTINGS";

/// Cache sizes below this only produce a startup warning.
const MIN_RECOMMENDED_CACHE_MB: u64 = 256;

const MS_PER_HOUR: u64 = 60 * 60 * 1000;

// == Sections ==

/// `cache.*` settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Size budget for the content store in megabytes
    #[serde(rename = "maxSizeMB")]
    pub max_size_mb: u64,
    /// Entries not touched for this long are expired by the routine sweep
    pub ttl_hours: u64,
    /// Interval of the routine eviction sweep
    pub cleanup_interval_hours: u64,
    /// Directory of the on-disk store
    pub directory: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size_mb: 2048,
            ttl_hours: 168,
            cleanup_interval_hours: 24,
            directory: PathBuf::from("./pixel-cache"),
        }
    }
}

impl CacheSettings {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_hours.saturating_mul(MS_PER_HOUR)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_hours.saturating_mul(MS_PER_HOUR))
    }
}

/// `memory.*` settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemorySettings {
    /// Memory limit with an optional `kb`/`mb`/`gb` suffix, e.g. `"512MB"`
    pub limit: String,
    /// Usage ratio above which `warning` callbacks fire
    pub warning_threshold: f64,
    /// Usage ratio above which `critical` callbacks fire
    pub critical_threshold: f64,
    /// Sampling cadence in seconds
    pub sample_interval_secs: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            limit: "512MB".to_string(),
            warning_threshold: 0.8,
            critical_threshold: 0.9,
            sample_interval_secs: 10,
        }
    }
}

impl MemorySettings {
    /// Parsed memory limit in bytes.
    pub fn limit_bytes(&self) -> Result<u64> {
        parse_memory_limit(&self.limit)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }
}

/// `performance.*` settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceSettings {
    pub enable_monitoring: bool,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            enable_monitoring: true,
        }
    }
}

/// `cleanup.*` settings for the server-side sweeper.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanupSettings {
    pub enabled: bool,
    pub interval_hours: u64,
    /// Delay before the first sweep so it does not compete with boot load
    pub initial_delay_minutes: u64,
    /// Age bound applied to the on-disk store by the server cleanup task
    pub max_file_age_hours: u64,
    pub max_session_age_hours: u64,
    /// Children younger than this are never treated as orphans
    pub orphan_grace_minutes: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 6,
            initial_delay_minutes: 5,
            max_file_age_hours: 168,
            max_session_age_hours: 24,
            orphan_grace_minutes: 5,
        }
    }
}

impl CleanupSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_hours.saturating_mul(MS_PER_HOUR))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_minutes.saturating_mul(60))
    }

    pub fn max_file_age_ms(&self) -> u64 {
        self.max_file_age_hours.saturating_mul(MS_PER_HOUR)
    }

    pub fn max_session_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_session_age_hours.min(i64::MAX as u64) as i64)
    }

    pub fn orphan_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.orphan_grace_minutes.min(i64::MAX as u64) as i64)
    }
}

/// `server.*` settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

// == Config ==

/// Complete startup configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheSettings,
    pub memory: MemorySettings,
    pub performance: PerformanceSettings,
    pub cleanup: CleanupSettings,
    pub server: ServerSettings,
}

impl Config {
    /// Loads the settings file named by `PIXEL_CACHE_SETTINGS` (if set),
    /// applies environment overrides and validates the result.
    pub fn load() -> Result<Self> {
        Self::load_with(|name| env::var(name).ok())
    }

    /// [`load`](Config::load) with `lookup` standing in for the process
    /// environment.
    pub fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(SETTINGS_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON settings file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Parses JSON settings; missing sections and keys keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Applies overrides from `lookup`, which maps an environment variable
    /// name to its value. Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "PIXEL_CACHE_SIZE_MB", &mut self.cache.max_size_mb);
        override_parsed(&lookup, "PIXEL_CACHE_TTL_HOURS", &mut self.cache.ttl_hours);
        override_parsed(
            &lookup,
            "PIXEL_CACHE_CLEANUP_HOURS",
            &mut self.cache.cleanup_interval_hours,
        );
        if let Some(dir) = lookup("PIXEL_CACHE_DIR") {
            self.cache.directory = PathBuf::from(dir);
        }

        if let Some(limit) = lookup("PIXEL_MEMORY_LIMIT") {
            self.memory.limit = limit;
        }
        override_parsed(
            &lookup,
            "PIXEL_MEMORY_WARNING_THRESHOLD",
            &mut self.memory.warning_threshold,
        );
        override_parsed(
            &lookup,
            "PIXEL_MEMORY_CRITICAL_THRESHOLD",
            &mut self.memory.critical_threshold,
        );
        override_parsed(
            &lookup,
            "PIXEL_MEMORY_SAMPLE_SECS",
            &mut self.memory.sample_interval_secs,
        );
        override_parsed(
            &lookup,
            "PIXEL_ENABLE_MONITORING",
            &mut self.performance.enable_monitoring,
        );

        override_parsed(&lookup, "CLEANUP_ENABLED", &mut self.cleanup.enabled);
        override_parsed(&lookup, "CLEANUP_INTERVAL_HOURS", &mut self.cleanup.interval_hours);
        override_parsed(
            &lookup,
            "CLEANUP_INITIAL_DELAY_MINUTES",
            &mut self.cleanup.initial_delay_minutes,
        );
        override_parsed(
            &lookup,
            "CLEANUP_MAX_FILE_AGE_HOURS",
            &mut self.cleanup.max_file_age_hours,
        );
        override_parsed(
            &lookup,
            "CLEANUP_MAX_SESSION_AGE_HOURS",
            &mut self.cleanup.max_session_age_hours,
        );
        override_parsed(
            &lookup,
            "CLEANUP_ORPHAN_GRACE_MINUTES",
            &mut self.cleanup.orphan_grace_minutes,
        );

        override_parsed(&lookup, "SERVER_PORT", &mut self.server.port);
    }

    /// Rejects settings the monitor and scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.memory.limit_bytes()?;

        let warning = self.memory.warning_threshold;
        let critical = self.memory.critical_threshold;
        if !(warning > 0.0 && warning <= 1.0) {
            return Err(CacheError::Config(format!(
                "memory.warningThreshold must be in (0, 1], got {}",
                warning
            )));
        }
        if !(critical > warning && critical <= 1.0) {
            return Err(CacheError::Config(format!(
                "memory.criticalThreshold must be in ({}, 1], got {}",
                warning, critical
            )));
        }
        if self.memory.sample_interval_secs == 0 {
            return Err(CacheError::Config(
                "memory.sampleIntervalSecs must be positive".to_string(),
            ));
        }
        if self.cache.cleanup_interval_hours == 0 || self.cleanup.interval_hours == 0 {
            return Err(CacheError::Config(
                "cleanup intervals must be at least one hour".to_string(),
            ));
        }

        if self.cache.max_size_mb < MIN_RECOMMENDED_CACHE_MB {
            warn!(
                max_size_mb = self.cache.max_size_mb,
                "Cache size below {}MB may impact performance", MIN_RECOMMENDED_CACHE_MB
            );
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(name) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(variable = name, value = %raw, "Ignoring unparseable override"),
        }
    }
}

// == Memory Limit Parsing ==
/// Parses a memory limit such as `"512MB"`, `"1.5gb"` or `"65536"` into
/// bytes. Suffixes are case-insensitive; a bare number is bytes.
pub fn parse_memory_limit(raw: &str) -> Result<u64> {
    let lower = raw.trim().to_ascii_lowercase();
    let (number, multiplier) = if let Some(n) = lower.strip_suffix("gb") {
        (n, 1024.0 * 1024.0 * 1024.0)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024.0)
    } else {
        (lower.strip_suffix('b').unwrap_or(&lower), 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| CacheError::Config(format!("invalid memory limit: {:?}", raw)))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(CacheError::Config(format!(
            "memory limit must be positive: {:?}",
            raw
        )));
    }
    Ok((value * multiplier) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.cache.max_size_mb, 2048);
        assert_eq!(config.cache.ttl_hours, 168);
        assert_eq!(config.cache.cleanup_interval_hours, 24);
        assert_eq!(config.memory.limit, "512MB");
        assert_eq!(config.memory.warning_threshold, 0.8);
        assert!(config.performance.enable_monitoring);
        assert!(config.cleanup.enabled);
        assert_eq!(config.cleanup.interval_hours, 6);
        assert_eq!(config.cleanup.max_file_age_hours, 168);
        assert_eq!(config.cleanup.max_session_age_hours, 24);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_units() {
        let config = Config::default();
        assert_eq!(config.cache.max_size_bytes(), 2048 * 1024 * 1024);
        assert_eq!(config.cache.ttl_ms(), 168 * 3_600_000);
        assert_eq!(config.cleanup.initial_delay(), Duration::from_secs(300));
        assert_eq!(config.cleanup.interval(), Duration::from_secs(6 * 3600));
        assert_eq!(config.memory.limit_bytes().unwrap(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_from_json_partial_sections() {
        let raw = r#"{
            "cache": { "maxSizeMB": 512, "ttlHours": 2 },
            "memory": { "limit": "1GB", "warningThreshold": 0.7 },
            "cleanup": { "enabled": false }
        }"#;
        let config = Config::from_json_str(raw).unwrap();
        assert_eq!(config.cache.max_size_mb, 512);
        assert_eq!(config.cache.ttl_hours, 2);
        assert_eq!(config.cache.cleanup_interval_hours, 24);
        assert_eq!(config.memory.limit_bytes().unwrap(), 1024 * 1024 * 1024);
        assert_eq!(config.memory.warning_threshold, 0.7);
        assert!(!config.cleanup.enabled);
        assert_eq!(config.cleanup.interval_hours, 6);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            Config::from_json_str("{ not json"),
            Err(CacheError::Config(_))
        ));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = Config::from_json_str(r#"{"cache": {"maxSizeMB": 512}}"#).unwrap();
        config.apply_overrides(lookup_from(&[
            ("PIXEL_CACHE_SIZE_MB", "4096"),
            ("PIXEL_MEMORY_LIMIT", "2gb"),
            ("CLEANUP_ENABLED", "false"),
            ("SERVER_PORT", "8080"),
        ]));
        assert_eq!(config.cache.max_size_mb, 4096);
        assert_eq!(config.memory.limit, "2gb");
        assert!(!config.cleanup.enabled);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_reads_settings_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"cache": {"maxSizeMB": 512, "ttlHours": 2}}"#).unwrap();
        let path = path.to_string_lossy().to_string();

        let config = Config::load_with(lookup_from(&[
            (SETTINGS_PATH_ENV, path.as_str()),
            ("PIXEL_CACHE_TTL_HOURS", "12"),
        ]))
        .unwrap();

        assert_eq!(config.cache.max_size_mb, 512);
        assert_eq!(config.cache.ttl_hours, 12);
    }

    #[test]
    fn test_load_without_settings_file_uses_defaults() {
        let config = Config::load_with(lookup_from(&[])).unwrap();
        assert_eq!(config.cache.max_size_mb, 2048);
    }

    #[test]
    fn test_load_rejects_invalid_overrides() {
        let result = Config::load_with(lookup_from(&[("PIXEL_MEMORY_WARNING_THRESHOLD", "0.95")]));
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("CLEANUP_INTERVAL_HOURS", "soon")]));
        assert_eq!(config.cleanup.interval_hours, 6);
    }

    #[test]
    fn test_validate_thresholds() {
        let mut config = Config::default();
        config.memory.warning_threshold = 0.95;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.memory.warning_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.memory.limit = "lots".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_small_cache_is_only_a_warning() {
        let mut config = Config::default();
        config.cache.max_size_mb = 64;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_memory_limit_suffixes() {
        assert_eq!(parse_memory_limit("512MB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_limit("512mb").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_limit("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1.5gb").unwrap(), 1536 * 1024 * 1024);
        assert_eq!(parse_memory_limit("64KB").unwrap(), 64 * 1024);
        assert_eq!(parse_memory_limit("4096").unwrap(), 4096);
        assert_eq!(parse_memory_limit(" 100 MB ").unwrap(), 100 * 1024 * 1024);
    }

    #[test]
    fn test_parse_memory_limit_rejects_invalid() {
        assert!(parse_memory_limit("").is_err());
        assert!(parse_memory_limit("MB").is_err());
        assert!(parse_memory_limit("-1GB").is_err());
        assert!(parse_memory_limit("0").is_err());
    }
}
