//! Scheduler configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! scheduler:
//!   workers: 4
//!   drain_timeout_ms: 5000
//! ```
//!
//! Every field is optional: missing values fall back to their defaults
//! (worker count = available parallelism, drain timeout = 5 s), and an empty
//! file or an absent `scheduler` section yields the full default
//! configuration. Only unreadable files and structurally invalid YAML are
//! errors.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Drain timeout applied when the YAML file does not specify one.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
///
/// Kept private – callers work with [`SchedulerConfig`] instead.
#[derive(Debug, Deserialize)]
struct SchedulerConfigFile {
    #[serde(default)]
    scheduler: SchedulerConfigEntry,
}

/// Fields as they appear in the YAML file, all optional.
#[derive(Debug, Default, Deserialize)]
struct SchedulerConfigEntry {
    workers: Option<usize>,
    drain_timeout_ms: Option<u64>,
}

// ── Public configuration ──────────────────────────────────────────────────────

/// Resolved scheduler settings.
///
/// Construct via [`SchedulerConfig::default_config`] or
/// [`SchedulerConfig::load_from_file`], then pass to
/// [`TaskScheduler::with_config`](crate::scheduler::TaskScheduler::with_config).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads. Validated (`≥ 1`) at scheduler
    /// construction, not here.
    pub workers: usize,

    /// How long `Drop` (and any shutdown path that uses the configured
    /// default) waits for in-flight actions before abandoning the workers.
    pub drain_timeout: Duration,
}

impl SchedulerConfig {
    /// Returns the fallback configuration used when no file is supplied:
    /// one worker per available CPU and the default drain timeout.
    pub fn default_config() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Parses `path` and resolves defaults for absent fields.
    ///
    /// An empty file is accepted and yields [`Self::default_config`],
    /// matching the behaviour of an absent `scheduler` section.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or if the YAML is
    /// structurally invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading scheduler configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        if content.trim().is_empty() {
            warn!("Configuration file is empty, using default scheduler settings");
            return Ok(Self::default_config());
        }

        let file: SchedulerConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let defaults = Self::default_config();
        let config = Self {
            workers: file.scheduler.workers.unwrap_or(defaults.workers),
            drain_timeout: file
                .scheduler
                .drain_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.drain_timeout),
        };

        debug!(
            workers = config.workers,
            drain_timeout_ms = config.drain_timeout.as_millis() as u64,
            "Scheduler configuration resolved"
        );

        Ok(config)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    // ── default_config ────────────────────────────────────────────────────────

    #[test]
    fn default_config_has_at_least_one_worker() {
        let cfg = SchedulerConfig::default_config();
        assert!(cfg.workers >= 1);
        assert_eq!(cfg.drain_timeout, DEFAULT_DRAIN_TIMEOUT);
    }

    // ── load_from_file ────────────────────────────────────────────────────────

    #[test]
    fn load_full_yaml() {
        let yaml = r#"
scheduler:
  workers: 4
  drain_timeout_ms: 2500
"#;
        let f = yaml_tempfile(yaml);
        let cfg = SchedulerConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.drain_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn absent_fields_fall_back_to_defaults() {
        let yaml = r#"
scheduler:
  workers: 2
"#;
        let f = yaml_tempfile(yaml);
        let cfg = SchedulerConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.drain_timeout, DEFAULT_DRAIN_TIMEOUT);
    }

    #[test]
    fn absent_scheduler_section_yields_defaults() {
        let f = yaml_tempfile("{}\n");
        let cfg = SchedulerConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg, SchedulerConfig::default_config());
    }

    #[test]
    fn empty_file_yields_defaults() {
        let f = yaml_tempfile("");
        let cfg = SchedulerConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg, SchedulerConfig::default_config());
    }

    #[test]
    fn missing_file_returns_error() {
        let result = SchedulerConfig::load_from_file(Path::new("/nonexistent/path/config.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        let result = SchedulerConfig::load_from_file(f.path());
        assert!(result.is_err());
    }
}
