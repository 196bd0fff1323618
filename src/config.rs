//! Operator configuration
//!
//! Configuration is resolved once at startup into an immutable
//! [`ResolvedConfig`]:
//!
//! 1. built-in defaults
//! 2. environment variables (`CLEANUP_NAMESPACES`, `CLEANUP_INTERVAL`, `DRY_RUN`)
//! 3. the mounted config file, if present
//!
//! Each cycle then layers its `Cleanup` spec on top with
//! [`ResolvedConfig::for_request`], so the effective precedence is
//! CR spec > file > env > defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::CleanupSpec;
use crate::retry::RetryConfig;
use crate::{
    Error, DEFAULT_API_TIMEOUT_SECS, DEFAULT_DELETE_ATTEMPTS, DEFAULT_DRY_RUN,
    DEFAULT_EXCLUDE_PATTERNS, DEFAULT_INTERVAL_SECS, DEFAULT_MAX_CONCURRENCY, DEFAULT_NAMESPACE,
    DEFAULT_STATUS_RETRIES, DEFAULT_UNUSED_THRESHOLD_HOURS,
};

/// Comma-separated namespaces to scan
pub const ENV_NAMESPACES: &str = "CLEANUP_NAMESPACES";
/// Seconds between scheduled cycles
pub const ENV_INTERVAL: &str = "CLEANUP_INTERVAL";
/// `true`/`false`
pub const ENV_DRY_RUN: &str = "DRY_RUN";

/// Where environment variables come from
#[cfg_attr(test, automock)]
pub trait EnvSource: Send + Sync {
    /// Value of `key`, if set
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Shape of the mounted config file
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Namespaces to scan
    #[serde(default)]
    pub namespaces: Option<Vec<String>>,
    /// Seconds between scheduled cycles
    #[serde(default)]
    pub cleanup_interval: Option<u64>,
    /// Minimum age in hours before deletion
    #[serde(default)]
    pub unused_threshold_hours: Option<u32>,
    /// Report without deleting
    #[serde(default)]
    pub dry_run: Option<bool>,
    /// Glob patterns protecting resources by name
    #[serde(default)]
    pub exclude_patterns: Option<Vec<String>>,
}

impl FileConfig {
    /// Load a config file; a missing file yields `None`
    pub fn load(path: &Path) -> Result<Option<Self>, Error> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using environment and defaults");
                return Ok(None);
            }
            Err(e) => return Err(Error::config(path.display().to_string(), e.to_string())),
        };
        if raw.trim().is_empty() {
            return Ok(Some(Self::default()));
        }
        serde_yaml::from_str(&raw)
            .map(Some)
            .map_err(|e| Error::config(path.display().to_string(), e.to_string()))
    }
}

/// Fully resolved operator configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedConfig {
    /// Namespaces to scan, deduplicated, never empty
    pub namespaces: Vec<String>,
    /// Time between scheduled cycles
    pub interval: Duration,
    /// Minimum age in hours before deletion (0 disables)
    pub unused_threshold_hours: u32,
    /// Report without deleting
    pub dry_run: bool,
    /// Glob patterns protecting resources by name
    pub exclude_patterns: Vec<String>,
    /// Deadline for a single cluster API call
    pub api_timeout: Duration,
    /// Namespaces scanned and deletes issued in parallel
    pub max_concurrency: usize,
    /// Attempts per scan or delete call
    pub delete_attempts: u32,
    /// Conflict retries when writing status
    pub status_retries: u32,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            namespaces: vec![DEFAULT_NAMESPACE.to_string()],
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            unused_threshold_hours: DEFAULT_UNUSED_THRESHOLD_HOURS,
            dry_run: DEFAULT_DRY_RUN,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            api_timeout: Duration::from_secs(DEFAULT_API_TIMEOUT_SECS),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            delete_attempts: DEFAULT_DELETE_ATTEMPTS,
            status_retries: DEFAULT_STATUS_RETRIES,
        }
    }
}

/// Resolve configuration from defaults, environment and an optional file
pub fn resolve(path: Option<&Path>, env: &dyn EnvSource) -> Result<ResolvedConfig, Error> {
    let mut config = ResolvedConfig::default().with_env(env)?;
    if let Some(path) = path {
        if let Some(file) = FileConfig::load(path)? {
            info!(path = %path.display(), "loaded config file");
            config = config.with_file(file)?;
        }
    }
    info!(
        namespaces = ?config.namespaces,
        interval_secs = config.interval.as_secs(),
        unused_threshold_hours = config.unused_threshold_hours,
        dry_run = config.dry_run,
        "configuration resolved"
    );
    Ok(config)
}

/// Deduplicate namespaces keeping first occurrence; empty becomes `["default"]`
pub fn normalize_namespaces<S: AsRef<str>>(namespaces: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(namespaces.len());
    for ns in namespaces {
        let ns = ns.as_ref().trim();
        if !ns.is_empty() && !out.iter().any(|seen| seen == ns) {
            out.push(ns.to_string());
        }
    }
    if out.is_empty() {
        out.push(DEFAULT_NAMESPACE.to_string());
    }
    out
}

fn parse_interval(source: &str, secs: u64) -> Result<Duration, Error> {
    if secs == 0 {
        return Err(Error::config(source, "cleanup interval must be positive"));
    }
    Ok(Duration::from_secs(secs))
}

impl ResolvedConfig {
    /// Overlay environment variables
    pub fn with_env(mut self, env: &dyn EnvSource) -> Result<Self, Error> {
        if let Some(raw) = env.var(ENV_NAMESPACES) {
            let parts: Vec<&str> = raw.split(',').collect();
            self.namespaces = normalize_namespaces(&parts);
        }
        if let Some(raw) = env.var(ENV_INTERVAL) {
            let secs = raw.trim().parse::<u64>().map_err(|e| {
                Error::config(ENV_INTERVAL, format!("invalid seconds {:?}: {}", raw, e))
            })?;
            self.interval = parse_interval(ENV_INTERVAL, secs)?;
        }
        if let Some(raw) = env.var(ENV_DRY_RUN) {
            self.dry_run = match raw.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    return Err(Error::config(
                        ENV_DRY_RUN,
                        format!("expected true or false, got {:?}", raw),
                    ))
                }
            };
        }
        Ok(self)
    }

    /// Overlay values from the config file
    pub fn with_file(mut self, file: FileConfig) -> Result<Self, Error> {
        if let Some(namespaces) = file.namespaces {
            self.namespaces = normalize_namespaces(&namespaces);
        }
        if let Some(secs) = file.cleanup_interval {
            self.interval = parse_interval("cleanup_interval", secs)?;
        }
        if let Some(hours) = file.unused_threshold_hours {
            self.unused_threshold_hours = hours;
        }
        if let Some(dry_run) = file.dry_run {
            self.dry_run = dry_run;
        }
        if let Some(patterns) = file.exclude_patterns {
            self.exclude_patterns = patterns;
        }
        Ok(self)
    }

    /// Effective configuration for one `Cleanup` request
    ///
    /// Spec fields override; exclusion patterns from the spec are added to
    /// the configured ones rather than replacing them.
    pub fn for_request(&self, spec: &CleanupSpec) -> ResolvedConfig {
        let mut config = self.clone();
        if let Some(namespaces) = &spec.namespaces {
            config.namespaces = normalize_namespaces(namespaces);
        }
        if let Some(hours) = spec.unused_threshold_hours {
            config.unused_threshold_hours = hours;
        }
        if let Some(dry_run) = spec.dry_run {
            config.dry_run = dry_run;
        }
        for pattern in &spec.exclude_patterns {
            if !config.exclude_patterns.contains(pattern) {
                config.exclude_patterns.push(pattern.clone());
            }
        }
        config
    }

    /// Retry policy for scan and delete calls
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.delete_attempts).call_timeout(self.api_timeout)
    }
}
