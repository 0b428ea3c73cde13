//! Configuration loading and config file resolution
//!
//! The configuration is a single TOML document. Every section is optional;
//! missing keys fall back to built-in defaults so that an empty (or absent)
//! file yields a working setup.
//!
//! # Resolution order
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config directory (`<config_dir>/bibchex/config.toml`)
//! 4. Built-in defaults (no file)
//!
//! # Example
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [retrieval]
//! max_in_flight = 64
//! mailto = "me@example.org"
//!
//! [sources.crossref.rate_limit]
//! capacity = 20
//! interval_secs = 1.0
//!
//! [checks]
//! required = ["author", "title"]
//! check_journal_abbrev = true
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "BIBCHEX_CONFIG";

/// Largest accepted `degrade_factor`
pub const MAX_DEGRADE_FACTOR: f64 = 100.0;

/// Top-level configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Retrieval (source fan-out) settings
    pub retrieval: RetrievalSettings,
    /// Per-source overrides keyed by source name ("crossref", "datacite", ...)
    pub sources: BTreeMap<String, SourceSettings>,
    /// Check options, resolved per entry by the check engine
    ///
    /// Kept as a raw table: option keys are owned by the individual checks.
    pub checks: toml::Table,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Settings shared by all retrieval sources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Upper bound on concurrently running retrieval tasks of one source
    pub max_in_flight: usize,
    /// Retry budget for throttled requests
    pub retry: RetrySettings,
    /// Contact address sent to polite-pool APIs (Crossref)
    pub mailto: Option<String>,
    /// Crossref Plus API token
    pub crossref_plus: Option<String>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 128,
            retry: RetrySettings::default(),
            mailto: None,
            crossref_plus: None,
        }
    }
}

/// Exponential retry settings for throttled requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Number of retries before giving up
    pub max_retries: u32,
    /// First retry delay in seconds (doubles per retry)
    pub initial_delay_secs: f64,
    /// Ceiling for a single retry delay in seconds
    pub max_delay_secs: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 20,
            initial_delay_secs: 1.0,
            max_delay_secs: 600.0,
        }
    }
}

/// Per-source settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceSettings {
    /// Whether the source takes part in retrieval
    pub enabled: bool,
    /// Override for the API base URL
    pub base_url: Option<String>,
    /// Rate limit overrides (unset fields keep the source default)
    pub rate_limit: RateLimitOverrides,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            rate_limit: RateLimitOverrides::default(),
        }
    }
}

/// Token bucket overrides for one source
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitOverrides {
    /// Tokens per refill
    pub capacity: Option<u32>,
    /// Refill interval in seconds
    pub interval_secs: Option<f64>,
    /// Quiet period imposed by a backoff, in seconds
    pub quiet_period_secs: Option<f64>,
    /// Interval multiplier applied per backoff
    pub degrade_factor: Option<f64>,
    /// Maximum number of interval degradations
    pub max_degradations: Option<u32>,
}

impl TomlConfig {
    /// Settings for a source, or defaults if the file does not mention it
    pub fn source(&self, name: &str) -> SourceSettings {
        self.sources.get(name).cloned().unwrap_or_default()
    }

    /// Validate cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.max_in_flight == 0 {
            return Err(Error::Config(
                "retrieval.max_in_flight must be at least 1".to_string(),
            ));
        }
        let retry = &self.retrieval.retry;
        let initial = duration_from_secs("retrieval.retry.initial_delay_secs", retry.initial_delay_secs)?;
        let max = duration_from_secs("retrieval.retry.max_delay_secs", retry.max_delay_secs)?;
        if max < initial {
            return Err(Error::Config(format!(
                "retrieval.retry delays are inconsistent (initial {}s, max {}s)",
                retry.initial_delay_secs, retry.max_delay_secs
            )));
        }
        for (name, source) in &self.sources {
            source.rate_limit.validate(name)?;
        }
        Ok(())
    }
}

impl RateLimitOverrides {
    /// Check the overrides of the source called `name`
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.capacity == Some(0) {
            return Err(Error::Config(format!(
                "sources.{name}.rate_limit.capacity must be at least 1"
            )));
        }
        if let Some(secs) = self.interval_secs {
            let key = format!("sources.{name}.rate_limit.interval_secs");
            if duration_from_secs(&key, secs)?.is_zero() {
                return Err(Error::Config(format!("{key} must be positive")));
            }
        }
        if let Some(secs) = self.quiet_period_secs {
            duration_from_secs(&format!("sources.{name}.rate_limit.quiet_period_secs"), secs)?;
        }
        if let Some(factor) = self.degrade_factor {
            // NaN fails the range test too
            if !(1.0..=MAX_DEGRADE_FACTOR).contains(&factor) {
                return Err(Error::Config(format!(
                    "sources.{name}.rate_limit.degrade_factor must be within 1.0..={MAX_DEGRADE_FACTOR}, got {factor}"
                )));
            }
        }
        Ok(())
    }
}

/// Seconds from the config document as a `Duration`
///
/// NaN, infinite, negative and out-of-range values are configuration errors.
pub fn duration_from_secs(key: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() {
        return Err(Error::Config(format!("{key} must be a finite number of seconds, got {secs}")));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| Error::Config(format!("{key} = {secs}: {e}")))
}

/// Resolve the config file path following the documented priority order
///
/// Returns `None` when no file is named and the user config file does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    dirs::config_dir()
        .map(|d| d.join("bibchex").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load and validate a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Load the config file if one resolves, otherwise fall back to defaults
///
/// A named file that does not exist is not fatal: a warning is logged and
/// defaults are used. A file that exists but does not parse is an error.
pub fn load_or_default(path: Option<&Path>) -> Result<TomlConfig> {
    match path {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            load_toml_config(path)
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            info!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write a config document to disk, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// User-Agent sent by all HTTP sources
///
/// Polite-pool APIs (Crossref) expect a contact address when one is known.
pub fn get_user_agent(mailto: Option<&str>) -> String {
    let base = format!(
        "bibchex/{} (https://github.com/tinloaf/bibchex",
        env!("CARGO_PKG_VERSION")
    );
    match mailto {
        Some(mail) if !mail.trim().is_empty() => format!("{base}; mailto:{})", mail.trim()),
        _ => format!("{base})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.retrieval.retry.max_retries, 20);
        assert!(config.source("crossref").enabled);
    }

    #[test]
    fn test_partial_source_section() {
        let config: TomlConfig = toml::from_str(
            r#"
            [sources.datacite]
            enabled = false

            [sources.crossref.rate_limit]
            capacity = 5
            "#,
        )
        .unwrap();

        assert!(!config.source("datacite").enabled);
        let crossref = config.source("crossref");
        assert!(crossref.enabled);
        assert_eq!(crossref.rate_limit.capacity, Some(5));
        assert_eq!(crossref.rate_limit.interval_secs, None);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config: TomlConfig = toml::from_str(
            r#"
            [sources.meta.rate_limit]
            capacity = 0
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_duration_from_secs() {
        assert_eq!(duration_from_secs("k", 1.5).unwrap(), Duration::from_millis(1500));
        assert!(matches!(duration_from_secs("k", f64::NAN), Err(Error::Config(_))));
        assert!(matches!(duration_from_secs("k", f64::INFINITY), Err(Error::Config(_))));
        assert!(matches!(duration_from_secs("k", -1.0), Err(Error::Config(_))));
        assert!(matches!(duration_from_secs("k", 1e300), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_non_finite_rate_limits() {
        for section in [
            "interval_secs = nan",
            "interval_secs = inf",
            "interval_secs = 0.0",
            "quiet_period_secs = -inf",
            "quiet_period_secs = nan",
            "degrade_factor = nan",
            "degrade_factor = inf",
            "degrade_factor = 1e300",
            "degrade_factor = 0.5",
        ] {
            let config: TomlConfig =
                toml::from_str(&format!("[sources.crossref.rate_limit]\n{section}\n")).unwrap();
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{section}");
        }
    }

    #[test]
    fn test_validate_rejects_non_finite_retry_delays() {
        for section in [
            "initial_delay_secs = nan",
            "max_delay_secs = inf",
            "initial_delay_secs = -1.0",
            "initial_delay_secs = 5.0\nmax_delay_secs = 1.0",
        ] {
            let config: TomlConfig = toml::from_str(&format!("[retrieval.retry]\n{section}\n")).unwrap();
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{section}");
        }
        assert!(TomlConfig::default().validate().is_ok());
    }

    #[test]
    fn test_user_agent_with_mailto() {
        let ua = get_user_agent(Some("me@example.org"));
        assert!(ua.starts_with("bibchex/"));
        assert!(ua.ends_with("mailto:me@example.org)"));
        assert!(get_user_agent(None).ends_with("bibchex)"));
    }
}
