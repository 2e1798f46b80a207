//! Typed job configuration.
//!
//! The job row stores an opaque JSON payload; this module is the single
//! place it is parsed. Unknown keys are rejected at ingress (create-job and
//! patch-job-config) so a typo surfaces as a validation error instead of a
//! runtime failure hours into a crawl.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid job config: {0}")]
    Invalid(String),

    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crawler tool options, mirrored one-to-one onto CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolOptions {
    pub initial_workers: u32,
    pub adaptive_workers: bool,
    pub docker_shm_size: Option<String>,
    pub docker_memory_limit: Option<String>,
    pub docker_cpu_limit: Option<String>,
    pub stall_timeout_minutes: u64,
    pub max_container_restarts: Option<u32>,
    pub error_threshold_timeout: Option<u32>,
    pub error_threshold_http: Option<u32>,
    pub backoff_delay_minutes: Option<u64>,
    pub scope_rules: Vec<String>,
    pub skip_final_build: bool,
    pub relax_perms: bool,
    pub monitoring: bool,
    pub vpn_rotation: bool,
    /// Outer wall-clock ceiling. None (the default) lets annual crawls run
    /// for hours; the crawler's own stall detection is the usual stop.
    pub hard_timeout_minutes: Option<u64>,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            initial_workers: 1,
            adaptive_workers: false,
            docker_shm_size: None,
            docker_memory_limit: None,
            docker_cpu_limit: None,
            stall_timeout_minutes: 30,
            max_container_restarts: None,
            error_threshold_timeout: None,
            error_threshold_http: None,
            backoff_delay_minutes: None,
            scope_rules: Vec::new(),
            skip_final_build: false,
            relax_perms: false,
            monitoring: false,
            vpn_rotation: false,
            hard_timeout_minutes: None,
        }
    }
}

/// The full config payload stored on a job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub seeds: Vec<String>,
    #[serde(default)]
    pub tool_options: ToolOptions,
    /// Indexing behavior: keep non-2xx HTML responses.
    #[serde(default)]
    pub include_non_2xx: bool,
    /// Run the same-day dedup pass with apply after indexing. Overrides the
    /// AUTO_DEDUPE environment default when set.
    #[serde(default)]
    pub auto_dedupe: Option<bool>,
}

impl JobConfig {
    /// Parse and validate a stored config payload.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let config: JobConfig = serde_json::from_value(value.clone())?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, ConfigError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seeds.is_empty() {
            return Err(ConfigError::Invalid("seeds must not be empty".to_string()));
        }
        for seed in &self.seeds {
            if !seed.starts_with("http://") && !seed.starts_with("https://") {
                return Err(ConfigError::Invalid(format!("seed is not an http(s) URL: {seed}")));
            }
        }
        if self.tool_options.initial_workers == 0 {
            return Err(ConfigError::Invalid("initial_workers must be >= 1".to_string()));
        }
        for rule in &self.tool_options.scope_rules {
            Regex::new(rule)
                .map_err(|e| ConfigError::Invalid(format!("bad scope rule {rule:?}: {e}")))?;
        }
        Ok(())
    }

    /// Apply a `key=value` patch to `tool_options`.
    ///
    /// The value is parsed as JSON when possible, else taken as a string;
    /// the patched payload is re-validated, so unknown keys and type
    /// mismatches are rejected here rather than at crawl time.
    pub fn patch_tool_option(&self, key: &str, raw_value: &str) -> Result<JobConfig, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(raw_value)
            .unwrap_or_else(|_| serde_json::Value::String(raw_value.to_string()));

        let mut payload = serde_json::to_value(self)?;
        let options = payload
            .get_mut("tool_options")
            .and_then(|v| v.as_object_mut())
            .ok_or_else(|| ConfigError::Invalid("tool_options is not an object".to_string()))?;
        options.insert(key.to_string(), value);

        Self::from_value(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_config() -> serde_json::Value {
        json!({
            "seeds": ["https://www.canada.ca/en/health-canada.html"],
            "tool_options": {"initial_workers": 4, "skip_final_build": true}
        })
    }

    #[test]
    fn parses_with_defaults() {
        let config = JobConfig::from_value(&base_config()).unwrap();
        assert_eq!(config.tool_options.initial_workers, 4);
        assert_eq!(config.tool_options.stall_timeout_minutes, 30);
        assert!(config.tool_options.skip_final_build);
        assert!(!config.include_non_2xx);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut payload = base_config();
        payload["tool_options"]["initial_wrokers"] = json!(2);
        let err = JobConfig::from_value(&payload).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)), "{err:?}");
    }

    #[test]
    fn wrong_types_are_rejected() {
        let mut payload = base_config();
        payload["tool_options"]["initial_workers"] = json!("banana");
        assert!(JobConfig::from_value(&payload).is_err());
    }

    #[test]
    fn empty_seeds_are_rejected() {
        let payload = json!({"seeds": []});
        let err = JobConfig::from_value(&payload).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err:?}");
    }

    #[test]
    fn bad_scope_regex_is_rejected() {
        let mut payload = base_config();
        payload["tool_options"]["scope_rules"] = json!(["["]);
        assert!(JobConfig::from_value(&payload).is_err());
    }

    #[test]
    fn patch_round_trips_and_validates() {
        let config = JobConfig::from_value(&base_config()).unwrap();

        let patched = config.patch_tool_option("stall_timeout_minutes", "45").unwrap();
        assert_eq!(patched.tool_options.stall_timeout_minutes, 45);

        let err = config.patch_tool_option("not_a_real_option", "1").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)), "{err:?}");

        let err = config.patch_tool_option("initial_workers", "\"banana\"").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)), "{err:?}");
    }
}
