//! Lifecycle configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BURROW_SHARED_AREAS` | public | Comma-separated namespaces to clean cross-namespace grants from |
//! | `BURROW_EVICTION_PASSES` | 3 | Session eviction passes during forced teardown |
//! | `BURROW_EVICTION_INTERVAL` | 200ms | Pause between eviction passes (humantime) |
//! | `BURROW_SEARCH_PATH_SHARED` | true | Append shared areas to the principal's search path |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::names::Identifier;

/// Configuration shared by the provisioner and the teardown coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Namespaces outside the tenant's own in which the principal may hold
    /// grants that a cascading namespace drop does not remove.
    #[serde(default = "default_shared_areas")]
    pub shared_areas: Vec<String>,

    /// Session eviction policy for forced teardown.
    #[serde(default)]
    pub eviction: EvictionPolicy,

    /// Whether the principal's search path lists the shared areas after its
    /// own namespace.
    #[serde(default = "default_true")]
    pub search_path_includes_shared: bool,
}

/// Bounded retry policy for session eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionPolicy {
    /// Maximum number of enumerate-and-terminate passes.
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,

    /// Pause between passes, in milliseconds.
    #[serde(default = "default_pass_interval_ms")]
    pub pass_interval_ms: u64,
}

fn default_shared_areas() -> Vec<String> {
    vec!["public".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_max_passes() -> u32 {
    3
}

fn default_pass_interval_ms() -> u64 {
    200
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shared_areas: default_shared_areas(),
            eviction: EvictionPolicy::default(),
            search_path_includes_shared: true,
        }
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_passes: default_max_passes(),
            pass_interval_ms: default_pass_interval_ms(),
        }
    }
}

impl EvictionPolicy {
    /// Returns the pause between passes.
    pub fn pass_interval(&self) -> Duration {
        Duration::from_millis(self.pass_interval_ms)
    }

    /// A policy with no pause between passes, for tests and dry runs.
    pub fn immediate(max_passes: u32) -> Self {
        Self {
            max_passes,
            pass_interval_ms: 0,
        }
    }
}

impl LifecycleConfig {
    /// Creates a configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(areas) = std::env::var("BURROW_SHARED_AREAS") {
            config.shared_areas = parse_list(&areas);
        }
        if let Some(passes) = std::env::var("BURROW_EVICTION_PASSES")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            config.eviction.max_passes = passes;
        }
        if let Some(interval) = std::env::var("BURROW_EVICTION_INTERVAL")
            .ok()
            .and_then(|i| humantime::parse_duration(&i).ok())
        {
            config.eviction.pass_interval_ms = interval.as_millis() as u64;
        }
        if let Ok(flag) = std::env::var("BURROW_SEARCH_PATH_SHARED") {
            config.search_path_includes_shared = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        config
    }

    /// Sets the shared areas.
    pub fn with_shared_areas<I, S>(mut self, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared_areas = areas.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the eviction policy.
    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    /// Sets whether the principal's search path lists the shared areas.
    pub fn with_search_path_shared(mut self, include: bool) -> Self {
        self.search_path_includes_shared = include;
        self
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for area in &self.shared_areas {
            if let Err(e) = Identifier::new(area.as_str()) {
                errors.push(format!("Shared area {:?} is invalid: {}", area, e));
            }
        }

        if self.eviction.max_passes == 0 {
            errors.push("Eviction passes cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Splits a comma-separated list, dropping blanks.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LifecycleConfig::default();
        assert_eq!(config.shared_areas, vec!["public".to_string()]);
        assert_eq!(config.eviction.max_passes, 3);
        assert_eq!(config.eviction.pass_interval(), Duration::from_millis(200));
        assert!(config.search_path_includes_shared);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: LifecycleConfig =
            serde_json::from_str(r#"{"shared_areas": ["public", "common"]}"#).unwrap();
        assert_eq!(config.shared_areas.len(), 2);
        assert_eq!(config.eviction.max_passes, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = LifecycleConfig::default()
            .with_shared_areas(["Public Area"])
            .with_eviction(EvictionPolicy::immediate(0));
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" public, common ,,"), vec!["public", "common"]);
        assert!(parse_list("").is_empty());
    }
}
