//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metric::system_hostname;

use super::plugin::{CollectorDefaults, CollectorEntry, CollectorOverrides, HandlerSettings};
use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default first path segment.
pub const DEFAULT_PATH_PREFIX: &str = "servers";

/// Default grace period for `stop()` (5 seconds).
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn default_path_prefix() -> String {
    DEFAULT_PATH_PREFIX.to_string()
}

fn default_shutdown_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Agent-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Hostname used in metric paths (default: system hostname).
    #[serde(default)]
    pub hostname: Option<String>,

    /// First path segment (default: "servers"; empty to omit).
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Grace period for draining on shutdown (default: 5s).
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Interval for logging agent counters (disabled when absent).
    #[serde(default, with = "humantime_serde")]
    pub stats_interval: Option<Duration>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            hostname: None,
            path_prefix: default_path_prefix(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            stats_interval: None,
        }
    }
}

impl AgentSettings {
    /// Configured hostname, falling back to the system hostname.
    pub fn resolved_hostname(&self) -> String {
        self.hostname
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .unwrap_or_else(system_hostname)
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentSettings,

    /// Process-wide collector defaults.
    #[serde(default)]
    pub collector_defaults: CollectorDefaults,

    /// Process-wide collector overrides, applied last.
    #[serde(default)]
    pub collector_overrides: CollectorOverrides,

    #[serde(default)]
    pub collectors: Vec<CollectorEntry>,

    #[serde(default)]
    pub handlers: Vec<HandlerSettings>,

    /// Path to a directory with additional collector config files.
    #[serde(default)]
    pub collector_path: Option<String>,
}

/// Shape of a file under `collector_path`.
#[derive(Debug, Default, Deserialize)]
struct CollectorFile {
    #[serde(default)]
    collectors: Vec<CollectorEntry>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` / `${VAR:-default}` references are expanded before parsing.
    /// If `collector_path` is set, every `*.yaml`/`*.yml` file in it is loaded
    /// and its collectors appended.
    ///
    /// # Errors
    /// Returns `ConfigError` if a file cannot be read or parsed, or the agent
    /// section is invalid. Individual plugin problems are reported later, when
    /// the agent is built, and only exclude that plugin.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_yaml(&std::fs::read_to_string(path.as_ref())?)?;

        if let Some(ref dir) = config.collector_path {
            let extra = load_collectors_from_dir(dir)?;
            config.collectors.extend(extra);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        Ok(serde_yaml::from_str(&expanded)?)
    }

    /// Validate agent-wide values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.path_prefix.contains("..")
            || self.agent.path_prefix.starts_with('.')
            || self.agent.path_prefix.ends_with('.')
        {
            return Err(ConfigError::ValidationError(format!(
                "invalid path_prefix: '{}'",
                self.agent.path_prefix
            )));
        }
        if self.collector_defaults.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "collector_defaults timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn load_collectors_from_dir(dir_path: &str) -> Result<Vec<CollectorEntry>, ConfigError> {
    let dir = Path::new(dir_path);
    if !dir.is_dir() {
        return Err(ConfigError::ValidationError(format!(
            "collector_path '{}' is not a directory",
            dir_path
        )));
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    // Registration order follows file name order.
    paths.sort();

    let mut collectors = Vec::new();
    for path in paths {
        tracing::debug!("Loading collector config from: {}", path.display());
        let content = expand_env_vars(&std::fs::read_to_string(&path)?);
        let file: CollectorFile = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ValidationError(format!("failed to parse '{}': {}", path.display(), e))
        })?;
        collectors.extend(file.collectors);
    }
    Ok(collectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
agent:
  hostname: web-01
  shutdown_grace: 2s
collector_defaults:
  interval: 20s
collector_overrides:
  splay: 1s
collectors:
  - name: redis
    kind: tcp
    options: { host: 127.0.0.1, port: 6379 }
handlers:
  - name: aggmon
    kind: json_push
    queue_capacity: 100000
    options: { address: "127.0.0.1:5555" }
"#;

    #[test]
    fn test_agent_settings_default() {
        let settings = AgentSettings::default();
        assert_eq!(settings.path_prefix, "servers");
        assert_eq!(settings.shutdown_grace, DEFAULT_SHUTDOWN_GRACE);
        assert!(settings.stats_interval.is_none());
    }

    #[test]
    fn test_from_yaml() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.agent.resolved_hostname(), "web-01");
        assert_eq!(config.agent.shutdown_grace, Duration::from_secs(2));
        assert_eq!(config.collector_defaults.interval, Duration::from_secs(20));
        assert_eq!(config.collector_overrides.splay, Some(Duration::from_secs(1)));
        assert_eq!(config.collectors.len(), 1);
        assert_eq!(config.handlers[0].queue_capacity, 100_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert!(config.collectors.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_path_prefix() {
        let mut config = AppConfig::default();
        config.agent.path_prefix = "a..b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_with_collector_path() {
        let dir = tempfile::tempdir().unwrap();
        let include = dir.path().join("collectors.d");
        std::fs::create_dir(&include).unwrap();
        std::fs::write(
            include.join("b.yaml"),
            "collectors:\n  - name: second\n    kind: loadavg\n",
        )
        .unwrap();
        std::fs::write(
            include.join("a.yml"),
            "collectors:\n  - name: first\n    kind: loadavg\n",
        )
        .unwrap();
        std::fs::write(include.join("ignored.txt"), "not yaml").unwrap();

        let main = dir.path().join("lumen.yaml");
        std::fs::write(
            &main,
            format!("collector_path: {}\ncollectors: []\n", include.display()),
        )
        .unwrap();

        let config = AppConfig::load(&main).unwrap();
        let names: Vec<_> = config.collectors.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_load_missing_collector_path() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("lumen.yaml");
        std::fs::write(&main, "collector_path: /definitely/not/here\n").unwrap();
        let err = AppConfig::load(&main).unwrap_err();
        assert!(err.to_string().contains("is not a directory"));
    }
}
