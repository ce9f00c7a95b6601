//! Agent configuration
//!
//! Built-in defaults, then an optional file named by `AGENT_CONFIG`, then
//! environment variables such as `AGENT__LIMIT__MEMORY=2147483648` or
//! `AGENT__METRICS__TRANSFERS=10.0.0.1:8433,10.0.0.2:8433`.

use agent_lib::collector::{CollectorConfig, ReporterConfig, WatcherConfig, DEFAULT_VLAN_PREFIX};
use agent_lib::governor::GovernorConfig;
use agent_lib::sync::TransferClientConfig;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the optional configuration file
pub const CONFIG_FILE_ENV: &str = "AGENT_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Host name stamped on every app
    pub hostname: String,

    /// API server port for health/metrics
    pub api_port: u16,

    pub docker: DockerConfig,
    pub metrics: MetricsConfig,
    pub redis: RedisConfig,
    pub limit: LimitConfig,
    pub vlan: VlanConfig,
    pub labels: LabelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Engine endpoint; empty for the local socket
    pub endpoint: String,
    pub stats_timeout_secs: u64,
    pub stop_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Reporting period of every app
    pub step_secs: u64,
    /// Per-call timeout of the remote monitor
    pub timeout_ms: u64,
    /// Transfer endpoints, `host:port`
    pub transfers: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Host-wide memory ceiling in bytes; 0 disables the governor
    pub memory: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VlanConfig {
    pub prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    pub prefix: String,
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            api_port: 8080,
            docker: DockerConfig::default(),
            metrics: MetricsConfig::default(),
            redis: RedisConfig::default(),
            limit: LimitConfig::default(),
            vlan: VlanConfig::default(),
            labels: LabelsConfig::default(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            stats_timeout_secs: 2,
            stop_grace_secs: 10,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            step_secs: 10,
            timeout_ms: 1000,
            transfers: Vec::new(),
        }
    }
}

impl Default for VlanConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_VLAN_PREFIX.to_string(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::from_sources(file.as_deref().map(Path::new), None)
    }

    /// Load from an optional file and an environment map (the process
    /// environment when `env` is `None`)
    pub fn from_sources(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AGENT")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("metrics.transfers")
                .try_parsing(true)
                .source(env),
        );

        let config: AgentConfig = builder
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can run with
    pub fn validate(&self) -> Result<()> {
        if self.metrics.step_secs == 0 {
            bail!("metrics.step_secs must be greater than zero");
        }
        if self.metrics.timeout_ms == 0 {
            bail!("metrics.timeout_ms must be greater than zero");
        }
        if self.docker.stats_timeout_secs == 0 {
            bail!("docker.stats_timeout_secs must be greater than zero");
        }
        if self.vlan.prefix.is_empty() {
            bail!("vlan.prefix must not be empty");
        }
        Ok(())
    }

    pub fn collector_config(&self) -> CollectorConfig {
        let timeout = Duration::from_secs(self.docker.stats_timeout_secs);
        CollectorConfig {
            vlan_prefix: self.vlan.prefix.clone(),
            stats_timeout: timeout,
            probe_timeout: timeout,
        }
    }

    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig {
            step: Duration::from_secs(self.metrics.step_secs),
            vlan_prefix: self.vlan.prefix.clone(),
            ..Default::default()
        }
    }

    pub fn transfer_client_config(&self) -> TransferClientConfig {
        TransferClientConfig {
            request_timeout: Duration::from_millis(self.metrics.timeout_ms),
            ..Default::default()
        }
    }

    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            memory_ceiling: self.limit.memory,
            stop_grace: Duration::from_secs(self.docker.stop_grace_secs),
            ..Default::default()
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            hostname: self.hostname.clone(),
            label_prefix: self.labels.prefix.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_sources(None, env(&[])).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.metrics.step_secs, 10);
        assert_eq!(config.metrics.timeout_ms, 1000);
        assert_eq!(config.docker.stop_grace_secs, 10);
        assert_eq!(config.vlan.prefix, "vnbe");
        assert!(config.redis.url.is_none());
        assert!(!config.governor_config().is_enabled());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AgentConfig::from_sources(
            None,
            env(&[
                ("AGENT__HOSTNAME", "node-7"),
                ("AGENT__LIMIT__MEMORY", "2048"),
                ("AGENT__METRICS__STEP_SECS", "30"),
                ("AGENT__METRICS__TRANSFERS", "t1:8433,t2:8433"),
                ("AGENT__REDIS__URL", "redis://127.0.0.1/0"),
            ]),
        )
        .unwrap();

        assert_eq!(config.hostname, "node-7");
        assert_eq!(config.limit.memory, 2048);
        assert_eq!(config.metrics.transfers, vec!["t1:8433", "t2:8433"]);
        assert_eq!(config.redis.url.as_deref(), Some("redis://127.0.0.1/0"));
        assert_eq!(config.reporter_config().step, Duration::from_secs(30));
        assert!(config.governor_config().is_enabled());
    }

    #[test]
    fn test_zero_step_rejected() {
        let result = AgentConfig::from_sources(None, env(&[("AGENT__METRICS__STEP_SECS", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_stats_timeout_rejected() {
        let result = AgentConfig::from_sources(
            None,
            env(&[("AGENT__DOCKER__STATS_TIMEOUT_SECS", "0")]),
        );
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("docker.stats_timeout_secs"));
    }

    #[test]
    fn test_derived_component_configs() {
        let mut config = AgentConfig::default();
        config.docker.stats_timeout_secs = 3;
        config.metrics.timeout_ms = 250;
        config.labels.prefix = "agent.".to_string();

        assert_eq!(config.collector_config().stats_timeout, Duration::from_secs(3));
        assert_eq!(
            config.transfer_client_config().request_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(config.watcher_config().label_prefix, "agent.");
        assert_eq!(config.governor_config().stop_grace, Duration::from_secs(10));
    }
}
