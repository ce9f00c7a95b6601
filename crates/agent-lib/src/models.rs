//! Core data models for the telemetry agent

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time counters for one app, keyed by metric name
pub type Snapshot = BTreeMap<String, u64>;

/// Time-normalized rates, keyed by rate name
pub type Rates = BTreeMap<String, f64>;

/// Free-form attributes attached to an app
pub type Extend = BTreeMap<String, serde_json::Value>;

/// Extend key carrying the app's declared memory limit in bytes
pub const MEMORY_LIMIT_KEY: &str = "__memory__";

/// Metric names produced by the runtime probe
pub mod metric {
    pub const CPU_USER: &str = "cpu_user";
    pub const CPU_SYSTEM: &str = "cpu_system";
    pub const CPU_USAGE: &str = "cpu_usage";
    pub const MEM_USAGE: &str = "mem_usage";
    pub const MEM_MAX_USAGE: &str = "mem_max_usage";
    pub const MEM_RSS: &str = "mem_rss";

    /// Prefix shared by every instantaneous memory metric
    pub const MEM_PREFIX: &str = "mem";

    /// CPU counters that are turned into per-nanosecond rates
    pub const CPU_COUNTERS: [&str; 3] = [CPU_USER, CPU_SYSTEM, CPU_USAGE];
}

/// Identity of a monitored container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub container_id: String,
    pub name: String,
    pub entrypoint: String,
    pub ident: String,
}

impl AppIdentity {
    /// Parse a container name of the form `name_entrypoint_ident`.
    ///
    /// The app name itself may contain underscores; the last two segments are
    /// always the entrypoint and the ident.
    pub fn from_container_name(container_id: &str, container_name: &str) -> Option<Self> {
        let trimmed = container_name.trim_start_matches('/');
        let mut parts = trimmed.rsplitn(3, '_');
        let ident = parts.next()?;
        let entrypoint = parts.next()?;
        let name = parts.next()?;

        if name.is_empty() || entrypoint.is_empty() || ident.is_empty() {
            return None;
        }

        Some(Self {
            container_id: container_id.to_string(),
            name: name.to_string(),
            entrypoint: entrypoint.to_string(),
            ident: ident.to_string(),
        })
    }

    /// Monitoring endpoint name for this app
    pub fn endpoint(&self) -> String {
        format!("{}-{}", self.name, self.entrypoint)
    }

    /// Shortened container ID used in logs and tags
    pub fn short_id(&self) -> &str {
        short_id(&self.container_id)
    }
}

/// First 12 characters of a container ID
pub fn short_id(container_id: &str) -> &str {
    container_id.get(..12).unwrap_or(container_id)
}

/// Descriptive part of an app record, shared between the registry and its reporter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMeta {
    pub identity: AppIdentity,
    pub extend: Extend,
}

impl AppMeta {
    /// Build app metadata, stamping the agent-owned extend attributes
    pub fn new(identity: AppIdentity, mut extend: Extend, hostname: &str) -> Self {
        extend.insert("hostname".to_string(), hostname.into());
        extend.insert("cid".to_string(), identity.short_id().into());
        extend.insert("ident".to_string(), identity.ident.clone().into());
        Self { identity, extend }
    }

    pub fn container_id(&self) -> &str {
        &self.identity.container_id
    }

    /// Declared memory limit in bytes, if the app carries a usable one
    pub fn memory_limit(&self) -> Option<f64> {
        let limit = match self.extend.get(MEMORY_LIMIT_KEY)? {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        (limit.is_finite() && limit > 0.0).then_some(limit)
    }

    /// Tag string sent with every metric record.
    ///
    /// Keys are sorted; keys starting with `__` are internal and skipped.
    pub fn tags(&self) -> String {
        self.extend
            .iter()
            .filter(|(k, _)| !k.starts_with("__"))
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Value carried by a metric record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(u64),
    Float(f64),
}

/// One metric sample pushed to the remote monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub endpoint: String,
    pub metric: String,
    pub value: MetricValue,
    pub step: i64,
    #[serde(rename = "counterType")]
    pub counter_type: String,
    pub tags: String,
    pub timestamp: i64,
}

/// Counter type of instantaneous samples on the monitoring backend
pub const GAUGE: &str = "GAUGE";

/// Memory reading posted by a reporter to the eviction governor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageReport {
    pub container_id: String,
    pub memory_usage: u64,
}
