//! Farm configuration: cluster identity, sizing caps and wait policy.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::container::ContainerKey;
use crate::error::FarmError;

/// Default interval between done-file checks.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default ceiling on waiting for done files (two days).
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 2 * 24 * 60 * 60;

/// Configuration passed to every platform the factory builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    /// Scheduler head node to connect to.
    pub head_node: String,
    /// Name of the container job sweep tasks are grouped under.
    pub job_name: String,
    /// Default owner for tasks created through the remote farm.
    pub owner: String,
    /// Account the container job runs as.
    pub user_name: String,
    /// Upper bound on nodes for exclusive containers.
    pub max_nodes: u32,
    /// Upper bound on cores for shared containers.
    pub max_cores: u32,
    /// Pool size for the multi-worker platform.
    pub workers: usize,
    pub poll_interval_secs: u64,
    pub wait_timeout_secs: u64,
    /// Files whose joint existence signals that remote work is done.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub done_files: Vec<PathBuf>,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            head_node: "localhost".to_string(),
            job_name: "sweep".to_string(),
            owner: "farm".to_string(),
            user_name: "farm".to_string(),
            max_nodes: 16,
            max_cores: 256,
            workers: default_workers(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
            done_files: Vec::new(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl FarmConfig {
    /// Set the head node.
    pub fn with_head_node(mut self, head_node: impl Into<String>) -> Self {
        self.head_node = head_node.into();
        self
    }

    /// Set the container job name.
    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = job_name.into();
        self
    }

    /// Set the default owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Set the user account.
    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = user_name.into();
        self
    }

    /// Set the node and core caps.
    pub fn with_caps(mut self, max_nodes: u32, max_cores: u32) -> Self {
        self.max_nodes = max_nodes;
        self.max_cores = max_cores;
        self
    }

    /// Set the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the done-file poll interval and ceiling.
    pub fn with_wait_policy(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval_secs = poll_interval.as_secs().max(1);
        self.wait_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the done files.
    pub fn with_done_files(mut self, files: Vec<PathBuf>) -> Self {
        self.done_files = files;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Container identity for tasks owned by `owner`.
    pub fn container_key(&self, owner: &str) -> ContainerKey {
        ContainerKey::new(&self.job_name, owner, &self.user_name)
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, FarmError> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| FarmError::Configuration(format!("invalid farm config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build a config from environment variables.
    ///
    /// - `FARM_HEAD_NODE` (default: `localhost`)
    /// - `FARM_JOB_NAME` (default: `sweep`)
    /// - `FARM_OWNER` (default: the user name)
    /// - `FARM_USER`, falling back to `USER` (default: `farm`)
    /// - `FARM_MAX_NODES`, `FARM_MAX_CORES`
    /// - `FARM_WORKERS` (default: available parallelism)
    /// - `FARM_POLL_INTERVAL_SECS` (default: 5)
    /// - `FARM_WAIT_TIMEOUT_SECS` (default: two days)
    /// - `FARM_DONE_FILES` (platform path-list separator)
    pub fn from_env() -> Result<Self, FarmError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`FarmConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FarmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let mut cfg = Self::default();

        if let Some(v) = get("FARM_HEAD_NODE") {
            cfg.head_node = v;
        }
        if let Some(v) = get("FARM_JOB_NAME") {
            cfg.job_name = v;
        }
        if let Some(v) = get("FARM_USER").or_else(|| get("USER")) {
            cfg.user_name = v;
        }
        cfg.owner = get("FARM_OWNER").unwrap_or_else(|| cfg.user_name.clone());

        if let Some(v) = parse_env(&get, "FARM_MAX_NODES")? {
            cfg.max_nodes = v;
        }
        if let Some(v) = parse_env(&get, "FARM_MAX_CORES")? {
            cfg.max_cores = v;
        }
        if let Some(v) = parse_env(&get, "FARM_WORKERS")? {
            cfg.workers = v;
        }
        if let Some(v) = parse_env(&get, "FARM_POLL_INTERVAL_SECS")? {
            cfg.poll_interval_secs = v;
        }
        if let Some(v) = parse_env(&get, "FARM_WAIT_TIMEOUT_SECS")? {
            cfg.wait_timeout_secs = v;
        }
        if let Some(v) = get("FARM_DONE_FILES") {
            cfg.done_files = std::env::split_paths(&v).collect();
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values no platform can work with.
    pub fn validate(&self) -> Result<(), FarmError> {
        if self.poll_interval_secs == 0 {
            return Err(FarmError::Configuration(
                "poll interval must be at least one second".into(),
            ));
        }
        if self.workers == 0 {
            return Err(FarmError::Configuration("worker pool cannot be empty".into()));
        }
        if self.max_nodes == 0 || self.max_cores == 0 {
            return Err(FarmError::Configuration(
                "node and core caps must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim().to_string();
    if s.is_empty() { None } else { Some(s) }
}

fn parse_env<T, G>(get: &G, key: &str) -> Result<Option<T>, FarmError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| FarmError::Configuration(format!("invalid {key}={raw}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_wait_two_days_polling_every_five_seconds() {
        let cfg = FarmConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.wait_timeout(), Duration::from_secs(172_800));
    }

    #[test]
    fn env_overrides_defaults() -> Result<(), FarmError> {
        let cfg = FarmConfig::from_lookup(lookup(&[
            ("FARM_HEAD_NODE", "hpc-head"),
            ("FARM_USER", "svc-render"),
            ("FARM_MAX_NODES", "4"),
            ("FARM_POLL_INTERVAL_SECS", "30"),
            ("FARM_WORKERS", "3"),
        ]))?;
        assert_eq!(cfg.head_node, "hpc-head");
        assert_eq!(cfg.user_name, "svc-render");
        assert_eq!(cfg.owner, "svc-render");
        assert_eq!(cfg.max_nodes, 4);
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn user_falls_back_to_login_name() -> Result<(), FarmError> {
        let cfg = FarmConfig::from_lookup(lookup(&[("USER", "alice"), ("FARM_OWNER", "team")]))?;
        assert_eq!(cfg.user_name, "alice");
        assert_eq!(cfg.owner, "team");
        assert_eq!(cfg.container_key("team").to_string(), "sweep/team@alice");
        Ok(())
    }

    #[test]
    fn malformed_number_is_a_configuration_error() {
        let err = FarmConfig::from_lookup(lookup(&[("FARM_MAX_CORES", "lots")]));
        assert!(matches!(err, Err(FarmError::Configuration(msg)) if msg.contains("FARM_MAX_CORES")));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = FarmConfig::from_lookup(lookup(&[("FARM_POLL_INTERVAL_SECS", "0")]));
        assert!(err.is_err());
    }

    #[test]
    fn json_keeps_defaults_for_missing_fields() -> Result<(), FarmError> {
        let cfg = FarmConfig::from_json_str(r#"{"job_name": "frames", "done_files": ["/share/a.done"]}"#)?;
        assert_eq!(cfg.job_name, "frames");
        assert_eq!(cfg.done_files, vec![PathBuf::from("/share/a.done")]);
        assert_eq!(cfg.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        Ok(())
    }

    #[test]
    fn json_with_zero_poll_interval_is_rejected() {
        let err = FarmConfig::from_json_str(r#"{"poll_interval_secs": 0}"#);
        assert!(matches!(err, Err(FarmError::Configuration(msg)) if msg.contains("poll interval")));
    }
}
