//! Runtime configuration loaded from environment variables.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use domain::DispatcherConfig;
use event_dispatch::EventDispatcherConfig;
use event_store::EventStoreConfig;
use saga::SagaConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Process configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `COMMAND_LOCK_CAPACITY`: resident per-aggregate command locks (default: `1024`)
/// - `STORE_LOCK_CAPACITY`: resident per-aggregate append locks (default: `1024`)
/// - `SAGA_LOCK_CAPACITY`: resident per-saga locks (default: `10000`)
/// - `LOCK_TIMEOUT_MS`: how long any of those locks is waited for (default: `5000`)
/// - `EVENT_WORKERS`: event dispatch pool size (default: half the cores, at least 1)
/// - `DATABASE_URL`: PostgreSQL connection string; unset keeps everything in memory
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `METRICS_ADDR`: Prometheus listener address; unset disables the listener
/// - `IS_LEADER`: whether this process runs singleton work (default: `true`)
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub command_lock_capacity: NonZeroUsize,
    pub store_lock_capacity: NonZeroUsize,
    pub saga_lock_capacity: NonZeroUsize,
    pub lock_timeout: Duration,
    pub event_workers: usize,
    pub database_url: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_addr: Option<SocketAddr>,
    pub is_leader: bool,
}

impl RuntimeConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`. Unparsable values fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            command_lock_capacity: parse_var(&lookup, "COMMAND_LOCK_CAPACITY")
                .unwrap_or(defaults.command_lock_capacity),
            store_lock_capacity: parse_var(&lookup, "STORE_LOCK_CAPACITY")
                .unwrap_or(defaults.store_lock_capacity),
            saga_lock_capacity: parse_var(&lookup, "SAGA_LOCK_CAPACITY")
                .unwrap_or(defaults.saga_lock_capacity),
            lock_timeout: parse_var(&lookup, "LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            event_workers: parse_var(&lookup, "EVENT_WORKERS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.event_workers),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_var(&lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            metrics_addr: parse_var(&lookup, "METRICS_ADDR"),
            is_leader: parse_var(&lookup, "IS_LEADER").unwrap_or(defaults.is_leader),
        }
    }

    pub fn store_config(&self) -> EventStoreConfig {
        EventStoreConfig {
            lock_capacity: self.store_lock_capacity,
            lock_timeout: self.lock_timeout,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            lock_capacity: self.command_lock_capacity,
            lock_timeout: self.lock_timeout,
        }
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            lock_capacity: self.saga_lock_capacity,
            lock_timeout: self.lock_timeout,
        }
    }

    pub fn event_dispatcher_config(&self) -> EventDispatcherConfig {
        EventDispatcherConfig {
            workers: self.event_workers,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let store = EventStoreConfig::default();
        let dispatcher = DispatcherConfig::default();
        let saga = SagaConfig::default();
        Self {
            command_lock_capacity: dispatcher.lock_capacity,
            store_lock_capacity: store.lock_capacity,
            saga_lock_capacity: saga.lock_capacity,
            lock_timeout: Duration::from_millis(5000),
            event_workers: EventDispatcherConfig::default_workers(),
            database_url: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_addr: None,
            is_leader: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> RuntimeConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);

        assert_eq!(config.command_lock_capacity.get(), 1024);
        assert_eq!(config.store_lock_capacity.get(), 1024);
        assert_eq!(config.saga_lock_capacity.get(), 10_000);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert!(config.event_workers >= 1);
        assert!(config.database_url.is_none());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.metrics_addr.is_none());
        assert!(config.is_leader);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("COMMAND_LOCK_CAPACITY", "64"),
            ("SAGA_LOCK_CAPACITY", "128"),
            ("LOCK_TIMEOUT_MS", "250"),
            ("EVENT_WORKERS", "3"),
            ("DATABASE_URL", "postgres://localhost/events"),
            ("LOG_FORMAT", "JSON"),
            ("METRICS_ADDR", "127.0.0.1:9000"),
            ("IS_LEADER", "false"),
        ]);

        assert_eq!(config.command_lock_capacity.get(), 64);
        assert_eq!(config.saga_lock_capacity.get(), 128);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.event_workers, 3);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/events"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9000".parse().unwrap()));
        assert!(!config.is_leader);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("COMMAND_LOCK_CAPACITY", "0"),
            ("EVENT_WORKERS", "0"),
            ("LOCK_TIMEOUT_MS", "soon"),
            ("DATABASE_URL", " "),
        ]);

        assert_eq!(config.command_lock_capacity.get(), 1024);
        assert!(config.event_workers >= 1);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_component_configs_share_lock_timeout() {
        let config = from_pairs(&[("LOCK_TIMEOUT_MS", "100")]);

        assert_eq!(config.store_config().lock_timeout, Duration::from_millis(100));
        assert_eq!(config.dispatcher_config().lock_timeout, Duration::from_millis(100));
        assert_eq!(config.saga_config().lock_timeout, Duration::from_millis(100));
    }
}
