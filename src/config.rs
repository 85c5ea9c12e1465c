use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::engine::EngineConfig;
use crate::limits::{MAX_CONNECTIONS, MAX_RELEASE_ATTEMPTS};
use crate::retry::RetryPolicy;

/// Which store backs the engine. Chosen explicitly; there is no fallback
/// from one to the other at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Process memory only. State is lost on exit.
    Memory,
    /// Write-ahead log under the data directory.
    Wal,
}

#[derive(Debug)]
pub struct ConfigError(String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Process configuration, read once at startup from `COURTSIDE_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub store: StoreMode,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub reaper_interval: Duration,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary variable source. Unparseable tuning numbers fall
    /// back to their defaults; a number outside its range and an unknown store
    /// mode are errors.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let num = |k: &str, default: u64, range: RangeInclusive<u64>| bounded(&var, k, default, range);

        let store = match var("COURTSIDE_STORE").as_deref().unwrap_or("memory") {
            "memory" => StoreMode::Memory,
            "wal" => StoreMode::Wal,
            other => {
                return Err(ConfigError(format!(
                    "COURTSIDE_STORE must be \"memory\" or \"wal\", got {other:?}"
                )));
            }
        };

        let release_retry = RetryPolicy {
            max_attempts: bounded(&var, "COURTSIDE_RELEASE_MAX_ATTEMPTS", 3, 1..=MAX_RELEASE_ATTEMPTS)?,
            initial_delay: Duration::from_millis(num("COURTSIDE_RELEASE_BACKOFF_MS", 50, 0..=60_000)?),
            ..RetryPolicy::default()
        };

        Ok(Self {
            bind: var("COURTSIDE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: var("COURTSIDE_PORT").and_then(|s| s.parse().ok()).unwrap_or(7878),
            store,
            data_dir: PathBuf::from(var("COURTSIDE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: bounded(&var, "COURTSIDE_MAX_CONNECTIONS", 256, 1..=MAX_CONNECTIONS)?,
            compact_threshold: num("COURTSIDE_COMPACT_THRESHOLD", 1000, 0..=u64::MAX)?,
            metrics_port: var("COURTSIDE_METRICS_PORT").and_then(|s| s.parse().ok()),
            reaper_interval: Duration::from_secs(num("COURTSIDE_REAPER_INTERVAL_SECS", 30, 1..=86_400)?),
            engine: EngineConfig {
                store_timeout: Duration::from_millis(num("COURTSIDE_STORE_TIMEOUT_MS", 5000, 1..=600_000)?),
                release_retry,
            },
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("courtside.wal")
    }
}

/// Parse `k` straight into its target type. A value that does not parse
/// (including one too large for the type) falls back to `default`.
fn bounded<T>(
    var: impl Fn(&str) -> Option<String>,
    k: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Display,
{
    let Some(raw) = var(k) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(v) if range.contains(&v) => Ok(v),
        Ok(v) => Err(ConfigError(format!(
            "{k} must be between {} and {}, got {v}",
            range.start(),
            range.end()
        ))),
        Err(_) => {
            warn!("{k}={raw:?} is not a number, using {default}");
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.store, StoreMode::Memory);
        assert_eq!(cfg.port, 7878);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.engine.store_timeout, Duration::from_secs(5));
        assert_eq!(cfg.engine.release_retry.max_attempts, 3);
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/courtside.wal"));
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("COURTSIDE_STORE", "wal"),
            ("COURTSIDE_PORT", "9000"),
            ("COURTSIDE_DATA_DIR", "/var/lib/courtside"),
            ("COURTSIDE_STORE_TIMEOUT_MS", "250"),
            ("COURTSIDE_RELEASE_MAX_ATTEMPTS", "7"),
            ("COURTSIDE_METRICS_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(cfg.store, StoreMode::Wal);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/courtside/courtside.wal"));
        assert_eq!(cfg.engine.store_timeout, Duration::from_millis(250));
        assert_eq!(cfg.engine.release_retry.max_attempts, 7);
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup(&[("COURTSIDE_MAX_CONNECTIONS", "lots")])).unwrap();
        assert_eq!(cfg.max_connections, 256);
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        for (k, v) in [
            ("COURTSIDE_MAX_CONNECTIONS", "0"),
            ("COURTSIDE_RELEASE_MAX_ATTEMPTS", "0"),
            ("COURTSIDE_RELEASE_MAX_ATTEMPTS", "4294967295"),
            ("COURTSIDE_STORE_TIMEOUT_MS", "0"),
            ("COURTSIDE_REAPER_INTERVAL_SECS", "0"),
        ] {
            let err = Config::from_lookup(lookup(&[(k, v)])).unwrap_err();
            assert!(err.to_string().contains(k), "{k}={v}: {err}");
        }
    }

    #[test]
    fn numbers_too_big_for_their_type_do_not_wrap() {
        let cfg = Config::from_lookup(lookup(&[
            ("COURTSIDE_RELEASE_MAX_ATTEMPTS", "4294967296"),
            ("COURTSIDE_MAX_CONNECTIONS", "18446744073709551616"),
        ]))
        .unwrap();
        assert_eq!(cfg.engine.release_retry.max_attempts, 3);
        assert_eq!(cfg.max_connections, 256);

        let cfg = Config::from_lookup(lookup(&[("COURTSIDE_RELEASE_MAX_ATTEMPTS", " 20 ")])).unwrap();
        assert_eq!(cfg.engine.release_retry.max_attempts, MAX_RELEASE_ATTEMPTS);
    }

    #[test]
    fn unknown_store_mode_is_rejected() {
        let err = Config::from_lookup(lookup(&[("COURTSIDE_STORE", "dynamo")])).unwrap_err();
        assert!(err.to_string().contains("dynamo"));
    }
}
