//! Runtime configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Connection and logging settings of a [`Db`](crate::Db).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Log every statement at debug level.
    pub log_queries: bool,
    /// Statements slower than this are logged as warnings.
    pub slow_query_ms: Option<u64>,
    /// Pool size used by [`Db::connect`](crate::Db::connect).
    pub max_connections: u32,
    /// Connection string.
    pub database_url: Option<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            log_queries: true,
            slow_query_ms: None,
            max_connections: 10,
            database_url: None,
        }
    }
}

impl DbConfig {
    /// Reads `DATABASE_URL`, `RELQ_LOG_QUERIES`, `RELQ_SLOW_QUERY_MS` and
    /// `RELQ_MAX_CONNECTIONS`. Unset or malformed variables keep their
    /// defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        config.database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        if let Some(raw) = lookup("RELQ_LOG_QUERIES") {
            match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.log_queries = true,
                "0" | "false" | "no" | "off" => config.log_queries = false,
                _ => warn!(value = %raw, "Ignoring invalid RELQ_LOG_QUERIES"),
            }
        }
        if let Some(raw) = lookup("RELQ_SLOW_QUERY_MS") {
            match raw.parse() {
                Ok(ms) => config.slow_query_ms = Some(ms),
                Err(_) => warn!(value = %raw, "Ignoring invalid RELQ_SLOW_QUERY_MS"),
            }
        }
        if let Some(raw) = lookup("RELQ_MAX_CONNECTIONS") {
            match raw.parse() {
                Ok(n) if n > 0 => config.max_connections = n,
                _ => warn!(value = %raw, "Ignoring invalid RELQ_MAX_CONNECTIONS"),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup_reads_every_variable() {
        let vars: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgres://localhost/app"),
            ("RELQ_LOG_QUERIES", "off"),
            ("RELQ_SLOW_QUERY_MS", "250"),
            ("RELQ_MAX_CONNECTIONS", "4"),
        ]
        .into_iter()
        .collect();
        let config = DbConfig::from_lookup(|k| vars.get(k).map(ToString::to_string));
        assert_eq!(
            config,
            DbConfig {
                log_queries: false,
                slow_query_ms: Some(250),
                max_connections: 4,
                database_url: Some("postgres://localhost/app".into()),
            }
        );
    }

    #[test]
    fn test_malformed_values_keep_defaults() {
        let config = DbConfig::from_lookup(|k| match k {
            "RELQ_SLOW_QUERY_MS" => Some("soon".into()),
            "RELQ_MAX_CONNECTIONS" => Some("0".into()),
            _ => None,
        });
        assert_eq!(config, DbConfig::default());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: DbConfig = serde_json::from_str(r#"{"slow_query_ms": 100}"#).unwrap();
        assert!(config.log_queries);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.slow_query_ms, Some(100));
    }
}
