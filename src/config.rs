//! Server configuration from `ROOMKEEP_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::engine::{CalendarWindow, Settings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// WAL file of the durable store.
    pub data_file: PathBuf,
    /// Prometheus exporter port; disabled when unset.
    pub metrics_port: Option<u16>,
    pub max_connections: usize,
    /// WAL appends after which the log is compacted.
    pub compact_threshold: u64,
    pub settings: Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_file: PathBuf::from("./data/roomkeep.wal"),
            metrics_port: None,
            max_connections: 256,
            compact_threshold: 1000,
            settings: Settings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={:?}: {}", self.var, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from any variable source. Unset variables keep their
    /// defaults; set but malformed ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        let defaults = config.settings;

        if let Some(bind) = lookup("ROOMKEEP_BIND") {
            config.bind = bind;
        }
        if let Some(path) = lookup("ROOMKEEP_DATA_FILE") {
            config.data_file = PathBuf::from(path);
        }
        config.port = parse(&lookup, "ROOMKEEP_PORT")?.unwrap_or(config.port);
        config.metrics_port = parse(&lookup, "ROOMKEEP_METRICS_PORT")?;
        config.max_connections =
            positive(&lookup, "ROOMKEEP_MAX_CONNECTIONS")?.unwrap_or(config.max_connections);
        config.compact_threshold =
            positive(&lookup, "ROOMKEEP_COMPACT_THRESHOLD")?.unwrap_or(config.compact_threshold);

        config.settings = Settings {
            tz: parse::<Tz>(&lookup, "ROOMKEEP_TIMEZONE")?.unwrap_or(defaults.tz),
            booking_horizon_months: positive(&lookup, "ROOMKEEP_BOOKING_HORIZON_MONTHS")?
                .unwrap_or(defaults.booking_horizon_months),
            visit_horizon_months: positive(&lookup, "ROOMKEEP_VISIT_HORIZON_MONTHS")?
                .unwrap_or(defaults.visit_horizon_months),
            window: CalendarWindow {
                lookback_days: parse(&lookup, "ROOMKEEP_CALENDAR_LOOKBACK_DAYS")?
                    .unwrap_or(defaults.window.lookback_days),
                lookahead_days: parse(&lookup, "ROOMKEEP_CALENDAR_LOOKAHEAD_DAYS")?
                    .unwrap_or(defaults.window.lookahead_days),
            },
        };
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError {
            var,
            reason: e.to_string(),
            value,
        })
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    match parse::<T>(lookup, var)? {
        Some(v) if v == T::default() => Err(ConfigError {
            var,
            value: lookup(var).unwrap_or_default(),
            reason: "must be greater than zero".into(),
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.settings.booking_horizon_months, 3);
        assert_eq!(config.settings.visit_horizon_months, 12);
        assert_eq!(config.addr(), "0.0.0.0:7878");
    }

    #[test]
    fn reads_every_variable() {
        let config = from(&[
            ("ROOMKEEP_BIND", "127.0.0.1"),
            ("ROOMKEEP_PORT", "9000"),
            ("ROOMKEEP_DATA_FILE", "/var/lib/roomkeep/log.wal"),
            ("ROOMKEEP_METRICS_PORT", "9100"),
            ("ROOMKEEP_MAX_CONNECTIONS", "8"),
            ("ROOMKEEP_COMPACT_THRESHOLD", "50"),
            ("ROOMKEEP_TIMEZONE", "Europe/Amsterdam"),
            ("ROOMKEEP_BOOKING_HORIZON_MONTHS", "6"),
            ("ROOMKEEP_VISIT_HORIZON_MONTHS", "24"),
            ("ROOMKEEP_CALENDAR_LOOKBACK_DAYS", "0"),
            ("ROOMKEEP_CALENDAR_LOOKAHEAD_DAYS", "7"),
        ])
        .unwrap();
        assert_eq!(config.addr(), "127.0.0.1:9000");
        assert_eq!(config.data_file, PathBuf::from("/var/lib/roomkeep/log.wal"));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.settings.tz, chrono_tz::Europe::Amsterdam);
        assert_eq!(config.settings.booking_horizon_months, 6);
        assert_eq!(config.settings.visit_horizon_months, 24);
        assert_eq!(config.settings.window.lookback_days, 0);
        assert_eq!(config.settings.window.lookahead_days, 7);
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = from(&[("ROOMKEEP_PORT", "eighty")]).unwrap_err();
        assert_eq!(err.var, "ROOMKEEP_PORT");
        let err = from(&[("ROOMKEEP_TIMEZONE", "Mars/Olympus")]).unwrap_err();
        assert_eq!(err.var, "ROOMKEEP_TIMEZONE");
        let err = from(&[("ROOMKEEP_BOOKING_HORIZON_MONTHS", "0")]).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }
}
