//! Process configuration, read once from `RESERVD_*` environment variables.
//!
//! Unset or unparseable values fall back to their defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailProviderConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub lifecycle_interval: Duration,
    pub reaper_interval: Duration,
    pub coworking_capacity: u32,
    pub office_capacity: u32,
    pub domiciliation_capacity: u32,
    pub mail_from: String,
    pub mail_primary: Option<MailProviderConfig>,
    pub mail_secondary: Option<MailProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5434,
            data_dir: PathBuf::from("./data"),
            password: "reservd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            lifecycle_interval: Duration::from_secs(3600),
            reaper_interval: Duration::from_secs(3600),
            coworking_capacity: 4,
            office_capacity: 1,
            domiciliation_capacity: 1,
            mail_from: "reservations@localhost".into(),
            mail_primary: None,
            mail_secondary: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let or = |key: &str, default: String| lookup(key).unwrap_or(default);
        let secs = |key: &str, default: Duration| {
            parse_opt::<u64>(&lookup, key)
                .filter(|s| *s > 0)
                .map_or(default, Duration::from_secs)
        };
        let provider = |prefix: &str| {
            let url = lookup(&format!("{prefix}_URL")).filter(|u| !u.trim().is_empty())?;
            let api_key = lookup(&format!("{prefix}_KEY")).unwrap_or_default();
            Some(MailProviderConfig { url, api_key })
        };

        Self {
            bind: or("RESERVD_BIND", d.bind),
            port: parse_or(&lookup, "RESERVD_PORT", d.port),
            data_dir: lookup("RESERVD_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            password: or("RESERVD_PASSWORD", d.password),
            max_connections: parse_or(&lookup, "RESERVD_MAX_CONNECTIONS", d.max_connections),
            compact_threshold: parse_or(&lookup, "RESERVD_COMPACT_THRESHOLD", d.compact_threshold),
            metrics_port: parse_opt(&lookup, "RESERVD_METRICS_PORT"),
            lifecycle_interval: secs("RESERVD_LIFECYCLE_INTERVAL_SECS", d.lifecycle_interval),
            reaper_interval: secs("RESERVD_REAPER_INTERVAL_SECS", d.reaper_interval),
            // A space always holds at least one reservation
            coworking_capacity: parse_or(&lookup, "RESERVD_COWORKING_CAPACITY", d.coworking_capacity)
                .max(1),
            office_capacity: parse_or(&lookup, "RESERVD_OFFICE_CAPACITY", d.office_capacity).max(1),
            domiciliation_capacity: parse_or(
                &lookup,
                "RESERVD_DOMICILIATION_CAPACITY",
                d.domiciliation_capacity,
            )
            .max(1),
            mail_from: or("RESERVD_MAIL_FROM", d.mail_from),
            mail_primary: provider("RESERVD_MAIL_PRIMARY"),
            mail_secondary: provider("RESERVD_MAIL_SECONDARY"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parse_opt<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    parse_opt(lookup, key).unwrap_or(default)
}
