use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Bound on waiting for the store's connection locks.
    pub db_timeout: Duration,
    /// Bound on one request's store call.
    pub request_timeout: Duration,
    pub outbox_interval: Duration,
    pub outbox_retention: Duration,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("STELLA_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let db_path = lookup("STELLA_DB_PATH").unwrap_or_else(|| "stella.db".into());

        Ok(Self {
            host,
            port: parse_or(&lookup, "STELLA_PORT", 3000)?,
            db_path: PathBuf::from(db_path),
            db_timeout: Duration::from_millis(parse_nonzero(&lookup, "STELLA_DB_TIMEOUT_MS", 5000)?),
            request_timeout: Duration::from_millis(parse_nonzero(
                &lookup,
                "STELLA_REQUEST_TIMEOUT_MS",
                10_000,
            )?),
            outbox_interval: Duration::from_millis(parse_nonzero(
                &lookup,
                "STELLA_OUTBOX_INTERVAL_MS",
                500,
            )?),
            outbox_retention: Duration::from_secs(
                parse_or::<u64>(&lookup, "STELLA_OUTBOX_RETENTION_HOURS", 24)? * 3600,
            ),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got '{raw}'")),
    }
}

/// Durations that drive timers or deadlines must be positive.
fn parse_nonzero(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> anyhow::Result<u64> {
    let value = parse_or(lookup, key, default)?;
    anyhow::ensure!(value > 0, "{key} must be greater than 0");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("stella.db"));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.outbox_retention, Duration::from_secs(24 * 3600));
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn overrides_are_read() {
        let config = config_from(&[("STELLA_PORT", "8080"), ("STELLA_DB_TIMEOUT_MS", "250")]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_numbers_fail_startup() {
        assert!(config_from(&[("STELLA_PORT", "http")]).is_err());
        assert!(config_from(&[("STELLA_OUTBOX_INTERVAL_MS", "-5")]).is_err());
        assert!(config_from(&[("STELLA_OUTBOX_INTERVAL_MS", "0")]).is_err());
        assert!(config_from(&[("STELLA_REQUEST_TIMEOUT_MS", "0")]).is_err());
        assert!(config_from(&[("STELLA_DB_TIMEOUT_MS", "0")]).is_err());
    }
}
