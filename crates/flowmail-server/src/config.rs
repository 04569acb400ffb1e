use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use flowmail_core::DriverMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Sqlite,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub storage: StorageKind,
    pub db_path: PathBuf,
    pub driver: DriverMode,
    pub cron_interval: Duration,
    pub webhook_timeout: Duration,
    pub accounts_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let port = var("FLOWMAIL_PORT", "3000")
            .parse()
            .context("FLOWMAIL_PORT must be a port number")?;

        let storage = match var("FLOWMAIL_STORAGE", "sqlite").to_ascii_lowercase().as_str() {
            "sqlite" => StorageKind::Sqlite,
            "memory" => StorageKind::Memory,
            other => return Err(anyhow!("unknown FLOWMAIL_STORAGE '{}' (expected sqlite or memory)", other)),
        };

        let driver = var("FLOWMAIL_DRIVER", "interval")
            .parse::<DriverMode>()
            .map_err(|e| anyhow!("FLOWMAIL_DRIVER: {}", e))?;

        let cron_secs: u64 = var("FLOWMAIL_CRON_INTERVAL_SECS", "60")
            .parse()
            .context("FLOWMAIL_CRON_INTERVAL_SECS must be a number of seconds")?;
        let timeout_secs: u64 = var("FLOWMAIL_WEBHOOK_TIMEOUT_SECS", "10")
            .parse()
            .context("FLOWMAIL_WEBHOOK_TIMEOUT_SECS must be a number of seconds")?;

        Ok(Self {
            host: var("FLOWMAIL_HOST", "0.0.0.0"),
            port,
            storage,
            db_path: var("FLOWMAIL_DB_PATH", "flowmail.db").into(),
            driver,
            cron_interval: Duration::from_secs(cron_secs.max(1)),
            webhook_timeout: Duration::from_secs(timeout_secs.max(1)),
            accounts_file: lookup("FLOWMAIL_ACCOUNTS_FILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = config(&[]).unwrap();
        assert_eq!(c.host, "0.0.0.0");
        assert_eq!(c.port, 3000);
        assert_eq!(c.storage, StorageKind::Sqlite);
        assert_eq!(c.db_path, PathBuf::from("flowmail.db"));
        assert_eq!(c.driver, DriverMode::Interval);
        assert_eq!(c.cron_interval, Duration::from_secs(60));
        assert_eq!(c.webhook_timeout, Duration::from_secs(10));
        assert!(c.accounts_file.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let c = config(&[
            ("FLOWMAIL_PORT", "8080"),
            ("FLOWMAIL_STORAGE", "Memory"),
            ("FLOWMAIL_DRIVER", "cron"),
            ("FLOWMAIL_CRON_INTERVAL_SECS", "0"),
            ("FLOWMAIL_ACCOUNTS_FILE", "accounts.json"),
        ])
        .unwrap();
        assert_eq!(c.port, 8080);
        assert_eq!(c.storage, StorageKind::Memory);
        assert_eq!(c.driver, DriverMode::Cron);
        assert_eq!(c.cron_interval, Duration::from_secs(1));
        assert_eq!(c.accounts_file, Some(PathBuf::from("accounts.json")));
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(config(&[("FLOWMAIL_PORT", "http")]).is_err());
        assert!(config(&[("FLOWMAIL_STORAGE", "postgres")]).is_err());
        assert!(config(&[("FLOWMAIL_DRIVER", "worker")]).is_err());
    }
}
