use std::{str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use serde::Deserialize;

/// What to do when an uploaded image cannot be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageUploadPolicy {
    /// Fail the whole create; nothing is written.
    #[default]
    Abort,
    /// Keep going with the client supplied `image_url`, if any.
    Fallback,
}

impl FromStr for ImageUploadPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "fallback" => Ok(Self::Fallback),
            other => Err(anyhow!("unknown image upload policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_retries: u32,
    pub retry_delay_secs: u64,
    /// Upper bound on a single connection attempt.
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub account_name: String,
    pub account_key: String,
    pub container_name: String,
    pub url_expiry_hours: u64,
    pub endpoint: Option<String>,
    pub region: String,
}

impl StorageConfig {
    // presigned URLs are capped at seven days
    pub const MAX_EXPIRY_HOURS: u64 = 7 * 24;

    pub fn url_expiry(&self) -> Duration {
        Duration::from_secs(self.url_expiry_hours * 60 * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub image_upload_policy: ImageUploadPolicy,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so callers other than the
    /// binary never have to mutate the process environment.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| get(key).with_context(|| format!("{key} must be set"));

        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
            max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            connect_retries: parse_or(&get, "DATABASE_CONNECT_RETRIES", 10)?,
            retry_delay_secs: parse_or(&get, "DATABASE_RETRY_DELAY_SECS", 3)?,
            connect_timeout_secs: parse_or(&get, "DATABASE_CONNECT_TIMEOUT_SECS", 5)?,
        };
        if database.connect_timeout_secs == 0 {
            anyhow::bail!("DATABASE_CONNECT_TIMEOUT_SECS must be at least 1");
        }

        let storage = StorageConfig {
            account_name: required("STORAGE_ACCOUNT_NAME")?,
            account_key: required("STORAGE_ACCOUNT_KEY")?,
            container_name: required("STORAGE_CONTAINER_NAME")?,
            url_expiry_hours: parse_or(&get, "STORAGE_URL_EXPIRY_HOURS", 1)?,
            endpoint: get("STORAGE_ENDPOINT").filter(|v| !v.is_empty()),
            region: get("STORAGE_REGION").unwrap_or_else(|| "us-east-1".into()),
        };
        if storage.url_expiry_hours == 0 || storage.url_expiry_hours > StorageConfig::MAX_EXPIRY_HOURS {
            anyhow::bail!(
                "STORAGE_URL_EXPIRY_HOURS must be between 1 and {}",
                StorageConfig::MAX_EXPIRY_HOURS
            );
        }

        Ok(Self {
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "APP_PORT", 8000)?,
            database,
            storage,
            image_upload_policy: parse_or(&get, "IMAGE_UPLOAD_POLICY", ImageUploadPolicy::Abort)?,
        })
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid value {raw:?} for {key}: {e}")),
        None => Ok(default),
    }
}
