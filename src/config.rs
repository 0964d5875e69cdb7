use std::{path::Path, time::Duration};

use anyhow::Context;

use crate::calil_client::DEFAULT_BASE_URL;

pub const APP_KEY_VAR: &str = "CALIL_APP_KEY";
pub const BASE_URL_VAR: &str = "CALIL_BASE_URL";
pub const TIMEOUT_VAR: &str = "CALIL_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub app_key: String,
    pub base_url: String,
    /// Per-request timeout; none means reqwest's default (no timeout).
    pub timeout: Option<Duration>,
}

impl Config {
    /// Load `.env.local` (or `.env`) if present, then read the environment.
    pub fn load() -> anyhow::Result<Self> {
        if Path::new(".env.local").exists() {
            dotenvy::from_filename(".env.local").context("Failed to read .env.local")?;
        } else if Path::new(".env").exists() {
            dotenvy::from_filename(".env").context("Failed to read .env")?;
        }
        Self::from_env()
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let app_key = lookup(APP_KEY_VAR).unwrap_or_default();
        if app_key.is_empty() {
            tracing::warn!("{} is not set; the service will reject requests", APP_KEY_VAR);
        }
        let base_url = lookup(BASE_URL_VAR)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let timeout = match lookup(TIMEOUT_VAR).filter(|v| !v.trim().is_empty()) {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid {}: {}", TIMEOUT_VAR, raw))?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };
        Ok(Config {
            app_key,
            base_url,
            timeout,
        })
    }
}
