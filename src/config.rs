//! Client settings: config file, environment, and `~/.netrc` credentials.

use crate::error::AdminError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.wandb.ai";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Optional `config.json` under the user config directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub entity: Option<String>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("wandb-admin").join("config.json"))
    }

    /// Load the config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config file {}", path.display()))
    }
}

/// Resolved settings for the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl ClientConfig {
    /// Resolve settings from the environment, the config file, and `~/.netrc`.
    pub fn resolve(file: &FileConfig) -> Result<Self> {
        let base_url = std::env::var("WANDB_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| file.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let api_key = match std::env::var("WANDB_API_KEY").ok().filter(|s| !s.is_empty()) {
            Some(key) => key,
            None => match file.api_key.clone() {
                Some(key) => key,
                None => netrc_api_key(&base_url)?.ok_or_else(|| {
                    AdminError::config(
                        "no API key found: set WANDB_API_KEY, add api_key to the config file, \
                         or run `wandb login`",
                    )
                })?,
            },
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            request_timeout: file.request_timeout.unwrap_or(DEFAULT_TIMEOUT),
            user_agent: format!("wandb-admin/{}", env!("CARGO_PKG_VERSION")),
        })
    }
}

/// Pick a value from CLI/env first, then the config file.
pub fn require_setting(
    value: Option<String>,
    fallback: Option<&String>,
    flag: &str,
) -> Result<String, AdminError> {
    value
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.filter(|v| !v.is_empty()).cloned())
        .ok_or_else(|| AdminError::config(format!("missing {flag}")))
}

fn host_of(base_url: &str) -> &str {
    let without_scheme = base_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(base_url);
    without_scheme
        .split(['/', ':'])
        .next()
        .unwrap_or(without_scheme)
}

fn netrc_api_key(base_url: &str) -> Result<Option<String>> {
    let Some(home) = dirs::home_dir() else {
        return Ok(None);
    };
    let path = home.join(".netrc");
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read {}", path.display()))?;
    Ok(parse_netrc_password(&raw, host_of(base_url)))
}

/// Password for `machine` in netrc syntax.
fn parse_netrc_password(contents: &str, machine: &str) -> Option<String> {
    let mut tokens = contents.split_whitespace();
    let mut in_machine = false;
    while let Some(tok) = tokens.next() {
        match tok {
            "machine" => in_machine = tokens.next() == Some(machine),
            "default" => in_machine = false,
            "password" => {
                let value = tokens.next();
                if in_machine {
                    return value.map(str::to_string);
                }
            }
            _ => {}
        }
    }
    None
}
