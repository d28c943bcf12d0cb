// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration
//!
//! Stored as JSON at `~/.campusgate/config.json`. Missing fields take their
//! defaults, so an empty file (or no file) is a valid configuration.
//!
//! Environment variables override the file:
//!
//! | Variable                  | Field                         |
//! |---------------------------|-------------------------------|
//! | `CAMPUSGATE_BACKEND_URL`  | `backend_url`                 |
//! | `CAMPUSGATE_BACKEND_KEY`  | `backend_anon_key`            |
//! | `OPENROUTER_API_KEY`      | `providers.openrouter_key`    |
//! | `RESEND_API_KEY`          | `providers.resend_key`        |
//! | `TRANSLATE_API_KEY`       | `providers.translate_key`     |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::security::{RateLimitConfig, SessionConfig};

pub const ENV_BACKEND_URL: &str = "CAMPUSGATE_BACKEND_URL";
pub const ENV_BACKEND_KEY: &str = "CAMPUSGATE_BACKEND_KEY";
pub const ENV_OPENROUTER_KEY: &str = "OPENROUTER_API_KEY";
pub const ENV_RESEND_KEY: &str = "RESEND_API_KEY";
pub const ENV_TRANSLATE_KEY: &str = "TRANSLATE_API_KEY";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the hosted backend
    #[serde(default)]
    pub backend_url: Option<String>,
    /// Public (anon) key of the hosted backend
    #[serde(default)]
    pub backend_anon_key: Option<String>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
}

/// Proxy server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Relying-party id for passkey challenges
    pub rp_id: String,
    /// Relying-party display name for passkey challenges
    pub rp_name: String,
    pub request_timeout_secs: u64,
    /// Sustained requests per second per client IP
    pub per_second: u64,
    /// Burst size per client IP
    pub burst_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8787,
            rp_id: "localhost".to_string(),
            rp_name: "Campus Learning".to_string(),
            request_timeout_secs: 60,
            per_second: 2,
            burst_size: 30,
        }
    }
}

/// Upstream provider credentials used by the proxy endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub openrouter_key: Option<String>,
    pub chat_model: String,
    pub resend_key: Option<String>,
    pub email_from: String,
    pub translate_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            openrouter_key: None,
            chat_model: crate::cloud::models::AUTO.to_string(),
            resend_key: None,
            email_from: "Campus Learning <no-reply@campus.local>".to_string(),
            translate_key: None,
        }
    }
}

impl AppConfig {
    /// Config directory (`~/.campusgate`), created on first use.
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        let dir = home.join(".campusgate");
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load from the default path and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.session = config.session.validated();
        config.rate_limit = config.rate_limit.validated();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any lookup; empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_BACKEND_URL) {
            self.backend_url = Some(v);
        }
        if let Some(v) = get(ENV_BACKEND_KEY) {
            self.backend_anon_key = Some(v);
        }
        if let Some(v) = get(ENV_OPENROUTER_KEY) {
            self.providers.openrouter_key = Some(v);
        }
        if let Some(v) = get(ENV_RESEND_KEY) {
            self.providers.resend_key = Some(v);
        }
        if let Some(v) = get(ENV_TRANSLATE_KEY) {
            self.providers.translate_key = Some(v);
        }
    }

    /// Whether both backend URL and key are present.
    pub fn backend_configured(&self) -> bool {
        self.backend_url.as_deref().is_some_and(|v| !v.is_empty())
            && self.backend_anon_key.as_deref().is_some_and(|v| !v.is_empty())
    }
}

/// Mask a secret for display: first 6 characters, then `...`.
pub fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(6).collect();
    if key.chars().count() > 6 {
        format!("{}...", visible)
    } else {
        "***".to_string()
    }
}
