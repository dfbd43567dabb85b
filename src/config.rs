//! Configuration management
//!
//! Loads configuration from contest.toml with support for:
//! - Server binding and the optional SQLite database
//! - Reconciliation loop timing
//! - GitHub / GitLab OAuth apps and API endpoints
//! - Hacktoberfest campaign settings
//!
//! Environment variables override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platforms::hacktoberfest::{event_window, EVENT_YEARS};
use crate::platforms::{AdapterConfig, DEFAULT_TIMEOUT};

const DEFAULT_CONFIG: &str = include_str!("../contest.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default = "PlatformConfig::github")]
    pub github: PlatformConfig,
    #[serde(default = "PlatformConfig::gitlab")]
    pub gitlab: PlatformConfig,
    #[serde(default)]
    pub hacktoberfest: HacktoberfestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// No path keeps all state in memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub reconcile_interval_secs: u64,
    #[serde(default)]
    pub initial_delay_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 60,
            initial_delay_secs: 0,
        }
    }
}

impl LifecycleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

/// One OAuth app plus API endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub base_url: String,
    pub oauth_base_url: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Server-side token for API reads; usually from the environment
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl PlatformConfig {
    fn github() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            base_url: "https://api.github.com".to_string(),
            oauth_base_url: "https://github.com".to_string(),
            redirect_uri: None,
            scopes: vec!["read:user".to_string(), "public_repo".to_string()],
            timeout_secs: default_timeout_secs(),
            token: None,
        }
    }

    fn gitlab() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            base_url: "https://gitlab.com/api/v4".to_string(),
            oauth_base_url: "https://gitlab.com".to_string(),
            redirect_uri: None,
            scopes: vec!["read_user".to_string(), "read_api".to_string()],
            timeout_secs: default_timeout_secs(),
            token: None,
        }
    }

    /// Credentials present; otherwise the platform stays disabled
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }

    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            base_url: self.base_url.clone(),
            oauth_base_url: self.oauth_base_url.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scopes: self.scopes.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            api_token: self.token.clone(),
        }
    }

    fn apply_env(&mut self, prefix: &str, env: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = env(&format!("{}_CLIENT_ID", prefix)) {
            self.client_id = v;
        }
        if let Some(v) = env(&format!("{}_CLIENT_SECRET", prefix)) {
            self.client_secret = v;
        }
        if let Some(v) = env(&format!("{}_BASE_URL", prefix)) {
            self.base_url = v;
        }
        if let Some(v) = env(&format!("{}_TOKEN", prefix)) {
            self.token = Some(v);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HacktoberfestConfig {
    pub enabled: bool,
    pub year: i32,
    #[serde(default = "default_required_prs")]
    pub required_prs: usize,
}

fn default_required_prs() -> usize {
    crate::platforms::hacktoberfest::DEFAULT_REQUIRED_PRS
}

impl Default for HacktoberfestConfig {
    fn default() -> Self {
        use chrono::Datelike;
        Self {
            enabled: true,
            year: chrono::Utc::now().year(),
            required_prs: default_required_prs(),
        }
    }
}

impl Config {
    /// Load from contest.toml or use defaults, then apply the environment
    pub fn load() -> Result<Self> {
        Self::load_from("contest.toml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config: Self = if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")?
        };
        config.apply_env(&|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
        config.validate()?;
        Ok(config)
    }

    /// Reject values the services cannot run with
    pub fn validate(&self) -> Result<()> {
        let year = self.hacktoberfest.year;
        if event_window(year).is_none() {
            anyhow::bail!(
                "hacktoberfest.year {} is outside {}..={}",
                year,
                EVENT_YEARS.start(),
                EVENT_YEARS.end()
            );
        }
        Ok(())
    }

    /// Environment wins over file values
    pub fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        self.github.apply_env("GITHUB", env);
        self.gitlab.apply_env("GITLAB", env);

        if let Some(host) = env("CONTEST_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env("CONTEST_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(path) = env("CONTEST_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig::default(),
            lifecycle: LifecycleConfig::default(),
            github: PlatformConfig::github(),
            gitlab: PlatformConfig::gitlab(),
            hacktoberfest: HacktoberfestConfig::default(),
        })
    }
}
