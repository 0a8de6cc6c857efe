//! Service configuration.
//!
//! Settings are layered, lowest precedence first:
//! built-in defaults → `pageforge.toml` (or `--config <path>`) → environment
//! (including a `.env` file loaded by `dotenvy`) → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5000
//!
//! [auth]
//! api_secret = "change-me"
//!
//! [github]
//! token = "ghp_..."
//! timeout_secs = 60
//!
//! [gemini]
//! api_key = "..."
//! model = "gemini-2.5-flash"
//!
//! [cache]
//! dir = "cache"
//! ttl_hours = 24
//!
//! [callback]
//! timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! directory = "logs"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::secret::Secret;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "pageforge.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Shared secret every task submission must carry.
    pub api_secret: Option<Secret>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    pub token: Option<Secret>,
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.github.com".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub api_key: Option<Secret>,
    pub model: String,
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            api_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub dir: PathBuf,
    pub ttl_hours: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            ttl_hours: 24,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallbackSettings {
    pub timeout_secs: u64,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// When set, logs are also written to a daily-rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json: false,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub github: GitHubSettings,
    pub gemini: GeminiSettings,
    pub cache: CacheSettings,
    pub callback: CallbackSettings,
    pub logging: LoggingSettings,
}

impl ServiceConfig {
    /// Load configuration from an explicit file, or `pageforge.toml` in the
    /// working directory when present, then apply process environment.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();

        let mut config = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration TOML")
    }

    /// Overlay environment variables. `lookup` abstracts `std::env::var` so
    /// tests can supply a fixed environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{}'", port))?;
        }
        if let Some(secret) = get("API_SECRET") {
            self.auth.api_secret = Some(Secret::new(secret));
        }
        if let Some(token) = get("GITHUB_TOKEN") {
            self.github.token = Some(Secret::new(token));
        }
        if let Some(url) = get("GITHUB_API_URL") {
            self.github.api_url = url;
        }
        if let Some(key) = get("GEMINI_API_KEY") {
            self.gemini.api_key = Some(Secret::new(key));
        }
        if let Some(model) = get("GEMINI_MODEL") {
            self.gemini.model = model;
        }
        if let Some(url) = get("GEMINI_API_URL") {
            self.gemini.api_url = url;
        }
        if let Some(dir) = get("CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(ttl) = get("CACHE_TTL_HOURS") {
            self.cache.ttl_hours = ttl
                .trim()
                .parse()
                .with_context(|| format!("CACHE_TTL_HOURS must be a whole number, got '{}'", ttl))?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(dir) = get("LOG_DIR") {
            self.logging.directory = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Non-fatal configuration problems worth reporting at start-up.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.auth.api_secret.as_ref().is_none_or(Secret::is_blank) {
            warnings.push("API_SECRET is not set; every task submission will be rejected".to_string());
        }
        if self.github.token.is_none() {
            warnings.push("GITHUB_TOKEN is not set; background runs will fail at the commit stage".to_string());
        }
        if self.gemini.api_key.is_none() {
            warnings.push("GEMINI_API_KEY is not set; code synthesis will fail".to_string());
        }
        warnings
    }
}
