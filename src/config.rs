//! Service configuration.
//!
//! Settings are layered: `orgboard.toml` (every field has a default), then
//! a `.env` file and the process environment, then CLI flags applied by
//! the `serve` command.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! dev = false
//!
//! [database]
//! path = "orgboard.db"
//!
//! [media]
//! dir = "media"
//! max_upload_bytes = 10485760
//!
//! [ai]
//! model = "gemini-2.0-flash"
//! timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! Environment overrides: `ORGBOARD_HOST`, `ORGBOARD_PORT`,
//! `ORGBOARD_DB_PATH`, `ORGBOARD_MEDIA_DIR`, `GEMINI_API_KEY`,
//! `ORGBOARD_AI_MODEL`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "orgboard.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a separately served frontend.
    #[serde(default)]
    pub dev: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("orgboard.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSection {
    #[serde(default = "default_media_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("media")
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            dir: default_media_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSection {
    /// Usually supplied through `GEMINI_API_KEY` rather than the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ai_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_ai_timeout_secs() -> u64 {
    30
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_ai_model(),
            base_url: None,
            timeout_secs: default_ai_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; `ORGBOARD_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for daily-rolling log files, in addition to stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub media: MediaSection,
    #[serde(default)]
    pub ai: AiSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse orgboard.toml")
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize orgboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// File, then `.env`, then process environment.
    pub fn load_layered(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ORGBOARD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("ORGBOARD_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring invalid ORGBOARD_PORT"),
            }
        }
        if let Some(path) = lookup("ORGBOARD_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("ORGBOARD_MEDIA_DIR") {
            self.media.dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.ai.api_key = Some(key);
        }
        if let Some(model) = lookup("ORGBOARD_AI_MODEL") {
            self.ai.model = model;
        }
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0: the OS will pick a random port".to_string());
        }
        if self.database.path.as_os_str().is_empty() {
            warnings.push("database.path is empty".to_string());
        }
        if self.media.max_upload_bytes == 0 {
            warnings.push("media.max_upload_bytes is 0: every upload will be rejected".to_string());
        }
        if !self.ai_enabled() {
            warnings.push("No AI API key configured (GEMINI_API_KEY): AI summaries are disabled".to_string());
        }
        if self.ai.timeout_secs == 0 {
            warnings.push("ai.timeout_secs is 0: AI requests will time out immediately".to_string());
        }
        if self.ai.model.trim().is_empty() {
            warnings.push("ai.model is empty".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging.level '{}': expected a tracing filter such as 'info' or 'orgboard=debug'",
                self.logging.level
            ));
        }

        warnings
    }
}
