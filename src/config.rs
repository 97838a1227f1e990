use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Environment used when neither `--env` nor `DATACOLLAB_ENV` is set.
pub const DEFAULT_ENV: &str = "staging";

/// Shortest master secret accepted for deriving the cookie signing key.
pub const MIN_SECRET_LEN: usize = 32;

/// Application settings, one TOML file per environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the web server listens on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Base URL used in links sent by email
    #[serde(default = "default_public_url")]
    pub public_base_url: String,

    /// Where users are sent when a login check fails
    #[serde(default = "default_login_page")]
    pub login_page_url: String,

    /// Secret that signs the session cookie
    pub master_secret_key: String,

    /// Directory holding the JSON document store
    #[serde(default = "default_database_dir")]
    pub database_dir: PathBuf,

    /// Directory of handlebars templates
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// Directory served under `/static`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    pub email_sender_address: String,

    #[serde(default)]
    pub bucket_name: String,

    /// Request body limit for upload forms
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,

    pub api: ApiConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

/// Sibling internal APIs reached over HTTP.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub check_user_logged_in: String,
    pub create_project: String,
    pub create_file: String,
    pub create_joins: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            login: "/v2/login/".to_string(),
            check_user_logged_in: "/v2/users/logged-in".to_string(),
            create_project: "/v2/projects/".to_string(),
            create_file: "/v2/files/".to_string(),
            create_joins: "/v2/joins/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    pub ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            backend: SessionBackend::Memory,
            ttl_seconds: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub relay: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_public_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_login_page() -> String {
    "/login".to_string()
}

fn default_database_dir() -> PathBuf {
    PathBuf::from("database")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_max_upload_mb() -> usize {
    50
}

fn default_timeout() -> u64 {
    30
}

fn default_smtp_port() -> u16 {
    465
}

impl Config {
    /// Path of the config file for an environment: `config/<env>.toml`.
    pub fn path_for_env(env: &str) -> PathBuf {
        Path::new("config").join(format!("{}.toml", env))
    }

    /// Read, apply `DATACOLLAB_*` overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Overrides for deploy-time secrets and addresses.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATACOLLAB_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("DATACOLLAB_API_HOST") {
            self.api.host = v;
        }
        if let Some(v) = lookup("DATACOLLAB_MASTER_SECRET_KEY") {
            self.master_secret_key = v;
        }
        if let Some(v) = lookup("DATACOLLAB_DATABASE_DIR") {
            self.database_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATACOLLAB_PUBLIC_BASE_URL") {
            self.public_base_url = v;
        }
        if let Some(smtp) = self.smtp.as_mut() {
            if let Some(v) = lookup("DATACOLLAB_SMTP_PASSWORD") {
                smtp.password = v;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.master_secret_key.len() < MIN_SECRET_LEN {
            return Err(AppError::Config(format!(
                "master_secret_key must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if !self.api.host.starts_with("http://") && !self.api.host.starts_with("https://") {
            return Err(AppError::Config(format!(
                "api.host must be an http(s) URL, got '{}'",
                self.api.host
            )));
        }
        if self.session.ttl_seconds == 0 {
            return Err(AppError::Config("session.ttl_seconds must be positive".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds)
    }

    /// Request body limit in bytes, clamped instead of overflowing.
    pub fn upload_limit_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        master_secret_key = "0123456789abcdef0123456789abcdef"
        email_sender_address = "noreply@example.org"

        [api]
        host = "http://127.0.0.1:5001"
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bind, "127.0.0.1:5000");
        assert_eq!(config.api.timeout_seconds, 30);
        assert_eq!(config.api.endpoints.create_joins, "/v2/joins/");
        assert_eq!(config.session.backend, SessionBackend::Memory);
        assert_eq!(config.session_ttl(), Duration::from_secs(86_400));
        assert!(config.smtp.is_none());
    }

    #[test]
    fn upload_limit_saturates() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.upload_limit_bytes(), 50 * 1024 * 1024);
        config.max_upload_mb = usize::MAX;
        assert_eq!(config.upload_limit_bytes(), usize::MAX);
    }

    #[test]
    fn short_secret_is_rejected() {
        let content = MINIMAL.replace("0123456789abcdef0123456789abcdef", "short");
        let config = Config::from_toml(&content).unwrap();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.apply_env_overrides(|key| match key {
            "DATACOLLAB_API_HOST" => Some("https://api.internal".to_string()),
            "DATACOLLAB_BIND" => Some("0.0.0.0:8080".to_string()),
            _ => None,
        });
        assert_eq!(config.api.host, "https://api.internal");
        assert_eq!(config.bind, "0.0.0.0:8080");
    }

    #[test]
    fn session_backend_and_smtp_parse() {
        let content = format!(
            "{}\n[session]\nbackend = \"file\"\nttl_seconds = 60\n\n[smtp]\nrelay = \"smtp.example.org\"\nusername = \"u\"\npassword = \"p\"\n",
            MINIMAL
        );
        let config = Config::from_toml(&content).unwrap();
        assert_eq!(config.session.backend, SessionBackend::File);
        assert_eq!(config.session.ttl_seconds, 60);
        assert_eq!(config.smtp.unwrap().port, 465);
    }

    #[test]
    fn env_path_layout() {
        assert_eq!(
            Config::path_for_env("staging"),
            PathBuf::from("config/staging.toml")
        );
    }
}
