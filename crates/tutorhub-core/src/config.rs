use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use ::config as cfg;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "TUTORHUB";
pub const CONFIG_DIR_VAR: &str = "TUTORHUB_CONFIG_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Memory,
    RocksDb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    pub path: String,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/tutorhub.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    #[serde(default)]
    pub rocksdb: RocksDbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "AuthConfig::default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
}

impl AuthConfig {
    fn default_access_ttl() -> u64 {
        300
    }

    fn default_refresh_ttl() -> u64 {
        86_400
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: Self::default_access_ttl(),
            refresh_token_ttl_secs: Self::default_refresh_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetConfig {
    #[serde(default = "PasswordResetConfig::default_ttl")]
    pub token_ttl_minutes: u64,
    #[serde(default = "PasswordResetConfig::default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl PasswordResetConfig {
    fn default_ttl() -> u64 {
        30
    }

    fn default_purge_interval() -> u64 {
        300
    }
}

impl Default for PasswordResetConfig {
    fn default() -> Self {
        Self {
            token_ttl_minutes: Self::default_ttl(),
            purge_interval_secs: Self::default_purge_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MailTransport {
    #[default]
    Log,
    Outbox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "MailConfig::default_from")]
    pub from: String,
    /// Base URL of the frontend used in reset links. When unset the link is
    /// built from the incoming request's host.
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default)]
    pub transport: MailTransport,
}

impl MailConfig {
    fn default_from() -> String {
        "no-reply@tutorhub.local".to_string()
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: Self::default_from(),
            public_base_url: None,
            transport: MailTransport::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "SecurityConfig::default_login_attempts")]
    pub login_attempts_per_minute: u32,
    /// How often idle per-email throttle entries are dropped.
    #[serde(default = "SecurityConfig::default_throttle_prune")]
    pub throttle_prune_interval_secs: u64,
}

impl SecurityConfig {
    fn default_login_attempts() -> u32 {
        10
    }

    fn default_throttle_prune() -> u64 {
        60
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            login_attempts_per_minute: Self::default_login_attempts(),
            throttle_prune_interval_secs: Self::default_throttle_prune(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    // Do not serialize secrets; allow deserialization from config/env only.
    #[serde(default, skip_serializing)]
    pub jwt_secret: Option<SecretString>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub password_reset: PasswordResetConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            password_reset: PasswordResetConfig::default(),
            mail: MailConfig::default(),
            logging: LoggingConfig::default(),
            security: SecurityConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("APP_ENV").unwrap_or_else(|_| "development".to_string())
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.server.host.trim().is_empty(),
            "server.host cannot be empty"
        );
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        if self.database.backend == DatabaseBackend::RocksDb {
            anyhow::ensure!(
                !self.database.rocksdb.path.trim().is_empty(),
                "database.rocksdb.path cannot be empty"
            );
        }
        anyhow::ensure!(
            self.auth.access_token_ttl_secs > 0 && self.auth.refresh_token_ttl_secs > 0,
            "auth token lifetimes must be > 0"
        );
        anyhow::ensure!(
            self.password_reset.token_ttl_minutes > 0,
            "password_reset.token_ttl_minutes must be > 0"
        );
        anyhow::ensure!(
            self.security.login_attempts_per_minute > 0,
            "security.login_attempts_per_minute must be > 0"
        );
        if self.is_production() {
            let secret_len = self
                .secrets
                .jwt_secret
                .as_ref()
                .map(|s| s.expose_secret().len())
                .unwrap_or(0);
            anyhow::ensure!(
                secret_len >= 32,
                "secrets.jwt_secret must be at least 32 bytes in production"
            );
        }
        Ok(())
    }

    /// Settings as TOML with secrets left out.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing settings")
    }

    /// `$TUTORHUB_CONFIG_DIR`, falling back to `./config`.
    pub fn default_config_dir() -> PathBuf {
        env::var(CONFIG_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join("config")
            })
    }

    pub fn load() -> Result<Self> {
        let env_name = Self::default_env();
        Self::load_from_sources(&Self::default_config_dir(), &env_name)
    }

    /// Layers `default`, `{env_name}` and `local` files from `config_dir`,
    /// then `TUTORHUB__*` environment variables.
    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Self> {
        let settings: Settings = cfg::Config::builder()
            .set_default("env", env_name)
            .context("setting env default")?
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        settings.validate()?;
        Ok(settings)
    }
}
