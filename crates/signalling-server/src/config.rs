//! Service configuration.
//!
//! Configuration merges three sources, lowest priority first: built-in
//! defaults, a `config.yaml` searched in `/etc/signalling/`,
//! `$HOME/.signalling` and the working directory, then environment
//! variables prefixed `SIGNALLING_` (nested keys join with `_`, e.g.
//! `SIGNALLING_POSTGRES_HOST`). List values (`ice_servers`) come from the
//! file or defaults only. Sensitive fields are redacted in Debug output.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Default listener port for both gRPC services.
pub const DEFAULT_PORT: u16 = 8053;

/// Default bus subject namespace.
pub const DEFAULT_EVENT_NAMESPACE: &str = "qh";

/// Default NATS endpoint.
pub const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {0}: {1}")]
    ReadFile(PathBuf, std::io::Error),

    #[error("failed to parse configuration file: {0}")]
    ParseFile(#[from] serde_yaml::Error),

    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Credential type of a configured ICE server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IceCredentialType {
    #[default]
    None,
    Password,
    Oauth,
}

impl From<IceCredentialType> for proto_gen::signalling::IceCredentialType {
    fn from(value: IceCredentialType) -> Self {
        match value {
            IceCredentialType::None => proto_gen::signalling::IceCredentialType::None,
            IceCredentialType::Password => proto_gen::signalling::IceCredentialType::Password,
            IceCredentialType::Oauth => proto_gen::signalling::IceCredentialType::Oauth,
        }
    }
}

/// ICE server configuration handed to peers so they can establish ICE
/// candidates between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceServer {
    pub url: String,
    pub username: String,
    pub credential_type: IceCredentialType,
    pub password: String,
    pub access_token: String,
    pub mac_key: String,
}

impl Default for IceServer {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            credential_type: IceCredentialType::None,
            password: String::new(),
            access_token: String::new(),
            mac_key: String::new(),
        }
    }
}

impl IceServer {
    /// A STUN-only server entry.
    #[must_use]
    pub fn stun(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }
}

/// Connection parameters for the membership store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "signalling".to_string(),
        }
    }
}

impl PostgresConfig {
    /// Render the connection URL consumed by the pool.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// Password is redacted in Debug output.
impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .finish()
    }
}

/// Signalling service configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log verbosity (default "info").
    pub log_level: String,

    /// Membership store connection parameters.
    pub postgres: PostgresConfig,

    /// Listener port for both gRPC services.
    pub port: u16,

    /// Subject prefix on the bus.
    pub event_namespace: String,

    /// Shared secret for access token MACs.
    pub access_secret: String,

    /// Bus endpoint.
    pub nats_url: String,

    /// ICE servers handed to peers via GetProfile.
    pub ice_servers: Vec<IceServer>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            postgres: PostgresConfig::default(),
            port: DEFAULT_PORT,
            event_namespace: DEFAULT_EVENT_NAMESPACE.to_string(),
            access_secret: "access-secret".to_string(),
            nats_url: DEFAULT_NATS_URL.to_string(),
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun.fwdnet.net"),
                IceServer::stun("stun:stunserver.org"),
            ],
        }
    }
}

/// Secrets are redacted in Debug output.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("log_level", &self.log_level)
            .field("postgres", &self.postgres)
            .field("port", &self.port)
            .field("event_namespace", &self.event_namespace)
            .field("access_secret", &"[REDACTED]")
            .field("nats_url", &self.nats_url)
            .field("ice_servers", &self.ice_servers)
            .finish()
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a found configuration file cannot be read or
    /// parsed, or an environment override does not parse.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::ReadFile(path.clone(), e))?;
                serde_yaml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env(&env::vars().collect())?;
        Ok(config)
    }

    /// Build configuration from defaults plus a variable map (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error when an override value does not parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(vars)?;
        Ok(config)
    }

    /// Search the well-known locations for `config.yaml`, first hit wins.
    fn find_config_file() -> Option<PathBuf> {
        let mut candidates = vec![PathBuf::from("/etc/signalling/config.yaml")];
        if let Ok(home) = env::var("HOME") {
            candidates.push(PathBuf::from(home).join(".signalling/config.yaml"));
        }
        candidates.push(PathBuf::from("config.yaml"));
        candidates.into_iter().find(|p| p.is_file())
    }

    /// Apply `SIGNALLING_`-prefixed overrides from a variable map.
    fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(value) = vars.get("SIGNALLING_LOG_LEVEL") {
            self.log_level = value.clone();
        }
        if let Some(value) = vars.get("SIGNALLING_PORT") {
            self.port = value.parse().map_err(|e| ConfigError::InvalidValue {
                key: "SIGNALLING_PORT".to_string(),
                message: format!("expected a port number, got '{value}': {e}"),
            })?;
        }
        if let Some(value) = vars.get("SIGNALLING_EVENT_NAMESPACE") {
            self.event_namespace = value.clone();
        }
        if let Some(value) = vars.get("SIGNALLING_ACCESS_SECRET") {
            self.access_secret = value.clone();
        }
        if let Some(value) = vars.get("SIGNALLING_NATS_URL") {
            self.nats_url = value.clone();
        }
        if let Some(value) = vars.get("SIGNALLING_POSTGRES_HOST") {
            self.postgres.host = value.clone();
        }
        if let Some(value) = vars.get("SIGNALLING_POSTGRES_PORT") {
            self.postgres.port = value.parse().map_err(|e| ConfigError::InvalidValue {
                key: "SIGNALLING_POSTGRES_PORT".to_string(),
                message: format!("expected a port number, got '{value}': {e}"),
            })?;
        }
        if let Some(value) = vars.get("SIGNALLING_POSTGRES_USER") {
            self.postgres.user = value.clone();
        }
        if let Some(value) = vars.get("SIGNALLING_POSTGRES_PASSWORD") {
            self.postgres.password = value.clone();
        }
        if let Some(value) = vars.get("SIGNALLING_POSTGRES_DATABASE") {
            self.postgres.database = value.clone();
        }
        Ok(())
    }
}
