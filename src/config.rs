//! Configuration manager.
//!
//! Non-secret settings come from `config.yaml`. Token secrets, token
//! expiries and the deployment environment come from environment variables,
//! which always win over the file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ACCESS_TOKEN_SECRET: &str = "ACCESS_TOKEN_SECRET";
pub const ACCESS_TOKEN_EXPIRY: &str = "ACCESS_TOKEN_EXPIRY";
pub const REFRESH_TOKEN_SECRET: &str = "REFRESH_TOKEN_SECRET";
pub const REFRESH_TOKEN_EXPIRY: &str = "REFRESH_TOKEN_EXPIRY";
const APP_ENV: &str = "APP_ENV";
const NODE_ENV: &str = "NODE_ENV";

/// Errors raised while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("URL is invalid: {0}")]
    Url(#[from] url::ParseError),
    #[error("`{name}` is not a valid duration: {source}")]
    Duration {
        name: &'static str,
        source: humantime::DurationError,
    },
    #[error("missing `{0}` environment variable")]
    MissingSecret(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of current instance.
    #[serde(default)]
    pub url: String,
    /// Socket address to listen on.
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub(crate) version: String,
    #[serde(skip)]
    pub(crate) path: PathBuf,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to password hashing.
    #[serde(default, skip_serializing)]
    pub password: Password,
    /// Related to JsonWebToken configuration.
    #[serde(default, skip_serializing)]
    pub token: Token,
    /// Related to session cookies.
    #[serde(default, skip_serializing)]
    pub cookie: Cookie,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            url: String::default(),
            address: default_address(),
            environment: Environment::default(),
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            postgres: None,
            password: Password::default(),
            token: Token::default(),
            cookie: Cookie::default(),
        }
    }
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_owned()
}

/// Deployment environment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Algorithm used for new password hashes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Bcrypt,
    Argon2,
}

/// Password hashing configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Password {
    pub algorithm: HashAlgorithm,
    /// Bcrypt cost factor.
    pub cost: u32,
    pub argon2: Argon2,
}

impl Default for Password {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Bcrypt,
            cost: bcrypt::DEFAULT_COST,
            argon2: Argon2::default(),
        }
    }
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Json Web Token configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Token {
    #[serde(skip_serializing)]
    pub access_secret: String,
    #[serde(skip_serializing)]
    pub refresh_secret: String,
    #[serde(with = "duration")]
    pub access_expiry: Duration,
    #[serde(with = "duration")]
    pub refresh_expiry: Duration,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            access_secret: String::default(),
            refresh_secret: String::default(),
            access_expiry: Duration::from_secs(60 * 60), // 1 hour.
            refresh_expiry: Duration::from_secs(60 * 60 * 24 * 7), // 7 days.
        }
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_secret", &"[REDACTED]")
            .field("refresh_secret", &"[REDACTED]")
            .field("access_expiry", &self.access_expiry)
            .field("refresh_expiry", &self.refresh_expiry)
            .finish()
    }
}

impl Token {
    /// Both secrets must be set before any token is signed.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() {
            return Err(ConfigError::MissingSecret(ACCESS_TOKEN_SECRET));
        }
        if self.refresh_secret.is_empty() {
            return Err(ConfigError::MissingSecret(REFRESH_TOKEN_SECRET));
        }
        Ok(())
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cookie {
    /// Cookie holding the refresh token.
    pub refresh_name: String,
    /// Cookie read by the request guard before the `Authorization` header.
    pub access_name: String,
    pub path: String,
}

impl Default for Cookie {
    fn default() -> Self {
        Self {
            refresh_name: "refreshToken".to_owned(),
            access_name: "accessToken".to_owned(),
            path: "/".to_owned(),
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment overrides.
    pub fn read(self) -> Result<Arc<Self>, ConfigError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let mut config = match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(mut config) => {
                    if !config.url.is_empty() {
                        config.url = self.normalize_url(&config.url)?;
                    }
                    config
                },
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        config.version = VERSION.to_owned();
        config.apply_env(|name| std::env::var(name).ok())?;

        Ok(Arc::new(config))
    }

    /// Overlay environment variables looked up through `var`.
    pub fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(secret) = var(ACCESS_TOKEN_SECRET) {
            self.token.access_secret = secret;
        }
        if let Some(secret) = var(REFRESH_TOKEN_SECRET) {
            self.token.refresh_secret = secret;
        }
        if let Some(expiry) = var(ACCESS_TOKEN_EXPIRY) {
            self.token.access_expiry = parse_duration(ACCESS_TOKEN_EXPIRY, &expiry)?;
        }
        if let Some(expiry) = var(REFRESH_TOKEN_EXPIRY) {
            self.token.refresh_expiry = parse_duration(REFRESH_TOKEN_EXPIRY, &expiry)?;
        }
        if let Some(env) = var(APP_ENV).or_else(|| var(NODE_ENV)) {
            self.environment = Environment::parse(&env);
        }

        Ok(())
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Parse `1h`, `7d`, `15m` or a bare number of seconds.
pub fn parse_duration(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    humantime::parse_duration(value).map_err(|source| ConfigError::Duration { name, source })
}

mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Human(String),
    }

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*value)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
            Raw::Human(value) => {
                super::parse_duration("duration", &value).map_err(serde::de::Error::custom)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration(ACCESS_TOKEN_EXPIRY, "1h").unwrap(),
            Duration::from_secs(3600)
        );
        assert_eq!(
            parse_duration(REFRESH_TOKEN_EXPIRY, "7d").unwrap(),
            Duration::from_secs(604_800)
        );
        assert_eq!(
            parse_duration(ACCESS_TOKEN_EXPIRY, "900").unwrap(),
            Duration::from_secs(900)
        );
        assert!(parse_duration(ACCESS_TOKEN_EXPIRY, "soon").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.token.access_expiry, Duration::from_secs(3600));
        assert_eq!(config.token.refresh_expiry, Duration::from_secs(604_800));
        assert_eq!(config.password.cost, 10);
        assert_eq!(config.cookie.refresh_name, "refreshToken");
        assert!(config.token.check().is_err());
    }

    #[test]
    fn test_apply_env() {
        let vars = HashMap::from([
            (ACCESS_TOKEN_SECRET, "access"),
            (REFRESH_TOKEN_SECRET, "refresh"),
            (ACCESS_TOKEN_EXPIRY, "15m"),
            (NODE_ENV, "production"),
        ]);
        let mut config = Configuration::default();
        config
            .apply_env(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.token.access_secret, "access");
        assert_eq!(config.token.access_expiry, Duration::from_secs(900));
        assert_eq!(config.token.refresh_expiry, Duration::from_secs(604_800));
        assert!(config.environment.is_production());
        assert!(config.token.check().is_ok());
    }

    #[test]
    fn test_app_env_wins_over_node_env() {
        let vars = HashMap::from([(APP_ENV, "test"), (NODE_ENV, "production")]);
        let mut config = Configuration::default();
        config
            .apply_env(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.environment, Environment::Test);
    }

    #[test]
    fn test_yaml() {
        let yaml = r#"
name: campus
url: campus.example.org
token:
  access_expiry: 30m
  refresh_expiry: 1209600
password:
  algorithm: argon2
"#;
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "campus");
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.token.access_expiry, Duration::from_secs(1800));
        assert_eq!(config.token.refresh_expiry, Duration::from_secs(1_209_600));
        assert_eq!(config.password.algorithm, HashAlgorithm::Argon2);
        assert_eq!(config.password.cost, 10);
    }
}
