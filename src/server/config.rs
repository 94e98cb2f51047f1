use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{Role, TokenManager};
use crate::bus::LAPTOP_UPDATES_TOPIC;
use crate::error::Error;
use crate::store::User;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname or IP address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
    /// Token signing settings.
    pub auth: AuthSettings,
    /// Image storage settings.
    pub storage: StorageSettings,
    /// Telemetry republishing settings.
    pub telemetry: TelemetrySettings,
    /// Metrics exporter configuration.
    pub metrics: MetricsSettings,
    /// Credentials created at startup.
    pub users: Vec<UserSettings>,
}

/// Token signing settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Shared secret the token encryption key is derived from.
    pub token_secret: String,
    /// Lifetime of an access token, in seconds.
    pub token_duration_secs: u64,
}

/// Image storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory uploaded images are written to.
    pub image_dir: PathBuf,
}

/// Telemetry republishing settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Topic snapshots are published on.
    pub topic: String,
    /// Messages a slow subscriber may lag behind before losing the oldest.
    pub bus_capacity: usize,
}

/// Metrics exporter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Whether metrics export is enabled.
    pub enabled: bool,
    /// Hostname or IP address for metrics server.
    pub host: String,
    /// Port number for metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// Converts host and port into a socket address for the metrics server.
    pub fn addr(&self) -> Result<SocketAddr, Error> {
        parse_addr(&self.host, self.port)
    }
}

/// A credential seeded at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSettings {
    pub username: String,
    pub password: String,
    pub role: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            auth: AuthSettings {
                token_secret: "cd56e76e8bf6a1c32eb26966c864e983".to_string(),
                token_duration_secs: 15 * 60,
            },
            storage: StorageSettings {
                image_dir: PathBuf::from("tmp"),
            },
            telemetry: TelemetrySettings {
                topic: LAPTOP_UPDATES_TOPIC.to_string(),
                bus_capacity: 1024,
            },
            metrics: MetricsSettings {
                enabled: false,
                host: "127.0.0.1".to_string(),
                port: 9090,
            },
            users: vec![
                UserSettings {
                    username: "admin".to_string(),
                    password: "secret".to_string(),
                    role: "admin".to_string(),
                },
                UserSettings {
                    username: "user".to_string(),
                    password: "secret".to_string(),
                    role: "user".to_string(),
                },
            ],
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `.env` file, TOML file, and environment variables.
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables with `PCBOOK_` prefix, `__` separating nested keys
    ///    (e.g., `PCBOOK_PORT=8080`, `PCBOOK_AUTH__TOKEN_DURATION_SECS=60`)
    /// 2. TOML configuration file (if exists)
    /// 3. Built-in defaults
    ///
    /// A `.env` file in the current directory or any parent is loaded into the
    /// environment first; a missing one is not an error.
    ///
    /// The TOML file path can be set via `PCBOOK_CONFIG_PATH`. If not set, it
    /// defaults to `./config/server.toml`; a missing file is skipped.
    ///
    /// # Errors
    /// Returns an error if a source is malformed or holds values of the wrong type.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> figment::error::Result<Self> {
        use figment::providers::{Env, Format, Serialized, Toml};
        use figment::Figment;

        let _ = dotenvy::dotenv();

        let config_path = std::env::var("PCBOOK_CONFIG_PATH")
            .unwrap_or_else(|_| "config/server.toml".to_string());

        Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PCBOOK_").split("__"))
            .extract()
    }

    /// Converts host and port into the listen address.
    pub fn addr(&self) -> Result<SocketAddr, Error> {
        parse_addr(&self.host, self.port)
    }

    pub fn token_duration(&self) -> Duration {
        Duration::from_secs(self.auth.token_duration_secs)
    }

    pub fn token_manager(&self) -> TokenManager {
        TokenManager::new(self.auth.token_secret.as_bytes(), self.token_duration())
    }

    /// Hashes the configured bootstrap credentials.
    pub fn bootstrap_users(&self) -> Result<Vec<User>, Error> {
        self.users
            .iter()
            .map(|settings| {
                let role = settings.role.parse::<Role>().map_err(Error::Config)?;
                User::new(settings.username.clone(), &settings.password, role)
            })
            .collect()
    }

    /// Validates the configuration before the server starts.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        self.addr()?;

        if self.auth.token_secret.is_empty() {
            return Err(Error::Config("auth.token_secret cannot be empty".to_string()));
        }

        if self.auth.token_duration_secs == 0 {
            return Err(Error::Config(
                "auth.token_duration_secs cannot be zero".to_string(),
            ));
        }

        if self.storage.image_dir.as_os_str().is_empty() {
            return Err(Error::Config("storage.image_dir cannot be empty".to_string()));
        }

        if self.telemetry.topic.is_empty() {
            return Err(Error::Config("telemetry.topic cannot be empty".to_string()));
        }

        if self.telemetry.bus_capacity == 0 {
            return Err(Error::Config(
                "telemetry.bus_capacity cannot be zero".to_string(),
            ));
        }

        if self.metrics.enabled {
            self.metrics.addr()?;
        }

        let mut seen = HashSet::new();
        for user in &self.users {
            if user.username.is_empty() {
                return Err(Error::Config("bootstrap username cannot be empty".to_string()));
            }
            if !seen.insert(user.username.as_str()) {
                return Err(Error::Config(format!(
                    "bootstrap user '{}' is listed twice",
                    user.username
                )));
            }
            user.role.parse::<Role>().map_err(|e| {
                Error::Config(format!("bootstrap user '{}': {e}", user.username))
            })?;
        }

        Ok(())
    }
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr, Error> {
    format!("{host}:{port}").parse().map_err(|e| {
        Error::Config(format!(
            "invalid address (host: {host}, port: {port}): {e}"
        ))
    })
}
