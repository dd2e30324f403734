//! Application configuration management.
//!
//! Configuration is layered, later layers overriding earlier ones:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. A TOML file (`KEYFENCE_CONFIG`, or the platform default path)
//! 3. Environment variables `KEYFENCE__<SECTION>__<KEY>`, e.g.
//!    `KEYFENCE__GEOFENCE__RADIUS_M=25`
//!
//! Validation runs after loading and reports every problem at once.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::error::Result;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "KEYFENCE_CONFIG";

const ENV_PREFIX: &str = "KEYFENCE";
const ENV_SEPARATOR: &str = "__";

/// Errors from loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// Target file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A layer could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field is invalid.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Geofence settings.
    pub geofence: GeofenceConfig,
    /// Position sampling settings.
    pub position: PositionConfig,
    /// Lock actuator settings.
    pub unlock: UnlockConfig,
    /// Automatic retry settings.
    pub retry: RetryConfig,
    /// Property catalog settings.
    pub catalog: CatalogConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Geofence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceConfig {
    /// Radius around the property in meters; the boundary counts as inside.
    pub radius_m: f64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self { radius_m: 30.0 }
    }
}

/// Position sampling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Deadline for one position fix, in seconds (1-120).
    pub sample_timeout_secs: u64,
    /// Deadline for the permission prompt, in seconds (1-600). An unanswered
    /// prompt counts as denied.
    pub permission_timeout_secs: u64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            sample_timeout_secs: 15,
            permission_timeout_secs: 60,
        }
    }
}

/// Which lock actuator to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    /// In-process stand-in with a fixed delay.
    #[default]
    Simulated,
    /// Remote actuator reached over HTTP.
    Http,
}

/// Lock actuator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlockConfig {
    /// Actuator backend.
    pub actuator: ActuatorKind,
    /// Base URL of the HTTP actuator.
    pub endpoint: Option<Url>,
    /// Bound on one unlock command, in seconds (1-60).
    pub command_timeout_secs: u64,
    /// Delay of the simulated actuator, in milliseconds.
    pub simulated_latency_ms: u64,
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            actuator: ActuatorKind::Simulated,
            endpoint: None,
            command_timeout_secs: 10,
            simulated_latency_ms: 1500,
        }
    }
}

/// Automatic retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Re-sample automatically after a failed fix.
    pub automatic: bool,
    /// First backoff delay, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Largest backoff delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Automatic attempts before giving up.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            automatic: false,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            max_attempts: 3,
        }
    }
}

/// Where property records come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    /// A JSON file on disk.
    #[default]
    File,
    /// A REST collection.
    Http,
}

/// Property catalog settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog backend.
    pub source: CatalogSource,
    /// Catalog file; defaults to `properties.json` in the data directory.
    pub path: Option<PathBuf>,
    /// Base URL of the HTTP catalog.
    pub base_url: Option<Url>,
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
    /// Production logging (JSON files plus compact stdout).
    pub production: bool,
    /// Log filter directive, overridden by `RUST_LOG`.
    pub log_level: String,
    /// Directory for production log files; platform default when unset.
    pub log_dir: Option<PathBuf>,
    /// Seconds a session may sit untouched before it is closed and forgotten.
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            production: false,
            log_level: "info".to_string(),
            log_dir: None,
            session_ttl_secs: 900,
        }
    }
}

impl Config {
    /// Load configuration from `path`, which must exist, plus the environment.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotFound`] if the file does not exist
    /// - [`ConfigError::LoadError`] if a layer cannot be parsed
    /// - validation errors as for [`Config::validate`]
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::assemble(Some(path), env_layer())
    }

    /// Load configuration from `path` if it exists, falling back to defaults,
    /// plus the environment.
    ///
    /// # Errors
    ///
    /// As for [`Config::load`], minus [`ConfigError::NotFound`].
    pub fn load_or_default(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::assemble(Some(path), env_layer())
        } else {
            Self::assemble(None, env_layer())
        }
    }

    fn assemble(
        path: Option<&Path>,
        env: config::Environment,
    ) -> std::result::Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let config: Self = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path` as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SerializeError`] or [`ConfigError::WriteError`].
    pub fn save(&self, path: impl AsRef<Path>) -> std::result::Result<(), ConfigError> {
        let path = path.as_ref();
        let write_error = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_error)?;
        Ok(())
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// A single [`ConfigError::ValidationError`], or
    /// [`ConfigError::MultipleValidationErrors`] if several fields are invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &'static str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field,
                    message: message.to_string(),
                });
            }
        };

        let radius = self.geofence.radius_m;
        check(
            radius.is_finite() && radius > 0.0,
            "geofence.radius_m",
            "must be a positive number of meters",
        );
        check(
            (1..=120).contains(&self.position.sample_timeout_secs),
            "position.sample_timeout_secs",
            "must be between 1 and 120",
        );
        check(
            (1..=600).contains(&self.position.permission_timeout_secs),
            "position.permission_timeout_secs",
            "must be between 1 and 600",
        );
        check(
            (1..=60).contains(&self.unlock.command_timeout_secs),
            "unlock.command_timeout_secs",
            "must be between 1 and 60",
        );
        check(
            self.unlock.actuator != ActuatorKind::Http || self.unlock.endpoint.is_some(),
            "unlock.endpoint",
            "required for the http actuator",
        );
        if self.retry.automatic {
            check(
                self.retry.max_attempts >= 1,
                "retry.max_attempts",
                "must be at least 1 when automatic retry is on",
            );
            check(
                self.retry.initial_backoff_ms > 0
                    && self.retry.initial_backoff_ms <= self.retry.max_backoff_ms,
                "retry.initial_backoff_ms",
                "must be positive and no larger than retry.max_backoff_ms",
            );
        }
        check(
            self.catalog.source != CatalogSource::Http || self.catalog.base_url.is_some(),
            "catalog.base_url",
            "required for the http catalog",
        );
        check(
            self.server.bind_address.parse::<SocketAddr>().is_ok(),
            "server.bind_address",
            "must be a socket address such as 0.0.0.0:3000",
        );
        check(
            (60..=86_400).contains(&self.server.session_ttl_secs),
            "server.session_ttl_secs",
            "must be between 60 and 86400",
        );

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// The configuration file path: `KEYFENCE_CONFIG` if set, otherwise the
    /// platform default.
    ///
    /// # Errors
    ///
    /// Returns an error if no configuration directory can be determined.
    pub fn config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        // On Linux hosts: /etc/keyfence/config.toml
        // Elsewhere: the platform config dir (e.g. ~/Library/Application Support/keyfence)
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/keyfence/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "keyfence").ok_or_else(|| {
                crate::error::KeyfenceError::PersistenceError("Cannot determine config directory".into())
            })?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }
}

/// Directory for keyfence data files such as the property catalog.
///
/// # Errors
///
/// Returns an error if no data directory can be determined.
pub fn default_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/keyfence"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "keyfence").ok_or_else(|| {
            crate::error::KeyfenceError::PersistenceError("Cannot determine data directory".into())
        })?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

fn env_layer() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyfenceError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        env_layer().source(Some(map))
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!((config.geofence.radius_m - 30.0).abs() < f64::EPSILON);
        assert_eq!(config.position.sample_timeout_secs, 15);
        assert_eq!(config.unlock.actuator, ActuatorKind::Simulated);
        assert_eq!(config.unlock.command_timeout_secs, 10);
        assert_eq!(config.unlock.simulated_latency_ms, 1500);
        assert!(!config.retry.automatic);
        assert_eq!(config.catalog.source, CatalogSource::File);
        assert_eq!(config.position.permission_timeout_secs, 60);
        assert_eq!(config.server.session_ttl_secs, 900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = toml_file(
            r#"
            [geofence]
            radius_m = 50.0

            [unlock]
            actuator = "http"
            endpoint = "https://locks.example.com/"
            "#,
        );
        let config = Config::assemble(Some(file.path()), env(&[])).unwrap();

        assert!((config.geofence.radius_m - 50.0).abs() < f64::EPSILON);
        assert_eq!(config.unlock.actuator, ActuatorKind::Http);
        assert_eq!(config.unlock.command_timeout_secs, 10);
        assert_eq!(config.position.sample_timeout_secs, 15);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = toml_file("[geofence]\nradius_m = 50.0\n");
        let config = Config::assemble(
            Some(file.path()),
            env(&[
                ("KEYFENCE__GEOFENCE__RADIUS_M", "12.5"),
                ("KEYFENCE__RETRY__AUTOMATIC", "true"),
            ]),
        )
        .unwrap();

        assert!((config.geofence.radius_m - 12.5).abs() < f64::EPSILON);
        assert!(config.retry.automatic);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/keyfence/config.toml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = Config::default();
        config.geofence.radius_m = -1.0;
        config.unlock.command_timeout_secs = 0;
        config.unlock.actuator = ActuatorKind::Http;

        match config.validate().unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }

        let mut config = Config::default();
        config.geofence.radius_m = f64::NAN;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ValidationError {
                field: "geofence.radius_m",
                ..
            }
        ));
    }

    #[test]
    fn test_session_ttl_bounds() {
        let mut config = Config::default();
        config.server.session_ttl_secs = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ValidationError {
                field: "server.session_ttl_secs",
                ..
            }
        ));

        let config = Config::assemble(None, env(&[("KEYFENCE__SERVER__SESSION_TTL_SECS", "120")]))
            .unwrap();
        assert_eq!(config.server.session_ttl_secs, 120);
    }

    #[test]
    fn test_invalid_file_value_fails_load() {
        let file = toml_file("[unlock]\ncommand_timeout_secs = 90\n");
        let err = Config::assemble(Some(file.path()), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));

        let err: KeyfenceError = err.into();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.catalog.source = CatalogSource::Http;
        config.catalog.base_url = Some(Url::parse("https://catalog.example.com/").unwrap());
        config.save(&path).unwrap();

        let loaded = Config::assemble(Some(&path), env(&[])).unwrap();
        assert_eq!(loaded, config);
    }
}
