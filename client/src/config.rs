//! Configuration loaded from environment variables or a JSON file.

use rowcloud_engine::Scope;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Client configuration.
///
/// Fields missing from a JSON document take their default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file name, resolved against `data_dir` when relative
    pub db_path: PathBuf,
    /// Use a private in-memory database instead of a file
    pub in_memory: bool,
    /// Bundled template copied into `data_dir` on first run
    pub template_db: Option<PathBuf>,
    /// Writable location for the database file
    pub data_dir: PathBuf,
    /// Number of closes between maintenance passes
    pub maintenance_interval: i64,
    /// Prefix of remote subscription ids
    pub subscription_prefix: String,
    /// Scopes handled by sync setup
    pub sync_scopes: Vec<Scope>,
    /// Whether local saves are pushed to the remote store
    pub cloud_sync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data.db"),
            in_memory: false,
            template_db: None,
            data_dir: default_data_dir(),
            maintenance_interval: 500,
            subscription_prefix: "rowcloud".to_string(),
            sync_scopes: vec![Scope::Private, Scope::Shared],
            cloud_sync: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Reads a `.env` file first when one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let db_path = env::var("ROWCLOUD_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let in_memory = read_bool("ROWCLOUD_IN_MEMORY", defaults.in_memory)?;

        let template_db = env::var("ROWCLOUD_TEMPLATE_DB").ok().map(PathBuf::from);

        let data_dir = env::var("ROWCLOUD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let maintenance_interval = match env::var("ROWCLOUD_MAINTENANCE_INTERVAL") {
            Ok(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|n| *n >= 0)
                .ok_or(ConfigError::InvalidMaintenanceInterval(raw))?,
            Err(_) => defaults.maintenance_interval,
        };

        let subscription_prefix = env::var("ROWCLOUD_SUBSCRIPTION_PREFIX")
            .unwrap_or(defaults.subscription_prefix);

        let sync_scopes = match env::var("ROWCLOUD_SYNC_SCOPES") {
            Ok(raw) => parse_scopes(&raw)?,
            Err(_) => defaults.sync_scopes,
        };

        let cloud_sync = read_bool("ROWCLOUD_CLOUD_SYNC", defaults.cloud_sync)?;

        Ok(Self {
            db_path,
            in_memory,
            template_db,
            data_dir,
            maintenance_interval,
            subscription_prefix,
            sync_scopes,
            cloud_sync,
        })
    }

    /// Parse configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config.maintenance_interval < 0 {
            return Err(ConfigError::InvalidMaintenanceInterval(
                config.maintenance_interval.to_string(),
            ));
        }
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Full path of the writable database file.
    pub fn database_file(&self) -> PathBuf {
        if self.db_path.is_absolute() {
            self.db_path.clone()
        } else {
            self.data_dir.join(&self.db_path)
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rowcloud")
}

fn read_bool(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(var) {
        Ok(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidBool { var, value: raw }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_scopes(raw: &str) -> Result<Vec<Scope>, ConfigError> {
    let mut scopes = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let scope = part
            .parse::<Scope>()
            .map_err(|_| ConfigError::InvalidScope(part.to_string()))?;
        if !scopes.contains(&scope) {
            scopes.push(scope);
        }
    }
    Ok(scopes)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid boolean for {var}: '{value}'")]
    InvalidBool { var: &'static str, value: String },

    #[error("Invalid ROWCLOUD_MAINTENANCE_INTERVAL value: '{0}'")]
    InvalidMaintenanceInterval(String),

    #[error("Invalid sync scope: '{0}'")]
    InvalidScope(String),

    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.maintenance_interval, 500);
        assert_eq!(config.sync_scopes, vec![Scope::Private, Scope::Shared]);
        assert!(config.cloud_sync);
        assert!(config.database_file().ends_with("rowcloud/data.db"));
    }

    #[test]
    fn scope_list_parsing() {
        assert_eq!(
            parse_scopes("private, PUBLIC,private").unwrap(),
            vec![Scope::Private, Scope::Public]
        );
        assert!(matches!(
            parse_scopes("private,nowhere"),
            Err(ConfigError::InvalidScope(s)) if s == "nowhere"
        ));
        assert!(parse_scopes("").unwrap().is_empty());
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config =
            Config::from_json(r#"{"db_path": "notes.db", "sync_scopes": ["public"]}"#).unwrap();
        assert_eq!(config.db_path, PathBuf::from("notes.db"));
        assert_eq!(config.sync_scopes, vec![Scope::Public]);
        assert_eq!(config.maintenance_interval, 500);
        assert!(config.cloud_sync);

        assert!(matches!(
            Config::from_json(r#"{"maintenance_interval": -1}"#),
            Err(ConfigError::InvalidMaintenanceInterval(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"sync_scopes": ["nowhere"]}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn missing_config_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::from_file(dir.path().join("absent.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn absolute_db_path_ignores_data_dir() {
        let config = Config {
            db_path: PathBuf::from("/tmp/x.db"),
            ..Config::default()
        };
        assert_eq!(config.database_file(), PathBuf::from("/tmp/x.db"));
    }
}
