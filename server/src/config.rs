//! Configuration management for the server.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use docsync_engine::{ClientWins, ConflictHandler, ServerWins};

use crate::datastore::StoreConfig;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Where synchronized documents live
    pub store: StoreConfig,
    /// Where the change log lives
    pub sync_store: StoreConfig,
    pub send_document_level_errors: bool,
    pub conflict_policy: ConflictPolicy,
}

/// Built-in conflict handlers selectable by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    #[default]
    ServerWins,
    ClientWins,
}

impl ConflictPolicy {
    pub fn handler(self) -> Arc<dyn ConflictHandler> {
        match self {
            ConflictPolicy::ServerWins => Arc::new(ServerWins),
            ConflictPolicy::ClientWins => Arc::new(ClientWins),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server-wins" | "server_wins" => Ok(ConflictPolicy::ServerWins),
            "client-wins" | "client_wins" => Ok(ConflictPolicy::ClientWins),
            _ => Err(ConfigError::InvalidConflictPolicy(s.to_string())),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = lookup("DATABASE_URL").filter(|v| !v.is_empty());
        let data_dir = lookup("DATA_DIR").filter(|v| !v.is_empty()).map(PathBuf::from);

        let store = match (&database_url, &data_dir) {
            (Some(url), _) => StoreConfig::Postgres {
                url: url.clone(),
                scope: "documents".to_string(),
            },
            (None, Some(dir)) => StoreConfig::File(dir.clone()),
            (None, None) => StoreConfig::Memory,
        };

        let sync_url = lookup("SYNC_DATABASE_URL")
            .filter(|v| !v.is_empty())
            .or(database_url);
        let sync_dir = lookup("SYNC_DATA_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| data_dir.map(|dir| dir.join("changes")));

        let sync_store = match (sync_url, sync_dir) {
            (Some(url), _) => StoreConfig::Postgres {
                url,
                scope: "changes".to_string(),
            },
            (None, Some(dir)) => StoreConfig::File(dir),
            (None, None) => StoreConfig::Memory,
        };

        let send_document_level_errors = match lookup("SEND_DOCUMENT_LEVEL_ERRORS") {
            Some(v) => {
                parse_bool(&v).ok_or(ConfigError::InvalidFlag("SEND_DOCUMENT_LEVEL_ERRORS"))?
            }
            None => false,
        };

        let conflict_policy = match lookup("CONFLICT_POLICY") {
            Some(v) => v.parse()?,
            None => ConflictPolicy::default(),
        };

        Ok(Self {
            host,
            port,
            store,
            sync_store,
            send_document_level_errors,
            conflict_policy,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid boolean value for {0}")]
    InvalidFlag(&'static str),

    #[error("Unknown CONFLICT_POLICY '{0}', expected server-wins or client-wins")]
    InvalidConflictPolicy(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_memory_stores() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.sync_store, StoreConfig::Memory);
        assert!(!config.send_document_level_errors);
        assert_eq!(config.conflict_policy, ConflictPolicy::ServerWins);
    }

    #[test]
    fn data_dir_places_change_log_alongside() {
        let config = load(&[("DATA_DIR", "/var/lib/docsync")]).unwrap();
        assert_eq!(config.store, StoreConfig::File("/var/lib/docsync".into()));
        assert_eq!(
            config.sync_store,
            StoreConfig::File("/var/lib/docsync/changes".into())
        );
    }

    #[test]
    fn database_url_is_shared_by_scope() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/docsync")]).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Postgres {
                url: "postgres://localhost/docsync".into(),
                scope: "documents".into()
            }
        );
        assert_eq!(
            config.sync_store,
            StoreConfig::Postgres {
                url: "postgres://localhost/docsync".into(),
                scope: "changes".into()
            }
        );
    }

    #[test]
    fn flags_and_policy() {
        let config = load(&[
            ("SEND_DOCUMENT_LEVEL_ERRORS", "true"),
            ("CONFLICT_POLICY", "client-wins"),
            ("PORT", "8080"),
        ])
        .unwrap();
        assert!(config.send_document_level_errors);
        assert_eq!(config.conflict_policy, ConflictPolicy::ClientWins);
        assert_eq!(config.port, 8080);

        assert!(matches!(load(&[("PORT", "x")]), Err(ConfigError::InvalidPort)));
        assert!(matches!(
            load(&[("CONFLICT_POLICY", "merge")]),
            Err(ConfigError::InvalidConflictPolicy(_))
        ));
        assert!(matches!(
            load(&[("SEND_DOCUMENT_LEVEL_ERRORS", "maybe")]),
            Err(ConfigError::InvalidFlag(_))
        ));
    }
}
