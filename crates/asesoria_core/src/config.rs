//! Configuration system for Asesoria
//!
//! Settings live in a TOML file. Every section is optional and falls back to
//! its defaults, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    Result,
    db::{CallPolicy, DatabaseConfig, migration::MigrationOptions},
    error::{ConfigError, CoreError},
    label::{LabelSeed, default_seed},
};

/// Resolve a path relative to a base directory
/// If the path is absolute, return it as-is
fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Top-level configuration for Asesoria
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AsesoriaConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub authz: AuthzConfig,

    #[serde(default)]
    pub reclassify: ReclassifyConfig,

    #[serde(default)]
    pub labels: LabelsConfig,
}

/// Authorization facade settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzConfig {
    /// Deadline for each store call, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl AuthzConfig {
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy::new(Duration::from_millis(self.store_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclassifyConfig {
    /// Users fetched per page during bulk reclassification
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    500
}

impl Default for ReclassifyConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Label catalog settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelsConfig {
    /// Labels ensured by the seeding migration and `seed_catalog`
    #[serde(default = "default_seed")]
    pub seed: Vec<LabelSeed>,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
        }
    }
}

impl AsesoriaConfig {
    pub fn call_policy(&self) -> CallPolicy {
        self.authz.call_policy()
    }

    /// Options for the migration runner derived from this config
    pub fn migration_options(&self) -> MigrationOptions {
        MigrationOptions {
            seed: self.labels.seed.clone(),
            batch_size: self.reclassify.batch_size,
            policy: self.call_policy(),
        }
    }
}

/// Load configuration from a TOML file
pub async fn load_config(path: &Path) -> Result<AsesoriaConfig> {
    let content =
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::ConfigurationError {
                config_path: path.display().to_string(),
                field: "file".to_string(),
                expected: "readable TOML file".to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;

    let mut config: AsesoriaConfig =
        toml::from_str(&content).map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "content".to_string(),
            expected: "valid TOML configuration".to_string(),
            cause: ConfigError::TomlParse(e.to_string()),
        })?;

    validate(&config, &path.display().to_string())?;

    // Resolve the embedded database path relative to the config file's directory
    let base_dir = path.parent().unwrap_or(Path::new("."));
    if let DatabaseConfig::Embedded { path: db_path } = &mut config.database {
        if !db_path.is_empty() {
            *db_path = resolve_path(base_dir, Path::new(db_path))
                .display()
                .to_string();
        }
    }

    tracing::debug!(path = %path.display(), "loaded configuration");
    Ok(config)
}

/// Reject settings that parse but cannot be used. `source` names where the
/// values came from for the error report.
pub fn validate(config: &AsesoriaConfig, source: &str) -> Result<()> {
    if config.authz.store_timeout_ms == 0 {
        return Err(CoreError::ConfigurationError {
            config_path: source.to_string(),
            field: "authz.store_timeout_ms".to_string(),
            expected: "a timeout greater than zero".to_string(),
            cause: ConfigError::Invalid("store_timeout_ms = 0".to_string()),
        });
    }
    Ok(())
}

/// Save configuration to a TOML file
pub async fn save_config(config: &AsesoriaConfig, path: &Path) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::ConfigurationError {
                config_path: parent.display().to_string(),
                field: "directory".to_string(),
                expected: "writable directory".to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| CoreError::ConfigurationError {
        config_path: path.display().to_string(),
        field: "serialization".to_string(),
        expected: "serializable config structure".to_string(),
        cause: ConfigError::TomlSerialize(e.to_string()),
    })?;

    tokio::fs::write(path, content)
        .await
        .map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "writable file location".to_string(),
            cause: ConfigError::Io(e.to_string()),
        })?;

    Ok(())
}

/// Merge two configurations, with the overlay taking precedence
pub fn merge_configs(base: AsesoriaConfig, overlay: PartialConfig) -> AsesoriaConfig {
    AsesoriaConfig {
        database: overlay.database.unwrap_or(base.database),
        authz: AuthzConfig {
            store_timeout_ms: overlay
                .store_timeout_ms
                .unwrap_or(base.authz.store_timeout_ms),
        },
        reclassify: ReclassifyConfig {
            batch_size: overlay.batch_size.unwrap_or(base.reclassify.batch_size),
        },
        labels: LabelsConfig {
            seed: overlay.seed.unwrap_or(base.labels.seed),
        },
    }
}

/// Partial configuration for overlaying, e.g. from command-line flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<Vec<LabelSeed>>,
}

/// Standard config file locations
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // Project-specific config
    paths.push(PathBuf::from("asesoria.toml"));

    // User config directory
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("asesoria").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".asesoria").join("config.toml"));
    }

    paths
}

/// Load configuration from standard locations
pub async fn load_config_from_standard_locations() -> Result<AsesoriaConfig> {
    for path in config_paths() {
        if path.exists() {
            return load_config(&path).await;
        }
    }

    // No config found, return default
    Ok(AsesoriaConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = AsesoriaConfig::default();
        assert_eq!(config.authz.store_timeout_ms, 5_000);
        assert_eq!(config.reclassify.batch_size, 500);
        assert_eq!(config.labels.seed, default_seed());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: AsesoriaConfig = toml::from_str("").unwrap();
        assert_eq!(config, AsesoriaConfig::default());
    }

    #[test]
    fn test_config_serialization() {
        let config = AsesoriaConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[database]"));
        assert!(toml.contains("[authz]"));
        assert!(toml.contains("[[labels.seed]]"));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asesoria.toml");
        let mut config = AsesoriaConfig::default();
        config.authz.store_timeout_ms = 250;
        config.labels.seed = vec![LabelSeed::new("Urgente", "#EF4444", "alert-circle")];
        config.database = DatabaseConfig::Embedded {
            path: String::new(),
        };

        save_config(&config, &path).await.unwrap();
        let loaded = load_config(&path).await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.call_policy().timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_relative_db_path_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asesoria.toml");
        tokio::fs::write(&path, "[database]\ntype = \"embedded\"\npath = \"data/asesoria.db\"\n")
            .await
            .unwrap();

        let loaded = load_config(&path).await.unwrap();
        assert_eq!(
            loaded.database,
            DatabaseConfig::Embedded {
                path: dir.path().join("data/asesoria.db").display().to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_toml_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        tokio::fs::write(&path, "[authz\nstore_timeout_ms = ").await.unwrap();
        let err = load_config(&path).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asesoria.toml");
        tokio::fs::write(&path, "[authz]\nstore_timeout_ms = 0\n").await.unwrap();
        match load_config(&path).await.unwrap_err() {
            CoreError::ConfigurationError { field, cause, .. } => {
                assert_eq!(field, "authz.store_timeout_ms");
                assert!(matches!(cause, ConfigError::Invalid(_)));
            }
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_configs() {
        let base = AsesoriaConfig::default();
        let overlay = PartialConfig {
            batch_size: Some(50),
            ..Default::default()
        };

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.reclassify.batch_size, 50);
        assert_eq!(merged.authz.store_timeout_ms, 5_000);
    }

    #[test]
    fn test_zero_timeout_override_rejected() {
        let merged = merge_configs(
            AsesoriaConfig::default(),
            PartialConfig {
                store_timeout_ms: Some(0),
                ..Default::default()
            },
        );
        let err = validate(&merged, "command line").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(validate(&AsesoriaConfig::default(), "defaults").is_ok());
    }
}
