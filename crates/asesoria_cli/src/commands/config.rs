use asesoria_core::{
    AsesoriaConfig,
    config::{self, config_paths},
    db::DatabaseConfig,
};
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use std::path::Path;

use crate::output::Output;

/// Describe where the store lives
fn describe_database(database: &DatabaseConfig) -> String {
    match database {
        DatabaseConfig::Embedded { path } if path.is_empty() => "in-memory".to_string(),
        DatabaseConfig::Embedded { path } => format!("surrealkv://{path}"),
        #[cfg(feature = "surreal-remote")]
        DatabaseConfig::Remote {
            url,
            namespace,
            database,
            ..
        } => format!("{url} ({namespace}/{database})"),
    }
}

/// Show the effective settings, or the raw TOML with `raw`
pub async fn show(config: &AsesoriaConfig, raw: bool) -> Result<()> {
    if raw {
        println!("{}", toml::to_string_pretty(config).into_diagnostic()?);
        return Ok(());
    }

    let output = Output::new();
    output.section("Store");
    output.kv("Database", &describe_database(&config.database));
    output.kv(
        "Call timeout",
        &format!("{} ms", config.authz.store_timeout_ms),
    );

    output.section("Reclassification");
    output.kv("Batch size", &config.reclassify.batch_size.to_string());

    output.section(&format!("Label seed ({})", config.labels.seed.len()));
    output.label_seeds(&config.labels.seed);

    output.section("Searched locations");
    for path in config_paths() {
        let marker = if path.exists() {
            "found".bright_green().to_string()
        } else {
            "missing".dimmed().to_string()
        };
        output.list_item(&format!("{} {}", path.display(), marker));
    }
    Ok(())
}

/// Write the effective settings to `path`
pub async fn save(config: &AsesoriaConfig, path: &Path) -> Result<()> {
    let output = Output::new();
    config::validate(config, &path.display().to_string())?;
    config::save_config(config, path).await?;

    output.success(&format!("Configuration saved to {}", path.display()));
    output.kv("Database", &describe_database(&config.database));
    output.kv("Seed labels", &config.labels.seed.len().to_string());
    println!();
    println!(
        "  Run with {} --config {}",
        "asesoria".bright_green(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_describe_database() {
        let memory = DatabaseConfig::Embedded {
            path: String::new(),
        };
        assert_eq!(describe_database(&memory), "in-memory");
        assert_eq!(
            describe_database(&DatabaseConfig::default()),
            "surrealkv://./asesoria.db"
        );
    }

    #[tokio::test]
    async fn test_save_rejects_zero_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asesoria.toml");
        let mut config = AsesoriaConfig::default();
        config.authz.store_timeout_ms = 0;

        assert!(save(&config, &path).await.is_err());
        assert!(!path.exists());
    }
}
