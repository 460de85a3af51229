use asesoria_core::{
    AuthorizationFacade,
    config::AsesoriaConfig,
    db::{
        DatabaseConfig, SchemaStore, SurrealStore, client,
        migration::{MigrationRunner, migrations},
    },
};
use miette::Result;
use owo_colors::OwoColorize;
use std::sync::Arc;
use surrealdb::engine::any::Any;

use crate::output::Output;

/// Apply pending migrations and list what ran
pub async fn migrate(config: &AsesoriaConfig) -> Result<()> {
    let output = Output::new();
    output.section("Migrations");

    let store = Arc::new(SurrealStore::new(client::connect(&config.database).await?));
    let applied = MigrationRunner::run(&store, &config.migration_options()).await?;

    if applied.is_empty() {
        output.status("Schema is up to date");
    } else {
        for migration in &applied {
            output.success(&format!(
                "{} {}",
                format!("v{}", migration.version).bright_white(),
                migration.name
            ));
        }
    }

    let latest = migrations().last().map(|m| m.version).unwrap_or_default();
    output.kv("Schema version", &latest.to_string());
    Ok(())
}

/// Show database statistics
pub async fn stats(
    facade: &AuthorizationFacade<SurrealStore<Any>>,
    config: &AsesoriaConfig,
) -> Result<()> {
    let output = Output::new();

    output.section("Users by role");
    let counts = facade.count_by_role().await?;
    output.role_counts(&counts);

    output.section("Labels");
    let catalog = facade.list_catalog().await?;
    output.kv("Catalog size", &catalog.len().to_string().bright_white().to_string());

    output.section("Schema");
    let history = facade.store().applied_migrations().await?;
    for migration in &history {
        output.list_item(&format!(
            "v{} {} {}",
            migration.version,
            migration.name,
            migration.applied_at.to_rfc3339().dimmed()
        ));
    }

    output.section("Database Info");
    let version = client::version(facade.store().db()).await?;
    output.kv("Engine", &format!("SurrealDB {}", version).bright_white().to_string());
    match &config.database {
        DatabaseConfig::Embedded { path } if path.is_empty() => {
            output.kv("File", &"(in memory)".bright_yellow().to_string());
        }
        DatabaseConfig::Embedded { path } => {
            output.kv("File", &path.bright_white().to_string());
            if let Ok(metadata) = std::fs::metadata(path) {
                let size = metadata.len();
                let size_str = if size < 1024 {
                    format!("{} bytes", size)
                } else if size < 1024 * 1024 {
                    format!("{:.2} KB", size as f64 / 1024.0)
                } else {
                    format!("{:.2} MB", size as f64 / (1024.0 * 1024.0))
                };
                output.kv("Size", &size_str.bright_white().to_string());
            }
        }
        #[cfg(feature = "surreal-remote")]
        DatabaseConfig::Remote { url, .. } => {
            output.kv("URL", &url.bright_white().to_string());
        }
    }

    Ok(())
}

pub async fn health(facade: &AuthorizationFacade<SurrealStore<Any>>) -> Result<()> {
    let output = Output::new();
    client::health_check(facade.store().db()).await?;
    output.success("Database is reachable");
    Ok(())
}
