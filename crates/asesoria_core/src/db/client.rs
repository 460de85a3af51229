//! SurrealDB connection setup

use std::sync::Arc;
use surrealdb::Surreal;
use surrealdb::engine::any::{self, Any};

use super::{
    DatabaseConfig, DatabaseError, Result, SurrealStore,
    migration::{MigrationOptions, MigrationRunner},
};

const NAMESPACE: &str = "asesoria";
const DATABASE: &str = "asesoria";

/// Open a connection described by `config` without running migrations
pub async fn connect(config: &DatabaseConfig) -> Result<Surreal<Any>> {
    match config {
        DatabaseConfig::Embedded { path } => {
            let endpoint = if path.is_empty() {
                "memory".to_string()
            } else {
                // Ensure parent directory exists for file-based storage
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            DatabaseError::Other(format!(
                                "Failed to create database directory: {}",
                                e
                            ))
                        })?;
                    }
                }
                format!("surrealkv://{}", path)
            };

            tracing::info!("Connecting to embedded database at: {}", endpoint);
            let connect_start = std::time::Instant::now();
            let db = any::connect(endpoint)
                .await
                .map_err(DatabaseError::ConnectionFailed)?;
            tracing::debug!(
                "Database connection established in {:?}",
                connect_start.elapsed()
            );

            db.use_ns(NAMESPACE)
                .use_db(DATABASE)
                .await
                .map_err(DatabaseError::ConnectionFailed)?;
            Ok(db)
        }
        #[cfg(feature = "surreal-remote")]
        DatabaseConfig::Remote {
            url,
            username,
            password,
            namespace,
            database,
        } => {
            use surrealdb::opt::auth::Root;

            tracing::info!("Connecting to remote database at: {}", url);
            let db = any::connect(url.as_str())
                .await
                .map_err(DatabaseError::ConnectionFailed)?;

            // Authenticate if credentials provided
            if let (Some(user), Some(pass)) = (username, password) {
                db.signin(Root {
                    username: user,
                    password: pass,
                })
                .await
                .map_err(DatabaseError::ConnectionFailed)?;
            }

            db.use_ns(namespace.as_str())
                .use_db(database.as_str())
                .await
                .map_err(DatabaseError::ConnectionFailed)?;
            Ok(db)
        }
    }
}

/// Connect and bring the schema up to date
pub async fn open_store(
    config: &DatabaseConfig,
    options: &MigrationOptions,
) -> crate::Result<Arc<SurrealStore<Any>>> {
    let db = connect(config).await?;
    let store = Arc::new(SurrealStore::new(db));

    let migration_start = std::time::Instant::now();
    MigrationRunner::run(&store, options).await?;
    tracing::debug!("Migrations completed in {:?}", migration_start.elapsed());

    Ok(store)
}

/// Create a new migrated in-memory database for testing
pub async fn create_test_db() -> crate::Result<Arc<SurrealStore<Any>>> {
    open_store(
        &DatabaseConfig::Embedded {
            path: String::new(),
        },
        &MigrationOptions::default(),
    )
    .await
}

/// Check if the database is healthy
pub async fn health_check(db: &Surreal<Any>) -> Result<()> {
    db.health().await.map_err(DatabaseError::ConnectionFailed)
}

/// Get the database version
pub async fn version(db: &Surreal<Any>) -> Result<String> {
    db.version()
        .await
        .map_err(DatabaseError::QueryFailed)
        .map(|v| v.to_string())
}
