//! Forward-only schema migrations
//!
//! Each migration is a numbered, named step applied exactly once. The applied
//! versions are recorded in `schema_migration`, and a run only executes steps
//! above the highest recorded version. Every step is safe to repeat, so a run
//! interrupted between a step and its version record converges on rerun.

use chrono::Utc;
use std::sync::Arc;

use super::{AppliedMigration, CallPolicy, DatabaseError, Store, schema::Schema};
use crate::{
    CoreError, Result,
    label::{LabelCatalog, LabelSeed, default_seed},
    reclassify::Reclassifier,
};

/// What a migration does when applied
#[derive(Debug, Clone)]
pub enum Step {
    /// Execute schema statements
    Schema(Vec<&'static str>),
    /// Rewrite every derived role with the current classifier rules
    ReclassifyRoles,
    /// Upsert the configured label seed set
    SeedLabels,
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub step: Step,
}

/// The ordered migration list
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "create_core_tables",
            step: Step::Schema(Schema::statements()),
        },
        Migration {
            version: 2,
            name: "reclassify_user_roles",
            step: Step::ReclassifyRoles,
        },
        Migration {
            version: 3,
            name: "enforce_role_enum",
            step: Step::Schema(vec![Schema::role_enum()]),
        },
        Migration {
            version: 4,
            name: "seed_label_catalog",
            step: Step::SeedLabels,
        },
    ]
}

/// Inputs for the data-carrying steps
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub seed: Vec<LabelSeed>,
    pub batch_size: usize,
    pub policy: CallPolicy,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            batch_size: 500,
            policy: CallPolicy::default(),
        }
    }
}

/// Database migration runner
pub struct MigrationRunner;

impl MigrationRunner {
    /// Apply every pending migration. Returns the ones applied by this call.
    #[tracing::instrument(skip_all)]
    pub async fn run<S: Store>(
        store: &Arc<S>,
        options: &MigrationOptions,
    ) -> Result<Vec<AppliedMigration>> {
        let current = Self::current_version(store.as_ref()).await?;
        let mut applied = Vec::new();

        for migration in migrations().into_iter().filter(|m| m.version > current) {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "running migration"
            );
            Self::apply(store, &migration.step, options).await?;

            let record = AppliedMigration {
                version: migration.version,
                name: migration.name.to_string(),
                applied_at: Utc::now(),
            };
            store.record_migration(&record).await?;
            applied.push(record);
        }

        if applied.is_empty() {
            tracing::debug!(version = current, "schema up to date");
        }
        Ok(applied)
    }

    /// Highest recorded version, 0 on a fresh store
    pub async fn current_version<S: Store>(store: &S) -> Result<u32> {
        Ok(store
            .applied_migrations()
            .await?
            .iter()
            .map(|m| m.version)
            .max()
            .unwrap_or(0))
    }

    async fn apply<S: Store>(
        store: &Arc<S>,
        step: &Step,
        options: &MigrationOptions,
    ) -> Result<()> {
        match step {
            Step::Schema(statements) => {
                store.apply_schema(statements).await?;
            }
            Step::ReclassifyRoles => {
                let report = Reclassifier::new(store.clone(), options.policy, options.batch_size)
                    .run()
                    .await?;
                if !report.is_complete() {
                    // leave the version unrecorded so the next run retries
                    return Err(CoreError::from(DatabaseError::Other(format!(
                        "{} user(s) could not be reclassified",
                        report.failures.len()
                    ))));
                }
            }
            Step::SeedLabels => {
                LabelCatalog::new(store.clone(), options.policy)
                    .seed(&options.seed)
                    .await?;
            }
        }
        Ok(())
    }
}
