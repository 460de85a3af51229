//! Storage abstraction for Asesoria
//!
//! The engine never talks to a database directly. Each component receives a
//! store through the traits defined here:
//! - [`IdentityStore`]: user records keyed by id and unique business id
//! - [`ConversationRegistry`]: conversations and their membership
//! - [`LabelStore`]: the label catalog and the assignment ledger
//! - [`SchemaStore`]: schema statements and the migration version marker
//!
//! Stores enforce uniqueness atomically and report a duplicate insert as
//! [`DatabaseError::UniqueViolation`]; whether that is an error or an
//! idempotent no-op is decided by the calling component. A write that lost an
//! optimistic transaction race comes back as [`DatabaseError::WriteConflict`]
//! and may be retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::{
    conversation::Conversation,
    id::{ConversationId, LabelId, UserId},
    label::{Label, LabelAssignment},
    role::{Role, RoleCounts},
    users::User,
};

pub mod client;
pub mod memory;
pub mod migration;
pub mod models;
pub mod schema;
pub mod surreal;

pub use memory::MemoryStore;
pub use surreal::SurrealStore;

/// Core database error type
#[derive(Error, Debug, Diagnostic)]
pub enum DatabaseError {
    #[error("Connection failed")]
    #[diagnostic(help("Check your database configuration and ensure the database is running"))]
    ConnectionFailed(#[source] surrealdb::Error),

    #[error("Query failed")]
    #[diagnostic(help("Check the query syntax and table schema"))]
    QueryFailed(#[source] surrealdb::Error),

    #[error("Write lost a transaction conflict")]
    #[diagnostic(help("Another writer touched the same records; the write can be retried"))]
    WriteConflict(#[source] surrealdb::Error),

    #[error("Store call '{operation}' timed out after {after:?}")]
    #[diagnostic(help("Increase authz.store_timeout_ms or check store health"))]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Unique index {index} on {table} already contains '{value}'")]
    UniqueViolation {
        table: &'static str,
        index: &'static str,
        value: String,
    },

    #[error("Invalid {table} record: {message}")]
    #[diagnostic(help("The stored record does not match the expected shape"))]
    InvalidRecord {
        table: &'static str,
        message: String,
    },

    #[error("Database error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Configuration for database backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatabaseConfig {
    Embedded {
        /// SurrealKV file path; empty means an in-memory database
        #[serde(default = "default_db_path")]
        path: String,
    },
    #[cfg(feature = "surreal-remote")]
    Remote {
        url: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        namespace: String,
        database: String,
    },
}

fn default_db_path() -> String {
    "./asesoria.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::Embedded {
            path: default_db_path(),
        }
    }
}

/// Insert attempts before a repeated `WriteConflict` is surfaced to the caller
pub const WRITE_ATTEMPTS: u32 = 4;

/// Deadline applied to every store call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
}

impl CallPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a store future, turning an elapsed deadline into [`DatabaseError::Timeout`]
    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.timeout, "store call timed out");
                Err(DatabaseError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000))
    }
}

/// Durable user records
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    async fn get_user_by_business_id(&self, business_id: &str) -> Result<Option<User>>;

    /// Insert a new user; a taken id or business id is a `UniqueViolation`
    async fn insert_user(&self, user: &User) -> Result<()>;

    /// Upsert by id
    async fn put_user(&self, user: &User) -> Result<()>;

    /// Write a classifier-derived role unless the user's role is pinned by an
    /// override. `false` when the user is overridden or gone.
    async fn set_derived_role(&self, id: UserId, role: Role) -> Result<bool>;

    /// Hard removal, used only by administrative purges
    async fn remove_user(&self, id: UserId) -> Result<bool>;

    /// Users counted by effective role; unrecognized stored roles count as usuario
    async fn count_by_role(&self) -> Result<RoleCounts>;

    /// Page through users ordered by business id, starting after `after`
    async fn list_users(&self, after: Option<&str>, limit: usize) -> Result<Vec<User>>;
}

/// Durable conversations
#[async_trait]
pub trait ConversationRegistry: Send + Sync {
    /// Persist the conversation with its full membership in one write
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>>;

    async fn delete_conversation(&self, id: ConversationId) -> Result<bool>;
}

/// Label catalog and assignment ledger
#[async_trait]
pub trait LabelStore: Send + Sync {
    /// A taken name is a `UniqueViolation`
    async fn insert_label(&self, label: &Label) -> Result<()>;

    async fn get_label(&self, id: LabelId) -> Result<Option<Label>>;

    async fn find_label_by_name(&self, name: &str) -> Result<Option<Label>>;

    /// Overwrite an existing label; a taken name is a `UniqueViolation`
    async fn update_label(&self, label: &Label) -> Result<bool>;

    /// Rename in one step, provided no assignment references the label.
    /// `false` when it is referenced or gone; a taken name is a `UniqueViolation`.
    async fn rename_unused_label(&self, id: LabelId, name: &str) -> Result<bool>;

    async fn delete_label(&self, id: LabelId) -> Result<bool>;

    async fn all_labels(&self) -> Result<Vec<Label>>;

    async fn labels_by_ids(&self, ids: &[LabelId]) -> Result<Vec<Label>>;

    /// A present (conversation, label) pair is a `UniqueViolation`
    async fn insert_assignment(&self, assignment: &LabelAssignment) -> Result<()>;

    async fn find_assignment(
        &self,
        conversation_id: ConversationId,
        label_id: LabelId,
    ) -> Result<Option<LabelAssignment>>;

    async fn delete_assignment(
        &self,
        conversation_id: ConversationId,
        label_id: LabelId,
    ) -> Result<bool>;

    async fn assignments_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<LabelAssignment>>;

    async fn assignments_for_label(&self, label_id: LabelId) -> Result<Vec<LabelAssignment>>;

    async fn delete_assignments_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<u64>;

    async fn delete_assignments_for_label(&self, label_id: LabelId) -> Result<u64>;

    /// Null out `assigned_by` wherever it names this user
    async fn clear_assigner(&self, user_id: UserId) -> Result<u64>;
}

/// A schema upgrade that has been applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Schema statements and the migration version marker
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Execute schema statements; stores without a schema language ignore them
    async fn apply_schema(&self, statements: &[&str]) -> Result<()>;

    async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>>;

    async fn record_migration(&self, migration: &AppliedMigration) -> Result<()>;
}

/// Everything the engine needs from a backing store
pub trait Store: IdentityStore + ConversationRegistry + LabelStore + SchemaStore {}

impl<T> Store for T where T: IdentityStore + ConversationRegistry + LabelStore + SchemaStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        match config {
            DatabaseConfig::Embedded { path } => assert_eq!(path, "./asesoria.db"),
            #[cfg(feature = "surreal-remote")]
            _ => panic!("Expected embedded config"),
        }
    }

    #[test]
    fn test_database_config_toml() {
        let config: DatabaseConfig = toml::from_str("type = \"embedded\"\npath = \"\"").unwrap();
        assert_eq!(
            config,
            DatabaseConfig::Embedded {
                path: String::new()
            }
        );
    }

    #[tokio::test]
    async fn test_call_policy_times_out() {
        let policy = CallPolicy::new(Duration::from_millis(10));
        let result: Result<()> = policy
            .run("slow_call", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(DatabaseError::Timeout {
                operation: "slow_call",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_call_policy_passes_through() {
        let policy = CallPolicy::default();
        let value = policy.run("fast_call", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
