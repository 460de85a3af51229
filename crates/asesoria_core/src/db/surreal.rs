//! SurrealDB-backed store
//!
//! Works against any `Connection`: the embedded SurrealKV engine, the
//! in-memory engine used by tests, or a remote server.

use async_trait::async_trait;
use serde::Deserialize;
use chrono::Utc;
use surrealdb::{
    Connection, RecordId, Surreal,
    error::{Api, Db},
};

use super::{
    AppliedMigration, ConversationRegistry, DatabaseError, IdentityStore, LabelStore, Result,
    SchemaStore,
    models::{DbAssignment, DbConversation, DbLabel, DbMigration, DbUser},
};
use crate::{
    conversation::Conversation,
    id::{ConversationId, LabelId, UserId},
    label::{Label, LabelAssignment},
    role::{Role, RoleCounts},
    users::User,
};

/// Store backed by a SurrealDB connection
#[derive(Clone)]
pub struct SurrealStore<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealStore<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Surreal<C> {
        &self.db
    }
}

/// Engines report a unique index hit as "index ... already contains" and a
/// taken record id as "record ... already exists". Remote engines only hand
/// back the message, so match on text.
fn is_unique_violation(err: &surrealdb::Error) -> bool {
    let message = err.to_string();
    message.contains("already contains") || message.contains("already exists")
}

/// Local engines return `TxRetryable`; remote ones only its message
fn is_write_conflict(err: &surrealdb::Error) -> bool {
    matches!(err, surrealdb::Error::Db(Db::TxRetryable))
        || err.to_string().contains("can be retried")
}

fn is_connection_failure(err: &surrealdb::Error) -> bool {
    matches!(
        err,
        surrealdb::Error::Api(Api::ConnectionUninitialised | Api::Http(_) | Api::Ws(_))
    )
}

/// Sort a driver error into the store error kinds
fn query_error(err: surrealdb::Error) -> DatabaseError {
    if is_connection_failure(&err) {
        DatabaseError::ConnectionFailed(err)
    } else if is_write_conflict(&err) {
        DatabaseError::WriteConflict(err)
    } else {
        DatabaseError::QueryFailed(err)
    }
}

fn write_error(
    table: &'static str,
    index: &'static str,
    value: String,
) -> impl FnOnce(surrealdb::Error) -> DatabaseError {
    move |e| {
        if is_unique_violation(&e) {
            DatabaseError::UniqueViolation {
                table,
                index,
                value,
            }
        } else {
            query_error(e)
        }
    }
}

fn convert<D, T>(rows: Vec<D>) -> Result<Vec<T>>
where
    T: TryFrom<D, Error = DatabaseError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl<C: Connection> IdentityStore for SurrealStore<C> {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let db_user: Option<DbUser> = self
            .db
            .select(id.to_record_id())
            .await
            .map_err(query_error)?;
        db_user.map(User::try_from).transpose()
    }

    async fn get_user_by_business_id(&self, business_id: &str) -> Result<Option<User>> {
        let rows: Vec<DbUser> = self
            .db
            .query("SELECT * FROM user WHERE business_id = $business_id LIMIT 1")
            .bind(("business_id", business_id.to_string()))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        rows.into_iter().next().map(User::try_from).transpose()
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        let _: Option<DbUser> = self
            .db
            .create(user.id.to_record_id())
            .content(DbUser::from(user))
            .await
            .map_err(write_error(
                "user",
                "user_business_id",
                user.business_id.clone(),
            ))?;
        Ok(())
    }

    async fn put_user(&self, user: &User) -> Result<()> {
        let _: Option<DbUser> = self
            .db
            .upsert(user.id.to_record_id())
            .content(DbUser::from(user))
            .await
            .map_err(write_error(
                "user",
                "user_business_id",
                user.business_id.clone(),
            ))?;
        Ok(())
    }

    async fn set_derived_role(&self, id: UserId, role: Role) -> Result<bool> {
        let updated: Vec<DbUser> = self
            .db
            .query(
                "UPDATE $id SET role = $role, role_source = 'derived', updated_at = $now \
                 WHERE role_source != 'override' RETURN AFTER",
            )
            .bind(("id", id.to_record_id()))
            .bind(("role", role.as_str()))
            .bind(("now", Utc::now()))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        Ok(!updated.is_empty())
    }

    async fn remove_user(&self, id: UserId) -> Result<bool> {
        let removed: Option<DbUser> = self
            .db
            .delete(id.to_record_id())
            .await
            .map_err(query_error)?;
        Ok(removed.is_some())
    }

    async fn count_by_role(&self) -> Result<RoleCounts> {
        #[derive(Deserialize)]
        struct RoleTotal {
            role: Option<String>,
            total: u64,
        }

        let rows: Vec<RoleTotal> = self
            .db
            .query("SELECT role, count() AS total FROM user GROUP BY role")
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;

        let mut counts = RoleCounts::new();
        for row in rows {
            let role = Role::from_stored(row.role.as_deref()).unwrap_or(Role::Usuario);
            counts.add(role, row.total);
        }
        Ok(counts)
    }

    async fn list_users(&self, after: Option<&str>, limit: usize) -> Result<Vec<User>> {
        let query = match after {
            Some(_) => {
                "SELECT * FROM user WHERE business_id > $after ORDER BY business_id LIMIT $limit"
            }
            None => "SELECT * FROM user ORDER BY business_id LIMIT $limit",
        };
        let rows: Vec<DbUser> = self
            .db
            .query(query)
            .bind(("after", after.map(str::to_string)))
            .bind(("limit", limit as i64))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        convert(rows)
    }
}

#[async_trait]
impl<C: Connection> ConversationRegistry for SurrealStore<C> {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        let _: Option<DbConversation> = self
            .db
            .create(conversation.id.to_record_id())
            .content(DbConversation::from(conversation))
            .await
            .map_err(write_error("convo", "id", conversation.id.to_string()))?;
        Ok(())
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let row: Option<DbConversation> = self
            .db
            .select(id.to_record_id())
            .await
            .map_err(query_error)?;
        row.map(Conversation::try_from).transpose()
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        let removed: Option<DbConversation> = self
            .db
            .delete(id.to_record_id())
            .await
            .map_err(query_error)?;
        Ok(removed.is_some())
    }
}

#[async_trait]
impl<C: Connection> LabelStore for SurrealStore<C> {
    async fn insert_label(&self, label: &Label) -> Result<()> {
        let _: Option<DbLabel> = self
            .db
            .create(label.id.to_record_id())
            .content(DbLabel::from(label))
            .await
            .map_err(write_error("label", "label_name", label.name.clone()))?;
        Ok(())
    }

    async fn get_label(&self, id: LabelId) -> Result<Option<Label>> {
        let row: Option<DbLabel> = self
            .db
            .select(id.to_record_id())
            .await
            .map_err(query_error)?;
        row.map(Label::try_from).transpose()
    }

    async fn find_label_by_name(&self, name: &str) -> Result<Option<Label>> {
        let rows: Vec<DbLabel> = self
            .db
            .query("SELECT * FROM label WHERE name = $name LIMIT 1")
            .bind(("name", name.to_string()))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        rows.into_iter().next().map(Label::try_from).transpose()
    }

    async fn update_label(&self, label: &Label) -> Result<bool> {
        let updated: Option<DbLabel> = self
            .db
            .update(label.id.to_record_id())
            .content(DbLabel::from(label))
            .await
            .map_err(write_error("label", "label_name", label.name.clone()))?;
        Ok(updated.is_some())
    }

    async fn rename_unused_label(&self, id: LabelId, name: &str) -> Result<bool> {
        let renamed: Vec<DbLabel> = self
            .db
            .query(
                "UPDATE $label SET name = $name \
                 WHERE array::len((SELECT id FROM assignment WHERE label_id = $label LIMIT 1)) = 0 \
                 RETURN AFTER",
            )
            .bind(("label", id.to_record_id()))
            .bind(("name", name.to_string()))
            .await
            .map_err(write_error("label", "label_name", name.to_string()))?
            .take(0)
            .map_err(write_error("label", "label_name", name.to_string()))?;
        Ok(!renamed.is_empty())
    }

    async fn delete_label(&self, id: LabelId) -> Result<bool> {
        let removed: Option<DbLabel> = self
            .db
            .delete(id.to_record_id())
            .await
            .map_err(query_error)?;
        Ok(removed.is_some())
    }

    async fn all_labels(&self) -> Result<Vec<Label>> {
        let rows: Vec<DbLabel> = self
            .db
            .select("label")
            .await
            .map_err(query_error)?;
        convert(rows)
    }

    async fn labels_by_ids(&self, ids: &[LabelId]) -> Result<Vec<Label>> {
        let ids: Vec<RecordId> = ids.iter().map(RecordId::from).collect();
        let rows: Vec<DbLabel> = self
            .db
            .query("SELECT * FROM label WHERE id INSIDE $ids")
            .bind(("ids", ids))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        convert(rows)
    }

    async fn insert_assignment(&self, assignment: &LabelAssignment) -> Result<()> {
        let _: Option<DbAssignment> = self
            .db
            .create(assignment.id.to_record_id())
            .content(DbAssignment::from(assignment))
            .await
            .map_err(write_error(
                "assignment",
                "assignment_pair",
                format!("{}:{}", assignment.conversation_id, assignment.label_id),
            ))?;
        Ok(())
    }

    async fn find_assignment(
        &self,
        conversation_id: ConversationId,
        label_id: LabelId,
    ) -> Result<Option<LabelAssignment>> {
        let rows: Vec<DbAssignment> = self
            .db
            .query(
                "SELECT * FROM assignment WHERE conversation_id = $conversation AND label_id = $label LIMIT 1",
            )
            .bind(("conversation", conversation_id.to_record_id()))
            .bind(("label", label_id.to_record_id()))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        rows.into_iter()
            .next()
            .map(LabelAssignment::try_from)
            .transpose()
    }

    async fn delete_assignment(
        &self,
        conversation_id: ConversationId,
        label_id: LabelId,
    ) -> Result<bool> {
        let removed: Vec<DbAssignment> = self
            .db
            .query(
                "DELETE assignment WHERE conversation_id = $conversation AND label_id = $label RETURN BEFORE",
            )
            .bind(("conversation", conversation_id.to_record_id()))
            .bind(("label", label_id.to_record_id()))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        Ok(!removed.is_empty())
    }

    async fn assignments_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<LabelAssignment>> {
        let rows: Vec<DbAssignment> = self
            .db
            .query("SELECT * FROM assignment WHERE conversation_id = $conversation")
            .bind(("conversation", conversation_id.to_record_id()))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        convert(rows)
    }

    async fn assignments_for_label(&self, label_id: LabelId) -> Result<Vec<LabelAssignment>> {
        let rows: Vec<DbAssignment> = self
            .db
            .query("SELECT * FROM assignment WHERE label_id = $label")
            .bind(("label", label_id.to_record_id()))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        convert(rows)
    }

    async fn delete_assignments_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<u64> {
        let removed: Vec<DbAssignment> = self
            .db
            .query("DELETE assignment WHERE conversation_id = $conversation RETURN BEFORE")
            .bind(("conversation", conversation_id.to_record_id()))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        Ok(removed.len() as u64)
    }

    async fn delete_assignments_for_label(&self, label_id: LabelId) -> Result<u64> {
        let removed: Vec<DbAssignment> = self
            .db
            .query("DELETE assignment WHERE label_id = $label RETURN BEFORE")
            .bind(("label", label_id.to_record_id()))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        Ok(removed.len() as u64)
    }

    async fn clear_assigner(&self, user_id: UserId) -> Result<u64> {
        let cleared: Vec<DbAssignment> = self
            .db
            .query(
                "UPDATE assignment SET assigned_by = NONE WHERE assigned_by = $user RETURN AFTER",
            )
            .bind(("user", user_id.to_record_id()))
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        Ok(cleared.len() as u64)
    }
}

#[async_trait]
impl<C: Connection> SchemaStore for SurrealStore<C> {
    async fn apply_schema(&self, statements: &[&str]) -> Result<()> {
        for statement in statements {
            self.db
                .query(*statement)
                .await
                .map_err(query_error)?
                .check()
                .map_err(query_error)?;
        }
        Ok(())
    }

    async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let rows: Vec<DbMigration> = self
            .db
            .query("SELECT version, name, applied_at FROM schema_migration ORDER BY version")
            .await
            .map_err(query_error)?
            .take(0)
            .map_err(query_error)?;
        Ok(rows.into_iter().map(AppliedMigration::from).collect())
    }

    async fn record_migration(&self, migration: &AppliedMigration) -> Result<()> {
        let _: Option<DbMigration> = self
            .db
            .create("schema_migration")
            .content(DbMigration::from(migration))
            .await
            .map_err(write_error(
                "schema_migration",
                "schema_migration_version",
                migration.version.to_string(),
            ))?;
        Ok(())
    }
}
