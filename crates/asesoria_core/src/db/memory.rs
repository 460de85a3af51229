//! In-process store for tests and embedders that do not need durability

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

use super::{
    AppliedMigration, ConversationRegistry, DatabaseError, IdentityStore, LabelStore, Result,
    SchemaStore,
};
use crate::{
    conversation::Conversation,
    id::{ConversationId, LabelId, UserId},
    label::{Label, LabelAssignment},
    role::{Role, RoleCounts},
    users::{RoleSource, User},
};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    business_ids: HashMap<String, UserId>,
    conversations: HashMap<ConversationId, Conversation>,
    labels: HashMap<LabelId, Label>,
    label_names: HashMap<String, LabelId>,
    assignments: HashMap<(ConversationId, LabelId), LabelAssignment>,
    migrations: Vec<AppliedMigration>,
}

/// Map-backed store. Every write takes the table lock, so unique checks and
/// inserts are atomic with respect to each other.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that sleeps before answering each call
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            tables: RwLock::default(),
            latency: Some(latency),
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.delay().await;
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn get_user_by_business_id(&self, business_id: &str) -> Result<Option<User>> {
        self.delay().await;
        let tables = self.tables.read();
        Ok(tables
            .business_ids
            .get(business_id)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        self.delay().await;
        let mut tables = self.tables.write();
        if tables.business_ids.contains_key(&user.business_id) {
            return Err(DatabaseError::UniqueViolation {
                table: "user",
                index: "user_business_id",
                value: user.business_id.clone(),
            });
        }
        if tables.users.contains_key(&user.id) {
            return Err(DatabaseError::UniqueViolation {
                table: "user",
                index: "id",
                value: user.id.to_string(),
            });
        }
        tables.business_ids.insert(user.business_id.clone(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn put_user(&self, user: &User) -> Result<()> {
        self.delay().await;
        let mut tables = self.tables.write();
        if tables
            .business_ids
            .get(&user.business_id)
            .is_some_and(|owner| *owner != user.id)
        {
            return Err(DatabaseError::UniqueViolation {
                table: "user",
                index: "user_business_id",
                value: user.business_id.clone(),
            });
        }
        if let Some(previous) = tables.users.insert(user.id, user.clone()) {
            if previous.business_id != user.business_id {
                tables.business_ids.remove(&previous.business_id);
            }
        }
        tables.business_ids.insert(user.business_id.clone(), user.id);
        Ok(())
    }

    async fn set_derived_role(&self, id: UserId, role: Role) -> Result<bool> {
        self.delay().await;
        let mut tables = self.tables.write();
        match tables.users.get_mut(&id) {
            Some(user) if user.role_source != RoleSource::Override => {
                user.role = Some(role);
                user.role_source = RoleSource::Derived;
                user.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_user(&self, id: UserId) -> Result<bool> {
        self.delay().await;
        let mut tables = self.tables.write();
        match tables.users.remove(&id) {
            Some(user) => {
                tables.business_ids.remove(&user.business_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_by_role(&self) -> Result<RoleCounts> {
        self.delay().await;
        Ok(self
            .tables
            .read()
            .users
            .values()
            .map(|u| u.role.unwrap_or(Role::Usuario))
            .collect())
    }

    async fn list_users(&self, after: Option<&str>, limit: usize) -> Result<Vec<User>> {
        self.delay().await;
        let tables = self.tables.read();
        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|u| after.is_none_or(|a| u.business_id.as_str() > a))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.business_id.cmp(&b.business_id));
        users.truncate(limit);
        Ok(users)
    }
}

#[async_trait]
impl ConversationRegistry for MemoryStore {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.delay().await;
        let mut tables = self.tables.write();
        if tables.conversations.contains_key(&conversation.id) {
            return Err(DatabaseError::UniqueViolation {
                table: "convo",
                index: "id",
                value: conversation.id.to_string(),
            });
        }
        tables
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        self.delay().await;
        Ok(self.tables.read().conversations.get(&id).cloned())
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        self.delay().await;
        Ok(self.tables.write().conversations.remove(&id).is_some())
    }
}

#[async_trait]
impl LabelStore for MemoryStore {
    async fn insert_label(&self, label: &Label) -> Result<()> {
        self.delay().await;
        let mut tables = self.tables.write();
        if tables.label_names.contains_key(&label.name) {
            return Err(DatabaseError::UniqueViolation {
                table: "label",
                index: "label_name",
                value: label.name.clone(),
            });
        }
        tables.label_names.insert(label.name.clone(), label.id);
        tables.labels.insert(label.id, label.clone());
        Ok(())
    }

    async fn get_label(&self, id: LabelId) -> Result<Option<Label>> {
        self.delay().await;
        Ok(self.tables.read().labels.get(&id).cloned())
    }

    async fn find_label_by_name(&self, name: &str) -> Result<Option<Label>> {
        self.delay().await;
        let tables = self.tables.read();
        Ok(tables
            .label_names
            .get(name)
            .and_then(|id| tables.labels.get(id))
            .cloned())
    }

    async fn update_label(&self, label: &Label) -> Result<bool> {
        self.delay().await;
        let mut tables = self.tables.write();
        if tables
            .label_names
            .get(&label.name)
            .is_some_and(|owner| *owner != label.id)
        {
            return Err(DatabaseError::UniqueViolation {
                table: "label",
                index: "label_name",
                value: label.name.clone(),
            });
        }
        let Some(previous) = tables.labels.get(&label.id).map(|l| l.name.clone()) else {
            return Ok(false);
        };
        tables.label_names.remove(&previous);
        tables.label_names.insert(label.name.clone(), label.id);
        tables.labels.insert(label.id, label.clone());
        Ok(true)
    }

    async fn rename_unused_label(&self, id: LabelId, name: &str) -> Result<bool> {
        self.delay().await;
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        if tables.assignments.keys().any(|(_, label)| *label == id) {
            return Ok(false);
        }
        if tables.label_names.get(name).is_some_and(|owner| *owner != id) {
            return Err(DatabaseError::UniqueViolation {
                table: "label",
                index: "label_name",
                value: name.to_string(),
            });
        }
        let Some(label) = tables.labels.get_mut(&id) else {
            return Ok(false);
        };
        let previous = std::mem::replace(&mut label.name, name.to_string());
        tables.label_names.remove(&previous);
        tables.label_names.insert(name.to_string(), id);
        Ok(true)
    }

    async fn delete_label(&self, id: LabelId) -> Result<bool> {
        self.delay().await;
        let mut tables = self.tables.write();
        match tables.labels.remove(&id) {
            Some(label) => {
                tables.label_names.remove(&label.name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn all_labels(&self) -> Result<Vec<Label>> {
        self.delay().await;
        Ok(self.tables.read().labels.values().cloned().collect())
    }

    async fn labels_by_ids(&self, ids: &[LabelId]) -> Result<Vec<Label>> {
        self.delay().await;
        let tables = self.tables.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.labels.get(id))
            .cloned()
            .collect())
    }

    async fn insert_assignment(&self, assignment: &LabelAssignment) -> Result<()> {
        self.delay().await;
        let key = (assignment.conversation_id, assignment.label_id);
        let mut tables = self.tables.write();
        if tables.assignments.contains_key(&key) {
            return Err(DatabaseError::UniqueViolation {
                table: "assignment",
                index: "assignment_pair",
                value: format!("{}:{}", key.0, key.1),
            });
        }
        tables.assignments.insert(key, assignment.clone());
        Ok(())
    }

    async fn find_assignment(
        &self,
        conversation_id: ConversationId,
        label_id: LabelId,
    ) -> Result<Option<LabelAssignment>> {
        self.delay().await;
        Ok(self
            .tables
            .read()
            .assignments
            .get(&(conversation_id, label_id))
            .cloned())
    }

    async fn delete_assignment(
        &self,
        conversation_id: ConversationId,
        label_id: LabelId,
    ) -> Result<bool> {
        self.delay().await;
        Ok(self
            .tables
            .write()
            .assignments
            .remove(&(conversation_id, label_id))
            .is_some())
    }

    async fn assignments_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<LabelAssignment>> {
        self.delay().await;
        Ok(self
            .tables
            .read()
            .assignments
            .values()
            .filter(|a| a.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn assignments_for_label(&self, label_id: LabelId) -> Result<Vec<LabelAssignment>> {
        self.delay().await;
        Ok(self
            .tables
            .read()
            .assignments
            .values()
            .filter(|a| a.label_id == label_id)
            .cloned()
            .collect())
    }

    async fn delete_assignments_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<u64> {
        self.delay().await;
        let mut tables = self.tables.write();
        let before = tables.assignments.len();
        tables
            .assignments
            .retain(|(conversation, _), _| *conversation != conversation_id);
        Ok((before - tables.assignments.len()) as u64)
    }

    async fn delete_assignments_for_label(&self, label_id: LabelId) -> Result<u64> {
        self.delay().await;
        let mut tables = self.tables.write();
        let before = tables.assignments.len();
        tables.assignments.retain(|(_, label), _| *label != label_id);
        Ok((before - tables.assignments.len()) as u64)
    }

    async fn clear_assigner(&self, user_id: UserId) -> Result<u64> {
        self.delay().await;
        let mut cleared = 0;
        for assignment in self.tables.write().assignments.values_mut() {
            if assignment.assigned_by == Some(user_id) {
                assignment.assigned_by = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

#[async_trait]
impl SchemaStore for MemoryStore {
    async fn apply_schema(&self, _statements: &[&str]) -> Result<()> {
        Ok(())
    }

    async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        self.delay().await;
        Ok(self.tables.read().migrations.clone())
    }

    async fn record_migration(&self, migration: &AppliedMigration) -> Result<()> {
        self.delay().await;
        let mut tables = self.tables.write();
        if tables
            .migrations
            .iter()
            .any(|m| m.version == migration.version)
        {
            return Err(DatabaseError::UniqueViolation {
                table: "schema_migration",
                index: "version",
                value: migration.version.to_string(),
            });
        }
        tables.migrations.push(migration.clone());
        Ok(())
    }
}
