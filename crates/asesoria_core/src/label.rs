//! Label catalog and the conversation/label assignment ledger
//!
//! The catalog is a controlled vocabulary of styled labels with unique names.
//! The ledger joins conversations to labels. Both lean on the store's unique
//! indexes for correctness under concurrency: a duplicate insert comes back as
//! a `UniqueViolation`, which the idempotent operations here absorb by
//! returning the row that won the race.
//!
//! Cascades (conversation or label removal drops its assignments, user purge
//! clears `assigned_by`) are performed here explicitly and never left to the
//! backing store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    CoreError, Result,
    db::{
        CallPolicy, ConversationRegistry, DatabaseError, IdentityStore, LabelStore,
        WRITE_ATTEMPTS,
    },
    id::{AssignmentId, ConversationId, LabelId, UserId},
};

/// A styled tag from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    /// Unique, case-sensitive
    pub name: String,
    /// Display hint, e.g. `#EF4444`
    pub color: String,
    /// Display hint, an icon name such as `alert-circle`
    pub icon: String,
    pub created_at: DateTime<Utc>,
}

/// A label attached to a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelAssignment {
    pub id: AssignmentId,
    pub conversation_id: ConversationId,
    pub label_id: LabelId,
    /// Cleared when the assigning user is purged
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
}

/// Catalog entry used for seeding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSeed {
    pub name: String,
    pub color: String,
    pub icon: String,
}

impl LabelSeed {
    pub fn new(name: &str, color: &str, icon: &str) -> Self {
        Self {
            name: name.to_string(),
            color: color.to_string(),
            icon: icon.to_string(),
        }
    }
}

/// The catalog every fresh installation starts with
pub fn default_seed() -> Vec<LabelSeed> {
    vec![
        LabelSeed::new("Urgente", "#EF4444", "alert-circle"),
        LabelSeed::new("Importante", "#F97316", "star"),
        LabelSeed::new("Pendiente", "#F59E0B", "clock"),
        LabelSeed::new("Seguimiento", "#8B5CF6", "repeat"),
        LabelSeed::new("Facturación", "#3B82F6", "file-text"),
        LabelSeed::new("Resuelto", "#10B981", "check-circle"),
    ]
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CoreError::invalid("name", "label name must not be empty"));
    }
    Ok(())
}

/// The controlled vocabulary of labels
#[derive(Clone)]
pub struct LabelCatalog<S> {
    store: Arc<S>,
    policy: CallPolicy,
}

impl<S: LabelStore> LabelCatalog<S> {
    pub fn new(store: Arc<S>, policy: CallPolicy) -> Self {
        Self { store, policy }
    }

    /// Create the label if no label has this exact name, otherwise return the
    /// existing one untouched (its style is not updated).
    pub async fn upsert(&self, name: &str, color: &str, icon: &str) -> Result<Label> {
        validate_name(name)?;
        if let Some(existing) = self.find(name).await? {
            return Ok(existing);
        }

        let label = Label {
            id: LabelId::generate(),
            name: name.to_string(),
            color: color.to_string(),
            icon: icon.to_string(),
            created_at: Utc::now(),
        };
        let mut attempt = 1;
        loop {
            match self
                .policy
                .run("insert_label", self.store.insert_label(&label))
                .await
            {
                Ok(()) => {
                    tracing::info!(label = %label.id, name, "created label");
                    return Ok(label);
                }
                Err(DatabaseError::UniqueViolation { .. }) => {
                    tracing::debug!(name, "label created concurrently, returning existing");
                    return self.find(name).await?.ok_or_else(|| {
                        CoreError::conflict("label", format!("'{name}' vanished mid-upsert"))
                    });
                }
                Err(DatabaseError::WriteConflict(_)) if attempt < WRITE_ATTEMPTS => {
                    tracing::debug!(name, attempt, "label insert hit a write conflict");
                    if let Some(existing) = self.find(name).await? {
                        return Ok(existing);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Cosmetic edit; fields left as `None` keep their value
    pub async fn update_style(
        &self,
        id: LabelId,
        color: Option<&str>,
        icon: Option<&str>,
    ) -> Result<Label> {
        let mut label = self.get(id).await?;
        if let Some(color) = color {
            label.color = color.to_string();
        }
        if let Some(icon) = icon {
            label.icon = icon.to_string();
        }
        self.write(&label).await?;
        Ok(label)
    }

    /// Rename a label that no conversation references yet
    pub async fn rename(&self, id: LabelId, new_name: &str) -> Result<Label> {
        validate_name(new_name)?;
        let mut label = self.get(id).await?;
        if label.name == new_name {
            return Ok(label);
        }

        let renamed = self
            .policy
            .run(
                "rename_unused_label",
                self.store.rename_unused_label(id, new_name),
            )
            .await;
        match renamed {
            Ok(true) => {
                tracing::info!(label = %id, from = %label.name, to = new_name, "renamed label");
                label.name = new_name.to_string();
                Ok(label)
            }
            Ok(false) => {
                let references = self
                    .policy
                    .run("assignments_for_label", self.store.assignments_for_label(id))
                    .await?;
                if references.is_empty() {
                    return Err(CoreError::not_found("label", id));
                }
                Err(CoreError::conflict(
                    "label",
                    format!(
                        "'{}' is assigned to {} conversation(s) and can no longer be renamed",
                        label.name,
                        references.len()
                    ),
                ))
            }
            Err(DatabaseError::UniqueViolation { .. }) => Err(CoreError::conflict(
                "label",
                format!("another label is already named '{new_name}'"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a label and every assignment of it. Returns the number of
    /// assignments dropped.
    pub async fn delete(&self, id: LabelId) -> Result<u64> {
        let label = self.get(id).await?;
        let removed = self
            .policy
            .run(
                "delete_assignments_for_label",
                self.store.delete_assignments_for_label(id),
            )
            .await?;
        self.policy
            .run("delete_label", self.store.delete_label(id))
            .await?;
        tracing::info!(label = %id, name = %label.name, removed, "deleted label");
        Ok(removed)
    }

    pub async fn get(&self, id: LabelId) -> Result<Label> {
        self.policy
            .run("get_label", self.store.get_label(id))
            .await?
            .ok_or_else(|| CoreError::not_found("label", id))
    }

    pub async fn find(&self, name: &str) -> Result<Option<Label>> {
        Ok(self
            .policy
            .run("find_label_by_name", self.store.find_label_by_name(name))
            .await?)
    }

    /// The whole catalog ordered by name
    pub async fn list(&self) -> Result<Vec<Label>> {
        let mut labels = self
            .policy
            .run("all_labels", self.store.all_labels())
            .await?;
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(labels)
    }

    /// Ensure every seed entry exists. Safe to run repeatedly.
    pub async fn seed(&self, seeds: &[LabelSeed]) -> Result<Vec<Label>> {
        let mut labels = Vec::with_capacity(seeds.len());
        for seed in seeds {
            labels.push(self.upsert(&seed.name, &seed.color, &seed.icon).await?);
        }
        tracing::info!(count = labels.len(), "label catalog seeded");
        Ok(labels)
    }

    async fn write(&self, label: &Label) -> Result<()> {
        let updated = self
            .policy
            .run("update_label", self.store.update_label(label))
            .await?;
        if updated {
            Ok(())
        } else {
            Err(CoreError::not_found("label", label.id))
        }
    }
}

/// Many-to-many join between conversations and labels
#[derive(Clone)]
pub struct LabelLedger<S> {
    store: Arc<S>,
    policy: CallPolicy,
}

impl<S> LabelLedger<S>
where
    S: LabelStore + ConversationRegistry + IdentityStore,
{
    pub fn new(store: Arc<S>, policy: CallPolicy) -> Self {
        Self { store, policy }
    }

    /// Attach a label to a conversation.
    ///
    /// If the pair is already present the existing assignment is returned
    /// unchanged, keeping its original `assigned_at` and `assigned_by`.
    pub async fn assign(
        &self,
        conversation_id: ConversationId,
        label_id: LabelId,
        assigned_by: Option<UserId>,
    ) -> Result<LabelAssignment> {
        self.require_conversation(conversation_id).await?;
        self.require_label(label_id).await?;
        if let Some(user_id) = assigned_by {
            self.policy
                .run("get_user", self.store.get_user(user_id))
                .await?
                .ok_or_else(|| CoreError::not_found("user", user_id))?;
        }

        if let Some(existing) = self.find(conversation_id, label_id).await? {
            tracing::debug!(
                conversation = %conversation_id,
                label = %label_id,
                "label already assigned"
            );
            return Ok(existing);
        }

        let assignment = LabelAssignment {
            id: AssignmentId::generate(),
            conversation_id,
            label_id,
            assigned_by,
            assigned_at: Utc::now(),
        };
        let mut attempt = 1;
        loop {
            match self
                .policy
                .run("insert_assignment", self.store.insert_assignment(&assignment))
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        conversation = %conversation_id,
                        label = %label_id,
                        "label assigned"
                    );
                    return Ok(assignment);
                }
                Err(DatabaseError::UniqueViolation { .. }) => {
                    tracing::debug!(
                        conversation = %conversation_id,
                        label = %label_id,
                        "lost assign race, returning winner"
                    );
                    return self.find(conversation_id, label_id).await?.ok_or_else(|| {
                        CoreError::conflict("assignment", "assignment removed while being created")
                    });
                }
                Err(DatabaseError::WriteConflict(_)) if attempt < WRITE_ATTEMPTS => {
                    tracing::debug!(
                        conversation = %conversation_id,
                        label = %label_id,
                        attempt,
                        "assignment insert hit a write conflict"
                    );
                    if let Some(existing) = self.find(conversation_id, label_id).await? {
                        return Ok(existing);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Detach a label. `false` when it was not attached.
    pub async fn unassign(
        &self,
        conversation_id: ConversationId,
        label_id: LabelId,
    ) -> Result<bool> {
        let removed = self
            .policy
            .run(
                "delete_assignment",
                self.store.delete_assignment(conversation_id, label_id),
            )
            .await?;
        if removed {
            tracing::info!(conversation = %conversation_id, label = %label_id, "label unassigned");
        }
        Ok(removed)
    }

    /// Labels on a conversation ordered by name
    pub async fn list_labels(&self, conversation_id: ConversationId) -> Result<Vec<Label>> {
        self.require_conversation(conversation_id).await?;
        let ids: Vec<LabelId> = self
            .assignments(conversation_id)
            .await?
            .into_iter()
            .map(|a| a.label_id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut labels = self
            .policy
            .run("labels_by_ids", self.store.labels_by_ids(&ids))
            .await?;
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(labels)
    }

    /// Raw assignment rows for a conversation, oldest first
    pub async fn assignments(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<LabelAssignment>> {
        let mut rows = self
            .policy
            .run(
                "assignments_for_conversation",
                self.store.assignments_for_conversation(conversation_id),
            )
            .await?;
        rows.sort_by_key(|a| a.assigned_at);
        Ok(rows)
    }

    /// Conversations carrying a label, for filtering
    pub async fn conversations_with_label(
        &self,
        label_id: LabelId,
    ) -> Result<Vec<ConversationId>> {
        self.require_label(label_id).await?;
        let mut rows = self
            .policy
            .run(
                "assignments_for_label",
                self.store.assignments_for_label(label_id),
            )
            .await?;
        rows.sort_by_key(|a| a.assigned_at);
        Ok(rows.into_iter().map(|a| a.conversation_id).collect())
    }

    /// Drop every assignment of a conversation that is being removed
    pub async fn purge_conversation(&self, conversation_id: ConversationId) -> Result<u64> {
        Ok(self
            .policy
            .run(
                "delete_assignments_for_conversation",
                self.store.delete_assignments_for_conversation(conversation_id),
            )
            .await?)
    }

    async fn find(
        &self,
        conversation_id: ConversationId,
        label_id: LabelId,
    ) -> Result<Option<LabelAssignment>> {
        Ok(self
            .policy
            .run(
                "find_assignment",
                self.store.find_assignment(conversation_id, label_id),
            )
            .await?)
    }

    async fn require_conversation(&self, id: ConversationId) -> Result<()> {
        self.policy
            .run("get_conversation", self.store.get_conversation(id))
            .await?
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("conversation", id))
    }

    async fn require_label(&self, id: LabelId) -> Result<()> {
        self.policy
            .run("get_label", self.store.get_label(id))
            .await?
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("label", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Conversation;
    use crate::db::MemoryStore;
    use crate::error::ErrorKind;
    use crate::permission::ConversationKind;
    use pretty_assertions::assert_eq;

    struct Fixture {
        store: Arc<MemoryStore>,
        catalog: LabelCatalog<MemoryStore>,
        ledger: LabelLedger<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let policy = CallPolicy::default();
        Fixture {
            catalog: LabelCatalog::new(store.clone(), policy),
            ledger: LabelLedger::new(store.clone(), policy),
            store,
        }
    }

    async fn conversation(store: &MemoryStore) -> ConversationId {
        let creator = UserId::generate();
        let conversation = Conversation {
            id: ConversationId::generate(),
            kind: ConversationKind::Direct,
            participant_ids: vec![creator, UserId::generate()],
            created_by: creator,
            created_at: Utc::now(),
        };
        store.create_conversation(&conversation).await.unwrap();
        conversation.id
    }

    #[tokio::test]
    async fn test_upsert_twice_returns_same_label() {
        let f = fixture();
        let first = f.catalog.upsert("Urgente", "#EF4444", "alert-circle").await.unwrap();
        let second = f.catalog.upsert("Urgente", "#EF4444", "alert-circle").await.unwrap();
        assert_eq!(first.id, second.id);
        let named: Vec<_> = f
            .catalog
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|l| l.name == "Urgente")
            .collect();
        assert_eq!(named.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_does_not_restyle_existing() {
        let f = fixture();
        let first = f.catalog.upsert("Pendiente", "#F59E0B", "clock").await.unwrap();
        let again = f.catalog.upsert("Pendiente", "#000000", "x").await.unwrap();
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn test_upsert_is_case_sensitive() {
        let f = fixture();
        let upper = f.catalog.upsert("Urgente", "#EF4444", "alert-circle").await.unwrap();
        let lower = f.catalog.upsert("urgente", "#EF4444", "alert-circle").await.unwrap();
        assert_ne!(upper.id, lower.id);
    }

    #[tokio::test]
    async fn test_upsert_rejects_empty_name() {
        let f = fixture();
        let err = f.catalog.upsert("   ", "#fff", "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_update_style_changes_only_given_fields() {
        let f = fixture();
        let label = f.catalog.upsert("Resuelto", "#10B981", "check-circle").await.unwrap();
        let updated = f.catalog.update_style(label.id, Some("#22C55E"), None).await.unwrap();
        assert_eq!(updated.color, "#22C55E");
        assert_eq!(updated.icon, "check-circle");
        assert_eq!(updated.name, "Resuelto");
    }

    #[tokio::test]
    async fn test_rename_conflicts() {
        let f = fixture();
        let a = f.catalog.upsert("A", "#111", "a").await.unwrap();
        f.catalog.upsert("B", "#222", "b").await.unwrap();
        let err = f.catalog.rename(a.id, "B").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let renamed = f.catalog.rename(a.id, "C").await.unwrap();
        assert_eq!(renamed.name, "C");
    }

    #[tokio::test]
    async fn test_rename_refused_once_referenced() {
        let f = fixture();
        let convo = conversation(&f.store).await;
        let label = f.catalog.upsert("Seguimiento", "#8B5CF6", "repeat").await.unwrap();
        f.ledger.assign(convo, label.id, None).await.unwrap();
        let err = f.catalog.rename(label.id, "Otro").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        // cosmetic edits are still allowed
        assert!(f.catalog.update_style(label.id, None, Some("refresh")).await.is_ok());
    }

    #[tokio::test]
    async fn test_assign_is_idempotent() {
        let f = fixture();
        let convo = conversation(&f.store).await;
        let label = f.catalog.upsert("Urgente", "#EF4444", "alert-circle").await.unwrap();
        let first = f.ledger.assign(convo, label.id, None).await.unwrap();
        let second = f.ledger.assign(convo, label.id, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.ledger.assignments(convo).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assign_keeps_original_assigner() {
        let f = fixture();
        let convo = conversation(&f.store).await;
        let label = f.catalog.upsert("Urgente", "#EF4444", "alert-circle").await.unwrap();
        let alice = crate::users::User::new("USR1", "Alice");
        let bob = crate::users::User::new("USR2", "Bob");
        f.store.insert_user(&alice).await.unwrap();
        f.store.insert_user(&bob).await.unwrap();

        let first = f.ledger.assign(convo, label.id, Some(alice.id)).await.unwrap();
        let second = f.ledger.assign(convo, label.id, Some(bob.id)).await.unwrap();
        assert_eq!(second.assigned_by, Some(alice.id));
        assert_eq!(second.assigned_at, first.assigned_at);
    }

    #[tokio::test]
    async fn test_assign_unknown_ids() {
        let f = fixture();
        let convo = conversation(&f.store).await;
        let label = f.catalog.upsert("Urgente", "#EF4444", "alert-circle").await.unwrap();

        let err = f
            .ledger
            .assign(ConversationId::generate(), label.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f
            .ledger
            .assign(convo, LabelId::generate(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f
            .ledger
            .assign(convo, label.id, Some(UserId::generate()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_unassign_missing_pair_is_false() {
        let f = fixture();
        let convo = conversation(&f.store).await;
        let label = f.catalog.upsert("Urgente", "#EF4444", "alert-circle").await.unwrap();
        let before = f.ledger.assignments(convo).await.unwrap();
        assert!(!f.ledger.unassign(convo, label.id).await.unwrap());
        assert_eq!(f.ledger.assignments(convo).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_assign_then_unassign_round_trip() {
        let f = fixture();
        let convo = conversation(&f.store).await;
        let keep = f.catalog.upsert("Importante", "#F97316", "star").await.unwrap();
        let temp = f.catalog.upsert("Urgente", "#EF4444", "alert-circle").await.unwrap();
        f.ledger.assign(convo, keep.id, None).await.unwrap();
        let before = f.ledger.assignments(convo).await.unwrap();

        f.ledger.assign(convo, temp.id, None).await.unwrap();
        assert!(f.ledger.unassign(convo, temp.id).await.unwrap());
        assert_eq!(f.ledger.assignments(convo).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_list_labels_ordered_by_name() {
        let f = fixture();
        let convo = conversation(&f.store).await;
        for name in ["Urgente", "Facturación", "Pendiente"] {
            let label = f.catalog.upsert(name, "#000", "tag").await.unwrap();
            f.ledger.assign(convo, label.id, None).await.unwrap();
        }
        let names: Vec<String> = f
            .ledger
            .list_labels(convo)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["Facturación", "Pendiente", "Urgente"]);
    }

    #[tokio::test]
    async fn test_delete_label_cascades() {
        let f = fixture();
        let a = conversation(&f.store).await;
        let b = conversation(&f.store).await;
        let doomed = f.catalog.upsert("Temporal", "#000", "x").await.unwrap();
        let kept = f.catalog.upsert("Urgente", "#EF4444", "alert-circle").await.unwrap();
        f.ledger.assign(a, doomed.id, None).await.unwrap();
        f.ledger.assign(b, doomed.id, None).await.unwrap();
        f.ledger.assign(b, kept.id, None).await.unwrap();

        assert_eq!(f.catalog.delete(doomed.id).await.unwrap(), 2);
        assert!(f.ledger.list_labels(a).await.unwrap().is_empty());
        assert_eq!(f.ledger.list_labels(b).await.unwrap(), vec![kept]);
    }

    #[tokio::test]
    async fn test_conversations_with_label() {
        let f = fixture();
        let a = conversation(&f.store).await;
        let b = conversation(&f.store).await;
        let label = f.catalog.upsert("Urgente", "#EF4444", "alert-circle").await.unwrap();
        f.ledger.assign(a, label.id, None).await.unwrap();
        f.ledger.assign(b, label.id, None).await.unwrap();
        let tagged = f.ledger.conversations_with_label(label.id).await.unwrap();
        assert_eq!(tagged.len(), 2);
        assert!(tagged.contains(&a) && tagged.contains(&b));
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let f = fixture();
        let first = f.catalog.seed(&default_seed()).await.unwrap();
        let second = f.catalog.seed(&default_seed()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.catalog.list().await.unwrap().len(), default_seed().len());
    }
}
