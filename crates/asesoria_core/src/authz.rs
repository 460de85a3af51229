//! The authorization facade
//!
//! `AuthorizationFacade` is the single entry point a request-handling layer
//! talks to. It resolves users from the identity store, evaluates the
//! permission rules and only then writes through to the conversation registry
//! or the label ledger. Every store call is bounded by the configured
//! [`CallPolicy`]; a call that runs past it surfaces as
//! [`CoreError::Unavailable`], never as a denial.

use futures::future::try_join_all;
use std::sync::Arc;

use chrono::Utc;

use crate::{
    CoreError, Result,
    config::AsesoriaConfig,
    conversation::{Conversation, validate_targets},
    db::{CallPolicy, Store},
    id::{ConversationId, LabelId, UserId},
    label::{Label, LabelAssignment, LabelCatalog, LabelLedger, LabelSeed},
    permission::{self, ConversationKind, DenialReason},
    reclassify::{ReclassifyReport, Reclassifier},
    role::{Role, RoleCounts},
    users::{TipoPersona, User, UserDirectory},
};

pub struct AuthorizationFacade<S> {
    store: Arc<S>,
    policy: CallPolicy,
    users: UserDirectory<S>,
    catalog: LabelCatalog<S>,
    ledger: LabelLedger<S>,
    reclassifier: Reclassifier<S>,
    seed: Vec<LabelSeed>,
}

impl<S: Store> AuthorizationFacade<S> {
    /// Facade with default settings
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, &AsesoriaConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: &AsesoriaConfig) -> Self {
        let policy = config.call_policy();
        Self {
            users: UserDirectory::new(store.clone(), policy),
            catalog: LabelCatalog::new(store.clone(), policy),
            ledger: LabelLedger::new(store.clone(), policy),
            reclassifier: Reclassifier::new(store.clone(), policy, config.reclassify.batch_size),
            seed: config.labels.seed.clone(),
            policy,
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Administrative user operations
    pub fn users(&self) -> &UserDirectory<S> {
        &self.users
    }

    /// Unchecked catalog access for system tasks such as seeding
    pub fn catalog(&self) -> &LabelCatalog<S> {
        &self.catalog
    }

    /// Unchecked ledger access for system tasks
    pub fn ledger(&self) -> &LabelLedger<S> {
        &self.ledger
    }

    pub fn classify(&self, business_id: &str) -> Role {
        Role::classify(business_id)
    }

    pub fn can_initiate(&self, initiator: Role, target: Role, kind: ConversationKind) -> bool {
        permission::can_initiate(initiator, target, kind)
    }

    /// Authorize and register a new conversation.
    ///
    /// Either every target passes the permission rules and the conversation
    /// is written with its full membership, or nothing is written.
    #[tracing::instrument(skip(self, target_ids), fields(targets = target_ids.len()))]
    pub async fn authorize_create(
        &self,
        initiator_id: UserId,
        target_ids: &[UserId],
        kind: ConversationKind,
    ) -> Result<Conversation> {
        let target_ids = validate_targets(initiator_id, target_ids, kind)?;

        let (initiator, targets) = futures::try_join!(
            self.resolve_active(initiator_id),
            try_join_all(target_ids.iter().map(|id| self.resolve_active(*id)))
        )?;

        let initiator_role = initiator.effective_role();
        for target in &targets {
            let verdict = permission::check_initiate(initiator_role, target.effective_role(), kind);
            if let Err(reason) = verdict {
                tracing::warn!(
                    rule = reason.rule(),
                    initiator = %initiator.id,
                    target = %target.id,
                    %kind,
                    "conversation denied: {reason}"
                );
                return Err(CoreError::denied(initiator.id, reason));
            }
        }

        let mut participant_ids = Vec::with_capacity(targets.len() + 1);
        participant_ids.push(initiator.id);
        participant_ids.extend(targets.iter().map(|t| t.id));

        let conversation = Conversation {
            id: ConversationId::generate(),
            kind,
            participant_ids,
            created_by: initiator.id,
            created_at: Utc::now(),
        };
        self.policy
            .run(
                "create_conversation",
                self.store.create_conversation(&conversation),
            )
            .await?;

        tracing::info!(
            conversation = %conversation.id,
            %kind,
            participants = conversation.participant_ids.len(),
            "conversation created"
        );
        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.policy
            .run("get_conversation", self.store.get_conversation(id))
            .await?
            .ok_or_else(|| CoreError::not_found("conversation", id))
    }

    /// Administrative removal. Assignments go first so no row ever points at
    /// a missing conversation. Returns the number of assignments removed.
    pub async fn delete_conversation(&self, id: ConversationId) -> Result<u64> {
        self.get_conversation(id).await?;
        let removed = self.ledger.purge_conversation(id).await?;
        self.policy
            .run("delete_conversation", self.store.delete_conversation(id))
            .await?;
        tracing::info!(conversation = %id, removed, "conversation deleted");
        Ok(removed)
    }

    // ===== Label catalog =====

    /// Return the label named `name`, creating it when absent. Creating a new
    /// label is catalog curation and needs a consultor; finding an existing
    /// one does not.
    pub async fn upsert_label(
        &self,
        actor_id: UserId,
        name: &str,
        color: &str,
        icon: &str,
    ) -> Result<Label> {
        let actor = self.resolve_active(actor_id).await?;
        if let Some(existing) = self.catalog.find(name).await? {
            tracing::debug!(label = %existing.id, name, "label already in catalog");
            return Ok(existing);
        }
        self.require_curator(&actor)?;
        self.catalog.upsert(name, color, icon).await
    }

    pub async fn update_label_style(
        &self,
        actor_id: UserId,
        label_id: LabelId,
        color: Option<&str>,
        icon: Option<&str>,
    ) -> Result<Label> {
        self.curator(actor_id).await?;
        self.catalog.update_style(label_id, color, icon).await
    }

    pub async fn rename_label(
        &self,
        actor_id: UserId,
        label_id: LabelId,
        new_name: &str,
    ) -> Result<Label> {
        self.curator(actor_id).await?;
        self.catalog.rename(label_id, new_name).await
    }

    /// Remove a label and all of its assignments
    pub async fn delete_label(&self, actor_id: UserId, label_id: LabelId) -> Result<u64> {
        self.curator(actor_id).await?;
        self.catalog.delete(label_id).await
    }

    pub async fn list_catalog(&self) -> Result<Vec<Label>> {
        self.catalog.list().await
    }

    /// Ensure the configured seed labels exist
    pub async fn seed_catalog(&self) -> Result<Vec<Label>> {
        self.catalog.seed(&self.seed).await
    }

    // ===== Label ledger =====

    /// Attach a label on behalf of `actor_id`, who becomes `assigned_by`
    pub async fn assign(
        &self,
        actor_id: UserId,
        conversation_id: ConversationId,
        label_id: LabelId,
    ) -> Result<LabelAssignment> {
        self.label_editor(actor_id, conversation_id).await?;
        self.ledger
            .assign(conversation_id, label_id, Some(actor_id))
            .await
    }

    pub async fn unassign(
        &self,
        actor_id: UserId,
        conversation_id: ConversationId,
        label_id: LabelId,
    ) -> Result<bool> {
        self.label_editor(actor_id, conversation_id).await?;
        self.ledger.unassign(conversation_id, label_id).await
    }

    pub async fn list_labels(&self, conversation_id: ConversationId) -> Result<Vec<Label>> {
        self.ledger.list_labels(conversation_id).await
    }

    pub async fn conversations_with_label(&self, label_id: LabelId) -> Result<Vec<ConversationId>> {
        self.ledger.conversations_with_label(label_id).await
    }

    // ===== Users and roles =====

    pub async fn register_user(&self, business_id: &str, display_name: &str) -> Result<User> {
        self.users.register(business_id, display_name).await
    }

    pub async fn deactivate_user(&self, id: UserId) -> Result<User> {
        self.users.deactivate(id).await
    }

    pub async fn override_role(&self, id: UserId, role: Role) -> Result<User> {
        self.users.override_role(id, role).await
    }

    /// Return an overridden user to the classifier-derived role
    pub async fn clear_override(&self, id: UserId) -> Result<User> {
        self.users.clear_override(id).await
    }

    pub async fn update_contact(
        &self,
        id: UserId,
        phone: Option<String>,
        push_token: Option<String>,
    ) -> Result<User> {
        self.users.update_contact(id, phone, push_token).await
    }

    pub async fn accept_terms(
        &self,
        id: UserId,
        razon_social: &str,
        tipo_persona: TipoPersona,
    ) -> Result<User> {
        self.users.accept_terms(id, razon_social, tipo_persona).await
    }

    pub async fn purge_user(&self, id: UserId) -> Result<u64> {
        self.users.purge(id).await
    }

    /// Re-derive every non-overridden role from its business id
    #[tracing::instrument(skip(self))]
    pub async fn reclassify_all(&self) -> Result<ReclassifyReport> {
        self.reclassifier.run().await
    }

    pub async fn count_by_role(&self) -> Result<RoleCounts> {
        Ok(self
            .policy
            .run("count_by_role", self.store.count_by_role())
            .await?)
    }

    // ===== helpers =====

    /// Fetch a user that may take part in new activity
    async fn resolve_active(&self, id: UserId) -> Result<User> {
        match self
            .policy
            .run("get_user", self.store.get_user(id))
            .await?
        {
            Some(user) if user.is_active => Ok(user),
            Some(_) => {
                tracing::debug!(user = %id, "user is deactivated");
                Err(CoreError::not_found("user", id))
            }
            None => Err(CoreError::not_found("user", id)),
        }
    }

    async fn curator(&self, actor_id: UserId) -> Result<User> {
        let actor = self.resolve_active(actor_id).await?;
        self.require_curator(&actor)?;
        Ok(actor)
    }

    fn require_curator(&self, actor: &User) -> Result<()> {
        permission::check_catalog_mutation(actor.effective_role())
            .map_err(|reason| self.deny(actor, reason))
    }

    async fn label_editor(&self, actor_id: UserId, conversation_id: ConversationId) -> Result<()> {
        let actor = self.resolve_active(actor_id).await?;
        let conversation = self.get_conversation(conversation_id).await?;
        permission::check_label_mutation(
            actor.effective_role(),
            conversation.has_participant(actor.id),
        )
        .map_err(|reason| self.deny(&actor, reason))
    }

    fn deny(&self, actor: &User, reason: DenialReason) -> CoreError {
        tracing::warn!(rule = reason.rule(), actor = %actor.id, "label change denied: {reason}");
        CoreError::denied(actor.id, reason)
    }
}
