//! User records and the administrative user directory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    CoreError, Result,
    db::{CallPolicy, DatabaseError, IdentityStore, LabelStore, WRITE_ATTEMPTS},
    id::UserId,
    role::Role,
};

/// Where a user's stored role came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    /// Derived from the business id by the classifier
    #[default]
    Derived,
    /// Set by an administrator; bulk reclassification leaves it alone
    Override,
}

/// Tax profile captured when a user accepts the terms of service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalProfile {
    pub razon_social: String,
    pub tipo_persona: TipoPersona,
    pub terms_accepted: bool,
    pub terms_accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipoPersona {
    Fisica,
    Moral,
}

/// User model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier for this user
    pub id: UserId,

    /// Externally issued identifier (RFC); unique and never reused
    pub business_id: String,

    pub display_name: String,

    /// Stored role; `None` when the record holds no role or a legacy value
    pub role: Option<Role>,

    #[serde(default)]
    pub role_source: RoleSource,

    pub phone: Option<String>,

    pub push_token: Option<String>,

    pub fiscal_profile: Option<FiscalProfile>,

    /// Users are deactivated, never deleted
    pub is_active: bool,

    /// When this user was created
    pub created_at: DateTime<Utc>,

    /// When this user was last updated
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A freshly registered user with a classifier-derived role
    pub fn new(business_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let business_id = business_id.into();
        let now = Utc::now();
        Self {
            id: UserId::generate(),
            role: Some(Role::classify(&business_id)),
            business_id,
            display_name: display_name.into(),
            role_source: RoleSource::Derived,
            phone: None,
            push_token: None,
            fiscal_profile: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// The stored role, or the classifier's answer when it is missing or stale
    pub fn effective_role(&self) -> Role {
        self.role
            .unwrap_or_else(|| Role::classify(&self.business_id))
    }
}

/// Administrative operations on user records
#[derive(Clone)]
pub struct UserDirectory<S> {
    store: Arc<S>,
    policy: CallPolicy,
}

impl<S> UserDirectory<S>
where
    S: IdentityStore + LabelStore,
{
    pub fn new(store: Arc<S>, policy: CallPolicy) -> Self {
        Self { store, policy }
    }

    /// Register a user; the role is derived from the business id
    pub async fn register(&self, business_id: &str, display_name: &str) -> Result<User> {
        if business_id.trim().is_empty() {
            return Err(CoreError::invalid("business_id", "must not be empty"));
        }
        let taken = || {
            CoreError::conflict(
                "user",
                format!("business id '{business_id}' is already registered"),
            )
        };
        let user = User::new(business_id, display_name);
        let mut attempt = 1;
        loop {
            match self
                .policy
                .run("insert_user", self.store.insert_user(&user))
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        user = %user.id,
                        role = %user.effective_role(),
                        "registered user"
                    );
                    return Ok(user);
                }
                Err(DatabaseError::UniqueViolation { .. }) => return Err(taken()),
                Err(DatabaseError::WriteConflict(_)) if attempt < WRITE_ATTEMPTS => {
                    tracing::debug!(business_id, attempt, "user insert hit a write conflict");
                    let existing = self
                        .policy
                        .run(
                            "get_user_by_business_id",
                            self.store.get_user_by_business_id(business_id),
                        )
                        .await?;
                    if existing.is_some() {
                        return Err(taken());
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fetch an active or inactive user
    pub async fn get(&self, id: UserId) -> Result<User> {
        self.policy
            .run("get_user", self.store.get_user(id))
            .await?
            .ok_or_else(|| CoreError::not_found("user", id))
    }

    pub async fn find_by_business_id(&self, business_id: &str) -> Result<User> {
        self.policy
            .run(
                "get_user_by_business_id",
                self.store.get_user_by_business_id(business_id),
            )
            .await?
            .ok_or_else(|| CoreError::not_found("user", business_id))
    }

    /// Mark a user inactive. Idempotent.
    pub async fn deactivate(&self, id: UserId) -> Result<User> {
        self.modify(id, |user| user.is_active = false).await
    }

    /// Administrative role override; survives bulk reclassification
    pub async fn override_role(&self, id: UserId, role: Role) -> Result<User> {
        let user = self
            .modify(id, |user| {
                user.role = Some(role);
                user.role_source = RoleSource::Override;
            })
            .await?;
        tracing::info!(user = %id, %role, "role overridden");
        Ok(user)
    }

    /// Drop an override and return the user to the classifier-derived role
    pub async fn clear_override(&self, id: UserId) -> Result<User> {
        let user = self
            .modify(id, |user| {
                user.role = Some(Role::classify(&user.business_id));
                user.role_source = RoleSource::Derived;
            })
            .await?;
        tracing::info!(user = %id, role = %user.effective_role(), "role override cleared");
        Ok(user)
    }

    pub async fn update_contact(
        &self,
        id: UserId,
        phone: Option<String>,
        push_token: Option<String>,
    ) -> Result<User> {
        self.modify(id, |user| {
            if phone.is_some() {
                user.phone = phone;
            }
            if push_token.is_some() {
                user.push_token = push_token;
            }
        })
        .await
    }

    /// Record acceptance of the terms along with the fiscal profile
    pub async fn accept_terms(
        &self,
        id: UserId,
        razon_social: &str,
        tipo_persona: TipoPersona,
    ) -> Result<User> {
        if razon_social.trim().is_empty() {
            return Err(CoreError::invalid("razon_social", "must not be empty"));
        }
        let now = Utc::now();
        self.modify(id, |user| {
            user.fiscal_profile = Some(FiscalProfile {
                razon_social: razon_social.to_string(),
                tipo_persona,
                terms_accepted: true,
                terms_accepted_at: Some(now),
            });
        })
        .await
    }

    /// Erase a user record for a data-removal request.
    ///
    /// Label assignments they made are kept with `assigned_by` cleared.
    pub async fn purge(&self, id: UserId) -> Result<u64> {
        self.get(id).await?;
        let detached = self
            .policy
            .run("clear_assigner", self.store.clear_assigner(id))
            .await?;
        self.policy
            .run("remove_user", self.store.remove_user(id))
            .await?;
        tracing::info!(user = %id, detached, "purged user");
        Ok(detached)
    }

    async fn modify(&self, id: UserId, change: impl FnOnce(&mut User)) -> Result<User> {
        let mut user = self.get(id).await?;
        change(&mut user);
        user.updated_at = Utc::now();
        self.policy
            .run("put_user", self.store.put_user(&user))
            .await?;
        Ok(user)
    }
}
