//! Database model wrappers
//!
//! These mirror the domain types but carry `RecordId`s for SurrealDB. Roles
//! are persisted as plain strings so rows written before the role enum was
//! enforced still deserialize; `Role::from_stored` decides what they mean.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

use super::{AppliedMigration, DatabaseError};
use crate::{
    conversation::Conversation,
    id::{Id, IdType},
    label::{Label, LabelAssignment},
    permission::ConversationKind,
    role::Role,
    users::{FiscalProfile, RoleSource, User},
};

/// Database representation of a User
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbUser {
    pub id: RecordId,
    pub business_id: String,
    pub display_name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub role_source: RoleSource,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub fiscal_profile: Option<FiscalProfile>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database representation of a Conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConversation {
    pub id: RecordId,
    pub kind: ConversationKind,
    pub participant_ids: Vec<RecordId>,
    pub created_by: RecordId,
    pub created_at: DateTime<Utc>,
}

/// Database representation of a Label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbLabel {
    pub id: RecordId,
    pub name: String,
    pub color: String,
    pub icon: String,
    pub created_at: DateTime<Utc>,
}

/// Database representation of a LabelAssignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbAssignment {
    pub id: RecordId,
    pub conversation_id: RecordId,
    pub label_id: RecordId,
    #[serde(default)]
    pub assigned_by: Option<RecordId>,
    pub assigned_at: DateTime<Utc>,
}

/// Version marker row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbMigration {
    pub version: u32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Decode a record id; `table` names the table the id should point into
fn record<T: IdType>(table: &'static str, id: &RecordId) -> Result<Id<T>, DatabaseError> {
    Id::from_record(id).map_err(|e| DatabaseError::InvalidRecord {
        table,
        message: e.to_string(),
    })
}

// Conversion implementations

impl From<&User> for DbUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_record_id(),
            business_id: user.business_id.clone(),
            display_name: user.display_name.clone(),
            role: user.role.map(|r| r.as_str().to_string()),
            role_source: user.role_source,
            phone: user.phone.clone(),
            push_token: user.push_token.clone(),
            fiscal_profile: user.fiscal_profile.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl TryFrom<DbUser> for User {
    type Error = DatabaseError;

    fn try_from(db_user: DbUser) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record("user", &db_user.id)?,
            role: Role::from_stored(db_user.role.as_deref()),
            business_id: db_user.business_id,
            display_name: db_user.display_name,
            role_source: db_user.role_source,
            phone: db_user.phone,
            push_token: db_user.push_token,
            fiscal_profile: db_user.fiscal_profile,
            is_active: db_user.is_active,
            created_at: db_user.created_at,
            updated_at: db_user.updated_at,
        })
    }
}

impl From<&Conversation> for DbConversation {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.to_record_id(),
            kind: conversation.kind,
            participant_ids: conversation
                .participant_ids
                .iter()
                .map(RecordId::from)
                .collect(),
            created_by: conversation.created_by.to_record_id(),
            created_at: conversation.created_at,
        }
    }
}

impl TryFrom<DbConversation> for Conversation {
    type Error = DatabaseError;

    fn try_from(db: DbConversation) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record("convo", &db.id)?,
            kind: db.kind,
            participant_ids: db
                .participant_ids
                .iter()
                .map(|p| record("user", p))
                .collect::<Result<_, _>>()?,
            created_by: record("user", &db.created_by)?,
            created_at: db.created_at,
        })
    }
}

impl From<&Label> for DbLabel {
    fn from(label: &Label) -> Self {
        Self {
            id: label.id.to_record_id(),
            name: label.name.clone(),
            color: label.color.clone(),
            icon: label.icon.clone(),
            created_at: label.created_at,
        }
    }
}

impl TryFrom<DbLabel> for Label {
    type Error = DatabaseError;

    fn try_from(db: DbLabel) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record("label", &db.id)?,
            name: db.name,
            color: db.color,
            icon: db.icon,
            created_at: db.created_at,
        })
    }
}

impl From<&LabelAssignment> for DbAssignment {
    fn from(assignment: &LabelAssignment) -> Self {
        Self {
            id: assignment.id.to_record_id(),
            conversation_id: assignment.conversation_id.to_record_id(),
            label_id: assignment.label_id.to_record_id(),
            assigned_by: assignment.assigned_by.map(RecordId::from),
            assigned_at: assignment.assigned_at,
        }
    }
}

impl TryFrom<DbAssignment> for LabelAssignment {
    type Error = DatabaseError;

    fn try_from(db: DbAssignment) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record("assignment", &db.id)?,
            conversation_id: record("convo", &db.conversation_id)?,
            label_id: record("label", &db.label_id)?,
            assigned_by: db
                .assigned_by
                .as_ref()
                .map(|id| record("user", id))
                .transpose()?,
            assigned_at: db.assigned_at,
        })
    }
}

impl From<&AppliedMigration> for DbMigration {
    fn from(migration: &AppliedMigration) -> Self {
        Self {
            version: migration.version,
            name: migration.name.clone(),
            applied_at: migration.applied_at,
        }
    }
}

impl From<DbMigration> for AppliedMigration {
    fn from(db: DbMigration) -> Self {
        Self {
            version: db.version,
            name: db.name,
            applied_at: db.applied_at,
        }
    }
}
