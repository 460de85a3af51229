//! Asesoria Core - Role & Label Authorization Engine
//!
//! This crate decides which users may open conversations with which other
//! users, derives role tiers from business identifiers, and keeps the
//! controlled vocabulary of labels attached to conversations consistent.

pub mod authz;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod id;
pub mod label;
pub mod permission;
pub mod reclassify;
pub mod role;
pub mod users;

// Macros are automatically available at crate root due to #[macro_export]

pub use authz::AuthorizationFacade;
pub use config::AsesoriaConfig;
pub use conversation::{Conversation, ConversationHandle};
pub use error::{CoreError, ErrorKind, Result};
pub use id::{AssignmentId, ConversationId, Id, IdType, LabelId, UserId};
pub use label::{Label, LabelAssignment, LabelCatalog, LabelLedger, LabelSeed};
pub use permission::{ConversationKind, DenialReason, can_initiate};
pub use reclassify::{ReclassifyFailure, ReclassifyReport, Reclassifier};
pub use role::{Role, RoleCounts, classify};
pub use users::{RoleSource, User, UserDirectory};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        AsesoriaConfig, AuthorizationFacade, Conversation, ConversationId, ConversationKind,
        CoreError, DenialReason, ErrorKind, Id, IdType, Label, LabelAssignment, LabelId, Result,
        Role, RoleCounts, User, UserId,
    };
    pub use crate::db::{MemoryStore, Store, SurrealStore};
}
