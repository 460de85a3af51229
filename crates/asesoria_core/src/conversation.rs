//! Conversations as seen by the authorization layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    CoreError, Result,
    id::{ConversationId, UserId},
    permission::ConversationKind,
};

/// A registered conversation. Returned to callers as the handle of a
/// successful authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// Creator first, then targets in request order, without duplicates
    pub participant_ids: Vec<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participant_ids.contains(&user_id)
    }
}

/// Alias used where a conversation is handed back from `authorize_create`
pub type ConversationHandle = Conversation;

/// De-duplicate targets and check participant counts for the kind
pub fn validate_targets(
    initiator: UserId,
    targets: &[UserId],
    kind: ConversationKind,
) -> Result<Vec<UserId>> {
    let mut unique = Vec::with_capacity(targets.len());
    for target in targets {
        if *target == initiator {
            return Err(CoreError::invalid(
                "target_ids",
                "the initiator cannot be listed as a target",
            ));
        }
        if !unique.contains(target) {
            unique.push(*target);
        }
    }

    match kind {
        ConversationKind::Direct if unique.len() != 1 => Err(CoreError::invalid(
            "target_ids",
            format!(
                "a direct conversation needs exactly one target, got {}",
                unique.len()
            ),
        )),
        ConversationKind::Group if unique.is_empty() => Err(CoreError::invalid(
            "target_ids",
            "a group conversation needs at least one target",
        )),
        _ => Ok(unique),
    }
}
