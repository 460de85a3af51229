//! Who may open which conversations, and who may touch labels
//!
//! Every rule here is a pure function of roles. Denials carry a
//! [`DenialReason`] naming the rule that was violated so clients can show it
//! and audit logs can record it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::role::Role;

/// Shape of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Exactly two participants
    Direct,
    /// Two or more participants, created by a consultor
    Group,
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKind::Direct => f.write_str("direct"),
            ConversationKind::Group => f.write_str("group"),
        }
    }
}

/// The rule a rejected request violated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum DenialReason {
    /// Only a consultor may create group conversations
    GroupRequiresConsultor { initiator: Role },
    /// Non-consultors may only open direct conversations with a consultor
    DirectRequiresConsultorTarget { initiator: Role, target: Role },
    /// Labels on a conversation may only be changed by its participants or a consultor
    LabelRequiresParticipant { actor: Role },
    /// The label catalog is curated by consultors
    CatalogRequiresConsultor { actor: Role },
}

impl DenialReason {
    /// Stable machine-readable rule code
    pub fn rule(&self) -> &'static str {
        match self {
            DenialReason::GroupRequiresConsultor { .. } => "group_requires_consultor",
            DenialReason::DirectRequiresConsultorTarget { .. } => {
                "direct_requires_consultor_target"
            }
            DenialReason::LabelRequiresParticipant { .. } => "label_requires_participant",
            DenialReason::CatalogRequiresConsultor { .. } => "catalog_requires_consultor",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::GroupRequiresConsultor { initiator } => {
                write!(f, "{initiator} cannot create group conversations")
            }
            DenialReason::DirectRequiresConsultorTarget { initiator, target } => write!(
                f,
                "{initiator} may only message consultor: direct conversations must target consultor, not {target}"
            ),
            DenialReason::LabelRequiresParticipant { actor } => write!(
                f,
                "{actor} may only label conversations they participate in"
            ),
            DenialReason::CatalogRequiresConsultor { actor } => {
                write!(f, "{actor} cannot modify the label catalog")
            }
        }
    }
}

/// Evaluate the initiation rule for one (initiator, target) pair
pub fn check_initiate(
    initiator: Role,
    target: Role,
    kind: ConversationKind,
) -> Result<(), DenialReason> {
    match (initiator, kind) {
        (Role::Consultor, _) => Ok(()),
        (Role::Usuario | Role::Asesor, ConversationKind::Group) => {
            Err(DenialReason::GroupRequiresConsultor { initiator })
        }
        (Role::Usuario | Role::Asesor, ConversationKind::Direct) => match target {
            Role::Consultor => Ok(()),
            Role::Usuario | Role::Asesor => {
                Err(DenialReason::DirectRequiresConsultorTarget { initiator, target })
            }
        },
    }
}

/// Boolean form of [`check_initiate`]
pub fn can_initiate(initiator: Role, target: Role, kind: ConversationKind) -> bool {
    check_initiate(initiator, target, kind).is_ok()
}

/// May `actor` add or remove labels on a conversation?
pub fn check_label_mutation(actor: Role, is_participant: bool) -> Result<(), DenialReason> {
    if is_participant || actor == Role::Consultor {
        Ok(())
    } else {
        Err(DenialReason::LabelRequiresParticipant { actor })
    }
}

/// May `actor` create, restyle, rename or delete catalog labels?
pub fn check_catalog_mutation(actor: Role) -> Result<(), DenialReason> {
    match actor {
        Role::Consultor => Ok(()),
        Role::Usuario | Role::Asesor => Err(DenialReason::CatalogRequiresConsultor { actor }),
    }
}
