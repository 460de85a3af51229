use asesoria_core::{
    AuthorizationFacade, ConversationId, ConversationKind, CoreError, db::Store,
};
use futures::future::try_join_all;
use miette::Result;
use owo_colors::OwoColorize;

use super::{label_by_name, user_by_business_id};
use crate::output::{Output, format_denial, format_relative_time};

/// Authorize and create a conversation on behalf of `actor`
pub async fn open<S: Store>(
    facade: &AuthorizationFacade<S>,
    actor: &str,
    targets: &[String],
    kind: ConversationKind,
) -> Result<()> {
    let output = Output::new();
    let initiator = user_by_business_id(facade, actor).await?;
    let target_ids: Vec<_> = try_join_all(
        targets
            .iter()
            .map(|business_id| user_by_business_id(facade, business_id)),
    )
    .await?
    .into_iter()
    .map(|user| user.id)
    .collect();

    match facade.authorize_create(initiator.id, &target_ids, kind).await {
        Ok(conversation) => {
            output.success(&format!("Opened {} conversation", kind));
            output.kv("ID", &conversation.id.to_string().bright_white().to_string());
            output.kv(
                "Participants",
                &conversation.participant_ids.len().to_string(),
            );
            Ok(())
        }
        Err(e) => {
            if let CoreError::PermissionDenied { reason, .. } = &e {
                output.error(&format!("Denied: {}", format_denial(reason)));
            }
            Err(e.into())
        }
    }
}

pub async fn show<S: Store>(facade: &AuthorizationFacade<S>, id: ConversationId) -> Result<()> {
    let output = Output::new();
    let conversation = facade.get_conversation(id).await?;
    let labels = facade.list_labels(id).await?;

    output.section("Conversation");
    output.kv("ID", &conversation.id.to_string());
    output.kv("Kind", &conversation.kind.to_string());
    output.kv("Created by", &conversation.created_by.to_string());
    output.kv("Created", &format_relative_time(conversation.created_at));
    output.section("Participants");
    for participant in &conversation.participant_ids {
        output.list_item(&participant.to_string());
    }
    if !labels.is_empty() {
        output.section("Labels");
        output.labels(&labels);
    }
    Ok(())
}

pub async fn label<S: Store>(
    facade: &AuthorizationFacade<S>,
    actor: &str,
    id: ConversationId,
    label: &str,
) -> Result<()> {
    let output = Output::new();
    let actor = user_by_business_id(facade, actor).await?;
    let label = label_by_name(facade, label).await?;
    let assignment = facade.assign(actor.id, id, label.id).await?;

    output.success(&format!("{} attached", label.name.bright_cyan()));
    if assignment.assigned_by != Some(actor.id) {
        output.status("The label was already attached");
    }
    Ok(())
}

pub async fn unlabel<S: Store>(
    facade: &AuthorizationFacade<S>,
    actor: &str,
    id: ConversationId,
    label: &str,
) -> Result<()> {
    let output = Output::new();
    let actor = user_by_business_id(facade, actor).await?;
    let label = label_by_name(facade, label).await?;

    if facade.unassign(actor.id, id, label.id).await? {
        output.success(&format!("{} detached", label.name.bright_cyan()));
    } else {
        output.status(&format!("{} was not attached", label.name));
    }
    Ok(())
}

pub async fn labels<S: Store>(facade: &AuthorizationFacade<S>, id: ConversationId) -> Result<()> {
    let output = Output::new();
    let labels = facade.list_labels(id).await?;
    if labels.is_empty() {
        output.status("No labels");
    } else {
        output.labels(&labels);
    }
    Ok(())
}

pub async fn delete<S: Store>(facade: &AuthorizationFacade<S>, id: ConversationId) -> Result<()> {
    let output = Output::new();
    let removed = facade.delete_conversation(id).await?;
    output.success(&format!("Deleted conversation {}", id));
    output.kv("Assignments removed", &removed.to_string());
    Ok(())
}
