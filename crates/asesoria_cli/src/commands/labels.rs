use asesoria_core::{AuthorizationFacade, db::Store};
use miette::Result;
use owo_colors::OwoColorize;

use super::{label_by_name, user_by_business_id};
use crate::output::Output;

pub async fn list<S: Store>(facade: &AuthorizationFacade<S>) -> Result<()> {
    let output = Output::new();
    let labels = facade.list_catalog().await?;

    if labels.is_empty() {
        output.status("The catalog is empty");
        output.status(&format!(
            "Seed it with: {}",
            "asesoria labels seed".bright_green()
        ));
    } else {
        output.section(&format!("Label catalog ({})", labels.len()));
        output.labels(&labels);
    }
    Ok(())
}

pub async fn seed<S: Store>(facade: &AuthorizationFacade<S>) -> Result<()> {
    let output = Output::new();
    let before = facade.list_catalog().await?.len();
    let seeded = facade.seed_catalog().await?;
    let after = facade.list_catalog().await?.len();

    output.success(&format!(
        "{} seed label(s) present, {} added",
        seeded.len(),
        after.saturating_sub(before)
    ));
    Ok(())
}

pub async fn add<S: Store>(
    facade: &AuthorizationFacade<S>,
    actor: &str,
    name: &str,
    color: &str,
    icon: &str,
) -> Result<()> {
    let output = Output::new();
    let actor = user_by_business_id(facade, actor).await?;
    let label = facade.upsert_label(actor.id, name, color, icon).await?;

    if label.color == color && label.icon == icon {
        output.success(&format!("Label {} is in the catalog", label.name.bright_cyan()));
    } else {
        output.warning(&format!(
            "Label {} already exists with a different style",
            label.name.bright_cyan()
        ));
    }
    output.labels(std::slice::from_ref(&label));
    Ok(())
}

pub async fn style<S: Store>(
    facade: &AuthorizationFacade<S>,
    actor: &str,
    name: &str,
    color: Option<&str>,
    icon: Option<&str>,
) -> Result<()> {
    let output = Output::new();
    let actor = user_by_business_id(facade, actor).await?;
    let label = label_by_name(facade, name).await?;
    let label = facade
        .update_label_style(actor.id, label.id, color, icon)
        .await?;
    output.success(&format!("Updated {}", label.name.bright_cyan()));
    output.labels(std::slice::from_ref(&label));
    Ok(())
}

pub async fn rename<S: Store>(
    facade: &AuthorizationFacade<S>,
    actor: &str,
    name: &str,
    new_name: &str,
) -> Result<()> {
    let output = Output::new();
    let actor = user_by_business_id(facade, actor).await?;
    let label = label_by_name(facade, name).await?;
    let label = facade.rename_label(actor.id, label.id, new_name).await?;
    output.success(&format!("Renamed {} to {}", name, label.name.bright_cyan()));
    Ok(())
}

pub async fn delete<S: Store>(
    facade: &AuthorizationFacade<S>,
    actor: &str,
    name: &str,
) -> Result<()> {
    let output = Output::new();
    let actor = user_by_business_id(facade, actor).await?;
    let label = label_by_name(facade, name).await?;
    let removed = facade.delete_label(actor.id, label.id).await?;
    output.success(&format!("Deleted {}", label.name.bright_cyan()));
    output.kv("Assignments removed", &removed.to_string());
    Ok(())
}

pub async fn conversations<S: Store>(facade: &AuthorizationFacade<S>, name: &str) -> Result<()> {
    let output = Output::new();
    let label = label_by_name(facade, name).await?;
    let conversations = facade.conversations_with_label(label.id).await?;

    if conversations.is_empty() {
        output.status(&format!("No conversations carry {}", label.name));
    } else {
        output.section(&format!("Conversations labeled {}", label.name));
        for id in conversations {
            output.list_item(&id.to_string());
        }
    }
    Ok(())
}
