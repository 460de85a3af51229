use asesoria_core::{
    AuthorizationFacade, Role,
    db::{IdentityStore, Store},
    users::{RoleSource, TipoPersona},
};
use miette::Result;
use owo_colors::OwoColorize;

use super::user_by_business_id;
use crate::output::{Output, format_role};

pub async fn register<S: Store>(
    facade: &AuthorizationFacade<S>,
    business_id: &str,
    display_name: &str,
) -> Result<()> {
    let output = Output::new();
    let user = facade.register_user(business_id, display_name).await?;
    output.success(&format!(
        "Registered {} as {}",
        user.business_id.bright_cyan(),
        format_role(user.effective_role())
    ));
    output.kv("ID", &user.id.to_string().dimmed().to_string());
    Ok(())
}

pub async fn show<S: Store>(facade: &AuthorizationFacade<S>, business_id: &str) -> Result<()> {
    let output = Output::new();
    let user = user_by_business_id(facade, business_id).await?;

    output.section("User");
    output.user(&user);
    if let Some(phone) = &user.phone {
        output.kv("Phone", phone);
    }
    if user.push_token.is_some() {
        output.kv("Push token", &"set".dimmed().to_string());
    }
    if let Some(profile) = &user.fiscal_profile {
        output.kv("Razón social", &profile.razon_social);
        output.kv("Persona", &format!("{:?}", profile.tipo_persona));
        if let Some(accepted) = profile.terms_accepted_at {
            output.kv("Terms accepted", &accepted.to_rfc3339());
        }
    }
    Ok(())
}

/// One page of users in business id order
pub async fn list<S: Store>(
    facade: &AuthorizationFacade<S>,
    after: Option<&str>,
    limit: usize,
) -> Result<()> {
    let output = Output::new();
    let users = facade.store().list_users(after, limit.max(1)).await?;

    if users.is_empty() {
        output.status("No users found");
        return Ok(());
    }

    output.table_header(&["business id", "name", "role", "active"]);
    for user in &users {
        output.table_row(&[
            &user.business_id,
            &user.display_name,
            &format_role(user.effective_role()),
            if user.is_active { "yes" } else { "no" },
        ]);
    }

    if users.len() == limit {
        if let Some(last) = users.last() {
            output.status(&format!("More users may follow; use --after {}", last.business_id));
        }
    }
    Ok(())
}

pub async fn deactivate<S: Store>(
    facade: &AuthorizationFacade<S>,
    business_id: &str,
) -> Result<()> {
    let output = Output::new();
    let user = user_by_business_id(facade, business_id).await?;
    facade.deactivate_user(user.id).await?;
    output.success(&format!("Deactivated {}", business_id.bright_cyan()));
    Ok(())
}

pub async fn override_role<S: Store>(
    facade: &AuthorizationFacade<S>,
    business_id: &str,
    role: Role,
) -> Result<()> {
    let output = Output::new();
    let user = user_by_business_id(facade, business_id).await?;
    let before = user.effective_role();
    let user = facade.override_role(user.id, role).await?;
    output.success(&format!(
        "{} is now {} (was {})",
        user.business_id.bright_cyan(),
        format_role(role),
        format_role(before)
    ));
    if role != Role::classify(&user.business_id) {
        output.warning("This role differs from the classifier and will survive reclassification");
    }
    Ok(())
}

pub async fn clear_override<S: Store>(
    facade: &AuthorizationFacade<S>,
    business_id: &str,
) -> Result<()> {
    let output = Output::new();
    let user = user_by_business_id(facade, business_id).await?;
    if user.role_source != RoleSource::Override {
        output.status(&format!("{} has no role override", user.business_id));
        return Ok(());
    }
    let before = user.effective_role();
    let user = facade.clear_override(user.id).await?;
    output.success(&format!(
        "{} is back to {} (was {})",
        user.business_id.bright_cyan(),
        format_role(user.effective_role()),
        format_role(before)
    ));
    Ok(())
}

pub async fn contact<S: Store>(
    facade: &AuthorizationFacade<S>,
    business_id: &str,
    phone: Option<String>,
    push_token: Option<String>,
) -> Result<()> {
    let output = Output::new();
    if phone.is_none() && push_token.is_none() {
        output.status("Nothing to update; pass --phone or --push-token");
        return Ok(());
    }
    let user = user_by_business_id(facade, business_id).await?;
    facade.update_contact(user.id, phone, push_token).await?;
    output.success(&format!("Updated contact for {}", business_id.bright_cyan()));
    Ok(())
}

pub async fn accept_terms<S: Store>(
    facade: &AuthorizationFacade<S>,
    business_id: &str,
    razon_social: &str,
    tipo_persona: TipoPersona,
) -> Result<()> {
    let output = Output::new();
    let user = user_by_business_id(facade, business_id).await?;
    facade
        .accept_terms(user.id, razon_social, tipo_persona)
        .await?;
    output.success(&format!("Terms accepted for {}", business_id.bright_cyan()));
    Ok(())
}

pub async fn purge<S: Store>(facade: &AuthorizationFacade<S>, business_id: &str) -> Result<()> {
    let output = Output::new();
    let user = user_by_business_id(facade, business_id).await?;
    let detached = facade.purge_user(user.id).await?;
    output.success(&format!("Purged {}", business_id.bright_cyan()));
    output.kv("Label assignments detached", &detached.to_string());
    Ok(())
}
