//! Subcommand implementations
//!
//! Users are addressed by business id and labels by name on the command line;
//! the helpers here turn those into the ids the facade works with.

pub mod config;
pub mod conversation;
pub mod db;
pub mod labels;
pub mod roles;
pub mod user;

use asesoria_core::{AuthorizationFacade, CoreError, Label, User, db::Store};
use miette::Result;

/// Look up a user by business id
pub async fn user_by_business_id<S: Store>(
    facade: &AuthorizationFacade<S>,
    business_id: &str,
) -> Result<User> {
    Ok(facade.users().find_by_business_id(business_id).await?)
}

/// Look up a catalog label by name
pub async fn label_by_name<S: Store>(facade: &AuthorizationFacade<S>, name: &str) -> Result<Label> {
    facade
        .catalog()
        .find(name)
        .await?
        .ok_or_else(|| CoreError::not_found("label", name).into())
}
