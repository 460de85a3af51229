use asesoria_core::{AuthorizationFacade, ConversationKind, Role, can_initiate as rule, db::Store};
use miette::Result;
use owo_colors::OwoColorize;

use crate::output::{Output, format_role};

/// Print the role each business id classifies to
pub fn classify(business_ids: &[String]) -> Result<()> {
    let output = Output::new();
    if business_ids.is_empty() {
        output.status("No business ids given");
        return Ok(());
    }

    output.table_header(&["business id", "role"]);
    for business_id in business_ids {
        output.table_row(&[business_id, &format_role(Role::classify(business_id))]);
    }
    Ok(())
}

pub fn can_initiate(initiator: Role, target: Role, kind: ConversationKind) -> Result<()> {
    let output = Output::new();
    if rule(initiator, target, kind) {
        output.success(&format!(
            "{} may open a {} conversation with {}",
            format_role(initiator),
            kind,
            format_role(target)
        ));
    } else {
        output.error(&format!(
            "{} may not open a {} conversation with {}",
            format_role(initiator),
            kind,
            format_role(target)
        ));
    }
    Ok(())
}

/// Recompute every derived role and show the resulting distribution
pub async fn reclassify<S: Store>(facade: &AuthorizationFacade<S>) -> Result<()> {
    let output = Output::new();
    output.section("Reclassifying users");

    let report = facade.reclassify_all().await?;
    output.reclassify_report(&report);

    if !report.is_complete() {
        output.status(&format!(
            "Run {} again to retry the failed users",
            "asesoria reclassify".bright_green()
        ));
    }
    Ok(())
}
