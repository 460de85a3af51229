use asesoria_core::{DenialReason, Label, LabelSeed, ReclassifyReport, Role, RoleCounts, User};
use owo_colors::OwoColorize;

/// Standard output formatting for the CLI
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    /// Print a system/status message (indented)
    pub fn status(&self, message: &str) {
        println!("  {}", message.dimmed());
    }

    /// Print an info message (indented)
    pub fn info(&self, label: &str, value: &str) {
        println!("  {} {}", label.bright_blue(), value);
    }

    /// Print a success message (indented)
    pub fn success(&self, message: &str) {
        println!("  {} {}", "✓".bright_green(), message);
    }

    /// Print an error message (indented)
    pub fn error(&self, message: &str) {
        println!("  {} {}", "✗".bright_red(), message);
    }

    /// Print a warning message (indented)
    pub fn warning(&self, message: &str) {
        println!("  {} {}", "⚠".yellow(), message);
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        println!();
        println!("{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(40).dimmed());
    }

    /// Print a list item (already indented)
    pub fn list_item(&self, item: &str) {
        println!("    • {}", item);
    }

    /// Print a key-value pair (indented)
    pub fn kv(&self, key: &str, value: &str) {
        println!("  {} {}", format!("{}:", key).dimmed(), value);
    }

    /// Print a table-like header
    pub fn table_header(&self, columns: &[&str]) {
        let header = columns.join(" | ");
        println!("  {}", header.bright_white().bold());
        println!("  {}", "─".repeat(header.chars().count()).dimmed());
    }

    /// Print a table row
    pub fn table_row(&self, cells: &[&str]) {
        println!("  {}", cells.join(" | "));
    }

    /// Print one user as a block of key-value pairs
    pub fn user(&self, user: &User) {
        self.info("•", &user.display_name.bright_cyan().to_string());
        self.kv("ID", &user.id.to_string().dimmed().to_string());
        self.kv("Business ID", &user.business_id);
        self.kv("Role", &format_role(user.effective_role()));
        self.kv("Role source", &format!("{:?}", user.role_source));
        self.kv(
            "Active",
            &if user.is_active {
                "yes".bright_green().to_string()
            } else {
                "no".bright_red().to_string()
            },
        );
        self.kv("Created", &format_relative_time(user.created_at));
    }

    /// Print labels as a name/color/icon table
    pub fn labels(&self, labels: &[Label]) {
        self.table_header(&["name", "color", "icon", "id"]);
        for label in labels {
            self.table_row(&[
                &label.name,
                &label.color,
                &label.icon,
                &label.id.to_string(),
            ]);
        }
    }

    /// Print seed entries as a name/color/icon table
    pub fn label_seeds(&self, seeds: &[LabelSeed]) {
        self.table_header(&["name", "color", "icon"]);
        for seed in seeds {
            self.table_row(&[&seed.name, &seed.color, &seed.icon]);
        }
    }

    pub fn role_counts(&self, counts: &RoleCounts) {
        for (role, count) in counts.iter() {
            self.kv(role.as_str(), &count.to_string().bright_white().to_string());
        }
        self.kv("total", &counts.total().to_string());
    }

    pub fn reclassify_report(&self, report: &ReclassifyReport) {
        self.role_counts(&report.counts);
        self.kv("changed", &report.changed.to_string());
        self.kv("preserved overrides", &report.preserved.to_string());
        if report.is_complete() {
            self.success("All users reclassified");
        } else {
            self.warning(&format!(
                "{} user(s) could not be updated",
                report.failures.len()
            ));
            for failure in &report.failures {
                self.list_item(&format!(
                    "{} {}",
                    failure.business_id.bright_yellow(),
                    failure.error.dimmed()
                ));
            }
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

/// Color a role by privilege tier
pub fn format_role(role: Role) -> String {
    match role {
        Role::Consultor => role.as_str().bright_magenta().to_string(),
        Role::Asesor => role.as_str().bright_yellow().to_string(),
        Role::Usuario => role.as_str().bright_white().to_string(),
    }
}

/// Describe a denial with its stable rule code
pub fn format_denial(reason: &DenialReason) -> String {
    format!("{} ({})", reason, reason.rule().dimmed())
}

/// Format a timestamp as relative time
pub fn format_relative_time(time: chrono::DateTime<chrono::Utc>) -> String {
    let now = chrono::Utc::now();
    let duration = now.signed_duration_since(time);

    if duration.num_seconds() < 60 {
        format!("{} seconds ago", duration.num_seconds())
            .dimmed()
            .to_string()
    } else if duration.num_minutes() < 60 {
        format!("{} minutes ago", duration.num_minutes())
            .dimmed()
            .to_string()
    } else if duration.num_hours() < 24 {
        format!("{} hours ago", duration.num_hours())
            .dimmed()
            .to_string()
    } else if duration.num_days() < 30 {
        format!("{} days ago", duration.num_days())
            .dimmed()
            .to_string()
    } else {
        time.format("%Y-%m-%d").to_string().dimmed().to_string()
    }
}
