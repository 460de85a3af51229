mod commands;
mod output;

use asesoria_core::{
    AuthorizationFacade, ConversationId, Role,
    config::{self, PartialConfig},
    db::{DatabaseConfig, client},
};
use clap::{Parser, Subcommand, ValueEnum};
use miette::Result;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "asesoria")]
#[command(about = "Asesoria role and label authorization CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Database file path (overrides config)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Per-call store timeout in milliseconds (overrides config)
    #[arg(long)]
    store_timeout_ms: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Show the role a business id classifies to
    Classify {
        business_ids: Vec<String>,
    },
    /// Check whether one role may open a conversation with another
    CanInitiate {
        initiator: Role,
        target: Role,
        #[arg(long, value_enum, default_value_t = KindArg::Direct)]
        kind: KindArg,
    },
    /// Recompute the stored role of every user
    Reclassify,
    /// User directory
    User {
        #[command(subcommand)]
        cmd: UserCommands,
    },
    /// Label catalog administration
    Labels {
        #[command(subcommand)]
        cmd: LabelCommands,
    },
    /// Conversation authorization and labeling
    Conversation {
        #[command(subcommand)]
        cmd: ConversationCommands,
    },
    /// Database inspection
    Db {
        #[command(subcommand)]
        cmd: DbCommands,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Direct,
    Group,
}

impl From<KindArg> for asesoria_core::ConversationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Direct => asesoria_core::ConversationKind::Direct,
            KindArg::Group => asesoria_core::ConversationKind::Group,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PersonaArg {
    Fisica,
    Moral,
}

impl From<PersonaArg> for asesoria_core::users::TipoPersona {
    fn from(persona: PersonaArg) -> Self {
        match persona {
            PersonaArg::Fisica => asesoria_core::users::TipoPersona::Fisica,
            PersonaArg::Moral => asesoria_core::users::TipoPersona::Moral,
        }
    }
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a user; the role is derived from the business id
    Register {
        business_id: String,
        display_name: String,
    },
    /// Show a user
    Show { business_id: String },
    /// List users in business id order
    List {
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Start after this business id
        #[arg(long)]
        after: Option<String>,
    },
    /// Deactivate a user
    Deactivate { business_id: String },
    /// Pin a user's role; bulk reclassification leaves it alone
    Override {
        business_id: String,
        #[arg(required_unless_present = "clear")]
        role: Option<Role>,
        /// Drop the override and go back to the derived role
        #[arg(long, conflicts_with = "role")]
        clear: bool,
    },
    /// Update phone number or push token
    Contact {
        business_id: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        push_token: Option<String>,
    },
    /// Record acceptance of the terms with the fiscal profile
    AcceptTerms {
        business_id: String,
        razon_social: String,
        #[arg(long, value_enum)]
        persona: PersonaArg,
    },
    /// Erase a user for a data-removal request
    Purge { business_id: String },
}

#[derive(Subcommand)]
enum LabelCommands {
    /// List the catalog
    List,
    /// Ensure the configured seed labels exist
    Seed,
    /// Add a label (or show the existing one with that name)
    Add {
        name: String,
        #[arg(long)]
        color: String,
        #[arg(long)]
        icon: String,
        /// Business id of the acting user
        #[arg(long = "as")]
        actor: String,
    },
    /// Change a label's color or icon
    Style {
        name: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long = "as")]
        actor: String,
    },
    /// Rename a label that is not in use
    Rename {
        name: String,
        new_name: String,
        #[arg(long = "as")]
        actor: String,
    },
    /// Delete a label and all its assignments
    Delete {
        name: String,
        #[arg(long = "as")]
        actor: String,
    },
    /// List conversations carrying a label
    Conversations { name: String },
}

#[derive(Subcommand)]
enum ConversationCommands {
    /// Authorize and create a conversation
    Open {
        /// Business ids of the targets
        #[arg(required = true)]
        targets: Vec<String>,
        #[arg(long, value_enum, default_value_t = KindArg::Direct)]
        kind: KindArg,
        #[arg(long = "as")]
        actor: String,
    },
    /// Show a conversation
    Show { id: ConversationId },
    /// Attach a label
    Label {
        id: ConversationId,
        label: String,
        #[arg(long = "as")]
        actor: String,
    },
    /// Detach a label
    Unlabel {
        id: ConversationId,
        label: String,
        #[arg(long = "as")]
        actor: String,
    },
    /// List a conversation's labels
    Labels { id: ConversationId },
    /// Delete a conversation and its label assignments
    Delete { id: ConversationId },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Show database stats
    Stats,
    /// Check database connectivity
    Health,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Print the raw TOML instead
        #[arg(long)]
        raw: bool,
    },
    /// Save current configuration to file
    Save {
        /// Path to save configuration
        #[arg(default_value = "asesoria.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .rgb_colors(miette::RgbColors::Preferred)
                .with_cause_chain()
                .with_syntax_highlighting(miette::highlighters::SyntectHighlighter::default())
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    use tracing_subscriber::{EnvFilter, fmt};

    let filter = if cli.debug {
        EnvFilter::new("asesoria_core=debug,asesoria_cli=debug")
    } else {
        EnvFilter::new("asesoria_core=info,asesoria_cli=info,warn")
    };

    fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_timer(tracing_subscriber::fmt::time::LocalTime::rfc_3339())
        .compact()
        .init();

    let config = if let Some(config_path) = &cli.config {
        info!("Loading config from: {:?}", config_path);
        config::load_config(config_path).await?
    } else {
        info!("Loading config from standard locations");
        config::load_config_from_standard_locations().await?
    };

    // Apply CLI overrides
    let config = config::merge_configs(
        config,
        PartialConfig {
            database: cli.db_path.as_ref().map(|db_path| DatabaseConfig::Embedded {
                path: db_path.to_string_lossy().to_string(),
            }),
            store_timeout_ms: cli.store_timeout_ms,
            ..Default::default()
        },
    );
    config::validate(&config, "command line")?;
    tracing::debug!("Using database config: {:?}", config.database);

    // Commands that never touch the database
    match &cli.command {
        Commands::Classify { business_ids } => return commands::roles::classify(business_ids),
        Commands::CanInitiate {
            initiator,
            target,
            kind,
        } => return commands::roles::can_initiate(*initiator, *target, (*kind).into()),
        Commands::Config { cmd } => {
            return match cmd {
                ConfigCommands::Show { raw } => commands::config::show(&config, *raw).await,
                ConfigCommands::Save { path } => commands::config::save(&config, path).await,
            };
        }
        Commands::Migrate => return commands::db::migrate(&config).await,
        _ => {}
    }

    let store = client::open_store(&config.database, &config.migration_options()).await?;
    let facade = AuthorizationFacade::with_config(store, &config);

    match &cli.command {
        Commands::Reclassify => commands::roles::reclassify(&facade).await?,
        Commands::User { cmd } => match cmd {
            UserCommands::Register {
                business_id,
                display_name,
            } => commands::user::register(&facade, business_id, display_name).await?,
            UserCommands::Show { business_id } => {
                commands::user::show(&facade, business_id).await?
            }
            UserCommands::List { limit, after } => {
                commands::user::list(&facade, after.as_deref(), *limit).await?
            }
            UserCommands::Deactivate { business_id } => {
                commands::user::deactivate(&facade, business_id).await?
            }
            UserCommands::Override {
                business_id,
                role,
                clear,
            } => match role {
                Some(role) if !*clear => {
                    commands::user::override_role(&facade, business_id, *role).await?
                }
                _ => commands::user::clear_override(&facade, business_id).await?,
            },
            UserCommands::Contact {
                business_id,
                phone,
                push_token,
            } => {
                commands::user::contact(&facade, business_id, phone.clone(), push_token.clone())
                    .await?
            }
            UserCommands::AcceptTerms {
                business_id,
                razon_social,
                persona,
            } => {
                commands::user::accept_terms(&facade, business_id, razon_social, (*persona).into())
                    .await?
            }
            UserCommands::Purge { business_id } => {
                commands::user::purge(&facade, business_id).await?
            }
        },
        Commands::Labels { cmd } => match cmd {
            LabelCommands::List => commands::labels::list(&facade).await?,
            LabelCommands::Seed => commands::labels::seed(&facade).await?,
            LabelCommands::Add {
                name,
                color,
                icon,
                actor,
            } => commands::labels::add(&facade, actor, name, color, icon).await?,
            LabelCommands::Style {
                name,
                color,
                icon,
                actor,
            } => {
                commands::labels::style(&facade, actor, name, color.as_deref(), icon.as_deref())
                    .await?
            }
            LabelCommands::Rename {
                name,
                new_name,
                actor,
            } => commands::labels::rename(&facade, actor, name, new_name).await?,
            LabelCommands::Delete { name, actor } => {
                commands::labels::delete(&facade, actor, name).await?
            }
            LabelCommands::Conversations { name } => {
                commands::labels::conversations(&facade, name).await?
            }
        },
        Commands::Conversation { cmd } => match cmd {
            ConversationCommands::Open {
                targets,
                kind,
                actor,
            } => commands::conversation::open(&facade, actor, targets, (*kind).into()).await?,
            ConversationCommands::Show { id } => commands::conversation::show(&facade, *id).await?,
            ConversationCommands::Label { id, label, actor } => {
                commands::conversation::label(&facade, actor, *id, label).await?
            }
            ConversationCommands::Unlabel { id, label, actor } => {
                commands::conversation::unlabel(&facade, actor, *id, label).await?
            }
            ConversationCommands::Labels { id } => {
                commands::conversation::labels(&facade, *id).await?
            }
            ConversationCommands::Delete { id } => {
                commands::conversation::delete(&facade, *id).await?
            }
        },
        Commands::Db { cmd } => match cmd {
            DbCommands::Stats => commands::db::stats(&facade, &config).await?,
            DbCommands::Health => commands::db::health(&facade).await?,
        },
        Commands::Classify { .. }
        | Commands::CanInitiate { .. }
        | Commands::Config { .. }
        | Commands::Migrate => {}
    }

    Ok(())
}
