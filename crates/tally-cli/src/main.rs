//! Tally CLI
//!
//! Command-line interface for Tally - progress tracking synced across devices.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tally_core::{Config, Role};

mod commands;
mod output;
mod session;

use output::{Output, OutputFormat};
use session::Session;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Tally - Local-first progress tracking with cloud sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage spaces
    Space {
        #[command(subcommand)]
        command: SpaceCommands,
    },
    /// Manage items in a space
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Share spaces with other users
    Share {
        #[command(subcommand)]
        command: ShareCommands,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show status (user, sync state, contents)
    Status,
    /// Load remote changes and push local ones
    Sync {
        /// Print the sync log afterwards
        #[arg(long)]
        log: bool,
    },
}

#[derive(Subcommand)]
enum SpaceCommands {
    /// Create a new space
    #[command(alias = "add")]
    Create {
        name: String,
        /// Item groups to start with
        #[arg(short, long)]
        category: Vec<String>,
    },
    /// List all spaces
    #[command(alias = "ls")]
    List,
    /// Show a space and its items (active space by default)
    Show {
        /// Space ID, prefix, or name
        space: Option<String>,
    },
    /// Rename a space
    Rename {
        /// Space ID, prefix, or name
        space: String,
        name: String,
    },
    /// Delete an owned space
    #[command(alias = "rm")]
    Delete {
        /// Space ID, prefix, or name
        space: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Make a space the active one
    Use {
        /// Space ID, prefix, or name
        space: String,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Add an item
    Add {
        name: String,
        /// How many to collect before the item is complete
        #[arg(short, long, default_value_t = 1)]
        target: u32,
        #[arg(short, long)]
        category: Option<String>,
        /// Space ID, prefix, or name (active space by default)
        #[arg(short, long)]
        space: Option<String>,
    },
    /// List items
    #[command(alias = "ls")]
    List {
        /// Show archived items instead
        #[arg(long)]
        archived: bool,
        #[arg(short, long)]
        space: Option<String>,
    },
    /// Set how many of an item have been collected
    Progress {
        /// Item ID (full UUID or prefix)
        item: String,
        count: u32,
        #[arg(short, long)]
        space: Option<String>,
    },
    /// Record one more collected
    Collect {
        /// Item ID (full UUID or prefix)
        item: String,
        #[arg(short, long)]
        space: Option<String>,
    },
    /// Move an item to the archive
    Archive {
        /// Item ID (full UUID or prefix)
        item: String,
        #[arg(short, long)]
        space: Option<String>,
    },
}

#[derive(Subcommand)]
enum ShareCommands {
    /// Share an owned space with another user
    Grant {
        /// Space ID, prefix, or name
        space: String,
        /// User to share with
        user: String,
        #[arg(short, long, value_enum, default_value_t = ShareRole::Viewer)]
        role: ShareRole,
    },
    /// Leave a space shared with you
    Leave {
        /// Space ID, prefix, or name
        space: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ShareRole {
    Editor,
    Viewer,
}

impl From<ShareRole> for Role {
    fn from(role: ShareRole) -> Self {
        match role {
            ShareRole::Editor => Role::Editor,
            ShareRole::Viewer => Role::Viewer,
        }
    }
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (user_id, sync_enabled, remote_path, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(&output),
            Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, &output),
        };
    }

    let config = Config::load()?;
    init_logging(&config);
    let session = Session::open(config)?;

    let is_write = match &cli.command {
        Commands::Space { command } => !matches!(
            command,
            SpaceCommands::List | SpaceCommands::Show { .. }
        ),
        Commands::Item { command } => !matches!(command, ItemCommands::List { .. }),
        _ => false,
    };
    let manages_sync = matches!(&cli.command, Commands::Sync { .. } | Commands::Share { .. });

    // Bring local state up to date first so writes merge onto the latest copy
    if !manages_sync {
        session.pull(&output).await;
    }

    let result = match cli.command {
        Commands::Space { command } => handle_space_command(command, &session, &output).await,
        Commands::Item { command } => handle_item_command(command, &session, &output).await,
        Commands::Share { command } => handle_share_command(command, &session, &output).await,
        Commands::Status => commands::status::show(&session, &output).await,
        Commands::Sync { log } => commands::sync::sync(&session, log, &output).await,
        Commands::Config { .. } => Ok(()), // Handled above
    };

    if is_write && result.is_ok() {
        session.push(&output).await;
    }

    result
}

async fn handle_space_command(command: SpaceCommands, session: &Session, output: &Output) -> Result<()> {
    match command {
        SpaceCommands::Create { name, category } => {
            commands::space::create(session, name, category, output).await
        }
        SpaceCommands::List => commands::space::list(session, output).await,
        SpaceCommands::Show { space } => commands::space::show(session, space, output).await,
        SpaceCommands::Rename { space, name } => {
            commands::space::rename(session, space, name, output).await
        }
        SpaceCommands::Delete { space, yes } => {
            commands::space::delete(session, space, yes, output).await
        }
        SpaceCommands::Use { space } => commands::space::use_space(session, space, output).await,
    }
}

async fn handle_item_command(command: ItemCommands, session: &Session, output: &Output) -> Result<()> {
    match command {
        ItemCommands::Add {
            name,
            target,
            category,
            space,
        } => commands::item::add(session, space, name, target, category, output).await,
        ItemCommands::List { archived, space } => {
            commands::item::list(session, space, archived, output).await
        }
        ItemCommands::Progress { item, count, space } => {
            commands::item::progress(session, space, item, count, output).await
        }
        ItemCommands::Collect { item, space } => {
            commands::item::collect(session, space, item, output).await
        }
        ItemCommands::Archive { item, space } => {
            commands::item::archive(session, space, item, output).await
        }
    }
}

async fn handle_share_command(command: ShareCommands, session: &Session, output: &Output) -> Result<()> {
    match command {
        ShareCommands::Grant { space, user, role } => {
            session.pull(output).await;
            commands::share::grant(session, space, user, role.into(), output).await
        }
        ShareCommands::Leave { space } => {
            session.pull(output).await;
            commands::share::leave(session, space, output).await
        }
    }
}

/// Send tracing output to stderr, or to `log_file` when configured
///
/// The filter comes from `TALLY_LOG` and defaults to warnings only.
fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_env("TALLY_LOG")
        .unwrap_or_else(|_| EnvFilter::new("tally_core=warn,tally_cli=warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // Ignore the error if a subscriber is already installed
    match config.log_file {
        Some(ref path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let _ = builder.with_ansi(false).with_writer(Mutex::new(file)).try_init();
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                let _ = builder.with_writer(std::io::stderr).try_init();
            }
        },
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
