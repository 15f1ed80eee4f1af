//! ULMan CLI - Command-line resumable uploader
//!
//! Uploads large files in chunks and resumes interrupted uploads from the
//! session files it leaves behind.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ULMan - Resumable Upload Manager
#[derive(Parser)]
#[command(name = "ulman")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for ULMan
    #[arg(long, env = "ULMAN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file through a new resumable session
    Upload {
        /// File to upload
        file: PathBuf,

        /// Name of the file at the destination (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// OAuth access token
        #[arg(long, env = "ULMAN_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Resume an interrupted upload
    Resume {
        /// Session file written when the upload started
        #[arg(required_unless_present = "session_id")]
        session_file: Option<PathBuf>,

        /// Source file (when resuming by session id)
        #[arg(long, requires = "session_id")]
        file: Option<PathBuf>,

        /// Destination name (when resuming by session id)
        #[arg(short, long, requires = "session_id")]
        name: Option<String>,

        /// Session id returned by the server
        #[arg(long, conflicts_with = "session_file", requires = "file")]
        session_id: Option<String>,
    },

    /// Ask the server how much of a session it holds
    Status {
        /// Session id
        session_id: String,
    },

    /// List saved session files
    Sessions,

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "ulman_core=debug,ulman=debug,info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine data directory
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("ulman"))
            .unwrap_or_else(|| PathBuf::from(".ulman"))
    });

    // Initialize core
    let core = ulman_core::UlmanCore::new(data_dir).await?;
    init_tracing(cli.verbose || core.get_settings().await.verbose);

    // Execute command
    match cli.command {
        Commands::Upload { file, name, token } => {
            commands::upload(&core, file, name, token, cli.output).await?
        }

        Commands::Resume {
            session_file,
            file,
            name,
            session_id,
        } => match (session_file, file, session_id) {
            (_, Some(file), Some(session_id)) => {
                commands::resume_by_id(&core, file, name, session_id, cli.output).await?
            }
            (Some(session_file), _, _) => {
                commands::resume_from_file(&core, session_file, cli.output).await?
            }
            _ => anyhow::bail!("Give a session file, or --file with --session-id"),
        },

        Commands::Status { session_id } => {
            commands::check_status(&core, &session_id, cli.output).await?
        }

        Commands::Sessions => commands::list_sessions(&core, cli.output).await?,

        Commands::Config { action } => commands::config_action(&core, action, cli.output).await?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "ulman", &mut std::io::stdout());
        }
    }

    Ok(())
}
