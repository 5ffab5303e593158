//! draftwright CLI - model-drafted edits to JSON documents.

mod commands;
mod interactive;
mod mcp;
mod output;
mod source;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "draftwright")]
#[command(author, version, about = "Propose, review and commit model-drafted document edits")]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, global = true, default_value = "human")]
    format: output::OutputFormat,

    /// Workspace path (defaults to current directory)
    #[arg(long, short = 'C', global = true)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new workspace
    Init {
        /// Workspace name
        #[arg(long)]
        name: Option<String>,
    },

    /// Import a JSON document
    Import {
        /// Document name; the UID is derived from it
        name: String,

        /// JSON file to import ('-' for stdin)
        file: PathBuf,
    },

    /// List documents
    #[command(alias = "ls")]
    List,

    /// Print a document, or the value at one path
    Get {
        /// Document UID (e.g., doc:flame-blade)
        uid: String,

        /// Path to read (e.g., system.traits.value, items[0].name)
        #[arg(long, short = 'p')]
        path: Option<String>,
    },

    /// Print the field structure of a document
    Structure {
        /// Document UID
        uid: String,
    },

    /// Print a reduced document holding only the given paths
    Select {
        /// Document UID
        uid: String,

        /// Paths to keep
        paths: Vec<String>,
    },

    /// Show the stable update path for a path expression
    Resolve {
        /// Document UID
        uid: String,

        /// Path expression
        path: String,
    },

    /// Parse a raw model response and show the resulting updates
    Parse {
        /// Document UID
        uid: String,

        /// Response file, raw text or provider JSON (default: stdin)
        file: Option<PathBuf>,
    },

    /// Propose edits from a model response or from assignments, then commit
    Propose {
        /// Document UID
        uid: String,

        /// Response file (default: stdin); ignored when --edit is given
        file: Option<PathBuf>,

        /// Edit as path=value, path+=value (add) or path-=value (remove)
        #[arg(long, short = 'e')]
        edit: Vec<String>,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// Ask the model for edits and review them
    Ask {
        /// Document UID
        uid: String,

        /// What to change (omit to be prompted)
        instruction: Option<String>,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// Show commit history for a document
    History {
        /// Document UID
        uid: String,

        /// Show commits from the last N days
        #[arg(long)]
        since: Option<u32>,
    },

    /// Start the tool server (for model integrations)
    #[command(subcommand)]
    Tool(ToolCommands),

    /// MCP server over stdin/stdout
    #[command(subcommand)]
    Mcp(McpCommands),
}

/// Overrides for the workspace `model` settings.
#[derive(Args, Debug, Default)]
pub struct ModelArgs {
    /// Base URL of an OpenAI-compatible server
    #[arg(long = "model-url", env = "DRAFTWRIGHT_MODEL_URL")]
    pub url: Option<String>,

    /// Model name
    #[arg(long, env = "DRAFTWRIGHT_MODEL")]
    pub model: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct CommitArgs {
    /// Reason recorded with the commit (defaults to the model's reason)
    #[arg(long, short = 'r')]
    pub reason: Option<String>,

    /// Actor recorded with the commit
    #[arg(long)]
    pub actor: Option<String>,

    /// Commit without review
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Subcommand)]
enum ToolCommands {
    /// Start the HTTP tool server
    Serve {
        /// Port to listen on
        #[arg(long, short = 'p', default_value = "17373")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[derive(Subcommand)]
enum McpCommands {
    /// Start the MCP server (communicates via stdin/stdout)
    Serve,
}

fn main() -> Result<()> {
    // stdout belongs to command output and the MCP transport.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let workspace_path = match cli.path {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let format = cli.format;

    match cli.command {
        Commands::Init { name } => commands::init(&workspace_path, name, format),
        Commands::Import { name, file } => commands::import(&workspace_path, &name, &file, format),
        Commands::List => commands::list(&workspace_path, format),
        Commands::Get { uid, path } => commands::get(&workspace_path, &uid, path.as_deref(), format),
        Commands::Structure { uid } => commands::structure(&workspace_path, &uid, format),
        Commands::Select { uid, paths } => commands::select(&workspace_path, &uid, &paths, format),
        Commands::Resolve { uid, path } => commands::resolve(&workspace_path, &uid, &path, format),
        Commands::Parse { uid, file } => commands::parse(&workspace_path, &uid, file.as_deref(), format),
        Commands::Propose {
            uid,
            file,
            edit,
            commit,
        } => commands::propose(&workspace_path, &uid, file.as_deref(), &edit, &commit, format),
        Commands::Ask {
            uid,
            instruction,
            model,
            commit,
        } => commands::ask(&workspace_path, &uid, instruction, &model, &commit, format),
        Commands::History { uid, since } => commands::history(&workspace_path, &uid, since, format),
        Commands::Tool(ToolCommands::Serve { port, host }) => {
            commands::tool_serve(&workspace_path, &host, port)
        }
        Commands::Mcp(McpCommands::Serve) => mcp::serve(&workspace_path),
    }
}
