//! # repospec CLI
//!
//! The `repospec` binary runs the HTTP server, analyzes repositories from
//! the command line, and manages stored specs.
//!
//! ## Usage
//!
//! ```bash
//! repospec --config ./config/repospec.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repospec init` | Create the SQLite database and schema |
//! | `repospec serve` | Start the HTTP server |
//! | `repospec analyze <repo>` | Generate (or fetch the cached) spec for a repository |
//! | `repospec get <share-id>` | Print a stored spec |
//! | `repospec list --user <id>` | List specs owned by a user |
//! | `repospec popular` | Most viewed repositories across public specs |
//! | `repospec visibility <share-id> --user <id> --public` | Change visibility |
//! | `repospec delete <share-id> --user <id>` | Delete an owned spec |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! repospec init
//!
//! # Generate a spec and print the markdown
//! repospec analyze https://github.com/tokio-rs/axum --deep
//!
//! # Serve the API on [server].bind
//! RUST_LOG=repospec=debug repospec serve
//! ```

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repospec::cli::{self, AnalyzeFlags};
use repospec::{config, migrate, server};

/// repospec: turn a public GitHub repository into a generated technical
/// specification.
#[derive(Parser)]
#[command(
    name = "repospec",
    about = "Generate shareable technical specifications from GitHub repositories",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/repospec.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it again leaves existing specs untouched.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Analyze a repository and print its spec.
    Analyze {
        /// Repository URL, `github.com/owner/repo`, or `owner/repo`.
        repo: String,

        /// Sample more of the repository.
        #[arg(long)]
        deep: bool,

        /// Leave out the API reference and data model sections.
        #[arg(long)]
        no_api_docs: bool,

        /// Do not ask for an architecture diagram.
        #[arg(long)]
        no_diagram: bool,

        /// Ignore a cached spec and regenerate.
        #[arg(long)]
        refresh: bool,

        /// Print JSON instead of markdown.
        #[arg(long)]
        json: bool,
    },

    /// Print a stored spec by share id. Does not count a view.
    Get {
        share_id: String,
    },

    /// List specs owned by a user, newest first.
    List {
        #[arg(long)]
        user: String,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Most viewed repositories across public specs.
    Popular {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },

    /// Make an owned spec public or private.
    #[command(group(ArgGroup::new("visibility").required(true).args(["public", "private"])))]
    Visibility {
        share_id: String,

        #[arg(long)]
        user: String,

        #[arg(long)]
        public: bool,

        #[arg(long)]
        private: bool,
    },

    /// Delete an owned spec.
    Delete {
        share_id: String,

        #[arg(long)]
        user: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repospec=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Analyze {
            repo,
            deep,
            no_api_docs,
            no_diagram,
            refresh,
            json,
        } => {
            let flags = AnalyzeFlags {
                deep,
                no_api_docs,
                no_diagram,
                refresh,
                json,
            };
            cli::run_analyze(&cfg, &repo, &flags).await?;
        }
        Commands::Get { share_id } => {
            cli::run_get(&cfg, &share_id).await?;
        }
        Commands::List { user, limit } => {
            cli::run_list(&cfg, &user, limit).await?;
        }
        Commands::Popular { limit } => {
            cli::run_popular(&cfg, limit).await?;
        }
        Commands::Visibility {
            share_id,
            user,
            public,
            private: _,
        } => {
            cli::run_visibility(&cfg, &share_id, &user, public).await?;
        }
        Commands::Delete { share_id, user } => {
            cli::run_delete(&cfg, &share_id, &user).await?;
        }
    }

    Ok(())
}
