//! # leadvault CLI (`lvault`)
//!
//! ## Usage
//!
//! ```bash
//! lvault --config ./config/lvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lvault init` | Create the control-plane tables and the analytical schema |
//! | `lvault ingest <path>` | Upload a delimited file and wait for ingestion |
//! | `lvault uploads` | List uploads, newest first |
//! | `lvault search --user <id> [filters]` | Run a search as a user |
//! | `lvault history --user <id>` | Show a user's search log |
//! | `lvault quota --user <id> [--set N]` | Show or change a user's daily limit |
//! | `lvault serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use leadvault::commands;
use leadvault::config;
use leadvault::filter::SearchFilter;
use leadvault::search::Caller;

/// leadvault: bulk contact ingestion and quota-gated contact search.
#[derive(Parser)]
#[command(
    name = "lvault",
    about = "leadvault: bulk contact ingestion and quota-gated contact search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize both schemas. Idempotent.
    Init,

    /// Upload a delimited file and wait until it is ingested.
    Ingest {
        /// Path to the file. A `(N)` group in the name is recorded as its serial number.
        path: PathBuf,
    },

    /// List uploads, newest first.
    Uploads {
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Only uploads with an id below this one.
        #[arg(long)]
        before: Option<i64>,
    },

    /// Search contacts as a user. Counts against that user's quota.
    Search {
        #[arg(long)]
        user: String,

        #[arg(long, default_value = "cli")]
        device: String,

        /// `AND` (default) or `OR`.
        #[arg(long, default_value = "AND")]
        logic: String,

        #[arg(long, default_value_t = 1)]
        page: i64,

        #[arg(long, default_value_t = 20)]
        page_size: i64,

        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        linkedin: Option<String>,
        #[arg(long)]
        position: Option<String>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        company_phone: Option<String>,
        #[arg(long)]
        website: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        facebook: Option<String>,
        #[arg(long)]
        linkedin_company_page: Option<String>,
    },

    /// Show a user's search history, newest first.
    History {
        #[arg(long)]
        user: String,

        #[arg(long, default_value_t = 1)]
        page: i64,

        #[arg(long, default_value_t = 25)]
        limit: i64,
    },

    /// Show today's quota usage, optionally setting the user's daily limit.
    Quota {
        #[arg(long)]
        user: String,

        #[arg(long)]
        set: Option<i64>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Ingest { path } => {
            commands::run_ingest(&cfg, &path).await?;
        }
        Commands::Uploads { limit, before } => {
            commands::run_uploads(&cfg, limit, before).await?;
        }
        Commands::Search {
            user,
            device,
            logic,
            page,
            page_size,
            name,
            email,
            phone,
            linkedin,
            position,
            company,
            company_phone,
            website,
            domain,
            facebook,
            linkedin_company_page,
        } => {
            let filter = SearchFilter {
                logic,
                page,
                page_size,
                name: name.unwrap_or_default(),
                email: email.unwrap_or_default(),
                phone: phone.unwrap_or_default(),
                linkedin: linkedin.unwrap_or_default(),
                position: position.unwrap_or_default(),
                company: company.unwrap_or_default(),
                company_phone: company_phone.unwrap_or_default(),
                website: website.unwrap_or_default(),
                domain: domain.unwrap_or_default(),
                facebook: facebook.unwrap_or_default(),
                linkedin_company_page: linkedin_company_page.unwrap_or_default(),
            };
            let caller = Caller {
                user_id: user,
                device_fingerprint: device,
                ip_address: "127.0.0.1".to_string(),
                user_agent: format!("lvault/{}", env!("CARGO_PKG_VERSION")),
            };
            commands::run_search(&cfg, caller, filter).await?;
        }
        Commands::History { user, page, limit } => {
            commands::run_history(&cfg, &user, page, limit).await?;
        }
        Commands::Quota { user, set } => {
            commands::run_quota(&cfg, &user, set).await?;
        }
        Commands::Serve => {
            commands::run_serve(&cfg).await?;
        }
    }

    Ok(())
}
