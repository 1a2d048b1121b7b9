mod import;
mod inspect;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dump-ingest")]
#[command(version)]
#[command(
    about = "Import legacy SQL INSERT dumps into a document store, idempotently",
    long_about = None
)]
pub struct Cli {
    /// Log level filter (error, warn, info, debug, trace). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import a dump into the document store
    Import {
        /// Input SQL dump. Supports .gz, .bz2, .xz, .zst compression
        file: PathBuf,

        /// Store backend: memory, json, duckdb (default: json)
        #[arg(short, long)]
        store: Option<String>,

        /// Store location: a directory for json, a database file for duckdb
        #[arg(long)]
        store_path: Option<PathBuf>,

        /// Existing-record policy: keep or replace (default: keep)
        #[arg(long)]
        policy: Option<String>,

        /// YAML config file with store, policy and table overrides
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only import these collections (comma-separated, e.g. users,courses)
        #[arg(short, long)]
        tables: Option<String>,

        /// Preview against an in-memory copy of the configured store; nothing is written
        #[arg(long)]
        dry_run: bool,

        /// Output the run report as JSON
        #[arg(long)]
        json: bool,

        /// Show progress while reading and importing
        #[arg(short, long)]
        progress: bool,

        /// Maximum failure reasons kept per table
        #[arg(long)]
        max_failure_reasons: Option<usize>,
    },

    /// List the INSERT tables of a dump and which collections they feed
    Inspect {
        /// Input SQL dump. Supports .gz, .bz2, .xz, .zst compression
        file: PathBuf,

        /// YAML config file (for source table overrides)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the JSON Schema of the import report (or of `inspect`, `config`)
    Schema {
        /// Schema name: import, inspect, config
        #[arg(default_value = "import")]
        name: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Install the stderr log subscriber. `RUST_LOG` overrides `--log-level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Import {
            file,
            store,
            store_path,
            policy,
            config,
            tables,
            dry_run,
            json,
            progress,
            max_failure_reasons,
        } => import::run(import::ImportArgs {
            file,
            store,
            store_path,
            policy,
            config,
            tables,
            dry_run,
            json,
            progress,
            max_failure_reasons,
        }),
        Commands::Inspect { file, config, json } => inspect::run(file, config, json),
        Commands::Schema { name } => {
            let schema = crate::json_schema::get_schema(&name).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown schema: {}. Valid options: {}",
                    name,
                    crate::json_schema::schema_names().join(", ")
                )
            })?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "dump-ingest", &mut io::stdout());
            Ok(())
        }
    }
}
