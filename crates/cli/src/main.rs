//! Gateway CLI - run the ingestion and result gateways, or talk to them

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gateway_core::{Config, EntityKind};

mod commands;
mod logging;

use commands::{ProduceOptions, cmd_config_init, cmd_config_show, cmd_produce, cmd_results, cmd_serve};
use logging::{init_cli_logging, init_daemon_logging};

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Ingestion and result gateway for the distributed query pipeline")]
#[command(after_help = "\
QUICK START:
  gateway config init                    # Write the default config
  gateway serve --foreground             # Run both gateways

CLIENT WORKFLOW:
  gateway produce movies movies.psv -q argentinian-spanish-productions
  gateway results <CLIENT_ID> -q argentinian-spanish-productions")]
struct Cli {
  /// Config file (default: $GATEWAY_CONFIG, then the user config)
  #[arg(long, global = true, value_name = "PATH")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the ingestion router and result delivery service
  Serve {
    /// Log to the console instead of the log file
    #[arg(long)]
    foreground: bool,
  },
  /// Stream a file of records for one entity kind
  #[command(long_about = "Stream a file of records for one entity kind.\n\n\
    Each non-empty line is one record. Records are grouped into batches, each \
    acknowledged before the next is sent, followed by one end-of-stream notice \
    for the listed queries. The client id is printed on stdout.")]
  Produce {
    /// Entity kind: movies, credits or ratings
    entity: EntityKind,
    /// File with one record per line
    file: PathBuf,
    /// Query the records feed (repeatable)
    #[arg(short, long = "query", required = true)]
    queries: Vec<String>,
    /// Reuse a client id instead of requesting one
    #[arg(long)]
    client_id: Option<String>,
    /// Listener to dial (default: from config)
    #[arg(long)]
    address: Option<String>,
    /// Records per batch
    #[arg(long, default_value = "500")]
    batch_size: usize,
    /// Drop the first line of the file
    #[arg(long)]
    skip_header: bool,
  },
  /// Receive results for a client until every query has finished
  Results {
    /// Client id the records were sent under
    client_id: String,
    /// Query to wait for (repeatable)
    #[arg(short, long = "query", required = true)]
    queries: Vec<String>,
    /// Result listener to dial (default: from config)
    #[arg(long)]
    address: Option<String>,
    /// One JSON object per frame
    #[arg(long)]
    json: bool,
  },
  /// Inspect or create configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

/// Subcommands for `gateway config`
#[derive(Subcommand)]
enum ConfigCommand {
  /// Show current effective configuration
  #[command(long_about = "Show the current effective configuration.\n\n\
    Displays which file is in use and the merged result of that file and the \
    built-in defaults.")]
  Show {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Write the default config to the user config path
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let explicit = cli.config.as_deref();

  match cli.command {
    Commands::Serve { foreground } => {
      let config = Config::load(explicit).context("Failed to load config")?;
      let _guard = init_daemon_logging(&config.daemon, foreground);
      cmd_serve(config).await
    }
    Commands::Produce {
      entity,
      file,
      queries,
      client_id,
      address,
      batch_size,
      skip_header,
    } => {
      init_cli_logging();
      let config = Config::load(explicit).context("Failed to load config")?;
      let options = ProduceOptions {
        entity,
        queries,
        file,
        client_id,
        address,
        batch_size,
        skip_header,
      };
      cmd_produce(&config, options).await
    }
    Commands::Results {
      client_id,
      queries,
      address,
      json,
    } => {
      init_cli_logging();
      let config = Config::load(explicit).context("Failed to load config")?;
      cmd_results(&config, client_id, queries, address, json).await
    }
    Commands::Config { command } => match command {
      ConfigCommand::Show { json } => cmd_config_show(explicit, json),
      ConfigCommand::Init { force } => cmd_config_init(force),
    },
  }
}
