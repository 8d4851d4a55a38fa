use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use prolog_mcp::mcp::{self, Dispatcher, ToolCall};
use prolog_mcp::reasoning::ScryerFactory;
use prolog_mcp::Config;

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Prolog knowledge base served as MCP tools over stdio", long_about = None)]
struct Cli {
    #[command(flatten)]
    options: ConfigArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Maximum solutions returned per query
    #[arg(long, global = true)]
    max_solutions: Option<usize>,

    /// Wall-clock budget per query in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Start with an empty knowledge base
    #[arg(long, global = true)]
    no_seed: bool,

    /// Reload the default knowledge base after every reset
    #[arg(long, global = true)]
    reseed_on_reset: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl ConfigArgs {
    /// Config file first, then command-line overrides.
    fn resolve(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(max) = self.max_solutions {
            config.query.max_solutions = max;
        }
        if let Some(ms) = self.timeout_ms {
            config.query.timeout_ms = Some(ms);
        }
        if self.no_seed {
            config.session.seed = false;
        }
        if self.reseed_on_reset {
            config.session.reseed_on_reset = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over stdio (default)
    Serve,

    /// Run one query against a fresh session and print the result
    Query {
        /// Prolog goal, e.g. "grandparent(john, X)"
        goal: String,

        /// Maximum solutions to print
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the tool definitions
    Tools,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries the protocol
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn start_dispatcher(config: &Config) -> Result<Dispatcher> {
    Dispatcher::spawn(ScryerFactory, config.session_options())
        .context("Failed to start knowledge session")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.options.verbose);
    let config = cli.options.resolve()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                max_solutions = config.query.max_solutions,
                seed = config.session.seed,
                "starting prolog-mcp"
            );
            let dispatcher = start_dispatcher(&config)?;
            mcp::run_mcp_server(dispatcher, &config.server.name)?;
        }
        Commands::Query { goal, limit } => {
            let call = ToolCall::parse("query", json!({ "query": goal, "limit": limit }))?;
            let dispatcher = start_dispatcher(&config)?;
            let reply = dispatcher.call(call);
            if reply.is_error {
                bail!("{}", reply.first_text());
            }
            println!("{}", reply.first_text());
        }
        Commands::Tools => {
            println!("{:#}", mcp::tools::definitions());
        }
    }

    Ok(())
}
