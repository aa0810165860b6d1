mod agent;
mod config;
mod logging;
mod signals;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use agentkit::RuntimeContext;

use crate::agent::Agent;
use crate::config::{AgentConfig, CliOverrides};

/// Go gRPC service agent - builds, runs and hot-reloads one Go service
#[derive(Parser)]
#[command(name = "go-grpc-agent")]
#[command(about = "Go gRPC service agent - builds, runs and hot-reloads one Go service")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Where to build and run the service (overrides config)
    #[arg(long, value_enum)]
    context: Option<ContextArg>,

    /// Run this prebuilt binary instead of building with go
    #[arg(long)]
    binary: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ContextArg {
    Native,
    Container,
}

impl From<ContextArg> for RuntimeContext {
    fn from(value: ContextArg) -> Self {
        match value {
            ContextArg::Native => RuntimeContext::Native,
            ContextArg::Container => RuntimeContext::Container,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build and run the service until Ctrl+C
    Run,
    /// Validate configuration and the service definition, then exit
    Check,
    /// Build the service and run its tests
    Test,
    /// Remove build artifacts and generated state
    Destroy,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(&CliOverrides {
        verbose: cli.verbose,
        context: cli.context.map(RuntimeContext::from),
        binary: cli.binary.clone(),
        json_logs: cli.json_logs,
    });

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    logging::init(&config.logging)?;

    let command = cli.command.unwrap_or(Commands::Run);
    if !matches!(command, Commands::Check) {
        config.validate()?;
    }
    tracing::info!(service = %config.service.identity(), "go-grpc-agent starting");

    let agent = Agent::new(config);
    match command {
        Commands::Run => agent.run().await,
        Commands::Check => {
            let report = agent.check().await?;
            println!("Configuration is valid");
            println!("{report}");
            Ok(())
        }
        Commands::Test => agent.test().await,
        Commands::Destroy => agent.destroy().await,
    }
}
