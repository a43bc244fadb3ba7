use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use fxrates::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for fxrates::AppCommand {
    fn from(cmd: Commands) -> fxrates::AppCommand {
        match cmd {
            Commands::Serve => fxrates::AppCommand::Serve,
            Commands::Rates { base, targets } => fxrates::AppCommand::Rates { base, targets },
            Commands::Watch { base } => fxrates::AppCommand::Watch { base },
            Commands::Currencies => fxrates::AppCommand::Currencies,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Run the HTTP gateway with background refreshes
    Serve,
    /// Print rates for a base currency
    Rates {
        /// Base currency, defaults to the configured one
        #[arg(short, long)]
        base: Option<String>,
        /// Comma separated target currencies; empty shows the reference table
        #[arg(short, long, value_delimiter = ',')]
        targets: Vec<String>,
    },
    /// Follow rates for a base currency as they refresh
    Watch {
        #[arg(short, long)]
        base: Option<String>,
    },
    /// List supported currencies
    Currencies,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => fxrates::cli::setup::setup_at_path(path),
            None => fxrates::cli::setup::setup(),
        },
        Some(cmd) => fxrates::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
