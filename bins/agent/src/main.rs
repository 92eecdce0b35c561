//! linkmesh-agent - keeps a node's overlay networking in line with its config.

mod commands;

use clap::{Parser, Subcommand};

use commands::CidrArgs;

#[derive(Parser)]
#[command(
    name = "linkmesh-agent",
    version,
    about = "Overlay network reconciliation agent"
)]
struct Cli {
    #[command(flatten)]
    cidrs: CidrArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile continuously against a node config file.
    Run(commands::run::RunCmd),

    /// Print the live overlay configuration.
    Capture(commands::capture::CaptureCmd),

    /// Show what a node config file would delete and create.
    Diff(commands::diff::DiffCmd),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cidrs = cli.cidrs.into_cidrs();

    match cli.command {
        Command::Run(cmd) => cmd.run(cidrs).await,
        Command::Capture(cmd) => cmd.run(cidrs).await,
        Command::Diff(cmd) => cmd.run(cidrs).await,
    }
}
