//! ifconverge - converge host network interfaces onto a declared topology.

mod example;
mod host;
mod reconcile;
mod show;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ifconverge", version)]
#[command(about = "Converge host network interfaces onto a declared topology", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the actions a reconciliation would take, without touching the host
    Plan(reconcile::ReconcileArgs),

    /// Reconcile the host onto the desired topology
    Apply(reconcile::ReconcileArgs),

    /// Print the ordered desired or current interface graph
    Show(show::ShowArgs),

    /// Print an example settings file
    Example(example::ExampleArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Plan(args) => reconcile::run(args, true).await,
        Command::Apply(args) => reconcile::run(args, false).await,
        Command::Show(args) => show::run(args).await,
        Command::Example(args) => example::run(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
