//! Show command - print an ordered interface graph.

use clap::{Args, ValueEnum};
use ifconverge::graph::order;

use crate::host::HostArgs;

#[derive(Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub host: HostArgs,

    /// Show the host's current configuration instead of the desired one
    #[arg(long)]
    pub current: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "yaml")]
    pub format: OutputFormat,
}

#[derive(Clone, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

pub async fn run(args: ShowArgs) -> anyhow::Result<()> {
    let host = args.host.load().await?;

    let mut graph = if args.current {
        host.platform.snapshot(&args.host.root).await?
    } else {
        host.settings.build_topology(host.platform)?.0.graph
    };
    order(&mut graph)?;

    let output = match args.format {
        OutputFormat::Yaml => graph.to_yaml()?,
        OutputFormat::Json => graph.to_json()?,
    };
    println!("{}", output.trim_end());

    Ok(())
}
