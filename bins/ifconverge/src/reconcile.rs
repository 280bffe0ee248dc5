//! Plan and apply commands.

use clap::Args;
use ifconverge::exec::ShellSink;
use ifconverge::{ApplyOptions, Reconciliation};

use crate::host::HostArgs;

#[derive(Args)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub host: HostArgs,
}

pub async fn run(args: ReconcileArgs, dry_run: bool) -> anyhow::Result<()> {
    let root = &args.host.root;
    let host = args.host.load().await?;
    let settings = &host.settings;

    let (topology, ctx) = settings.build_topology(host.platform)?;
    let current = host.platform.snapshot(root).await?;

    let opts = ApplyOptions {
        dry_run,
        settle_delay: settings.settle_delay(),
        management_interface: settings.management_interface.clone(),
    };
    let run = Reconciliation::prepare(current, topology.graph, &opts)?;
    let modules = host
        .platform
        .kernel_modules(&run.new, ctx.machine_bond_mode());

    if dry_run {
        println!("{}", run.diff.summary());
        println!();
    }

    let mut sink = ShellSink::new(root);
    let mut store = host.platform.config_store(root);
    let result = run.apply(&modules, &mut sink, store.as_mut(), &opts).await?;

    println!("{}", result.summary_text());
    for err in &result.errors {
        eprintln!("Error: {err}");
    }

    Ok(())
}
