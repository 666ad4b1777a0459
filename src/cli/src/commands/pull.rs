//! `a3s-model pull` command.

use a3s_model_runtime::ModelPath;
use clap::Args;

use super::TransferArgs;
use crate::output;

#[derive(Args)]
pub struct PullArgs {
    /// Model name (e.g., "llama:v1", "registry.example.com/team/llama:v1")
    pub name: String,

    #[command(flatten)]
    pub transfer: TransferArgs,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PullArgs) -> Result<(), Box<dyn std::error::Error>> {
    let path = ModelPath::parse(&args.name)?;
    let store = super::open_store()?;
    let sync = super::registry_sync(&store, args.transfer.sync_options());

    if !args.quiet {
        println!("Pulling {}...", path.short_tagname());
    }
    let report = sync.pull(&path).await?;

    if args.quiet {
        println!("{}", report.index_digest);
    } else {
        println!(
            "Pulled: {} ({}; {} fetched, {} up to date, {})",
            path.short_tagname(),
            output::short_digest(&report.index_digest),
            report.fetched,
            report.skipped,
            output::human_size(report.bytes)
        );
    }

    Ok(())
}
