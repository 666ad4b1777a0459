//! `a3s-model push` command: publish a local model to its registry.

use a3s_model_runtime::ModelPath;
use clap::Args;

use super::TransferArgs;
use crate::output;

#[derive(Args)]
pub struct PushArgs {
    /// Model name (e.g., "registry.example.com/team/llama:v1")
    pub name: String,

    #[command(flatten)]
    pub transfer: TransferArgs,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PushArgs) -> Result<(), Box<dyn std::error::Error>> {
    let path = ModelPath::parse(&args.name)?;
    let store = super::open_store()?;
    let sync = super::registry_sync(&store, args.transfer.sync_options());

    if !args.quiet {
        println!("Pushing {}...", path.short_tagname());
    }
    let report = sync.push(&path).await?;

    if args.quiet {
        println!("{}", report.index_digest);
    } else {
        println!(
            "Pushed: {} ({}; {} uploaded, {} already present, {})",
            path.short_tagname(),
            output::short_digest(&report.index_digest),
            report.uploaded,
            report.skipped,
            output::human_size(report.bytes)
        );
    }

    Ok(())
}
