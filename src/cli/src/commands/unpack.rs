//! `a3s-model unpack` command: extract a local model into a directory.

use std::path::PathBuf;

use a3s_model_runtime::ModelPath;
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct UnpackArgs {
    /// Model name
    pub name: String,

    /// Output directory (default: ./<name>-<tag>)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn execute(args: UnpackArgs) -> Result<(), Box<dyn std::error::Error>> {
    let path = ModelPath::parse(&args.name)?;
    let store = super::open_store()?;
    let (manifest, _) = store.read_manifest(&path)?;

    let target = args.output.unwrap_or_else(|| default_target(&path));
    let report = a3s_model_runtime::unpack(&store, &manifest, &target)?;

    println!(
        "Unpacked: {} -> {} ({} layers, {})",
        path.short_tagname(),
        target.display(),
        report.layers,
        output::human_size(report.bytes)
    );
    Ok(())
}

fn default_target(path: &ModelPath) -> PathBuf {
    PathBuf::from(format!("{}-{}", path.name, path.tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_target() {
        let path = ModelPath::parse("acme/llama:v2").unwrap();
        assert_eq!(default_target(&path), PathBuf::from("llama-v2"));
    }
}
