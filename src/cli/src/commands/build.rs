//! `a3s-model build` command: build a model from a recipe.
//!
//! Parses the recipe, stages every layer, commits the blobs and writes the
//! manifest into the local store.

use std::path::PathBuf;

use a3s_model_core::{BuildOptions, Compression};
use a3s_model_runtime::{ModelBuilder, ModelPath, Recipe};
use clap::Args;

use crate::output;

/// Recipe file looked up in the context directory by default.
const DEFAULT_RECIPE: &str = "Modelfile";

#[derive(Args)]
pub struct BuildArgs {
    /// Build context directory (recipe paths resolve against it)
    #[arg(default_value = ".")]
    pub path: String,

    /// Path to the recipe (default: <PATH>/Modelfile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Model name to write (default: the FROM/CREATE argument)
    #[arg(short = 't', long = "tag")]
    pub tag: Option<String>,

    /// Compress layers with zstd
    #[arg(long)]
    pub compress: bool,

    /// Do not pull a missing FROM base from its registry
    #[arg(long)]
    pub offline: bool,

    /// Suppress build output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    let context_dir = PathBuf::from(&args.path)
        .canonicalize()
        .map_err(|e| format!("Invalid build context path '{}': {}", args.path, e))?;

    if !context_dir.is_dir() {
        return Err(format!(
            "Build context '{}' is not a directory",
            context_dir.display()
        )
        .into());
    }

    let recipe_path = match &args.file {
        Some(f) => {
            let p = PathBuf::from(f);
            if p.is_absolute() {
                p
            } else {
                context_dir.join(p)
            }
        }
        None => context_dir.join(DEFAULT_RECIPE),
    };
    let recipe = Recipe::from_file(&recipe_path)?;

    let target = args.tag.as_deref().map(ModelPath::parse).transpose()?;

    let store = super::open_store()?;
    let options = BuildOptions {
        compression: if args.compress {
            Compression::Zstd
        } else {
            Compression::None
        },
        context_dir,
    };

    let mut builder = ModelBuilder::new(store.clone(), options);
    if !args.offline {
        builder = builder.with_sync(super::registry_sync(&store, Default::default()));
    }

    if !args.quiet {
        println!("Building from {}...", recipe_path.display());
    }
    let result = builder.build(&recipe, target.as_ref()).await?;

    if args.quiet {
        println!("{}", result.path);
    } else {
        println!(
            "Built: {} ({} layers, {}, {} new, {} reused)",
            result.path.short_tagname(),
            result.manifest.layers().count(),
            output::human_size(result.manifest.total_size()),
            result.written,
            result.deduplicated
        );
    }

    Ok(())
}
