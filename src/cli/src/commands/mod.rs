//! CLI command definitions and dispatch.

mod build;
mod list;
mod pull;
mod push;
mod unpack;

use std::sync::Arc;
use std::time::Duration;

use a3s_model_core::{RegistryConfig, StoreConfig, SyncOptions};
use a3s_model_runtime::{ModelStore, ModelSync, OciConnector};
use clap::{Args, Parser, Subcommand};

/// A3S Model - package, share and unpack machine learning models.
#[derive(Parser)]
#[command(name = "a3s-model", version, about)]
pub struct Cli {
    /// Log more (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Default tracing filter when RUST_LOG is unset.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build a model from a recipe
    Build(build::BuildArgs),
    /// Push a model to a registry
    Push(push::PushArgs),
    /// Pull a model from a registry
    Pull(pull::PullArgs),
    /// Extract a model's files into a directory
    Unpack(unpack::UnpackArgs),
    /// List local models
    List(list::ListArgs),
}

/// Transfer tuning shared by `push` and `pull`.
#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// Per-blob transfer timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maximum concurrent blob transfers
    #[arg(short, long, default_value_t = 4)]
    pub jobs: usize,
}

impl TransferArgs {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            concurrency: self.jobs.max(1),
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

/// Open the local store (`$MODELS_DIR` or `~/.models`).
pub(crate) fn open_store() -> Result<ModelStore, Box<dyn std::error::Error>> {
    let config = StoreConfig::from_env()?;
    tracing::debug!(root = %config.root().display(), "Using model store");
    Ok(ModelStore::open(&config)?)
}

/// Synchronizer over the OCI registry configured in the environment.
pub(crate) fn registry_sync(store: &ModelStore, options: SyncOptions) -> ModelSync {
    let connector = OciConnector::new(RegistryConfig::from_env());
    ModelSync::new(store.clone(), Arc::new(connector), options)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build(args) => build::execute(args).await,
        Command::Push(args) => push::execute(args).await,
        Command::Pull(args) => pull::execute(args).await,
        Command::Unpack(args) => unpack::execute(args).await,
        Command::List(args) => list::execute(args).await,
    }
}
