//! Model builder.
//!
//! Applies recipe commands to an in-progress manifest. Layer directives stage
//! blobs through the descriptor builder; nothing is committed until every
//! command has been applied, and the manifest is written only after every
//! blob is durable.

use std::path::{Path, PathBuf};

use a3s_model_core::config::{BuildOptions, Compression};
use a3s_model_core::error::{ModelError, Result};
use a3s_model_core::manifest::{annotation, media_type, LayerSection, Manifest};

use super::recipe::{Command, Directive, Recipe};
use crate::model::descriptor::{DescriptorBuilder, PendingBlob};
use crate::model::reference::ModelPath;
use crate::model::store::ModelStore;
use crate::model::sync::ModelSync;

/// Entry name for inline description text.
const DESCRIPTION_ENTRY: &str = "DESCRIPTION";
/// Entry name for single-file licenses.
const LICENSE_ENTRY: &str = "LICENSE";

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Where the manifest was written
    pub path: ModelPath,
    pub manifest: Manifest,
    /// Blobs newly written to the store
    pub written: usize,
    /// Blobs that were already present
    pub deduplicated: usize,
}

/// Builds models from recipes into a local store.
pub struct ModelBuilder {
    store: ModelStore,
    options: BuildOptions,
    sync: Option<ModelSync>,
}

/// Staged layers awaiting commit, in appearance order.
struct BuildState {
    manifest: Manifest,
    pending: Vec<(LayerSection, PendingBlob)>,
}

impl ModelBuilder {
    pub fn new(store: ModelStore, options: BuildOptions) -> Self {
        Self {
            store,
            options,
            sync: None,
        }
    }

    /// Pull `from` bases through `sync` before hydrating them.
    pub fn with_sync(mut self, sync: ModelSync) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Execute a recipe and write the resulting manifest.
    ///
    /// `target` defaults to the argument of the leading `from`/`create`.
    pub async fn build(&self, recipe: &Recipe, target: Option<&ModelPath>) -> Result<BuildResult> {
        let base = recipe.base().ok_or_else(|| {
            ModelError::BuildError("Recipe must begin with FROM or CREATE".to_string())
        })?;

        let target = match target {
            Some(path) => path.clone(),
            None => ModelPath::parse(&base.args)?,
        };

        let manifest = match base.directive {
            Directive::From => {
                let base_path = ModelPath::parse(&base.args)?;
                let mut manifest = self.hydrate(&base_path).await?;
                if manifest.config.name.is_empty() {
                    manifest.config.name = base_path.name.clone();
                }
                tracing::info!(base = %base_path, layers = manifest.layers().count(), "Inheriting base model");
                manifest
            }
            _ => {
                let mut manifest = Manifest::default();
                manifest.config.name = base.args.clone();
                tracing::info!(name = %base.args, "Creating model");
                manifest
            }
        };

        let mut state = BuildState {
            manifest,
            pending: Vec::new(),
        };
        for command in recipe.body() {
            self.apply(&mut state, command)?;
        }

        let BuildState {
            mut manifest,
            pending,
        } = state;

        let mut written = 0;
        let mut deduplicated = 0;
        for (section, blob) in pending {
            let outcome = self.store.commit(blob)?;
            if outcome.written {
                written += 1;
            } else {
                deduplicated += 1;
            }
            manifest.section_mut(section).push(outcome.descriptor);
        }

        manifest.annotations.insert(
            annotation::CREATED.to_string(),
            chrono::Utc::now().to_rfc3339(),
        );
        self.store.write_manifest(&target, &manifest)?;

        tracing::info!(
            model = %target,
            written,
            deduplicated,
            size = manifest.total_size(),
            "Build succeeded"
        );
        Ok(BuildResult {
            path: target,
            manifest,
            written,
            deduplicated,
        })
    }

    /// Load a base model's manifest, pulling it first when a synchronizer is set.
    async fn hydrate(&self, base: &ModelPath) -> Result<Manifest> {
        if let Some(sync) = &self.sync {
            sync.pull(base).await?;
        }
        let (manifest, _) = self.store.read_manifest(base).map_err(|e| match e {
            ModelError::NotFound(_) => ModelError::NotFound(format!(
                "Base model {} is not in the local store",
                base.short_tagname()
            )),
            other => other,
        })?;

        // Inherited layers must be resolvable before anything new is staged.
        if let Some(missing) = manifest.layers().find(|d| !self.store.has_blob(&d.digest)) {
            return Err(ModelError::NotFound(format!(
                "Base model {} references blob {} ({}) which is not in the local store",
                base.short_tagname(),
                missing.digest,
                missing.media_type
            )));
        }
        Ok(manifest)
    }

    fn apply(&self, state: &mut BuildState, command: &Command) -> Result<()> {
        let args = command.args.as_str();
        match command.directive {
            Directive::Name => state.manifest.config.name = args.to_string(),
            Directive::Family => state.manifest.config.family = args.to_string(),
            Directive::Architecture => state.manifest.config.architecture = args.to_string(),
            Directive::Format => state.manifest.weights.format = args.to_string(),
            Directive::Precision => state.manifest.weights.precision = args.to_string(),
            Directive::ParamSize => {
                state
                    .manifest
                    .annotations
                    .insert(annotation::PARAM_SIZE.to_string(), args.to_string());
            }
            Directive::Quantization => {
                state
                    .manifest
                    .annotations
                    .insert(annotation::QUANTIZATION.to_string(), args.to_string());
            }
            Directive::Weights => {
                let blob = self.stage_path(command, media_type::MODEL_WEIGHTS, None)?;
                state.pending.push((LayerSection::Weights, blob));
            }
            Directive::Tokenizer => {
                let blob = self.stage_path(command, media_type::MODEL_PROCESSOR_TEXT, None)?;
                state.pending.push((LayerSection::Processor, blob));
            }
            Directive::Config => {
                let blob = self.stage_path(command, media_type::MODEL_EXTENSION, None)?;
                state.pending.push((LayerSection::Extensions, blob));
            }
            Directive::License => {
                let blob =
                    self.stage_path(command, media_type::MODEL_LICENSE, Some(LICENSE_ENTRY))?;
                state.pending.push((LayerSection::License, blob));
            }
            Directive::Description => {
                let source = self.resolve(args);
                let blob = if source.exists() {
                    self.stage_path(command, media_type::MODEL_DESCRIPTION, Some(DESCRIPTION_ENTRY))?
                } else {
                    DescriptorBuilder::new(&self.store).build_bytes(
                        self.compression(),
                        DESCRIPTION_ENTRY,
                        args.as_bytes(),
                        media_type::MODEL_DESCRIPTION,
                    )?
                };
                tracing::info!(digest = %blob.digest(), "Add description");
                state.pending.push((LayerSection::Description, blob));
            }
            Directive::From | Directive::Create => {
                return Err(ModelError::ParseError {
                    line: command.line,
                    message: "only one FROM or CREATE is allowed".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Stage a file or directory named by a recipe argument.
    ///
    /// `rename` applies to single files only.
    fn stage_path(
        &self,
        command: &Command,
        media: &str,
        rename: Option<&str>,
    ) -> Result<PendingBlob> {
        let source = self.resolve(&command.args);
        if !source.exists() {
            return Err(ModelError::BuildError(format!(
                "Line {}: {} source not found: {}",
                command.line,
                command.directive,
                source.display()
            )));
        }
        let rename = rename.filter(|_| source.is_file());

        let blob = DescriptorBuilder::new(&self.store).build(
            self.compression(),
            &source,
            media,
            rename,
        )?;
        tracing::info!(
            directive = %command.directive,
            source = %source.display(),
            digest = %blob.digest(),
            size = blob.size(),
            "Added layer"
        );
        Ok(blob)
    }

    fn compression(&self) -> Compression {
        self.options.compression
    }

    /// Resolve a recipe path against the build context, expanding `~/`.
    fn resolve(&self, arg: &str) -> PathBuf {
        if let Some(rest) = arg.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        let path = Path::new(arg);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.options.context_dir.join(path)
        }
    }
}
