//! Integration test: build, push, pull and unpack a model end to end.
//!
//! Uses the in-process registry so no network access is required:
//!
//! 1. Build a model from a recipe into a local store
//! 2. Push it to a registry
//! 3. Pull it into a fresh store
//! 4. Unpack it and compare the restored files with the originals

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_model_core::config::{BuildOptions, Compression, StoreConfig, SyncOptions};
use a3s_model_core::error::ModelError;
use a3s_model_core::manifest::media_type;
use a3s_model_runtime::{
    unpack, InMemoryRegistry, ModelBuilder, ModelPath, ModelStore, ModelSync, Recipe,
};
use tempfile::TempDir;

struct Workspace {
    tmp: TempDir,
    context: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let context = tmp.path().join("context");
        fs::create_dir_all(context.join("tokenizer")).unwrap();
        fs::write(context.join("model.safetensors"), vec![7u8; 64 * 1024]).unwrap();
        fs::write(context.join("LICENSE.md"), b"Apache-2.0").unwrap();
        fs::write(context.join("tokenizer/vocab.json"), b"{\"hello\":0}").unwrap();
        fs::write(context.join("tokenizer/merges.txt"), b"h e\nl l\n").unwrap();
        Self { tmp, context }
    }

    fn store(&self, name: &str) -> ModelStore {
        ModelStore::open(&StoreConfig::new(self.tmp.path().join(name))).unwrap()
    }

    fn builder(&self, store: &ModelStore, compression: Compression) -> ModelBuilder {
        ModelBuilder::new(
            store.clone(),
            BuildOptions {
                compression,
                context_dir: self.context.clone(),
            },
        )
    }
}

const RECIPE: &str = r#"create registry.local/acme/foo:v1
family llama
format safetensors
param_size 7B
weights model.safetensors
tokenizer tokenizer
license LICENSE.md
description """Foo is a test model.
It has two lines."""
"#;

fn sync(store: &ModelStore, registry: &InMemoryRegistry) -> ModelSync {
    ModelSync::new(store.clone(), Arc::new(registry.clone()), SyncOptions::default())
}

fn assert_same_file(a: &Path, b: &Path) {
    assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap(), "{}", b.display());
}

#[tokio::test]
async fn test_build_push_pull_unpack() {
    let ws = Workspace::new();
    let store = ws.store("local");
    let recipe = Recipe::parse(RECIPE).unwrap();

    let built = ws
        .builder(&store, Compression::Zstd)
        .build(&recipe, None)
        .await
        .unwrap();
    assert_eq!(built.path.to_string(), "registry.local/acme/foo:v1");
    assert_eq!(built.manifest.layers().count(), 4);
    assert!(built
        .manifest
        .layers()
        .all(|d| media_type::is_zstd(&d.media_type)));

    let registry = InMemoryRegistry::new();
    let pushed = sync(&store, &registry).push(&built.path).await.unwrap();
    assert_eq!(pushed.skipped, 0);

    let fresh = ws.store("fresh");
    let pulled = sync(&fresh, &registry).pull(&built.path).await.unwrap();
    assert_eq!(pulled.index_digest, pushed.index_digest);
    assert_eq!(pulled.skipped, 0);

    let (manifest, _) = fresh.read_manifest(&built.path).unwrap();
    assert_eq!(manifest.config.family, "llama");
    assert_eq!(manifest.weights.format, "safetensors");
    assert_eq!(manifest, built.manifest);

    let out = ws.tmp.path().join("out");
    let report = unpack(&fresh, &manifest, &out).unwrap();
    assert_eq!(report.layers, 4);

    assert_same_file(&ws.context.join("model.safetensors"), &out.join("model.safetensors"));
    assert_same_file(&ws.context.join("LICENSE.md"), &out.join("LICENSE"));
    assert_same_file(
        &ws.context.join("tokenizer/vocab.json"),
        &out.join("vocab.json"),
    );
    assert_same_file(
        &ws.context.join("tokenizer/merges.txt"),
        &out.join("merges.txt"),
    );
    assert_eq!(
        fs::read_to_string(out.join("DESCRIPTION")).unwrap(),
        "Foo is a test model.\nIt has two lines."
    );
}

#[tokio::test]
async fn test_rebuild_is_deterministic_and_deduplicated() {
    let ws = Workspace::new();
    let store = ws.store("local");
    let recipe = Recipe::parse(RECIPE).unwrap();
    let builder = ws.builder(&store, Compression::None);

    let first = builder.build(&recipe, None).await.unwrap();
    let second = builder.build(&recipe, None).await.unwrap();

    assert_eq!(first.written, 4);
    assert_eq!(second.written, 0);
    assert_eq!(second.deduplicated, 4);
    let first_digests: Vec<_> = first.manifest.layers().map(|d| d.digest.clone()).collect();
    let second_digests: Vec<_> = second.manifest.layers().map(|d| d.digest.clone()).collect();
    assert_eq!(first_digests, second_digests);
    assert_eq!(store.list_manifests().unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_push_uploads_nothing() {
    let ws = Workspace::new();
    let store = ws.store("local");
    let recipe = Recipe::parse(RECIPE).unwrap();
    let built = ws
        .builder(&store, Compression::None)
        .build(&recipe, None)
        .await
        .unwrap();

    let registry = InMemoryRegistry::new();
    let sync = sync(&store, &registry);
    sync.push(&built.path).await.unwrap();
    let uploads = registry.upload_count();

    let again = sync.push(&built.path).await.unwrap();
    assert_eq!(registry.upload_count(), uploads);
    assert_eq!(again.bytes, 0);
}

#[tokio::test]
async fn test_build_from_pulled_base() {
    let ws = Workspace::new();
    let upstream = ws.store("upstream");
    let base = ws
        .builder(&upstream, Compression::None)
        .build(&Recipe::parse(RECIPE).unwrap(), None)
        .await
        .unwrap();

    let registry = InMemoryRegistry::new();
    sync(&upstream, &registry).push(&base.path).await.unwrap();

    fs::write(ws.context.join("adapter.bin"), b"lora").unwrap();
    let child = Recipe::parse(
        "from registry.local/acme/foo:v1\nname foo-lora\nweights adapter.bin\n",
    )
    .unwrap();
    let target = ModelPath::parse("registry.local/acme/foo-lora:v1").unwrap();

    let local = ws.store("local");
    let built = ws
        .builder(&local, Compression::None)
        .with_sync(sync(&local, &registry))
        .build(&child, Some(&target))
        .await
        .unwrap();

    assert_eq!(built.manifest.config.name, "foo-lora");
    assert_eq!(built.manifest.config.family, "llama");
    assert_eq!(built.manifest.weights.file.len(), 2);
    assert_eq!(built.written, 1);
    assert!(local.read_manifest(&base.path).is_ok());
    assert!(local.read_manifest(&target).is_ok());
}

#[tokio::test]
async fn test_build_from_base_with_missing_blob_fails() {
    let ws = Workspace::new();
    fs::write(ws.context.join("w.bin"), b"base weights").unwrap();
    fs::write(ws.context.join("x.bin"), b"extra weights").unwrap();

    let store = ws.store("store");
    let base = ws
        .builder(&store, Compression::None)
        .build(
            &Recipe::parse("create r.local/a/base:v1\nweights w.bin\n").unwrap(),
            None,
        )
        .await
        .unwrap();
    let lost = base.manifest.weights.file[0].digest.clone();
    fs::remove_file(store.blob_path(&lost).unwrap()).unwrap();

    let blob_count = || fs::read_dir(store.root().join("blobs/sha256")).unwrap().count();
    let before = blob_count();

    let child = Recipe::parse("from r.local/a/base:v1\nweights x.bin\n").unwrap();
    let target = ModelPath::parse("r.local/a/child:v1").unwrap();
    let err = ws
        .builder(&store, Compression::None)
        .build(&child, Some(&target))
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::NotFound(_)), "{}", err);
    assert!(err.to_string().contains(&lost.to_string()));
    assert!(store.read_manifest(&target).is_err());
    assert_eq!(blob_count(), before);
}
