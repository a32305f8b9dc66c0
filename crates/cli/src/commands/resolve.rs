//! `resolve` command.
//!
//! Resolves every URL concurrently, duplicates included, and reports for each
//! one the key, the serving tier and the decoded size. With `--passes` the list
//! is resolved again, optionally after clearing the memory tier, which shows
//! the disk tier taking over.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use pixstash_client::{DefaultImageCache, ImageCodec, build_cache};
use pixstash_core::cache::CacheStatsSnapshot;
use pixstash_core::{AppConfig, Codec, Error, ImageRequest, Resolution};
use serde::Serialize;

use super::ErrorOutput;

type Artifact = <ImageCodec as Codec>::Artifact;

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Image URLs; repeated URLs are resolved once per occurrence
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Target width in pixels; scaling applies only when both sides are positive
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub width: i32,

    /// Target height in pixels
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub height: i32,

    /// Write each decoded image into this directory, named by cache key
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Resolve the whole list this many times
    #[arg(long, default_value_t = 1)]
    pub passes: usize,

    /// Clear the memory tier between passes
    #[arg(long)]
    pub clear_between: bool,
}

/// Result for one URL.
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutput {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorOutput>,
}

impl ItemOutput {
    fn failed(url: String, err: &Error) -> Self {
        Self { url, key: None, tier: None, width: None, height: None, saved: None, error: Some(err.into()) }
    }
}

/// Output from the resolve command.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutput {
    pub passes: Vec<Vec<ItemOutput>>,
    pub stats: CacheStatsSnapshot,
}

pub async fn run(config: &AppConfig, args: ResolveArgs) -> anyhow::Result<serde_json::Value> {
    let cache = build_cache(config)?;
    let output = resolve_impl(&cache, &args).await;
    Ok(serde_json::to_value(output)?)
}

pub async fn resolve_impl(cache: &Arc<DefaultImageCache>, args: &ResolveArgs) -> ResolveOutput {
    let mut passes = Vec::with_capacity(args.passes);

    for pass in 0..args.passes {
        if pass > 0 && args.clear_between {
            cache.clear_memory_cache();
        }

        let handles: Vec<_> = args
            .urls
            .iter()
            .map(|url| cache.spawn_resolve(ImageRequest::new(url.as_str()).with_scale(args.width, args.height)))
            .collect();

        let mut items = Vec::with_capacity(handles.len());
        for (url, handle) in args.urls.iter().zip(handles) {
            let item = match handle.await {
                Ok(resolution) => describe(cache, url.clone(), resolution, args.out_dir.as_deref()).await,
                Err(err) => ItemOutput::failed(url.clone(), &err),
            };
            items.push(item);
        }

        tracing::info!(pass, items = items.len(), "resolve pass finished");
        passes.push(items);
    }

    ResolveOutput { passes, stats: cache.stats() }
}

async fn describe(
    cache: &Arc<DefaultImageCache>, url: String, resolution: Resolution<Artifact>, out_dir: Option<&Path>,
) -> ItemOutput {
    let mut item = ItemOutput {
        url,
        key: Some(resolution.key.to_string()),
        tier: Some(resolution.tier.as_str()),
        width: Some(resolution.artifact.width()),
        height: Some(resolution.artifact.height()),
        saved: None,
        error: None,
    };

    if let Some(dir) = out_dir {
        match save(cache, &resolution, dir).await {
            Ok(path) => item.saved = Some(path),
            Err(err) => item.error = Some((&err).into()),
        }
    }

    item
}

async fn save(
    cache: &Arc<DefaultImageCache>, resolution: &Resolution<Artifact>, dir: &Path,
) -> Result<PathBuf, Error> {
    let encode = cache.options().encode;
    let path = dir.join(format!("{}.{}", resolution.key, encode.format.extension()));

    let owner = Arc::clone(cache);
    let artifact = Arc::clone(&resolution.artifact);
    let bytes = tokio::task::spawn_blocking(move || owner.codec().encode(&artifact, &encode)).await??;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| Error::io(format!("failed to write {}", path.display()), e))?;

    Ok(path)
}
