//! Concrete network and image backends for pixstash.
//!
//! This crate provides the reqwest fetcher and the `image`-crate codec that
//! plug into [`pixstash_core::ImageCache`], plus a constructor wiring both
//! from an [`AppConfig`].

pub mod codec;
pub mod fetch;

use std::sync::Arc;

use pixstash_core::{AppConfig, DiskStore, Error, ImageCache, LoaderOptions};

pub use codec::ImageCodec;
pub use fetch::{FetchConfig, HttpFetcher};

/// The cache type used by applications: HTTP fetches, `image` decoding.
pub type DefaultImageCache = ImageCache<ImageCodec>;

/// Build a ready-to-share cache from configuration.
pub fn build_cache(config: &AppConfig) -> Result<Arc<DefaultImageCache>, Error> {
    let fetcher = HttpFetcher::new(FetchConfig::from(config))?;
    let disk = DiskStore::new(config.cache_dir.clone());

    tracing::debug!(
        cache_dir = %config.cache_dir.display(),
        format = ?config.encode_format,
        fetch_concurrency = config.fetch_concurrency,
        coalesce = config.coalesce_requests,
        "building image cache"
    );

    Ok(Arc::new(ImageCache::new(
        disk,
        Arc::new(fetcher),
        Arc::new(ImageCodec::new()),
        LoaderOptions::from(config),
    )))
}
