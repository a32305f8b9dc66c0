//! The two-tier image cache.
//!
//! [`ImageCache`] resolves an [`ImageRequest`] by consulting, in order:
//!
//! 1. the memory tier (no I/O at all),
//! 2. the disk tier (read, decode, promote to memory),
//! 3. the network (fetch, decode, persist to disk, then memory).
//!
//! Failures that a slower tier can recover from are logged and masked: a
//! vanished or corrupt disk entry falls through to a re-fetch, and a failed
//! disk write still returns the artifact. Fetch failures and undecodable
//! downloads are returned to the caller and leave both tiers untouched.

mod delivery;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::Semaphore;
use url::Url;

pub use delivery::{BindingRegistry, Completion, ConsumerId, ResolveHandle, Ticket};

use crate::Error;
use crate::cache::{
    CacheKey, CacheStats, CacheStatsSnapshot, ClearObserver, DiskStore, KeyLocks, MemoryStore, derive_key, sample_size,
};
use crate::codec::{Codec, DecodeOptions, EncodeOptions};
use crate::config::AppConfig;
use crate::fetch::Fetcher;
use crate::request::{ImageRequest, Scale};

/// Which tier satisfied a resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Memory,
    Disk,
    Network,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::Disk => "disk",
            Tier::Network => "network",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved artifact and the tier it came from.
#[derive(Debug)]
pub struct Resolution<A> {
    pub key: CacheKey,
    pub artifact: Arc<A>,
    pub tier: Tier,
}

/// Orchestrator tuning.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Format and quality used for the disk tier.
    pub encode: EncodeOptions,
    /// Maximum simultaneous network fetches; 0 means unbounded.
    pub fetch_concurrency: usize,
    /// Run at most one resolve per key at a time.
    pub coalesce_requests: bool,
}

impl From<&AppConfig> for LoaderOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            encode: config.encode_options(),
            fetch_concurrency: config.fetch_concurrency,
            coalesce_requests: config.coalesce_requests,
        }
    }
}

/// Two-tier (memory + disk) cache in front of a fetcher and a codec.
///
/// Construct one per process (or per scope that should share cached images)
/// and share it through `Arc`. It is the only writer of both tiers.
pub struct ImageCache<C: Codec> {
    memory: MemoryStore<C::Artifact>,
    disk: DiskStore,
    fetcher: Arc<dyn Fetcher>,
    codec: Arc<C>,
    options: LoaderOptions,
    fetch_permits: Option<Semaphore>,
    locks: KeyLocks,
    bindings: BindingRegistry,
    stats: CacheStats,
}

impl<C: Codec> ImageCache<C> {
    pub fn new(disk: DiskStore, fetcher: Arc<dyn Fetcher>, codec: Arc<C>, options: LoaderOptions) -> Self {
        let fetch_permits = (options.fetch_concurrency > 0).then(|| Semaphore::new(options.fetch_concurrency));

        Self {
            memory: MemoryStore::new(),
            disk,
            fetcher,
            codec,
            options,
            fetch_permits,
            locks: KeyLocks::new(),
            bindings: BindingRegistry::new(),
            stats: CacheStats::new(),
        }
    }

    /// Notify `observer` after every [`clear_memory_cache`](Self::clear_memory_cache),
    /// e.g. to reset bookkeeping of which consumers display which image.
    pub fn with_clear_observer(mut self, observer: Arc<dyn ClearObserver>) -> Self {
        self.memory = MemoryStore::with_observer(observer);
        self
    }

    pub fn memory(&self) -> &MemoryStore<C::Artifact> {
        &self.memory
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn bindings(&self) -> &BindingRegistry {
        &self.bindings
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Drop every memory-tier entry and notify the clear observer, if any.
    ///
    /// Artifacts already handed out stay valid, and pending consumer bindings
    /// are kept, so a superseded load is still never delivered. The disk tier is untouched, so
    /// the next resolve of a cleared key is served from disk.
    pub fn clear_memory_cache(&self) {
        let entries = self.memory.len();
        self.memory.clear_all();
        tracing::debug!(entries, "cleared memory cache");
    }

    /// Resolve `request` to a decoded artifact.
    pub async fn resolve(&self, request: &ImageRequest) -> Result<Arc<C::Artifact>, Error> {
        self.resolve_with_tier(request).await.map(|resolution| resolution.artifact)
    }

    /// Resolve `request`, also reporting the key and the serving tier.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidRequest` for an empty or malformed URL
    /// - a fetch-family error when the network fetch fails or is empty
    /// - `Error::DecodeFailed` when a fresh download cannot be decoded
    pub async fn resolve_with_tier(&self, request: &ImageRequest) -> Result<Resolution<C::Artifact>, Error> {
        let url = request.canonical_url()?;
        let scale = request.scale();
        let key = derive_key(&url, scale);

        if let Some(artifact) = self.memory_hit(&key) {
            return Ok(Resolution { key, artifact, tier: Tier::Memory });
        }

        let _guard = if self.options.coalesce_requests { Some(self.locks.acquire(&key).await) } else { None };
        if self.options.coalesce_requests
            && let Some(artifact) = self.memory_hit(&key)
        {
            return Ok(Resolution { key, artifact, tier: Tier::Memory });
        }

        if let Some(artifact) = self.load_from_disk(&key, scale).await {
            self.stats.record_disk_hit();
            self.memory.put(key.clone(), artifact.clone());
            tracing::debug!(key = %key, url = %url, tier = "disk", "resolved");
            return Ok(Resolution { key, artifact, tier: Tier::Disk });
        }

        let artifact = self.load_from_network(&url, scale).await?;
        self.persist(&key, &artifact).await;
        self.memory.put(key.clone(), artifact.clone());
        tracing::debug!(key = %key, url = %url, tier = "network", "resolved");

        Ok(Resolution { key, artifact, tier: Tier::Network })
    }

    fn memory_hit(&self, key: &CacheKey) -> Option<Arc<C::Artifact>> {
        let artifact = self.memory.get(key)?;
        self.stats.record_memory_hit();
        tracing::trace!(key = %key, tier = "memory", "resolved");
        Some(artifact)
    }

    /// Read and decode the disk entry; any failure counts as a miss.
    async fn load_from_disk(&self, key: &CacheKey, scale: Scale) -> Option<Arc<C::Artifact>> {
        if !self.disk.exists(key).await {
            return None;
        }

        let bytes = match self.disk.read(key).await {
            Ok(bytes) => bytes,
            Err(error) => {
                self.stats.record_disk_read_failure();
                tracing::warn!(key = %key, %error, "disk entry unreadable, refetching");
                return None;
            }
        };

        match self.decode(bytes, scale).await {
            Ok(artifact) => Some(artifact),
            Err(error) => {
                self.stats.record_disk_read_failure();
                tracing::warn!(key = %key, %error, "disk entry undecodable, refetching");
                None
            }
        }
    }

    async fn load_from_network(&self, url: &Url, scale: Scale) -> Result<Arc<C::Artifact>, Error> {
        let bytes = match self.fetch(url).await {
            Ok(bytes) => bytes,
            Err(error) => {
                self.stats.record_fetch_failure();
                tracing::debug!(url = %url, %error, "fetch failed");
                return Err(error);
            }
        };
        self.stats.record_network_fetch();

        self.decode(bytes, scale).await.inspect_err(|error| {
            self.stats.record_decode_failure();
            tracing::debug!(url = %url, %error, "downloaded image undecodable");
        })
    }

    async fn fetch(&self, url: &Url) -> Result<bytes::Bytes, Error> {
        let _permit = match &self.fetch_permits {
            Some(permits) => Some(
                permits
                    .acquire()
                    .await
                    .map_err(|e| Error::Internal(format!("fetch limiter closed: {e}")))?,
            ),
            None => None,
        };

        let bytes = self.fetcher.fetch(url).await?;
        if bytes.is_empty() {
            return Err(Error::EmptyResponse(url.to_string()));
        }
        Ok(bytes)
    }

    /// Probe dimensions, pick a sample size, and decode on the blocking pool.
    async fn decode<B>(&self, bytes: B, scale: Scale) -> Result<Arc<C::Artifact>, Error>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let codec = Arc::clone(&self.codec);
        let artifact = tokio::task::spawn_blocking(move || {
            let bytes = bytes.as_ref();
            let (width, height) = codec.dimensions(bytes)?;
            let options = DecodeOptions { sample_size: sample_size(width, height, scale) };
            codec.decode(bytes, &options)
        })
        .await??;

        Ok(Arc::new(artifact))
    }

    /// Encode and write to disk; failures are logged and swallowed.
    async fn persist(&self, key: &CacheKey, artifact: &Arc<C::Artifact>) {
        let codec = Arc::clone(&self.codec);
        let artifact = Arc::clone(artifact);
        let encode = self.options.encode;

        let encoded = tokio::task::spawn_blocking(move || codec.encode(&artifact, &encode))
            .await
            .map_err(Error::from)
            .and_then(|result| result);

        let result = match encoded {
            Ok(bytes) => self.disk.write(key, &bytes).await,
            Err(error) => Err(error),
        };

        if let Err(error) = result {
            self.stats.record_disk_write_failure();
            tracing::warn!(key = %key, %error, "failed to persist image to disk cache");
        }
    }
}

impl<C: Codec> std::fmt::Debug for ImageCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
