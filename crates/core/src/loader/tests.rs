use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::*;
use crate::cache::ClearObserver;
use crate::request::canonicalize;

/// Fake artifact: just the decoded dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Sprite {
    width: u32,
    height: u32,
}

/// Fake codec over the text format `"<width>x<height>"`.
#[derive(Default)]
struct TextCodec {
    decodes: AtomicUsize,
    encodes: AtomicUsize,
    last_sample: AtomicUsize,
}

impl TextCodec {
    fn parse(bytes: &[u8]) -> Result<(u32, u32), Error> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::DecodeFailed(e.to_string()))?;
        let (w, h) = text.split_once('x').ok_or_else(|| Error::DecodeFailed(format!("not an image: {text}")))?;
        let parse = |s: &str| s.parse::<u32>().map_err(|e| Error::DecodeFailed(e.to_string()));
        Ok((parse(w)?, parse(h)?))
    }
}

impl Codec for TextCodec {
    type Artifact = Sprite;

    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), Error> {
        Self::parse(bytes)
    }

    fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<Sprite, Error> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.last_sample.store(options.sample_size as usize, Ordering::SeqCst);
        let (width, height) = Self::parse(bytes)?;
        Ok(Sprite { width: width / options.sample_size, height: height / options.sample_size })
    }

    fn encode(&self, artifact: &Sprite, _options: &EncodeOptions) -> Result<Vec<u8>, Error> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}x{}", artifact.width, artifact.height).into_bytes())
    }
}

/// Fake fetcher serving canned bodies by URL.
#[derive(Default)]
struct FakeFetcher {
    bodies: Mutex<HashMap<String, Bytes>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeFetcher {
    fn with(bodies: &[(&str, &str)]) -> Self {
        let fetcher = Self::default();
        for (url, body) in bodies {
            fetcher.set(url, body);
        }
        fetcher
    }

    fn set(&self, url: &str, body: &str) {
        let url = canonicalize(url).unwrap().to_string();
        self.bodies.lock().unwrap().insert(url, Bytes::from(body.to_string()));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.bodies
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| Error::HttpError("status 404".into()))
    }
}

const IMG: &str = "https://example.com/photo.jpg";

struct Harness {
    _dir: TempDir,
    fetcher: Arc<FakeFetcher>,
    codec: Arc<TextCodec>,
    cache: Arc<ImageCache<TextCodec>>,
}

fn harness(fetcher: FakeFetcher, options: LoaderOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    harness_at(dir, "images", fetcher, options)
}

fn harness_at(dir: TempDir, sub: &str, fetcher: FakeFetcher, options: LoaderOptions) -> Harness {
    let fetcher = Arc::new(fetcher);
    let codec = Arc::new(TextCodec::default());
    let disk = DiskStore::new(dir.path().join(sub));
    let cache = Arc::new(ImageCache::new(disk, fetcher.clone(), codec.clone(), options));
    Harness { _dir: dir, fetcher, codec, cache }
}

fn key_for(url: &str, w: i32, h: i32) -> CacheKey {
    derive_key(&canonicalize(url).unwrap(), Scale::from_dimensions(w, h))
}

#[tokio::test]
async fn test_first_resolve_fetches_and_populates_both_tiers() {
    let h = harness(FakeFetcher::with(&[(IMG, "640x480")]), LoaderOptions::default());

    let resolved = h.cache.resolve_with_tier(&ImageRequest::new(IMG)).await.unwrap();
    assert_eq!(resolved.tier, Tier::Network);
    assert_eq!(*resolved.artifact, Sprite { width: 640, height: 480 });

    let key = key_for(IMG, -1, -1);
    assert_eq!(resolved.key, key);
    assert!(h.cache.memory().contains(&key));
    assert_eq!(h.cache.disk().read(&key).await.unwrap(), b"640x480");
    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(h.codec.encodes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_memory_hit_skips_disk_and_fetcher() {
    let h = harness(FakeFetcher::with(&[(IMG, "640x480")]), LoaderOptions::default());
    let request = ImageRequest::new(IMG);
    let first = h.cache.resolve(&request).await.unwrap();

    // Corrupt the disk copy: a memory hit must not read it.
    let key = key_for(IMG, -1, -1);
    std::fs::write(h.cache.disk().path_for(&key), b"garbage").unwrap();

    for _ in 0..5 {
        let again = h.cache.resolve_with_tier(&request).await.unwrap();
        assert_eq!(again.tier, Tier::Memory);
        assert!(Arc::ptr_eq(&again.artifact, &first));
    }

    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(h.codec.decodes.load(Ordering::SeqCst), 1);
    let stats = h.cache.stats();
    assert_eq!(stats.memory_hits, 5);
    assert_eq!(stats.disk_read_failures, 0);
}

#[tokio::test]
async fn test_clear_memory_falls_back_to_disk() {
    let h = harness(FakeFetcher::with(&[(IMG, "640x480")]), LoaderOptions::default());
    let request = ImageRequest::new(IMG);
    let first = h.cache.resolve(&request).await.unwrap();

    h.cache.clear_memory_cache();
    assert!(h.cache.memory().is_empty());

    let again = h.cache.resolve_with_tier(&request).await.unwrap();
    assert_eq!(again.tier, Tier::Disk);
    assert_eq!(*again.artifact, *first);
    assert_eq!(h.fetcher.calls(), 1);
    assert!(h.cache.memory().contains(&again.key));

    let third = h.cache.resolve_with_tier(&request).await.unwrap();
    assert_eq!(third.tier, Tier::Memory);
}

#[tokio::test]
async fn test_disk_tier_survives_new_cache_instance() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("images");
    let first = harness_at(dir, "images", FakeFetcher::with(&[(IMG, "64x64")]), LoaderOptions::default());
    first.cache.resolve(&ImageRequest::new(IMG)).await.unwrap();

    let fetcher = Arc::new(FakeFetcher::default());
    let cache = ImageCache::new(DiskStore::new(root), fetcher.clone(), Arc::new(TextCodec::default()), LoaderOptions::default());
    let resolved = cache.resolve_with_tier(&ImageRequest::new(IMG)).await.unwrap();

    assert_eq!(resolved.tier, Tier::Disk);
    assert_eq!(*resolved.artifact, Sprite { width: 64, height: 64 });
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_empty_url_is_invalid_request() {
    let h = harness(FakeFetcher::default(), LoaderOptions::default());

    let err = h.cache.resolve(&ImageRequest::new("")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    let err = h.cache.resolve(&ImageRequest::new("ftp://example.com/a.png")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    assert_eq!(h.fetcher.calls(), 0);
    assert!(h.cache.memory().is_empty());
}

#[tokio::test]
async fn test_empty_fetch_has_no_side_effects() {
    let h = harness(FakeFetcher::with(&[(IMG, "")]), LoaderOptions::default());

    let err = h.cache.resolve(&ImageRequest::new(IMG)).await.unwrap_err();
    assert!(matches!(err, Error::EmptyResponse(_)));
    assert!(err.is_fetch_error());

    assert!(h.cache.memory().is_empty());
    assert!(!h.cache.disk().exists(&key_for(IMG, -1, -1)).await);
    assert_eq!(h.codec.decodes.load(Ordering::SeqCst), 0);
    assert_eq!(h.codec.encodes.load(Ordering::SeqCst), 0);
    assert_eq!(h.cache.stats().fetch_failures, 1);
}

#[tokio::test]
async fn test_failed_fetch_is_retried_from_scratch() {
    let h = harness(FakeFetcher::default(), LoaderOptions::default());
    let request = ImageRequest::new(IMG);

    let err = h.cache.resolve(&request).await.unwrap_err();
    assert!(matches!(err, Error::HttpError(_)));

    h.fetcher.set(IMG, "10x10");
    let resolved = h.cache.resolve_with_tier(&request).await.unwrap();
    assert_eq!(resolved.tier, Tier::Network);
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_undecodable_download_is_surfaced() {
    let h = harness(FakeFetcher::with(&[(IMG, "<html>not found</html>")]), LoaderOptions::default());

    let err = h.cache.resolve(&ImageRequest::new(IMG)).await.unwrap_err();
    assert!(matches!(err, Error::DecodeFailed(_)));
    assert!(h.cache.memory().is_empty());
    assert!(!h.cache.disk().exists(&key_for(IMG, -1, -1)).await);
    assert_eq!(h.cache.stats().decode_failures, 1);
}

#[tokio::test]
async fn test_corrupt_disk_entry_falls_through_to_fetch() {
    let h = harness(FakeFetcher::with(&[(IMG, "300x200")]), LoaderOptions::default());
    let key = key_for(IMG, -1, -1);
    h.cache.disk().write(&key, b"corrupt").await.unwrap();

    let resolved = h.cache.resolve_with_tier(&ImageRequest::new(IMG)).await.unwrap();
    assert_eq!(resolved.tier, Tier::Network);
    assert_eq!(*resolved.artifact, Sprite { width: 300, height: 200 });
    assert_eq!(h.cache.disk().read(&key).await.unwrap(), b"300x200");
    assert_eq!(h.cache.stats().disk_read_failures, 1);
}

#[tokio::test]
async fn test_unreadable_disk_entry_falls_through_to_fetch() {
    let h = harness(FakeFetcher::with(&[(IMG, "300x200")]), LoaderOptions::default());
    let key = key_for(IMG, -1, -1);
    // Present but unreadable: a directory sits where the entry file belongs.
    std::fs::create_dir_all(h.cache.disk().path_for(&key)).unwrap();
    assert!(h.cache.disk().exists(&key).await);

    let resolved = h.cache.resolve_with_tier(&ImageRequest::new(IMG)).await.unwrap();
    assert_eq!(resolved.tier, Tier::Network);
    assert_eq!(*resolved.artifact, Sprite { width: 300, height: 200 });
    assert_eq!(h.fetcher.calls(), 1);

    let stats = h.cache.stats();
    assert_eq!(stats.disk_read_failures, 1);
    assert_eq!(stats.disk_write_failures, 1);
    assert!(h.cache.memory().contains(&key));

    let again = h.cache.resolve_with_tier(&ImageRequest::new(IMG)).await.unwrap();
    assert_eq!(again.tier, Tier::Memory);
}

#[tokio::test]
async fn test_disk_write_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("blocked"), b"a file where the cache dir should be").unwrap();
    let h = harness_at(dir, "blocked", FakeFetcher::with(&[(IMG, "640x480")]), LoaderOptions::default());

    let resolved = h.cache.resolve_with_tier(&ImageRequest::new(IMG)).await.unwrap();
    assert_eq!(resolved.tier, Tier::Network);
    assert_eq!(*resolved.artifact, Sprite { width: 640, height: 480 });
    assert!(h.cache.memory().contains(&resolved.key));
    assert_eq!(h.cache.stats().disk_write_failures, 1);

    let again = h.cache.resolve_with_tier(&ImageRequest::new(IMG)).await.unwrap();
    assert_eq!(again.tier, Tier::Memory);
}

#[tokio::test]
async fn test_scale_requests_are_separate_entries() {
    let h = harness(FakeFetcher::with(&[(IMG, "1000x1000")]), LoaderOptions::default());

    let thumb = h.cache.resolve_with_tier(&ImageRequest::new(IMG).with_scale(12, 12)).await.unwrap();
    assert_eq!(h.codec.last_sample.load(Ordering::SeqCst), 64);
    assert_eq!(*thumb.artifact, Sprite { width: 15, height: 15 });

    let full = h.cache.resolve_with_tier(&ImageRequest::new(IMG)).await.unwrap();
    assert_eq!(full.tier, Tier::Network);
    assert_eq!(*full.artifact, Sprite { width: 1000, height: 1000 });
    assert_ne!(thumb.key, full.key);
    assert_eq!(h.cache.memory().len(), 2);
}

#[tokio::test]
async fn test_disk_round_trip_preserves_scaled_artifact() {
    let h = harness(FakeFetcher::with(&[(IMG, "1000x1000")]), LoaderOptions::default());
    let request = ImageRequest::new(IMG).with_scale(12, 12);
    let first = h.cache.resolve(&request).await.unwrap();

    h.cache.clear_memory_cache();
    let from_disk = h.cache.resolve_with_tier(&request).await.unwrap();

    assert_eq!(from_disk.tier, Tier::Disk);
    assert_eq!(h.codec.last_sample.load(Ordering::SeqCst), 1);
    assert_eq!(*from_disk.artifact, *first);
}

#[tokio::test]
async fn test_irrelevant_url_details_share_entry() {
    let h = harness(FakeFetcher::with(&[(IMG, "8x8")]), LoaderOptions::default());
    h.cache.resolve(&ImageRequest::new(IMG)).await.unwrap();

    let resolved = h
        .cache
        .resolve_with_tier(&ImageRequest::new("https://EXAMPLE.com/photo.jpg#hero").with_scale(40, -1))
        .await
        .unwrap();
    assert_eq!(resolved.tier, Tier::Memory);
}

#[tokio::test]
async fn test_concurrent_distinct_keys() {
    let urls: Vec<String> = (0..20).map(|i| format!("https://example.com/{i}.png")).collect();
    let bodies: Vec<(&str, &str)> = urls.iter().map(|u| (u.as_str(), "32x32")).collect();
    let h = harness(FakeFetcher::with(&bodies), LoaderOptions::default());

    let handles: Vec<_> = urls.iter().map(|u| h.cache.spawn_resolve(ImageRequest::new(u.clone()))).collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().tier, Tier::Network);
    }

    assert_eq!(h.fetcher.calls(), 20);
    assert_eq!(h.cache.memory().len(), 20);
    assert_eq!(h.cache.disk().entry_count().await.unwrap(), 20);
}

#[tokio::test]
async fn test_coalescing_fetches_once() {
    let mut fetcher = FakeFetcher::with(&[(IMG, "50x50")]);
    fetcher.delay = Some(Duration::from_millis(20));
    let options = LoaderOptions { coalesce_requests: true, ..Default::default() };
    let h = harness(fetcher, options);

    let handles: Vec<_> = (0..8).map(|_| h.cache.spawn_resolve(ImageRequest::new(IMG))).collect();
    let mut tiers = Vec::new();
    for handle in handles {
        tiers.push(handle.await.unwrap().tier);
    }

    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(tiers.iter().filter(|t| **t == Tier::Network).count(), 1);
    assert_eq!(tiers.iter().filter(|t| **t == Tier::Memory).count(), 7);
}

#[tokio::test]
async fn test_bounded_fetch_concurrency_still_completes() {
    let urls: Vec<String> = (0..6).map(|i| format!("https://example.com/{i}.png")).collect();
    let bodies: Vec<(&str, &str)> = urls.iter().map(|u| (u.as_str(), "4x4")).collect();
    let mut fetcher = FakeFetcher::with(&bodies);
    fetcher.delay = Some(Duration::from_millis(5));
    let h = harness(fetcher, LoaderOptions { fetch_concurrency: 2, ..Default::default() });

    let handles: Vec<_> = urls.iter().map(|u| h.cache.spawn_resolve(ImageRequest::new(u.clone()))).collect();
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(h.fetcher.calls(), 6);
}

#[tokio::test]
async fn test_aborted_handle_reports_internal_error() {
    let mut fetcher = FakeFetcher::with(&[(IMG, "4x4")]);
    fetcher.delay = Some(Duration::from_secs(5));
    let h = harness(fetcher, LoaderOptions::default());

    let handle = h.cache.spawn_resolve(ImageRequest::new(IMG));
    handle.abort();
    assert!(matches!(handle.await, Err(Error::Internal(_))));
}

#[tokio::test]
async fn test_load_into_delivers_completion() {
    let h = harness(FakeFetcher::with(&[(IMG, "16x9")]), LoaderOptions::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    h.cache.load_into(ConsumerId(1), ImageRequest::new(IMG), tx);
    let completion = rx.recv().await.unwrap();

    assert_eq!(completion.consumer, ConsumerId(1));
    assert_eq!(completion.request.url(), IMG);
    assert_eq!(*completion.result.unwrap().artifact, Sprite { width: 16, height: 9 });
}

#[tokio::test]
async fn test_load_into_delivers_errors() {
    let h = harness(FakeFetcher::default(), LoaderOptions::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    h.cache.load_into(ConsumerId(4), ImageRequest::new(""), tx);
    let completion = rx.recv().await.unwrap();
    assert!(matches!(completion.result, Err(Error::InvalidRequest(_))));
}

#[tokio::test]
async fn test_rebound_consumer_drops_stale_completion() {
    let slow = "https://example.com/slow.jpg";
    let mut fetcher = FakeFetcher::with(&[(slow, "100x100"), (IMG, "20x20")]);
    fetcher.delay = Some(Duration::from_millis(30));
    let h = harness(fetcher, LoaderOptions::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let stale = h.cache.load_into(ConsumerId(7), ImageRequest::new(slow), tx.clone());
    let current = h.cache.load_into(ConsumerId(7), ImageRequest::new(IMG), tx);
    assert!(!h.cache.bindings().is_current(&stale));
    assert!(h.cache.bindings().is_current(&current));

    let completion = rx.recv().await.unwrap();
    assert_eq!(completion.request.url(), IMG);
    // Both tasks have finished once every sender is dropped.
    assert!(rx.recv().await.is_none());
    // The stale load still populated the cache.
    assert!(h.cache.memory().contains(&key_for(slow, -1, -1)));
}

#[tokio::test]
async fn test_dropped_receiver_is_silent() {
    let h = harness(FakeFetcher::with(&[(IMG, "2x2")]), LoaderOptions::default());
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);

    h.cache.load_into(ConsumerId(3), ImageRequest::new(IMG), tx);
    let resolved = h.cache.spawn_resolve(ImageRequest::new(IMG)).await.unwrap();
    assert_eq!(*resolved.artifact, Sprite { width: 2, height: 2 });
}

#[tokio::test]
async fn test_clear_memory_keeps_newer_binding() {
    let slow = "https://example.com/slow.jpg";
    let mut fetcher = FakeFetcher::with(&[(slow, "100x100"), (IMG, "20x20")]);
    fetcher.delay = Some(Duration::from_millis(30));
    let h = harness(fetcher, LoaderOptions::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    h.cache.load_into(ConsumerId(7), ImageRequest::new(slow), tx.clone());
    h.cache.load_into(ConsumerId(7), ImageRequest::new(IMG), tx);
    h.cache.clear_memory_cache();

    let mut delivered = Vec::new();
    while let Some(completion) = rx.recv().await {
        delivered.push(completion.request.url().to_string());
    }
    assert_eq!(delivered, vec![IMG.to_string()]);
}

#[tokio::test]
async fn test_delivered_binding_is_released() {
    let h = harness(FakeFetcher::with(&[(IMG, "2x2")]), LoaderOptions::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    for consumer in 0..5 {
        h.cache.load_into(ConsumerId(consumer), ImageRequest::new(IMG), tx.clone());
    }
    drop(tx);

    let mut count = 0;
    while rx.recv().await.is_some() {
        count += 1;
    }
    assert_eq!(count, 5);
    assert!(h.cache.bindings().is_empty());
}

#[derive(Default)]
struct CountingObserver(AtomicUsize);

impl ClearObserver for CountingObserver {
    fn on_clear(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_clear_observer_is_notified() {
    let dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(CountingObserver::default());
    let cache = ImageCache::new(
        DiskStore::new(dir.path()),
        Arc::new(FakeFetcher::with(&[(IMG, "4x4")])),
        Arc::new(TextCodec::default()),
        LoaderOptions::default(),
    )
    .with_clear_observer(observer.clone());

    cache.resolve(&ImageRequest::new(IMG)).await.unwrap();
    cache.clear_memory_cache();
    cache.clear_memory_cache();

    assert_eq!(observer.0.load(Ordering::SeqCst), 2);
    assert!(cache.memory().is_empty());
}
