use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::config::CacheConfig;
use crate::utils::image::{self, AssetBuffer};

/// Validated asset identifier, the key of the cache registry.
///
/// Identifiers name files in the catalog and disk cache, so path
/// separators and traversal components are rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetId(String);

impl AssetId {
    pub fn parse(raw: &str) -> Result<AssetId, Error> {
        if raw.is_empty() {
            return Err(Error::msg("asset identifier must not be empty"));
        }
        if raw == "." || raw == ".." || raw.contains(['/', '\\']) {
            return Err(Error::msg(format!("invalid asset identifier: {raw}")));
        }
        Ok(AssetId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub struct AssetCacheEntry {
    pub id: AssetId,
    pub buffer: Arc<AssetBuffer>,
    pub origin: AssetOrigin,
    pub disk_path: PathBuf,
}

/// Seam for the remote asset transport, injected so resolution can be
/// exercised without a network.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;
}

/// Production fetcher backed by a reqwest client with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpFetcher { client })
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, Error>> + Send {
        let request = self.client.get(url);
        async move {
            let response = request.send().await?.error_for_status()?;
            Ok(response.bytes().await?.to_vec())
        }
    }
}

/// Two-tier (memory, disk) asset cache shared by all sessions.
///
/// Reads of an already-populated entry never block each other; the miss
/// path is serialized by one async mutex, which collapses concurrent
/// resolutions of the same uncached identifier into a single
/// download/decode at the cost of throughput across distinct identifiers.
pub struct AssetCacheManager<F = HttpFetcher> {
    entries: RwLock<HashMap<AssetId, Arc<AssetCacheEntry>>>,
    resolve_lock: Mutex<()>,
    cache_dir: PathBuf,
    max_dimension: i32,
    fetcher: F,
}

impl AssetCacheManager<HttpFetcher> {
    pub fn new(config: &CacheConfig) -> Result<Self, Error> {
        let fetcher = HttpFetcher::new(Duration::from_secs(config.fetch_timeout))?;
        Ok(AssetCacheManager::with_fetcher(config, fetcher))
    }
}

impl<F: AssetFetcher> AssetCacheManager<F> {
    pub fn with_fetcher(config: &CacheConfig, fetcher: F) -> Self {
        AssetCacheManager {
            entries: RwLock::new(HashMap::new()),
            resolve_lock: Mutex::new(()),
            cache_dir: config.cache_dir.clone(),
            max_dimension: config.max_dimension,
            fetcher,
        }
    }

    /// Memory-tier lookup only, for the per-frame compositing path.
    pub async fn get(&self, id: &AssetId) -> Option<Arc<AssetBuffer>> {
        self.entries.read().await.get(id).map(|e| e.buffer.clone())
    }

    /// Resolves an identifier through memory, disk, then the optional
    /// remote source. Every failure mode (absent file, corrupt bytes,
    /// transport error) yields `None` without poisoning the entry, so a
    /// later resolution may retry.
    pub async fn resolve(
        &self,
        id: &AssetId,
        remote_source: Option<&str>,
    ) -> Option<Arc<AssetBuffer>> {
        if let Some(buffer) = self.get(id).await {
            return Some(buffer);
        }

        // Single-flight: the first caller populates the entry, later
        // callers re-check memory once the lock is theirs.
        let _guard = self.resolve_lock.lock().await;
        if let Some(buffer) = self.get(id).await {
            return Some(buffer);
        }

        let disk_path = self.disk_path(id);
        if let Ok(bytes) = tokio::fs::read(&disk_path).await {
            match image::decode_asset(&bytes, self.max_dimension) {
                Ok(buffer) => {
                    debug!(asset = %id, "asset resolved from disk cache");
                    return Some(
                        self.insert(id.clone(), buffer, AssetOrigin::Local, disk_path).await,
                    );
                }
                Err(err) => {
                    warn!(asset = %id, error = %err, "discarding corrupt disk cache entry");
                }
            }
        }

        let url = match remote_source {
            Some(url) => url,
            None => {
                debug!(asset = %id, "asset not found and no remote source given");
                return None;
            }
        };

        let bytes = match self.fetcher.fetch(url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(asset = %id, url, error = %err, "remote asset fetch failed");
                return None;
            }
        };
        let buffer = match image::decode_asset(&bytes, self.max_dimension) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!(asset = %id, url, error = %err, "remote asset decode failed");
                return None;
            }
        };

        if let Err(err) = self.persist(&disk_path, &buffer).await {
            warn!(asset = %id, error = %err, "failed to persist asset to disk cache");
        }
        Some(self.insert(id.clone(), buffer, AssetOrigin::Remote, disk_path).await)
    }

    /// Loads a catalog file straight into the memory tier.
    pub async fn insert_local(&self, id: &AssetId, path: &Path) -> Result<Arc<AssetBuffer>, Error> {
        let bytes = tokio::fs::read(path).await?;
        let buffer = image::decode_asset(&bytes, self.max_dimension)?;
        Ok(self
            .insert(id.clone(), buffer, AssetOrigin::Local, path.to_path_buf())
            .await)
    }

    /// Eagerly loads every image under the catalog root (one directory per
    /// category) and verifies that the configured fallback assets are
    /// present. A missing or undecodable fallback set is fatal.
    pub async fn preload(&self, config: &CacheConfig) -> Result<(), Error> {
        let mut categories = tokio::fs::read_dir(&config.assets_dir).await?;
        let mut loaded = 0usize;
        while let Some(category) = categories.next_entry().await? {
            if !category.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(category.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase());
                if !matches!(ext.as_deref(), Some("png" | "jpg" | "jpeg")) {
                    continue;
                }
                let stem = match path.file_stem().and_then(|s| s.to_str()) {
                    Some(stem) => stem,
                    None => continue,
                };
                let id = match AssetId::parse(stem) {
                    Ok(id) => id,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping asset with invalid name");
                        continue;
                    }
                };
                match self.insert_local(&id, &path).await {
                    Ok(_) => loaded += 1,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping undecodable asset");
                    }
                }
            }
        }
        info!(loaded, root = %config.assets_dir.display(), "asset catalog preloaded");

        let mut required: Vec<&str> = config.preload_assets.iter().map(String::as_str).collect();
        if !required.contains(&config.default_asset.as_str()) {
            required.push(&config.default_asset);
        }
        for name in required {
            let id = AssetId::parse(name)?;
            if self.get(&id).await.is_none() {
                return Err(Error::msg(format!("no usable default asset: {name}")));
            }
        }
        Ok(())
    }

    fn disk_path(&self, id: &AssetId) -> PathBuf {
        self.cache_dir.join(format!("{}.png", id.as_str()))
    }

    async fn persist(&self, path: &Path, buffer: &AssetBuffer) -> Result<(), Error> {
        let bytes = image::encode_png(buffer)?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn insert(
        &self,
        id: AssetId,
        buffer: AssetBuffer,
        origin: AssetOrigin,
        disk_path: PathBuf,
    ) -> Arc<AssetBuffer> {
        let buffer = Arc::new(buffer);
        let entry = Arc::new(AssetCacheEntry {
            id: id.clone(),
            buffer: buffer.clone(),
            origin,
            disk_path,
        });
        self.entries.write().await.insert(id, entry);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use opencv::core::{Mat, Scalar, CV_8UC4};

    fn asset_png_bytes() -> Vec<u8> {
        let mat = Mat::new_rows_cols_with_default(
            16,
            24,
            CV_8UC4,
            Scalar::new(10.0, 20.0, 30.0, 255.0),
        )
        .unwrap();
        let buffer = AssetBuffer::from_mat(&mat).unwrap();
        image::encode_png(&buffer).unwrap()
    }

    fn test_config(dir: &Path) -> CacheConfig {
        CacheConfig {
            cache_dir: dir.join("cache"),
            assets_dir: dir.join("frames"),
            ..CacheConfig::new()
        }
    }

    /// Counts fetches and waits before returning, so overlapping
    /// resolutions can be observed.
    struct SlowFetcher {
        calls: AtomicUsize,
        bytes: Vec<u8>,
    }

    impl SlowFetcher {
        fn new(bytes: Vec<u8>) -> Self {
            SlowFetcher { calls: AtomicUsize::new(0), bytes }
        }
    }

    impl AssetFetcher for SlowFetcher {
        fn fetch(&self, _url: &str) -> impl std::future::Future<Output = Result<Vec<u8>, Error>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bytes = self.bytes.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(bytes)
            }
        }
    }

    struct FailingFetcher;

    impl AssetFetcher for FailingFetcher {
        fn fetch(&self, _url: &str) -> impl std::future::Future<Output = Result<Vec<u8>, Error>> + Send {
            async { Err(Error::msg("connection refused")) }
        }
    }

    #[test]
    fn test_asset_id_validation() {
        assert!(AssetId::parse("aviator-classic_2").is_ok());
        assert!(AssetId::parse("").is_err());
        assert!(AssetId::parse("a/b").is_err());
        assert!(AssetId::parse("..").is_err());
    }

    #[tokio::test]
    async fn test_resolve_unknown_without_remote_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCacheManager::with_fetcher(&test_config(dir.path()), FailingFetcher);
        let id = AssetId::parse("missing").unwrap();
        assert!(cache.resolve(&id, None).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_collapses_concurrent_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(AssetCacheManager::with_fetcher(
            &test_config(dir.path()),
            SlowFetcher::new(asset_png_bytes()),
        ));
        let id = AssetId::parse("shared").unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                cache.resolve(&id, Some("http://example.test/shared.png")).await
            }));
        }

        let mut buffers = Vec::new();
        for handle in handles {
            buffers.push(handle.await.unwrap().expect("resolution failed"));
        }

        assert_eq!(cache.fetcher.calls.load(Ordering::SeqCst), 1);
        for buffer in &buffers[1..] {
            assert!(Arc::ptr_eq(&buffers[0], buffer));
        }
    }

    #[tokio::test]
    async fn test_idempotent_resolution_never_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCacheManager::with_fetcher(
            &test_config(dir.path()),
            SlowFetcher::new(asset_png_bytes()),
        );
        let id = AssetId::parse("once").unwrap();

        let first = cache.resolve(&id, Some("http://example.test/once.png")).await.unwrap();
        let second = cache.resolve(&id, Some("http://example.test/once.png")).await.unwrap();

        assert_eq!(cache.fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_poison_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCacheManager::with_fetcher(
            &test_config(dir.path()),
            SlowFetcher::new(vec![0, 1, 2, 3]),
        );
        let id = AssetId::parse("corrupt").unwrap();

        assert!(cache.resolve(&id, Some("http://example.test/corrupt.png")).await.is_none());
        // The identifier stays resolvable, a retry fetches again.
        assert!(cache.resolve(&id, Some("http://example.test/corrupt.png")).await.is_none());
        assert_eq!(cache.fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCacheManager::with_fetcher(&test_config(dir.path()), FailingFetcher);
        let id = AssetId::parse("unreachable").unwrap();
        assert!(cache.resolve(&id, Some("http://example.test/x.png")).await.is_none());
    }

    #[tokio::test]
    async fn test_disk_tier_survives_process_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let id = AssetId::parse("persisted").unwrap();

        let first = AssetCacheManager::with_fetcher(&config, SlowFetcher::new(asset_png_bytes()));
        let original = first.resolve(&id, Some("http://example.test/p.png")).await.unwrap();

        // A fresh manager with no remote source finds the disk entry.
        let second = AssetCacheManager::with_fetcher(&config, FailingFetcher);
        let restored = second.resolve(&id, None).await.unwrap();
        assert_eq!(*original, *restored);
    }

    #[tokio::test]
    async fn test_preload_loads_catalog_and_requires_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let category = config.assets_dir.join("sunglasses");
        std::fs::create_dir_all(&category).unwrap();
        std::fs::write(category.join("sunglasses.png"), asset_png_bytes()).unwrap();
        std::fs::write(category.join("notes.txt"), b"not an image").unwrap();

        let cache = AssetCacheManager::with_fetcher(&config, FailingFetcher);
        cache.preload(&config).await.unwrap();
        let id = AssetId::parse("sunglasses").unwrap();
        assert!(cache.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_preload_fails_without_default_asset() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.assets_dir).unwrap();

        let cache = AssetCacheManager::with_fetcher(&config, FailingFetcher);
        assert!(cache.preload(&config).await.is_err());
    }
}
