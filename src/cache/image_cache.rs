use crate::cache::disk::DiskLayout;
use crate::config::{CacheConfig, Preset};
use crate::transform::{ImageResizer, ResizeJob, Resizer};
use crate::{PresetCacheError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Outcome of a single lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// A file already sits at the variant path. Its dimensions and age are
    /// not checked.
    Hit,
    /// Nothing on disk, a resize was started by this call.
    Miss,
    /// This cache is still writing that variant; whatever is on disk may
    /// be incomplete.
    Pending,
}

#[derive(Debug)]
pub struct CachedImage {
    pub path: PathBuf,
    pub status: CacheStatus,
    /// Completion of the background write, only for `Miss`. Dropping it
    /// detaches the write; it keeps running.
    pub write: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    /// Misses that started a resize.
    pub misses: u64,
    /// Lookups answered while the variant was still being written.
    pub pending: u64,
    pub resizes: u64,
    pub resize_errors: u64,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    pending: AtomicU64,
    resizes: AtomicU64,
    resize_errors: AtomicU64,
}

type InFlight = Arc<Mutex<HashSet<PathBuf>>>;

/// Removes a variant path from the in-flight set once its write ends,
/// whether the resizer returned or panicked.
struct InFlightGuard {
    set: InFlight,
    path: PathBuf,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.path);
    }
}

/// Resize-on-miss cache for named presets.
///
/// [`ImageCache::image`] returns the variant path as soon as the resize has
/// been started. The write itself runs on a background task: when it fails
/// the error is logged and counted, and the caller still holds a path that
/// may never be written. Use [`ImageCache::lookup`] to get the write handle.
pub struct ImageCache {
    config: CacheConfig,
    layout: DiskLayout,
    resizer: Arc<dyn Resizer>,
    in_flight: InFlight,
    counters: Arc<Counters>,
}

impl ImageCache {
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_resizer(config, Arc::new(ImageResizer))
    }

    pub fn with_resizer(config: CacheConfig, resizer: Arc<dyn Resizer>) -> Result<Self> {
        config.validate()?;
        let layout = DiskLayout::from_config(&config);
        tracing::debug!(
            "Image cache at {} with {} presets",
            layout.root().display(),
            config.presets.len()
        );
        Ok(Self {
            config,
            layout,
            resizer,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn presets(&self) -> &BTreeMap<String, Preset> {
        &self.config.presets
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    fn preset(&self, name: &str) -> Result<Preset> {
        self.config
            .presets
            .get(name)
            .copied()
            .ok_or_else(|| PresetCacheError::UnknownPreset(name.to_string()))
    }

    /// Path of the `preset` variant of `original`, with its directory chain
    /// created when `create_dirs` is set.
    pub async fn resolve(&self, original: &str, preset: &str, create_dirs: bool) -> Result<PathBuf> {
        self.preset(preset)?;
        self.layout.resolve(original, preset, create_dirs).await
    }

    /// Path of the resized variant, resizing on a miss.
    ///
    /// Fails on an unknown preset, an empty path, a preset without
    /// dimensions or a directory that cannot be created. Resize failures are
    /// not reported here.
    pub async fn image(&self, preset: &str, original: &str) -> Result<PathBuf> {
        Ok(self.lookup(preset, original).await?.path)
    }

    pub async fn lookup(&self, preset: &str, original: &str) -> Result<CachedImage> {
        let target = self.preset(preset)?;
        let path = self.layout.resolve(original, preset, false).await?;

        // A file that is still being written must not be reported as a hit.
        let writing = self.lock_in_flight().contains(&path);
        if writing {
            return Ok(self.pending(path));
        }

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            verbose!(self.config.debug, "Returning {} from cache", path.display());
            return Ok(CachedImage { path, status: CacheStatus::Hit, write: None });
        }

        if !target.is_usable() {
            return Err(PresetCacheError::ConfigurationError(format!(
                "could not resize image {}: preset {} has neither width nor height",
                original, preset
            )));
        }

        let guard = {
            let mut set = self.lock_in_flight();
            if !set.insert(path.clone()) {
                drop(set);
                return Ok(self.pending(path));
            }
            InFlightGuard { set: self.in_flight.clone(), path: path.clone() }
        };
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        verbose!(self.config.debug, "Image {} not in cache, resizing for {}", original, preset);
        // Dropping the guard on error releases the in-flight slot.
        self.layout.resolve(original, preset, true).await?;

        let job = ResizeJob {
            source: PathBuf::from(original),
            destination: path.clone(),
            width: target.width,
            height: target.height,
            quality: self.config.quality,
            format: self.config.format(),
        };
        let write = self.spawn_write(job, guard);

        Ok(CachedImage { path, status: CacheStatus::Miss, write: Some(write) })
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending(&self, path: PathBuf) -> CachedImage {
        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        verbose!(self.config.debug, "Resize of {} already in flight", path.display());
        CachedImage { path, status: CacheStatus::Pending, write: None }
    }

    fn spawn_write(&self, job: ResizeJob, guard: InFlightGuard) -> JoinHandle<()> {
        let resizer = self.resizer.clone();
        let counters = self.counters.clone();
        let debug = self.config.debug;
        counters.resizes.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let _guard = guard;
            let destination = job.destination.clone();
            match resizer.resize(job).await {
                Ok(()) => verbose!(debug, "Cached {}", destination.display()),
                Err(e) => {
                    counters.resize_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Could not resize into {}: {}", destination.display(), e);
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            pending: self.counters.pending.load(Ordering::Relaxed),
            resizes: self.counters.resizes.load(Ordering::Relaxed),
            resize_errors: self.counters.resize_errors.load(Ordering::Relaxed),
            in_flight: self.lock_in_flight().len(),
        }
    }
}
