use presetcache::cache::key_for;
use presetcache::config::{CacheConfig, KeyDigest, Preset};
use presetcache::{CacheStatus, ImageCache, PresetCacheError, ResizeJob, Resizer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Records every job and writes a marker file, optionally failing or
/// waiting for a release signal first. With `partial` set, a truncated file
/// is written at the destination before waiting.
#[derive(Default)]
struct MockResizer {
    calls: AtomicUsize,
    jobs: Mutex<Vec<ResizeJob>>,
    gate: Option<Arc<Notify>>,
    fail: bool,
    partial: bool,
}

impl MockResizer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Resizer for MockResizer {
    async fn resize(&self, job: ResizeJob) -> presetcache::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().push(job.clone());
        if self.partial {
            tokio::fs::write(&job.destination, b"half").await?;
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(PresetCacheError::ResizeError("unsupported format".into()));
        }
        tokio::fs::write(&job.destination, b"resized").await?;
        Ok(())
    }
}

fn config(root: &Path) -> CacheConfig {
    let mut presets = BTreeMap::new();
    presets.insert("P".to_string(), Preset::width(200));
    presets.insert("EXACT".to_string(), Preset::exact(64, 48));
    presets.insert("EMPTY".to_string(), Preset::default());
    CacheConfig {
        presets,
        cache_path: root.to_path_buf(),
        ..Default::default()
    }
}

fn cache_with(root: &Path, resizer: Arc<MockResizer>) -> ImageCache {
    ImageCache::with_resizer(config(root), resizer).unwrap()
}

#[tokio::test]
async fn miss_then_hit_invokes_resizer_once() {
    let tmp = tempfile::tempdir().unwrap();
    let resizer = Arc::new(MockResizer::default());
    let cache = cache_with(tmp.path(), resizer.clone());

    let first = cache.lookup("P", "/img/sample.jpg").await.unwrap();
    assert_eq!(first.status, CacheStatus::Miss);
    first.write.unwrap().await.unwrap();

    let key = key_for(KeyDigest::Sha256, "/img/sample.jpg");
    let expected: PathBuf = tmp
        .path()
        .join("P")
        .join(&key[0..1])
        .join(&key[1..2])
        .join(format!("{}.jpg", key));
    assert_eq!(first.path, expected);

    let second = cache.image("P", "/img/sample.jpg").await.unwrap();
    assert_eq!(second, expected);
    assert_eq!(resizer.calls(), 1);

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.resizes), (1, 1, 1));
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn existing_file_is_trusted_without_resizing() {
    let tmp = tempfile::tempdir().unwrap();
    let resizer = Arc::new(MockResizer::default());
    let cache = cache_with(tmp.path(), resizer.clone());

    let path = cache.resolve("/img/a.jpg", "P", true).await.unwrap();
    std::fs::write(&path, b"not even an image").unwrap();

    let cached = cache.lookup("P", "/img/a.jpg").await.unwrap();
    assert_eq!(cached.status, CacheStatus::Hit);
    assert!(cached.write.is_none());
    assert_eq!(resizer.calls(), 0);
}

#[tokio::test]
async fn job_carries_preset_quality_and_format() {
    let tmp = tempfile::tempdir().unwrap();
    let resizer = Arc::new(MockResizer::default());
    let mut cfg = config(tmp.path());
    cfg.quality = 90;
    cfg.extension = "webp".into();
    let cache = ImageCache::with_resizer(cfg, resizer.clone()).unwrap();

    let cached = cache.lookup("EXACT", "/img/b.png").await.unwrap();
    cached.write.unwrap().await.unwrap();

    let jobs = resizer.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.source, PathBuf::from("/img/b.png"));
    assert_eq!(job.destination, cached.path);
    assert_eq!((job.width, job.height), (Some(64), Some(48)));
    assert_eq!(job.quality, 90);
    assert_eq!(job.format, presetcache::ImageFormat::webp);
    assert_eq!(cached.path.extension().unwrap(), "webp");
}

#[tokio::test]
async fn unknown_preset_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let resizer = Arc::new(MockResizer::default());
    let cache = cache_with(tmp.path(), resizer.clone());

    let err = cache.image("DOES_NOT_EXIST", "a.jpg").await.unwrap_err();
    assert!(matches!(err, PresetCacheError::UnknownPreset(_)));
    assert!(matches!(
        cache.resolve("a.jpg", "DOES_NOT_EXIST", false).await,
        Err(PresetCacheError::UnknownPreset(_))
    ));
    assert_eq!(resizer.calls(), 0);
}

#[tokio::test]
async fn empty_path_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let resizer = Arc::new(MockResizer::default());
    let cache = ImageCache::with_resizer(
        CacheConfig { cache_path: tmp.path().to_path_buf(), ..Default::default() },
        resizer.clone(),
    )
    .unwrap();

    let err = cache.image("LARGE", "").await.unwrap_err();
    assert!(matches!(err, PresetCacheError::InvalidInput(_)));
    assert_eq!(resizer.calls(), 0);
}

#[tokio::test]
async fn preset_without_dimensions_fails_before_io() {
    let tmp = tempfile::tempdir().unwrap();
    let resizer = Arc::new(MockResizer::default());
    let cache = cache_with(tmp.path(), resizer.clone());

    let err = cache.image("EMPTY", "/img/c.jpg").await.unwrap_err();
    assert!(matches!(err, PresetCacheError::ConfigurationError(_)));
    assert_eq!(resizer.calls(), 0);
    assert_eq!(cache.stats().misses, 0);
    assert!(!tmp.path().join("EMPTY").exists());
}

#[tokio::test]
async fn resize_failure_still_returns_path() {
    let tmp = tempfile::tempdir().unwrap();
    let resizer = Arc::new(MockResizer { fail: true, ..Default::default() });
    let cache = cache_with(tmp.path(), resizer.clone());

    let cached = cache.lookup("P", "/img/broken.jpg").await.unwrap();
    assert_eq!(cached.status, CacheStatus::Miss);
    cached.write.unwrap().await.unwrap();

    assert!(!cached.path.exists());
    assert_eq!(cache.stats().resize_errors, 1);

    // Nothing was written, so the next call is a miss again.
    let again = cache.lookup("P", "/img/broken.jpg").await.unwrap();
    assert_eq!(again.status, CacheStatus::Miss);
    again.write.unwrap().await.unwrap();
    assert_eq!(resizer.calls(), 2);
}

#[tokio::test]
async fn concurrent_miss_resizes_once() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = Arc::new(Notify::new());
    let resizer = Arc::new(MockResizer { gate: Some(gate.clone()), ..Default::default() });
    let cache = cache_with(tmp.path(), resizer.clone());

    let first = cache.lookup("P", "/img/d.jpg").await.unwrap();
    let second = cache.lookup("P", "/img/d.jpg").await.unwrap();
    assert_eq!(first.status, CacheStatus::Miss);
    assert_eq!(second.status, CacheStatus::Pending);
    assert_eq!(first.path, second.path);
    let stats = cache.stats();
    assert_eq!((stats.misses, stats.pending, stats.in_flight), (1, 1, 1));

    gate.notify_one();
    first.write.unwrap().await.unwrap();

    assert_eq!(resizer.calls(), 1);
    assert_eq!(cache.stats().in_flight, 0);
    assert_eq!(cache.lookup("P", "/img/d.jpg").await.unwrap().status, CacheStatus::Hit);
}

#[tokio::test]
async fn image_returns_before_write_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = Arc::new(Notify::new());
    let resizer = Arc::new(MockResizer { gate: Some(gate.clone()), ..Default::default() });
    let cache = cache_with(tmp.path(), resizer.clone());

    let path = cache.image("P", "/img/e.jpg").await.unwrap();
    assert!(!path.exists());
    assert!(path.parent().unwrap().is_dir());

    gate.notify_one();
    for _ in 0..100 {
        if path.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(path.exists());
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config(tmp.path());
    cfg.quality = 101;
    let err = ImageCache::with_resizer(cfg, Arc::new(MockResizer::default())).err().unwrap();
    assert!(matches!(err, PresetCacheError::ConfigurationError(_)));
}

#[tokio::test]
async fn real_resizer_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("sample.png");
    image::DynamicImage::new_rgb8(400, 200).save(&source).unwrap();

    let cache = ImageCache::new(config(&tmp.path().join("cache"))).unwrap();
    let original = source.to_str().unwrap();
    let cached = cache.lookup("P", original).await.unwrap();
    cached.write.unwrap().await.unwrap();

    let out = image::open(&cached.path).unwrap();
    assert_eq!((out.width(), out.height()), (200, 100));
    assert_eq!(cache.stats().resize_errors, 0);
}

#[tokio::test]
async fn partially_written_variant_is_pending_not_hit() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = Arc::new(Notify::new());
    let resizer = Arc::new(MockResizer {
        gate: Some(gate.clone()),
        partial: true,
        ..Default::default()
    });
    let cache = cache_with(tmp.path(), resizer.clone());

    let first = cache.lookup("P", "/a.jpg").await.unwrap();
    assert_eq!(first.status, CacheStatus::Miss);

    // Wait until the truncated bytes are on disk.
    for _ in 0..100 {
        if first.path.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(std::fs::read(&first.path).unwrap(), b"half");

    let second = cache.lookup("P", "/a.jpg").await.unwrap();
    assert_eq!(second.status, CacheStatus::Pending);
    assert!(second.write.is_none());
    assert_eq!(cache.stats().hits, 0);

    gate.notify_one();
    first.write.unwrap().await.unwrap();

    let third = cache.lookup("P", "/a.jpg").await.unwrap();
    assert_eq!(third.status, CacheStatus::Hit);
    assert_eq!(std::fs::read(&third.path).unwrap(), b"resized");
    assert_eq!(resizer.calls(), 1);
}

#[tokio::test]
async fn lookups_that_start_no_resize_are_not_misses() {
    let tmp = tempfile::tempdir().unwrap();
    let gate = Arc::new(Notify::new());
    let resizer = Arc::new(MockResizer { gate: Some(gate.clone()), ..Default::default() });
    let cache = cache_with(tmp.path(), resizer.clone());

    assert!(cache.image("EMPTY", "/img/f.jpg").await.is_err());
    let first = cache.lookup("P", "/img/f.jpg").await.unwrap();
    cache.lookup("P", "/img/f.jpg").await.unwrap();
    cache.lookup("P", "/img/f.jpg").await.unwrap();

    let stats = cache.stats();
    assert_eq!((stats.misses, stats.pending, stats.resizes), (1, 2, 1));

    gate.notify_one();
    first.write.unwrap().await.unwrap();
}
