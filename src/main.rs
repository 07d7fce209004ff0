use futures::future::join_all;
use presetcache::cache::content_type_for_path;
use presetcache::{CacheConfig, ImageCache};
use std::path::PathBuf;

/// Presetcache command line entry point.
///
/// Prints the cached variant path of every `IMAGE` for `PRESET`, one per
/// line, resizing the ones that are not cached yet. Unlike the library entry
/// point it waits for pending writes and exits with status 1 if any image
/// was rejected or any write failed.
///
/// # Configuration
/// Environment variables:
/// - `PRESETCACHE_CONFIG`: JSON config file (defaults apply when unset)
/// - `PRESETCACHE_CACHE_PATH`, `PRESETCACHE_QUALITY`, `PRESETCACHE_EXTENSION`,
///   `PRESETCACHE_DEBUG`: override single fields
/// - `RUST_LOG`: Logging verbosity (default: "presetcache=info")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout only carries paths
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "presetcache=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let preset = args.next();
    let images: Vec<String> = args.collect();
    let preset = match preset {
        Some(p) if !images.is_empty() => p,
        _ => {
            eprintln!("usage: presetcache <PRESET> <IMAGE>...");
            std::process::exit(2);
        }
    };

    let cfg = match std::env::var("PRESETCACHE_CONFIG") {
        Ok(path) => CacheConfig::from_json_file(&path)?,
        Err(_) => CacheConfig::default(),
    }
    .apply_env()?;

    let cache = ImageCache::new(cfg)?;
    tracing::debug!("Cache root {}", cache.root().display());

    let outcome = cache_all(&cache, &preset, &images).await;
    tracing::debug!("Resolved {} of {} images", outcome.paths.len(), images.len());

    let stats = cache.stats();
    tracing::info!("Cache stats: {}", serde_json::to_string(&stats)?);
    if stats.resize_errors > 0 || outcome.aborted > 0 || outcome.rejected > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[derive(Debug, Default)]
struct BatchOutcome {
    paths: Vec<PathBuf>,
    rejected: usize,
    aborted: usize,
}

/// Look up every image, printing paths as they resolve, then wait for all
/// started writes. A rejected image does not stop the batch, so writes
/// already started are still awaited.
async fn cache_all(cache: &ImageCache, preset: &str, images: &[String]) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    let mut writes = Vec::new();
    for image in images {
        match cache.lookup(preset, image).await {
            Ok(cached) => {
                println!("{}", cached.path.display());
                tracing::debug!(
                    "{} is {:?} ({})",
                    image,
                    cached.status,
                    content_type_for_path(&cached.path).unwrap_or("application/octet-stream")
                );
                writes.extend(cached.write);
                outcome.paths.push(cached.path);
            }
            Err(e) => {
                tracing::error!("Cannot cache {}: {}", image, e);
                outcome.rejected += 1;
            }
        }
    }

    for joined in join_all(writes).await {
        if let Err(e) = joined {
            tracing::error!("Resize task aborted: {}", e);
            outcome.aborted += 1;
        }
    }
    outcome
}
