use crate::cache::key::key_for;
use crate::config::{CacheConfig, KeyDigest};
use crate::{PresetCacheError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Sharded on-disk layout for resized variants.
///
/// A variant lives at `<root>/<preset>/<h0>/<h1>/<hash>.<ext>` where `h0` and
/// `h1` are the first two hex characters of the key, so each preset fans out
/// into at most 16x16 leaf directories. Nothing under the root is ever
/// removed, and a variant stays valid for as long as its source path does.
#[derive(Debug, Clone)]
pub struct DiskLayout {
    root: PathBuf,
    extension: String,
    digest: KeyDigest,
    verbose: bool,
}

impl DiskLayout {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>, digest: KeyDigest) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            digest,
            verbose: false,
        }
    }

    pub fn from_config(cfg: &CacheConfig) -> Self {
        Self::new(cfg.cache_path.clone(), cfg.extension.clone(), cfg.digest).verbose(cfg.debug)
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key_for(&self, original: &str) -> String {
        key_for(self.digest, original)
    }

    /// Leaf directory holding every variant of `preset` whose key starts
    /// with the same two characters.
    pub fn shard_dir(&self, preset: &str, key: &str) -> PathBuf {
        self.root
            .join(preset)
            .join(&key[0..1])
            .join(&key[1..2])
    }

    /// Pure path computation, no filesystem access.
    pub fn path_for(&self, original: &str, preset: &str) -> Result<PathBuf> {
        if original.is_empty() {
            return Err(PresetCacheError::InvalidInput(
                "original image path is empty".into(),
            ));
        }
        let key = self.key_for(original);
        Ok(self
            .shard_dir(preset, &key)
            .join(format!("{}.{}", key, self.extension)))
    }

    /// Compute the variant path, creating its directory chain first when
    /// `create_dirs` is set.
    pub async fn resolve(&self, original: &str, preset: &str, create_dirs: bool) -> Result<PathBuf> {
        let path = self.path_for(original, preset)?;
        if create_dirs {
            if let Some(parent) = path.parent() {
                ensure_dir(parent, self.verbose).await?;
            }
        }
        Ok(path)
    }
}

/// Create `dir` and every missing ancestor.
///
/// A directory that already exists, including one created concurrently by
/// another caller, is not an error. Anything else is returned as `Io`.
pub async fn ensure_dir(dir: &Path, verbose: bool) -> Result<()> {
    let mut missing = Vec::new();
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() || fs::metadata(ancestor).await.is_ok() {
            break;
        }
        missing.push(ancestor);
    }

    for d in missing.into_iter().rev() {
        match fs::create_dir(d).await {
            Ok(()) => verbose!(verbose, "Directory {} created", d.display()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists && is_dir(d).await => {}
            Err(e) => return Err(PresetCacheError::Io(e)),
        }
    }
    Ok(())
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}
