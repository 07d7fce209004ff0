use crate::cache::format_from_extension;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_QUALITY: u8 = 75;
pub const DEFAULT_EXTENSION: &str = "jpg";

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    jpeg,
    png,
    webp,
    avif,
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::jpeg => write!(f, "jpeg"),
            ImageFormat::png => write!(f, "png"),
            ImageFormat::webp => write!(f, "webp"),
            ImageFormat::avif => write!(f, "avif"),
        }
    }
}

/// Digest used to turn an original image path into a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDigest {
    #[default]
    Sha256,
    /// 40-char keys, same layout as caches written by the node `gm` tool.
    Sha1,
}

/// Target dimensions for a named preset.
///
/// Both set means an exact (possibly distorting) resize, a single one scales
/// proportionally. A preset with neither cannot be used to resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Preset {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl Preset {
    pub fn width(width: u32) -> Self {
        Self { width: Some(width), height: None }
    }

    pub fn height(height: u32) -> Self {
        Self { width: None, height: Some(height) }
    }

    pub fn exact(width: u32, height: u32) -> Self {
        Self { width: Some(width), height: Some(height) }
    }

    pub fn is_usable(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }
}

pub fn default_presets() -> BTreeMap<String, Preset> {
    let mut presets = BTreeMap::new();
    presets.insert("LARGE".to_string(), Preset::width(600));
    presets.insert("MEDIUM".to_string(), Preset::width(300));
    presets.insert("SMALL".to_string(), Preset::width(260));
    presets
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub presets: BTreeMap<String, Preset>,
    pub quality: u8,
    pub cache_path: PathBuf,
    pub extension: String,
    pub digest: KeyDigest,
    /// Promotes hit/miss and directory creation events to `info`.
    pub debug: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            presets: default_presets(),
            quality: DEFAULT_QUALITY,
            cache_path: std::env::temp_dir(),
            extension: DEFAULT_EXTENSION.to_string(),
            digest: KeyDigest::default(),
            debug: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Quality must be between 1 and 100, got {0}")] InvalidQuality(u8),
    #[error("Extension cannot be empty")] EmptyExtension,
    #[error("Unsupported output extension: {0}")] UnsupportedExtension(String),
    #[error("Preset {0} has a zero dimension")] ZeroDimension(String),
    #[error("Preset name {0:?} is not a single path segment")] InvalidPresetName(String),
    #[error("Invalid value for {0}: {1}")] InvalidEnv(&'static str, String),
    #[error("Failed to read config: {0}")] Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")] Parse(#[from] serde_json::Error),
}

/// Preset names become one directory under the cache root.
fn is_valid_preset_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains(std::path::MAIN_SEPARATOR)
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quality == 0 || self.quality > 100 {
            return Err(ConfigError::InvalidQuality(self.quality));
        }
        if self.extension.trim().is_empty() {
            return Err(ConfigError::EmptyExtension);
        }
        if format_from_extension(&self.extension).is_none() {
            return Err(ConfigError::UnsupportedExtension(self.extension.clone()));
        }
        // Presets with no dimension at all are only rejected when used.
        for (name, preset) in &self.presets {
            if !is_valid_preset_name(name) {
                return Err(ConfigError::InvalidPresetName(name.clone()));
            }
            if preset.width == Some(0) || preset.height == Some(0) {
                return Err(ConfigError::ZeroDimension(name.clone()));
            }
        }
        Ok(())
    }

    /// Encoder for the configured extension. Falls back to JPEG for an
    /// extension `validate` would have rejected.
    pub fn format(&self) -> ImageFormat {
        format_from_extension(&self.extension).unwrap_or(ImageFormat::jpeg)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Override fields from `PRESETCACHE_*` environment variables.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("PRESETCACHE_CACHE_PATH") {
            self.cache_path = PathBuf::from(path);
        }
        if let Ok(q) = std::env::var("PRESETCACHE_QUALITY") {
            self.quality = q
                .parse::<u8>()
                .map_err(|_| ConfigError::InvalidEnv("PRESETCACHE_QUALITY", q))?;
        }
        if let Ok(ext) = std::env::var("PRESETCACHE_EXTENSION") {
            self.extension = ext;
        }
        if let Ok(debug) = std::env::var("PRESETCACHE_DEBUG") {
            self.debug = matches!(debug.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(self)
    }
}
