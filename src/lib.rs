use thiserror::Error;

// Emit at `info` when the cache runs with `debug` enabled, `debug` otherwise.
macro_rules! verbose {
    ($on:expr, $($arg:tt)+) => {
        if $on {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

pub mod cache;
pub mod config;
pub mod transform;

pub use crate::cache::{CacheStats, CacheStatus, CachedImage, DiskLayout, ImageCache};
pub use crate::config::{CacheConfig, ImageFormat, KeyDigest, Preset};
pub use crate::transform::{ImageResizer, ResizeJob, Resizer};

#[derive(Error, Debug)]
pub enum PresetCacheError {
    /// Empty original image path.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),
    /// Preset exists but cannot drive a resize, or the config is invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Decode, resize, encode or write failure inside the resizer.
    #[error("Resize error: {0}")]
    ResizeError(String),
}

impl From<crate::config::ConfigError> for PresetCacheError {
    fn from(e: crate::config::ConfigError) -> Self {
        PresetCacheError::ConfigurationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PresetCacheError>;
