pub mod disk;
pub mod image_cache;
pub mod key;

pub use disk::{ensure_dir, DiskLayout};
pub use image_cache::{CacheStats, CacheStatus, CachedImage, ImageCache};
pub use key::key_for;

use crate::config::ImageFormat;
use std::path::Path;

/// Detect format from file extension
pub fn format_from_extension(ext: &str) -> Option<ImageFormat> {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some(ImageFormat::jpeg),
        "png" => Some(ImageFormat::png),
        "webp" => Some(ImageFormat::webp),
        "avif" => Some(ImageFormat::avif),
        _ => None,
    }
}

/// Generate content type from output format
pub fn content_type_from_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::jpeg => "image/jpeg",
        ImageFormat::png => "image/png",
        ImageFormat::webp => "image/webp",
        ImageFormat::avif => "image/avif",
    }
}

/// Content type of a cached variant, from its file extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(format_from_extension)
        .map(content_type_from_format)
}
