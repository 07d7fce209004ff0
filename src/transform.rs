use crate::config::ImageFormat;
use crate::{PresetCacheError, Result};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::GenericImageView;
use image::ImageEncoder;
use image::{DynamicImage, ExtendedColorType};
use std::path::{Path, PathBuf};

/// One resize-and-write request handed to a [`Resizer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: u8,
    pub format: ImageFormat,
}

/// The resize engine behind the cache.
///
/// Implementations load `job.source`, scale it, encode it in `job.format` at
/// `job.quality` and write the result to `job.destination`. Failures are
/// returned, the cache decides what to do with them.
#[async_trait::async_trait]
pub trait Resizer: Send + Sync {
    async fn resize(&self, job: ResizeJob) -> Result<()>;
}

/// [`Resizer`] backed by the `image` crate. Decoding, resampling and
/// encoding run on the blocking pool.
///
/// The encoded bytes go to a sibling temp file first and are renamed over
/// the destination, so readers never see a half-written variant.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageResizer;

#[async_trait::async_trait]
impl Resizer for ImageResizer {
    async fn resize(&self, job: ResizeJob) -> Result<()> {
        let bytes = tokio::fs::read(&job.source).await?;
        let (width, height, quality, format) = (job.width, job.height, job.quality, job.format);
        let (encoded, source_format) = tokio::task::spawn_blocking(move || {
            let (img, source_format) = decode_image(&bytes)?;
            let resized = resize_image(img, width, height)?;
            Ok::<_, PresetCacheError>((encode_image(&resized, format, quality)?, source_format))
        })
        .await
        .map_err(|e| PresetCacheError::ResizeError(e.to_string()))??;

        tracing::debug!(
            "Resized {} ({}) to {}",
            job.source.display(),
            source_format.map_or_else(|| "other".to_string(), |f| f.to_string()),
            format
        );

        let partial = partial_path(&job.destination);
        if let Err(e) = tokio::fs::write(&partial, encoded).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&partial, &job.destination).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        Ok(())
    }
}

// `<dir>/.<name>.<pid>.part`, next to the destination so the rename stays on
// one filesystem.
fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.{}.part", name, std::process::id()))
}

/// Decodes raw image bytes into memory-resident representation.
///
/// The container format is sniffed from magic bytes, the file extension of
/// the source is never trusted.
///
/// # Returns
/// Tuple of `(DynamicImage, Option<ImageFormat>)` where format is detected
/// when it matches one of the cache's output formats.
///
/// # Errors
/// Returns `PresetCacheError::ResizeError` if the format cannot be detected
/// or the data is corrupted.
pub fn decode_image(bytes: &[u8]) -> Result<(DynamicImage, Option<ImageFormat>)> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| PresetCacheError::ResizeError(e.to_string()))?;

    let img = image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| PresetCacheError::ResizeError(e.to_string()))?;

    let fmt = match guessed {
        image::ImageFormat::Jpeg => Some(ImageFormat::jpeg),
        image::ImageFormat::Png => Some(ImageFormat::png),
        image::ImageFormat::WebP => Some(ImageFormat::webp),
        image::ImageFormat::Avif => Some(ImageFormat::avif),
        _ => None,
    };

    Ok((img, fmt))
}

/// Resizes image maintaining aspect ratio when only one dimension specified.
///
/// # Behavior
/// - Both specified: Resize to exact dimensions (may distort aspect ratio)
/// - Only width: Scale height proportionally
/// - Only height: Scale width proportionally
/// - Neither: Return original
///
/// Uses Lanczos3. Computed dimensions are clamped to at least 1 pixel.
pub fn resize_image(img: DynamicImage, w: Option<u32>, h: Option<u32>) -> Result<DynamicImage> {
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        return Err(PresetCacheError::ResizeError("Invalid image dimensions".into()));
    }

    let (target_w, target_h) = match (w, h) {
        (None, None) => return Ok(img),
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => {
            let ratio = w as f32 / orig_w as f32;
            (w, (orig_h as f32 * ratio).round() as u32)
        }
        (None, Some(h)) => {
            let ratio = h as f32 / orig_h as f32;
            ((orig_w as f32 * ratio).round() as u32, h)
        }
    };

    // resize_exact: the target already carries the aspect decision
    Ok(img.resize_exact(
        target_w.max(1),
        target_h.max(1),
        image::imageops::FilterType::Lanczos3,
    ))
}

/// Encodes image to specified format with quality control.
///
/// Quality is clamped to [1, 100]. PNG is lossless and ignores it.
///
/// # Errors
/// Returns `PresetCacheError::ResizeError` on encoder failures.
pub fn encode_image(img: &DynamicImage, fmt: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let q = quality.clamp(1, 100);

    match fmt {
        ImageFormat::jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let enc = JpegEncoder::new_with_quality(&mut out, q);
            enc.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| PresetCacheError::ResizeError(e.to_string()))?;
        }
        ImageFormat::png => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            let enc = PngEncoder::new(&mut out);
            enc.write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| PresetCacheError::ResizeError(e.to_string()))?;
        }
        ImageFormat::webp => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let encoded = webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode(q as f32);
            out.extend_from_slice(&encoded);
        }
        ImageFormat::avif => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            // Speed 4 balances encoding time and compression ratio
            let enc = AvifEncoder::new_with_speed_quality(&mut out, 4, q);
            enc.write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| PresetCacheError::ResizeError(e.to_string()))?;
        }
    }

    Ok(out)
}
