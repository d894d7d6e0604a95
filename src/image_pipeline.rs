//! Icon normalization: decode, resize to exact dimensions, re-encode as lossy
//! WebP.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{PipelineError, Result};

#[cfg(feature = "normalize")]
use image::{imageops::FilterType, DynamicImage};
#[cfg(feature = "normalize")]
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
#[cfg(feature = "normalize")]
use zune_jpeg::JpegDecoder;

pub const NORMALIZED_EXTENSION: &str = "webp";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeSummary {
    pub converted: usize,
    pub failed: usize,
}

/// Converts every icon artifact in `source_dir` into `target_dir`, leaving
/// originals untouched. Per-file failures are counted, not returned.
pub trait ArtifactNormalizer {
    fn normalize(
        &self,
        source_dir: &Path,
        target_dir: &Path,
        dimensions: (u32, u32),
    ) -> Result<NormalizeSummary>;
}

/// Returns the normalizer for this build, or `None` with a single warning
/// when the build has no image support.
pub fn build_normalizer(enabled: bool, quality: f32) -> Option<Box<dyn ArtifactNormalizer>> {
    if !enabled {
        info!("Icon normalization disabled");
        return None;
    }
    #[cfg(feature = "normalize")]
    {
        Some(Box::new(WebpNormalizer::new(quality)))
    }
    #[cfg(not(feature = "normalize"))]
    {
        let _ = quality;
        warn!("Image support not compiled in (feature `normalize`). Skipping icon conversion.");
        None
    }
}

/// `.jpg`/`.jpeg` files directly inside `dir`, sorted by name.
pub fn list_source_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| PipelineError::io(dir, err))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

pub fn normalized_path_for(source_path: &Path, target_dir: &Path) -> Option<PathBuf> {
    let stem = source_path.file_stem()?;
    Some(target_dir.join(stem).with_extension(NORMALIZED_EXTENSION))
}

/// Lanczos resize through `image`, lossy WebP through libwebp.
#[cfg(feature = "normalize")]
#[derive(Debug, Clone, Copy)]
pub struct WebpNormalizer {
    quality: f32,
}

#[cfg(feature = "normalize")]
impl WebpNormalizer {
    pub fn new(quality: f32) -> Self {
        Self {
            quality: quality.clamp(0.0, 100.0),
        }
    }

    fn convert_one(
        &self,
        source_path: &Path,
        target_path: &Path,
        (width, height): (u32, u32),
    ) -> Result<()> {
        let decoded = decode_image_from_path_with_fallback(source_path).ok_or_else(|| {
            PipelineError::decode(source_path.display().to_string(), "unsupported or corrupt image")
        })?;
        let resized = decoded.resize_exact(width.max(1), height.max(1), FilterType::Lanczos3);
        let encodable = if resized.color().has_alpha() {
            DynamicImage::ImageRgba8(resized.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(resized.to_rgb8())
        };
        let encoded = encode_lossy_webp(&encodable, self.quality).map_err(|message| {
            PipelineError::decode(format!("webp encode of {}", target_path.display()), message)
        })?;
        write_atomic(&encoded, target_path)
    }
}

#[cfg(feature = "normalize")]
impl ArtifactNormalizer for WebpNormalizer {
    fn normalize(
        &self,
        source_dir: &Path,
        target_dir: &Path,
        dimensions: (u32, u32),
    ) -> Result<NormalizeSummary> {
        if !source_dir.is_dir() {
            info!("Square directory not found: {}", source_dir.display());
            return Ok(NormalizeSummary::default());
        }
        fs::create_dir_all(target_dir).map_err(|err| PipelineError::io(target_dir, err))?;
        info!(
            "Converting square images to WebP ({}x{})...",
            dimensions.0, dimensions.1
        );

        let mut summary = NormalizeSummary::default();
        for source_path in list_source_images(source_dir)? {
            let Some(target_path) = normalized_path_for(&source_path, target_dir) else {
                continue;
            };
            match self.convert_one(&source_path, &target_path, dimensions) {
                Ok(()) => {
                    summary.converted += 1;
                    info!(
                        "Converted: {} -> {}",
                        source_path.display(),
                        target_path.display()
                    );
                }
                Err(error) => {
                    summary.failed += 1;
                    warn!("Error converting {}: {}", source_path.display(), error);
                }
            }
        }
        info!(
            "Converted {} images to WebP format in {}",
            summary.converted,
            target_dir.display()
        );
        Ok(summary)
    }
}

#[cfg(feature = "normalize")]
fn encode_lossy_webp(image: &DynamicImage, quality: f32) -> std::result::Result<Vec<u8>, String> {
    let encoder = webp::Encoder::from_image(image).map_err(str::to_string)?;
    Ok(encoder.encode(quality).to_vec())
}

#[cfg(feature = "normalize")]
fn write_atomic(bytes: &[u8], target_path: &Path) -> Result<()> {
    let temp_path = target_path.with_extension("webp.tmp");
    if temp_path.exists() {
        let _ = fs::remove_file(&temp_path);
    }
    if let Err(err) = fs::write(&temp_path, bytes) {
        let _ = fs::remove_file(&temp_path);
        return Err(PipelineError::io(&temp_path, err));
    }
    if let Err(err) = fs::rename(&temp_path, target_path) {
        let _ = fs::remove_file(&temp_path);
        return Err(PipelineError::io(target_path, err));
    }
    Ok(())
}

#[cfg(feature = "normalize")]
fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

#[cfg(feature = "normalize")]
fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }

    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = image::RgbaImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgba8(image))
}

/// Storefront JPEGs are sometimes slightly malformed; the non-strict decoder
/// only runs when the primary one gives up.
#[cfg(feature = "normalize")]
fn decode_image_from_memory_with_fallback(bytes: &[u8]) -> Option<DynamicImage> {
    image::load_from_memory(bytes)
        .ok()
        .or_else(|| decode_jpeg_non_strict(bytes))
}

#[cfg(feature = "normalize")]
fn decode_image_from_path_with_fallback(path: &Path) -> Option<DynamicImage> {
    image::open(path).ok().or_else(|| {
        let bytes = fs::read(path).ok()?;
        decode_image_from_memory_with_fallback(&bytes)
    })
}
