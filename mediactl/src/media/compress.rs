//! Size-bounded image compression.
//!
//! An image over the byte budget is decoded once and then repeatedly downscaled from the
//! decoded source and re-encoded in its original format until the encoded size fits. Each
//! round recomputes its target from the most recent output, and the width strictly
//! decreases, so the loop ends either under budget or at one of the policy guards.

use std::io::Cursor;

use bytes::Bytes;
use image::{
    DynamicImage, ImageReader,
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
    imageops::FilterType,
};
use tracing::{debug, instrument};

use super::{CompressionPolicy, ImageKind};

/// Multiplier applied on top of the square-root area estimate, so each round aims a little
/// under the budget instead of exactly at it.
const SHRINK_MARGIN: f64 = 0.9;

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("failed to decode {kind} image: {source}")]
    Decode {
        kind: ImageKind,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode {kind} image: {source}")]
    Encode {
        kind: ImageKind,
        #[source]
        source: image::ImageError,
    },

    #[error("image could not be reduced to {max_size_bytes} bytes: {reason} (last attempt {last_size_bytes} bytes at {width}px wide)")]
    Exhausted {
        max_size_bytes: u64,
        last_size_bytes: u64,
        width: u32,
        reason: &'static str,
    },
}

/// Stateless compressor; all knobs come from the [`CompressionPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct ImageCompressor {
    max_iterations: u32,
    min_width: u32,
    jpeg_quality: u8,
}

impl ImageCompressor {
    pub fn new(policy: &CompressionPolicy) -> Self {
        Self {
            max_iterations: policy.max_iterations,
            min_width: policy.min_width.max(1),
            jpeg_quality: policy.jpeg_quality.clamp(1, 100),
        }
    }

    /// Return `buffer` re-encoded to at most `max_size_bytes`, or unchanged if it already fits.
    ///
    /// The image header is parsed even when no re-encode is needed, so a buffer that only
    /// carries the right magic bytes is a `Decode` error at any size.
    ///
    /// CPU bound; call from a blocking context.
    #[instrument(skip(self, buffer), fields(size_bytes = buffer.len()), err)]
    pub fn compress(&self, buffer: Bytes, kind: ImageKind, max_size_bytes: u64) -> Result<Bytes, CompressError> {
        let (header_width, header_height) = dimensions(&buffer, kind)?;
        if buffer.len() as u64 <= max_size_bytes {
            return Ok(buffer);
        }
        debug!(header_width, header_height, max_size_bytes, "Image over budget, decoding");

        let source = image::load_from_memory_with_format(&buffer, kind.image_format())
            .map_err(|source| CompressError::Decode { kind, source })?;
        let (source_width, source_height) = (source.width(), source.height());

        let mut current = buffer;
        let mut width = source_width;
        let mut iterations = 0u32;

        while current.len() as u64 > max_size_bytes {
            if iterations >= self.max_iterations {
                return Err(CompressError::Exhausted {
                    max_size_bytes,
                    last_size_bytes: current.len() as u64,
                    width,
                    reason: "iteration limit reached",
                });
            }

            let next = next_width(width, current.len() as u64, max_size_bytes);
            if next < self.min_width {
                return Err(CompressError::Exhausted {
                    max_size_bytes,
                    last_size_bytes: current.len() as u64,
                    width,
                    reason: "minimum width reached",
                });
            }

            let height = scaled_height(source_width, source_height, next);
            let resized = source.resize_exact(next, height, FilterType::Triangle);
            current = self.encode(&resized, kind)?;
            width = next;
            iterations += 1;

            debug!(iterations, width, height, size_bytes = current.len(), "Re-encoded image");
        }

        debug!(iterations, source_width, width, size_bytes = current.len(), "Image compressed under budget");
        Ok(current)
    }

    fn encode(&self, image: &DynamicImage, kind: ImageKind) -> Result<Bytes, CompressError> {
        let mut out = Vec::new();
        let result = match kind {
            ImageKind::Jpeg => {
                // The JPEG encoder has no alpha channel support
                let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.jpeg_quality))
            }
            ImageKind::Png => image.write_with_encoder(PngEncoder::new(&mut out)),
        };
        result.map_err(|source| CompressError::Encode { kind, source })?;
        Ok(Bytes::from(out))
    }
}

/// Width and height from the image header, without decoding pixel data.
fn dimensions(buffer: &[u8], kind: ImageKind) -> Result<(u32, u32), CompressError> {
    ImageReader::with_format(Cursor::new(buffer), kind.image_format())
        .into_dimensions()
        .map_err(|source| CompressError::Decode { kind, source })
}

/// Width for the next round: scale by the square root of the size ratio (size tracks area),
/// with a margin, and always at least one pixel narrower than `width`.
fn next_width(width: u32, current_size: u64, max_size: u64) -> u32 {
    let ratio = max_size as f64 / current_size as f64;
    let target = (width as f64 * ratio.sqrt() * SHRINK_MARGIN).floor();
    let target = if target.is_finite() && target > 0.0 { target as u32 } else { 0 };
    target.min(width.saturating_sub(1))
}

fn scaled_height(source_width: u32, source_height: u32, width: u32) -> u32 {
    let height = (source_height as u64 * width as u64) / source_width.max(1) as u64;
    height.max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{jpeg_fixture, noise_jpeg_fixture, noise_png_fixture, png_fixture};

    fn compressor() -> ImageCompressor {
        ImageCompressor::new(&CompressionPolicy::default())
    }

    #[test]
    fn test_next_width_strictly_decreases() {
        // Ratio close to 1 would otherwise round back to the same width
        assert_eq!(next_width(100, 101, 100), 89);
        assert_eq!(next_width(10, 1_000_001, 1_000_000), 8);
        assert_eq!(next_width(1, 1_000, 999), 0);
        for width in [2u32, 17, 640, 4096] {
            assert!(next_width(width, 2_000, 1_999) < width);
        }
    }

    #[test]
    fn test_next_width_tracks_area() {
        // Four times over budget -> roughly half the width, less the margin
        assert_eq!(next_width(1000, 400, 100), 450);
    }

    #[test]
    fn test_scaled_height_preserves_aspect_and_never_hits_zero() {
        assert_eq!(scaled_height(400, 200, 100), 50);
        assert_eq!(scaled_height(1000, 1, 10), 1);
    }

    #[test]
    fn test_under_budget_is_returned_unchanged() {
        let png = png_fixture(32, 32);
        let out = compressor().compress(png.clone(), ImageKind::Png, png.len() as u64).unwrap();
        assert_eq!(out, png);
        // Same allocation, no re-encode happened
        assert_eq!(out.as_ptr(), png.as_ptr());
    }

    #[test]
    fn test_oversized_png_shrinks_under_budget() {
        let png = noise_png_fixture(512, 512);
        let max = 100 * 1024;
        assert!(png.len() as u64 > max);

        let out = compressor().compress(png, ImageKind::Png, max).unwrap();
        assert!(out.len() as u64 <= max);

        let decoded = image::load_from_memory_with_format(&out, image::ImageFormat::Png).unwrap();
        assert!(decoded.width() < 512);
        // Aspect ratio preserved for a square source
        assert_eq!(decoded.width(), decoded.height());
    }

    #[test]
    fn test_oversized_jpeg_stays_jpeg() {
        let jpeg = noise_jpeg_fixture(640, 480);
        let max = (jpeg.len() / 3) as u64;

        let out = compressor().compress(jpeg, ImageKind::Jpeg, max).unwrap();
        assert!(out.len() as u64 <= max);
        assert_eq!(crate::media::sniff::detect(&out).mime_type(), Some("image/jpeg"));

        let decoded = image::load_from_memory_with_format(&out, image::ImageFormat::Jpeg).unwrap();
        assert!(decoded.width() < 640);
    }

    #[test]
    fn test_impossible_budget_is_exhausted_not_looping() {
        let png = noise_png_fixture(64, 64);
        let err = compressor().compress(png, ImageKind::Png, 10).unwrap_err();
        assert!(matches!(err, CompressError::Exhausted { .. }), "unexpected error: {err}");
    }

    #[test]
    fn test_iteration_limit() {
        let policy = CompressionPolicy {
            max_iterations: 0,
            ..CompressionPolicy::default()
        };
        let png = noise_png_fixture(64, 64);
        let err = ImageCompressor::new(&policy).compress(png, ImageKind::Png, 100).unwrap_err();
        match err {
            CompressError::Exhausted { reason, width, .. } => {
                assert_eq!(reason, "iteration limit reached");
                assert_eq!(width, 64);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_undecodable_bytes() {
        // Valid JPEG magic, garbage after it
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend(std::iter::repeat_n(0xAB, 4096));
        let err = compressor().compress(Bytes::from(bytes), ImageKind::Jpeg, 100).unwrap_err();
        assert!(matches!(err, CompressError::Decode { kind: ImageKind::Jpeg, .. }));
    }

    #[test]
    fn test_magic_bytes_alone_are_rejected_under_budget() {
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(b"<html><script>alert(1)</script></html>");
        let err = compressor().compress(Bytes::from(png), ImageKind::Png, 5 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, CompressError::Decode { kind: ImageKind::Png, .. }), "unexpected error: {err}");

        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.extend_from_slice(b"MZ\x90\x00 not a jpeg");
        let err = compressor().compress(Bytes::from(jpeg), ImageKind::Jpeg, 5 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, CompressError::Decode { kind: ImageKind::Jpeg, .. }), "unexpected error: {err}");
    }

    #[test]
    fn test_small_jpeg_fixture_fits_default_budget() {
        let jpeg = jpeg_fixture(16, 16);
        let out = compressor().compress(jpeg.clone(), ImageKind::Jpeg, 5 * 1024 * 1024).unwrap();
        assert_eq!(out, jpeg);
    }
}
