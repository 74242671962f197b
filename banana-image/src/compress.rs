use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageError};
use tracing::debug;

pub const START_QUALITY: u8 = 95;
pub const MIN_QUALITY: u8 = 10;
pub const QUALITY_STEP: u8 = 5;

/// Encodes an image at a given quality level, 10 (smallest) to 95 (best).
pub trait QualityEncoder {
    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError>;
}

/// PNG has no quality knob, so each step reduces per-channel bit depth before
/// encoding at maximum compression. Quality 95 is lossless.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngQualityEncoder;

impl QualityEncoder for PngQualityEncoder {
    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
        let reduced = posterize(image, bits_for_quality(quality));
        let mut bytes = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut bytes, CompressionType::Best, FilterType::Adaptive);
        reduced.write_with_encoder(encoder)?;
        Ok(bytes)
    }
}

#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub bytes: Vec<u8>,
    /// Quality level that produced `bytes`.
    pub quality: u8,
    pub attempts: usize,
    /// False when even the lowest quality overshot the limit.
    pub within_limit: bool,
}

/// Megabytes to bytes, with 1 MB = 1024² bytes.
pub fn max_bytes(max_size_mb: f64) -> u64 {
    (max_size_mb * 1024.0 * 1024.0) as u64
}

/// Maps a quality level onto 1..=8 retained bits per channel.
pub fn bits_for_quality(quality: u8) -> u8 {
    let quality = quality.clamp(MIN_QUALITY, START_QUALITY);
    let span = u32::from(START_QUALITY - MIN_QUALITY);
    let offset = u32::from(quality - MIN_QUALITY);
    1 + (offset * 7 / span) as u8
}

/// Step down from [`START_QUALITY`] by [`QUALITY_STEP`] until the encoding fits
/// in `max_size_mb`. If nothing fits, the encoding at [`MIN_QUALITY`] is
/// returned anyway; the limit is best effort.
///
/// # Errors
///
/// Only encoder failures are reported.
pub fn compress_to_limit<E>(
    image: &DynamicImage,
    max_size_mb: f64,
    encoder: &E,
) -> Result<CompressionOutcome, ImageError>
where
    E: QualityEncoder + ?Sized,
{
    let limit = max_bytes(max_size_mb);
    let mut quality = START_QUALITY;
    let mut attempts = 0;

    loop {
        let bytes = encoder.encode(image, quality)?;
        attempts += 1;
        let within_limit = bytes.len() as u64 <= limit;
        debug!(
            "quality {quality}: {} bytes (limit {limit})",
            bytes.len()
        );

        if within_limit || quality < MIN_QUALITY + QUALITY_STEP {
            return Ok(CompressionOutcome {
                bytes,
                quality,
                attempts,
                within_limit,
            });
        }

        quality -= QUALITY_STEP;
    }
}

fn posterize(image: &DynamicImage, bits: u8) -> DynamicImage {
    let bits = bits.clamp(1, 8);
    let mask = u8::MAX << (8 - bits);
    // Quantized values sit at the centre of their bucket.
    let fill = !mask >> 1;
    let quantize = |channel: &mut u8| *channel = (*channel & mask) | fill;

    let color = image.color();
    match (color.has_color(), color.has_alpha()) {
        (true, true) => {
            let mut buffer = image.to_rgba8();
            for pixel in buffer.pixels_mut() {
                pixel.0[..3].iter_mut().for_each(quantize);
            }
            DynamicImage::ImageRgba8(buffer)
        }
        (true, false) => {
            let mut buffer = image.to_rgb8();
            for pixel in buffer.pixels_mut() {
                pixel.0.iter_mut().for_each(quantize);
            }
            DynamicImage::ImageRgb8(buffer)
        }
        (false, true) => {
            let mut buffer = image.to_luma_alpha8();
            for pixel in buffer.pixels_mut() {
                quantize(&mut pixel.0[0]);
            }
            DynamicImage::ImageLumaA8(buffer)
        }
        (false, false) => {
            let mut buffer = image.to_luma8();
            for pixel in buffer.pixels_mut() {
                quantize(&mut pixel.0[0]);
            }
            DynamicImage::ImageLuma8(buffer)
        }
    }
}
