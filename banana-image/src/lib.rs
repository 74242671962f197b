use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageError};
use thiserror::Error;
use tracing::debug;

mod compress;
mod placeholder;

pub use compress::{
    CompressionOutcome, MIN_QUALITY, PngQualityEncoder, QUALITY_STEP, QualityEncoder,
    START_QUALITY, bits_for_quality, compress_to_limit, max_bytes,
};
pub use placeholder::{
    MAX_ERROR_CHARS, PLACEHOLDER_HEADING, PLACEHOLDER_HEIGHT, PLACEHOLDER_WIDTH, placeholder_png,
    render_placeholder, truncate_message,
};

#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("input image not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read input image {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("input image {} is not a supported image", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
}

#[derive(Debug, Error)]
pub enum FinishError {
    #[error("failed to decode generated image: {0}")]
    Decode(#[source] ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] ImageError),
    #[error("failed to encode placeholder image: {0}")]
    Placeholder(#[from] png::EncodingError),
    #[error("failed to write image to {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An input image read from disk, kept in its original encoding for upload.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub path: PathBuf,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Read and decode an input image so bad files are caught before the remote
/// call is made.
pub fn load_reference_image(path: &Path) -> Result<ReferenceImage, ImageLoadError> {
    if !path.exists() {
        return Err(ImageLoadError::NotFound(path.to_path_buf()));
    }

    let data = fs::read(path).map_err(|source| ImageLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let decode_error = |source| ImageLoadError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let format = image::guess_format(&data).map_err(decode_error)?;
    let decoded = image::load_from_memory_with_format(&data, format).map_err(decode_error)?;

    Ok(ReferenceImage {
        path: path.to_path_buf(),
        mime_type: format.to_mime_type().to_string(),
        width: decoded.width(),
        height: decoded.height(),
        data,
    })
}

/// A decoded raster waiting to be written out as PNG.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    image: DynamicImage,
}

impl ImageArtifact {
    pub fn from_image(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Decode bytes returned by the remote model.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FinishError> {
        let image = image::load_from_memory(bytes).map_err(FinishError::Decode)?;
        Ok(Self::from_image(image))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    /// Lossless PNG encoding.
    pub fn encode_png(&self) -> Result<Vec<u8>, FinishError> {
        let mut bytes = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut bytes, CompressionType::Default, FilterType::Adaptive);
        self.image
            .write_with_encoder(encoder)
            .map_err(FinishError::Encode)?;
        Ok(bytes)
    }

    /// Run the bounded quality search against `max_size_mb`.
    pub fn compress(&self, max_size_mb: f64) -> Result<CompressionOutcome, FinishError> {
        compress_to_limit(&self.image, max_size_mb, &PngQualityEncoder).map_err(FinishError::Encode)
    }
}

/// Write PNG bytes to `path`, creating parent directories as needed, and
/// return the absolute path of the written file.
pub fn save_png(path: &Path, bytes: &[u8]) -> Result<PathBuf, FinishError> {
    let io_error = |source| FinishError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(path, bytes).map_err(io_error)?;
    debug!("wrote {} bytes to {}", bytes.len(), path.display());

    Ok(fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf()))
}

#[cfg(test)]
mod tests;
