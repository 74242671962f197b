use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Upper bound on reference images accepted by the image models.
pub const MAX_REFERENCE_IMAGES: usize = 14;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("model identifier must not be empty")]
    EmptyModel,
    #[error("at most {max} input images are allowed, got {0}", max = MAX_REFERENCE_IMAGES)]
    TooManyReferenceImages(usize),
    #[error("model {0} does not accept input images")]
    ReferenceImagesUnsupported(String),
    #[error("unknown resolution {0:?}, expected one of 1K, 2K, 4K")]
    UnknownResolution(String),
}

/// Requested output resolution tag.
///
/// The remote models treat this as a hint; see [`Resolution::image_size`] and
/// [`Resolution::imagen_sample_size`] for what actually goes over the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Resolution {
    #[default]
    OneK,
    TwoK,
    FourK,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::OneK => "1K",
            Resolution::TwoK => "2K",
            Resolution::FourK => "4K",
        }
    }

    /// Value for `generationConfig.imageConfig.imageSize`.
    pub fn image_size(self) -> &'static str {
        self.as_str()
    }

    /// Value for Imagen's `parameters.sampleImageSize`. 1K is the API default
    /// and 4K is not offered, so only 2K is sent.
    pub fn imagen_sample_size(self) -> Option<&'static str> {
        match self {
            Resolution::TwoK => Some("2K"),
            Resolution::OneK | Resolution::FourK => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = RequestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "1K" => Ok(Resolution::OneK),
            "2K" => Ok(Resolution::TwoK),
            "4K" => Ok(Resolution::FourK),
            _ => Err(RequestError::UnknownResolution(value.to_string())),
        }
    }
}

/// Which REST method a model is served through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// `models/{id}:generateContent`, multimodal Gemini image models.
    Gemini,
    /// `models/{id}:predict`, text-to-image only.
    Imagen,
}

impl ModelFamily {
    pub fn of(model: &str) -> Self {
        if model.trim().to_ascii_lowercase().starts_with("imagen") {
            ModelFamily::Imagen
        } else {
            ModelFamily::Gemini
        }
    }

    pub fn method(self) -> &'static str {
        match self {
            ModelFamily::Gemini => "generateContent",
            ModelFamily::Imagen => "predict",
        }
    }
}

/// An input image ready to be inlined into the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A validated, single-shot image generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    prompt: String,
    resolution: Resolution,
    model: String,
    reference_images: Vec<InlineImage>,
}

impl GenerationRequest {
    /// Validate and assemble a request.
    ///
    /// # Errors
    ///
    /// Rejects blank prompts and model ids, more than
    /// [`MAX_REFERENCE_IMAGES`] reference images, and reference images paired
    /// with an Imagen model.
    pub fn new(
        prompt: &str,
        resolution: Resolution,
        model: &str,
        reference_images: Vec<InlineImage>,
    ) -> Result<Self, RequestError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(RequestError::EmptyPrompt);
        }

        let model = model.trim();
        if model.is_empty() {
            return Err(RequestError::EmptyModel);
        }

        ensure_reference_limit(reference_images.len())?;

        if !reference_images.is_empty() && ModelFamily::of(model) == ModelFamily::Imagen {
            return Err(RequestError::ReferenceImagesUnsupported(model.to_string()));
        }

        Ok(Self {
            prompt: prompt.to_string(),
            resolution,
            model: model.to_string(),
            reference_images,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn family(&self) -> ModelFamily {
        ModelFamily::of(&self.model)
    }

    pub fn reference_images(&self) -> &[InlineImage] {
        &self.reference_images
    }
}

/// Fail fast on too many reference images, before any of them is read.
pub fn ensure_reference_limit(count: usize) -> Result<(), RequestError> {
    if count > MAX_REFERENCE_IMAGES {
        Err(RequestError::TooManyReferenceImages(count))
    } else {
        Ok(())
    }
}
