use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

mod request;

pub use request::{
    GenerationRequest, InlineImage, MAX_REFERENCE_IMAGES, ModelFamily, RequestError, Resolution,
    ensure_reference_limit,
};

/// Transport-level ceiling. The CLI watchdog normally fires first.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_SAMPLE_COUNT: u32 = 1;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Gemini API key is missing")]
    MissingApiKey,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Gemini API returned {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("no image generated: {}", .reason.as_deref().unwrap_or("response contained no image data"))]
    NoImage { reason: Option<String> },
    #[error("failed to decode image bytes: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Raw bytes of the first image returned by the model.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

// generateContent

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineBlob<'a>,
    },
}

#[derive(Debug, Serialize)]
struct InlineBlob<'a> {
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<&'static str>,
    #[serde(rename = "imageConfig")]
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
struct ImageConfig {
    #[serde(rename = "imageSize")]
    image_size: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
    #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    pub text: Option<String>,
    #[serde(rename = "inlineData", alias = "inline_data")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
pub struct InlineData {
    #[serde(rename = "mimeType", alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct PromptFeedback {
    #[serde(rename = "blockReason")]
    pub block_reason: Option<String>,
}

// predict (Imagen)

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: Vec<Instance<'a>>,
    parameters: Parameters,
}

#[derive(Debug, Serialize)]
struct Instance<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
struct Parameters {
    #[serde(rename = "sampleCount")]
    sample_count: u32,
    #[serde(rename = "sampleImageSize", skip_serializing_if = "Option::is_none")]
    sample_image_size: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub predictions: Vec<PredictPrediction>,
}

#[derive(Debug, Deserialize)]
pub struct PredictPrediction {
    #[serde(rename = "bytesBase64Encoded")]
    pub bytes_base64_encoded: Option<String>,
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(rename = "raiFilteredReason")]
    pub rai_filtered_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestBody<'a> {
    Content(GenerateContentRequest<'a>),
    Predict(PredictRequest<'a>),
}

impl<'a> RequestBody<'a> {
    fn for_request(request: &'a GenerationRequest) -> Self {
        match request.family() {
            ModelFamily::Gemini => {
                let mut parts = vec![RequestPart::Text {
                    text: request.prompt(),
                }];
                parts.extend(request.reference_images().iter().map(|image| {
                    RequestPart::Inline {
                        inline_data: InlineBlob {
                            mime_type: &image.mime_type,
                            data: BASE64_STANDARD.encode(&image.data),
                        },
                    }
                }));

                RequestBody::Content(GenerateContentRequest {
                    contents: vec![RequestContent {
                        role: "user",
                        parts,
                    }],
                    generation_config: GenerationConfig {
                        response_modalities: vec!["TEXT", "IMAGE"],
                        image_config: ImageConfig {
                            image_size: request.resolution().image_size(),
                        },
                    },
                })
            }
            ModelFamily::Imagen => {
                let sample_image_size = request.resolution().imagen_sample_size();
                if sample_image_size.is_none() && request.resolution() == Resolution::FourK {
                    warn!(
                        "Imagen models do not offer 4K output; requesting the model default instead"
                    );
                }

                RequestBody::Predict(PredictRequest {
                    instances: vec![Instance {
                        prompt: request.prompt(),
                    }],
                    parameters: Parameters {
                        sample_count: DEFAULT_SAMPLE_COUNT,
                        sample_image_size,
                    },
                })
            }
        }
    }
}

/// Blocking client for the hosted Gemini image endpoints.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// # Errors
    ///
    /// Returns [`GeminiError::MissingApiKey`] when the provided API key is empty or
    /// whitespace only.
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, GeminiError> {
        if api_key.trim().is_empty() {
            return Err(GeminiError::MissingApiKey);
        }

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint_url(&self, request: &GenerationRequest) -> String {
        format!(
            "{base}/models/{model}:{method}",
            base = self.base_url,
            model = request.model(),
            method = request.family().method()
        )
    }

    /// Issue exactly one generation call and return the first image.
    ///
    /// # Errors
    ///
    /// Network failures, non-success statuses, responses without image data and
    /// undecodable base64 payloads are all reported as [`GeminiError`].
    pub fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GeminiError> {
        let url = self.endpoint_url(request);
        let body = RequestBody::for_request(request);
        debug!("POST {url}");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(GeminiError::Api {
                status,
                message: api_error_message(&text),
            });
        }

        match request.family() {
            ModelFamily::Gemini => first_content_image(response.json()?),
            ModelFamily::Imagen => first_prediction_image(response.json()?),
        }
    }
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

fn first_content_image(response: GenerateContentResponse) -> Result<GeneratedImage, GeminiError> {
    let mut finish_reason = None;

    for candidate in response.candidates {
        if candidate.finish_reason.is_some() {
            finish_reason = candidate.finish_reason;
        }
        let Some(content) = candidate.content else {
            continue;
        };

        for part in content.parts {
            if let Some(text) = part.text.as_deref().map(str::trim) {
                if !text.is_empty() {
                    info!("Model response: {text}");
                }
            }

            if let Some(inline) = part.inline_data {
                if inline.data.trim().is_empty() {
                    continue;
                }
                let bytes = BASE64_STANDARD.decode(inline.data.trim())?;
                return Ok(GeneratedImage {
                    bytes,
                    mime_type: inline.mime_type,
                });
            }
        }
    }

    let reason = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
        .or(finish_reason);
    Err(GeminiError::NoImage { reason })
}

fn first_prediction_image(response: PredictResponse) -> Result<GeneratedImage, GeminiError> {
    let mut reason = None;

    for prediction in response.predictions {
        match prediction.bytes_base64_encoded.as_deref().map(str::trim) {
            Some(encoded) if !encoded.is_empty() => {
                let bytes = BASE64_STANDARD.decode(encoded)?;
                return Ok(GeneratedImage {
                    bytes,
                    mime_type: prediction.mime_type,
                });
            }
            _ => {
                if prediction.rai_filtered_reason.is_some() {
                    reason = prediction.rai_filtered_reason;
                }
            }
        }
    }

    Err(GeminiError::NoImage { reason })
}
