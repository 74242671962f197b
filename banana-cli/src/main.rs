use banana_config::{Config, load_or_init, resolve_api_key};
use banana_gemini::{
    GeminiClient, GeminiError, GeneratedImage, GenerationRequest, InlineImage, RequestError,
    Resolution, ensure_reference_limit,
};
use banana_image::{
    FinishError, ImageArtifact, ImageLoadError, load_reference_image, placeholder_png, save_png,
};
use clap::Parser;
use std::error::Error;
use std::fmt;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

mod logging;
mod watchdog;

use logging::setup_logging;
use watchdog::{DEFAULT_DEADLINE, Watchdog};

const DEFAULT_MAX_SIZE_MB: f64 = 10.0;

/// Banana CLI entry point.
///
/// Sends a prompt, and optionally up to 14 input images, to a hosted Gemini
/// image model and writes the result as a PNG. When generation fails a
/// placeholder image describing the error is written to the same path.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "banana",
    author,
    version,
    about = "Generate an image from a text prompt with Gemini and save it as PNG.",
    long_about = None
)]
struct Cli {
    /// Image description.
    #[arg(short = 'p', long, value_name = "PROMPT")]
    prompt: String,
    /// Output filename, e.g. sunset-mountains.png. Parent directories are created.
    #[arg(short = 'f', long, value_name = "PATH")]
    filename: PathBuf,
    /// Output resolution: 1K, 2K or 4K. Models may treat this as a hint.
    #[arg(short = 'r', long, default_value = "1K", value_name = "RES")]
    resolution: Resolution,
    /// Model identifier. Defaults to the model named in the config file.
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,
    /// Gemini API key. Falls back to the configured environment variable.
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,
    /// Input image for editing or composition; repeat up to 14 times.
    #[arg(short = 'i', long = "input-image", value_name = "PATH")]
    input_images: Vec<PathBuf>,
    /// Re-encode the output until it fits under --max-size.
    #[arg(long)]
    compress: bool,
    /// Max output size in MB when compressing.
    #[arg(long, value_name = "MB", default_value_t = DEFAULT_MAX_SIZE_MB)]
    max_size: f64,
    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

/// Problems caught before the remote call. Nothing is written to disk.
#[derive(Debug, Error)]
enum PreflightError {
    #[error("No API key provided. Set {env_var} or use --api-key.")]
    MissingApiKey { env_var: String },
    #[error("--max-size must be a positive number of megabytes, got {0}")]
    InvalidMaxSize(f64),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    InputImage(#[from] ImageLoadError),
    #[error("failed to create Gemini client: {0}")]
    Client(#[from] GeminiError),
}

/// Everything needed for the remote call and the finishing stage.
#[derive(Debug)]
struct Invocation {
    client: GeminiClient,
    request: GenerationRequest,
    output_path: PathBuf,
    max_size_mb: Option<f64>,
}

/// Error text carried into the placeholder, including the source chain.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ErrorDetail(String);

impl ErrorDetail {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    fn from_error(error: &(dyn Error + 'static)) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        Self(message)
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of the remote call, decoded.
#[derive(Debug)]
enum GenerationOutcome {
    Success(ImageArtifact),
    Failure(ErrorDetail),
}

impl GenerationOutcome {
    fn from_response(response: Result<GeneratedImage, GeminiError>) -> Self {
        let generated = match response {
            Ok(generated) => generated,
            Err(error) => return GenerationOutcome::Failure(ErrorDetail::from_error(&error)),
        };

        match ImageArtifact::from_bytes(&generated.bytes) {
            Ok(artifact) => {
                let (width, height) = artifact.dimensions();
                info!(
                    "Received {width}x{height} image ({})",
                    generated.mime_type.as_deref().unwrap_or("unknown type")
                );
                GenerationOutcome::Success(artifact)
            }
            Err(error) => GenerationOutcome::Failure(ErrorDetail::from_error(&error)),
        }
    }
}

#[derive(Debug)]
enum RunStatus {
    Saved(PathBuf),
    Placeholder { path: PathBuf, detail: ErrorDetail },
    Preflight(PreflightError),
    Failed(FinishError),
}

impl RunStatus {
    fn report(&self) {
        match self {
            RunStatus::Saved(path) => println!("Image saved to: {}", path.display()),
            RunStatus::Placeholder { path, detail } => {
                error!("{detail}");
                println!("Error placeholder saved to: {}", path.display());
            }
            RunStatus::Preflight(error) => error!("{}", ErrorDetail::from_error(error)),
            RunStatus::Failed(error) => error!("{}", ErrorDetail::from_error(error)),
        }
    }

    fn exit_code(&self) -> ExitCode {
        match self {
            RunStatus::Saved(_) => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = setup_logging(cli.debug);

    let watchdog = match Watchdog::arm(DEFAULT_DEADLINE) {
        Ok(watchdog) => Some(watchdog),
        Err(error) => {
            warn!("failed to start the timeout watchdog ({error})");
            None
        }
    };

    let config = load_config();
    let status = run(&cli, &config, |name| std::env::var(name).ok());
    status.report();

    drop(watchdog);
    status.exit_code()
}

fn load_config() -> Config {
    match load_or_init() {
        Ok(outcome) => {
            if outcome.created {
                info!(
                    "Created banana configuration at {}",
                    outcome.path.display()
                );
            }
            outcome.config
        }
        Err(error) => {
            warn!(
                "failed to load banana configuration ({error}), falling back to defaults"
            );
            Config::default()
        }
    }
}

fn run<F>(cli: &Cli, config: &Config, lookup_env: F) -> RunStatus
where
    F: FnOnce(&str) -> Option<String>,
{
    let invocation = match prepare(cli, config, lookup_env) {
        Ok(invocation) => invocation,
        Err(error) => return RunStatus::Preflight(error),
    };

    info!(
        "Generating image with {} at resolution {}...",
        invocation.request.model(),
        invocation.request.resolution()
    );
    let reference_count = invocation.request.reference_images().len();
    if reference_count > 0 {
        info!("Using {reference_count} input image(s) for composition/editing");
    }

    let outcome = generate_with_progress(&invocation.client, &invocation.request);
    match finish(outcome, &invocation.output_path, invocation.max_size_mb) {
        Ok(status) => status,
        Err(error) => RunStatus::Failed(error),
    }
}

fn prepare<F>(cli: &Cli, config: &Config, lookup_env: F) -> Result<Invocation, PreflightError>
where
    F: FnOnce(&str) -> Option<String>,
{
    let env_var = &config.gemini_api.api_key_env_var;
    let api_key = resolve_api_key(cli.api_key.as_deref(), env_var, lookup_env).ok_or_else(|| {
        PreflightError::MissingApiKey {
            env_var: env_var.clone(),
        }
    })?;

    ensure_reference_limit(cli.input_images.len())?;

    let max_size_mb = if cli.compress {
        if !cli.max_size.is_finite() || cli.max_size <= 0.0 {
            return Err(PreflightError::InvalidMaxSize(cli.max_size));
        }
        Some(cli.max_size)
    } else {
        None
    };

    let mut reference_images = Vec::with_capacity(cli.input_images.len());
    for path in &cli.input_images {
        let reference = load_reference_image(path)?;
        info!(
            "Loaded input image {} ({}x{}, {})",
            reference.path.display(),
            reference.width,
            reference.height,
            reference.mime_type
        );
        reference_images.push(InlineImage {
            mime_type: reference.mime_type,
            data: reference.data,
        });
    }

    let model = cli
        .model
        .as_deref()
        .unwrap_or(&config.gemini_api.default_model);
    let request = GenerationRequest::new(&cli.prompt, cli.resolution, model, reference_images)?;
    let client = GeminiClient::new(&api_key, &config.gemini_api.base_url)?;

    Ok(Invocation {
        client,
        request,
        output_path: cli.filename.clone(),
        max_size_mb,
    })
}

fn generate_with_progress(client: &GeminiClient, request: &GenerationRequest) -> GenerationOutcome {
    let worker_client = client.clone();
    let worker_request = request.clone();

    let handle = match thread::Builder::new()
        .name("gemini-image-request".into())
        .spawn(move || worker_client.generate(&worker_request))
    {
        Ok(handle) => handle,
        Err(error) => {
            return GenerationOutcome::Failure(ErrorDetail::new(format!(
                "failed to start image generation request: {error}"
            )));
        }
    };

    const SPINNER_FRAMES: &[&str] = &["|", "/", "-", "\\"];
    let mut frame_index = 0;
    let interval = Duration::from_millis(200);
    let start = Instant::now();
    let animate = io::stderr().is_terminal();

    while !handle.is_finished() {
        if animate {
            eprint!("\rGenerating image {}", SPINNER_FRAMES[frame_index]);
            let _ = io::stderr().flush();
            frame_index = (frame_index + 1) % SPINNER_FRAMES.len();
        }
        thread::sleep(interval);
    }
    if animate {
        eprint!("\r");
    }

    match handle.join() {
        Ok(response) => {
            info!(
                "Generating image ... finished in {:.1}s",
                start.elapsed().as_secs_f32()
            );
            GenerationOutcome::from_response(response)
        }
        Err(_) => GenerationOutcome::Failure(ErrorDetail::new(
            "image generation request ended unexpectedly: worker panicked",
        )),
    }
}

/// Write the generated image, or a placeholder describing why there is none.
fn finish(
    outcome: GenerationOutcome,
    output_path: &Path,
    max_size_mb: Option<f64>,
) -> Result<RunStatus, FinishError> {
    let encoded = match outcome {
        GenerationOutcome::Success(artifact) => {
            encode_artifact(&artifact, max_size_mb).map_err(|error| ErrorDetail::from_error(&error))
        }
        GenerationOutcome::Failure(detail) => Err(detail),
    };

    match encoded {
        Ok(bytes) => Ok(RunStatus::Saved(save_png(output_path, &bytes)?)),
        Err(detail) => {
            let bytes = placeholder_png(detail.as_str())?;
            let path = save_png(output_path, &bytes)?;
            Ok(RunStatus::Placeholder { path, detail })
        }
    }
}

fn encode_artifact(artifact: &ImageArtifact, max_size_mb: Option<f64>) -> Result<Vec<u8>, FinishError> {
    let Some(max_size_mb) = max_size_mb else {
        return artifact.encode_png();
    };

    let outcome = artifact.compress(max_size_mb)?;
    if outcome.within_limit {
        info!(
            "Compressed to {} bytes at quality {} after {} attempt(s)",
            outcome.bytes.len(),
            outcome.quality,
            outcome.attempts
        );
    } else {
        warn!(
            "could not get under {max_size_mb} MB; keeping quality {} output ({} bytes)",
            outcome.quality,
            outcome.bytes.len()
        );
    }
    Ok(outcome.bytes)
}
