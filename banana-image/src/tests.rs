use super::*;
use crate::placeholder::wrap_text;
use image::ImageFormat;
use image::{Rgb, RgbImage};
use std::cell::RefCell;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

static TEMP_DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_temp_dir() -> PathBuf {
    let id = TEMP_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "banana-image-test-{}-{}",
        std::process::id(),
        id
    ));
    fs::create_dir_all(&dir).expect("create temp directory");
    dir
}

fn is_png(bytes: &[u8]) -> bool {
    image::guess_format(bytes).is_ok_and(|format| format == ImageFormat::Png)
}

/// Quality levels the search walks through: 95, 90, ..., 10.
fn quality_steps() -> impl Iterator<Item = u8> {
    (MIN_QUALITY..=START_QUALITY)
        .rev()
        .step_by(usize::from(QUALITY_STEP))
}

/// Deterministic noise so PNG cannot compress the image away.
fn noisy_image(width: u32, height: u32) -> DynamicImage {
    let mut state: u32 = 0x1234_5678;
    let buffer = RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        };
        Rgb([next(), next(), next()])
    });
    DynamicImage::ImageRgb8(buffer)
}

/// Records the qualities it was asked for and returns canned sizes.
struct ScriptedEncoder<F: Fn(u8) -> usize> {
    size_for: F,
    calls: RefCell<Vec<u8>>,
}

impl<F: Fn(u8) -> usize> ScriptedEncoder<F> {
    fn new(size_for: F) -> Self {
        Self {
            size_for,
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl<F: Fn(u8) -> usize> QualityEncoder for ScriptedEncoder<F> {
    fn encode(&self, _image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
        self.calls.borrow_mut().push(quality);
        Ok(vec![quality; (self.size_for)(quality)])
    }
}

#[test]
fn max_bytes_uses_binary_megabytes() {
    assert_eq!(max_bytes(1.0), 1024 * 1024);
    assert_eq!(max_bytes(0.5), 512 * 1024);
    assert_eq!(max_bytes(-1.0), 0);
}

#[test]
fn bits_for_quality_spans_full_range() {
    assert_eq!(bits_for_quality(START_QUALITY), 8);
    assert_eq!(bits_for_quality(MIN_QUALITY), 1);
    let bits: Vec<u8> = quality_steps().map(bits_for_quality).collect();
    assert!(bits.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[test]
fn compliant_image_succeeds_on_first_attempt() {
    let encoder = ScriptedEncoder::new(|_| 10);
    let image = noisy_image(4, 4);

    let outcome = compress_to_limit(&image, 1.0, &encoder).expect("compress");

    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.quality, START_QUALITY);
    assert!(outcome.within_limit);
    assert_eq!(*encoder.calls.borrow(), vec![START_QUALITY]);
}

#[test]
fn search_stops_at_first_quality_under_limit() {
    let limit = max_bytes(1.0) as usize;
    let encoder = ScriptedEncoder::new(|quality| if quality > 70 { limit + 1 } else { limit });
    let image = noisy_image(4, 4);

    let outcome = compress_to_limit(&image, 1.0, &encoder).expect("compress");

    assert_eq!(outcome.quality, 70);
    assert_eq!(outcome.attempts, 6);
    assert!(outcome.within_limit);
    assert_eq!(outcome.bytes.len(), limit);
}

#[test]
fn unreachable_limit_returns_lowest_quality_after_eighteen_attempts() {
    let encoder = ScriptedEncoder::new(|quality| 100 + usize::from(quality));
    let image = noisy_image(4, 4);

    let outcome = compress_to_limit(&image, 0.0, &encoder).expect("compress");

    assert_eq!(outcome.attempts, 18);
    assert_eq!(outcome.quality, MIN_QUALITY);
    assert!(!outcome.within_limit);
    assert_eq!(outcome.bytes, vec![MIN_QUALITY; 110]);
    let calls = encoder.calls.borrow();
    assert_eq!(calls.first(), Some(&START_QUALITY));
    assert_eq!(calls.last(), Some(&MIN_QUALITY));
    assert_eq!(*calls, quality_steps().collect::<Vec<_>>());
}

#[test]
fn png_encoder_output_shrinks_at_low_quality() {
    let image = noisy_image(64, 64);
    let best = PngQualityEncoder.encode(&image, START_QUALITY).expect("encode 95");
    let worst = PngQualityEncoder.encode(&image, MIN_QUALITY).expect("encode 10");

    assert!(is_png(&best));
    assert!(is_png(&worst));
    assert!(worst.len() < best.len());

    let decoded = image::load_from_memory(&best).expect("decode 95");
    assert_eq!(decoded.to_rgb8(), image.to_rgb8());
}

#[test]
fn artifact_compress_respects_generous_limit() {
    let artifact = ImageArtifact::from_image(noisy_image(32, 32));
    let outcome = artifact.compress(10.0).expect("compress");
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.within_limit);
    assert!(is_png(&outcome.bytes));
}

#[test]
fn artifact_round_trips_remote_bytes_to_png() {
    let mut jpeg = Vec::new();
    noisy_image(16, 8)
        .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
        .expect("encode jpeg");

    let artifact = ImageArtifact::from_bytes(&jpeg).expect("decode jpeg");
    assert_eq!(artifact.dimensions(), (16, 8));
    assert!(is_png(&artifact.encode_png().expect("encode png")));
}

#[test]
fn artifact_rejects_garbage_bytes() {
    let error = ImageArtifact::from_bytes(b"definitely not an image").expect_err("garbage");
    assert!(matches!(error, FinishError::Decode(_)));
}

#[test]
fn save_png_creates_parent_directories() {
    let dir = unique_temp_dir();
    let path = dir.join("nested").join("deeper").join("out.png");
    let bytes = ImageArtifact::from_image(noisy_image(2, 2))
        .encode_png()
        .expect("encode");

    let saved = save_png(&path, &bytes).expect("save png");

    assert!(saved.is_absolute());
    assert_eq!(fs::read(&saved).expect("read back"), bytes);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn load_reference_image_reports_missing_file() {
    let path = unique_temp_dir().join("missing.png");
    let error = load_reference_image(&path).expect_err("missing file");
    assert!(matches!(error, ImageLoadError::NotFound(missing) if missing == path));
}

#[test]
fn load_reference_image_rejects_non_images() {
    let dir = unique_temp_dir();
    let path = dir.join("notes.png");
    fs::write(&path, b"just some text").expect("write file");

    let error = load_reference_image(&path).expect_err("not an image");
    assert!(matches!(error, ImageLoadError::Decode { .. }));
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn load_reference_image_keeps_original_bytes_and_mime() {
    let dir = unique_temp_dir();
    let path = dir.join("ref.png");
    noisy_image(3, 5).save(&path).expect("write png");

    let reference = load_reference_image(&path).expect("load reference");
    assert_eq!(reference.mime_type, "image/png");
    assert_eq!((reference.width, reference.height), (3, 5));
    assert_eq!(reference.data, fs::read(&path).expect("read png"));
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn truncate_message_keeps_first_200_characters() {
    let long = "é".repeat(500);
    let truncated = truncate_message(&long);
    assert_eq!(truncated.chars().count(), MAX_ERROR_CHARS);

    assert_eq!(truncate_message("line one\nline two"), "line one line two");
}

#[test]
fn placeholder_png_is_valid_image_with_text_chunks() {
    let message = format!("quota exceeded {}", "x".repeat(400));
    let bytes = placeholder_png(&message).expect("render placeholder");

    let decoded = image::load_from_memory(&bytes).expect("placeholder decodes");
    assert_eq!(decoded.width(), PLACEHOLDER_WIDTH);
    assert_eq!(decoded.height(), PLACEHOLDER_HEIGHT);

    let reader = png::Decoder::new(Cursor::new(&bytes))
        .read_info()
        .expect("read png info");
    let info = reader.info();
    assert!(
        info.uncompressed_latin1_text
            .iter()
            .any(|chunk| chunk.keyword == "Title" && chunk.text.contains(PLACEHOLDER_HEADING))
    );
    let description = info
        .utf8_text
        .iter()
        .find(|chunk| chunk.keyword == "Description")
        .expect("description chunk")
        .get_text()
        .expect("description text");
    assert!(description.starts_with("quota exceeded"));
    assert!(description.chars().count() <= MAX_ERROR_CHARS);
}

#[test]
fn placeholder_draws_heading_on_dark_background() {
    let canvas = render_placeholder("network unreachable");

    assert_eq!(canvas.get_pixel(0, 0), &Rgb([32, 32, 32]));
    let heading_pixels = canvas
        .pixels()
        .filter(|pixel| **pixel == Rgb([235, 87, 87]))
        .count();
    assert!(heading_pixels > 0);
    let body_pixels = canvas
        .pixels()
        .filter(|pixel| **pixel == Rgb([210, 210, 210]))
        .count();
    assert!(body_pixels > 0);
}

#[test]
fn wrap_keeps_words_together() {
    let lines = wrap_text("alpha beta gamma delta", 11);
    assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
}

#[test]
fn wrap_splits_overlong_words() {
    let lines = wrap_text("abcdefghij xy", 4);
    assert_eq!(lines, vec!["abcd", "efgh", "ij", "xy"]);
}
