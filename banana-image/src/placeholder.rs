use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{Rgb, RgbImage};

use crate::FinishError;

pub const PLACEHOLDER_WIDTH: u32 = 1024;
pub const PLACEHOLDER_HEIGHT: u32 = 1024;
pub const PLACEHOLDER_HEADING: &str = "GENERATION FAILED";
pub const MAX_ERROR_CHARS: usize = 200;

const BACKGROUND: Rgb<u8> = Rgb([32, 32, 32]);
const HEADING_COLOR: Rgb<u8> = Rgb([235, 87, 87]);
const BODY_COLOR: Rgb<u8> = Rgb([210, 210, 210]);
const GLYPH_SIZE: u32 = 8;
const HEADING_SCALE: u32 = 5;
const BODY_SCALE: u32 = 2;
const MARGIN: u32 = 64;
const HEADING_TOP: u32 = 320;
const BODY_GAP: u32 = 80;
const LINE_SPACING: u32 = 8;

/// First [`MAX_ERROR_CHARS`] characters of `message`, with line breaks and
/// other control characters flattened to spaces.
pub fn truncate_message(message: &str) -> String {
    message
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .take(MAX_ERROR_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Dark canvas with the failure heading and the (truncated) error text.
pub fn render_placeholder(message: &str) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, BACKGROUND);

    let heading_width = text_width(PLACEHOLDER_HEADING, HEADING_SCALE);
    let heading_x = PLACEHOLDER_WIDTH.saturating_sub(heading_width) / 2;
    draw_text(
        &mut canvas,
        heading_x,
        HEADING_TOP,
        PLACEHOLDER_HEADING,
        HEADING_SCALE,
        HEADING_COLOR,
    );

    let columns = ((PLACEHOLDER_WIDTH - 2 * MARGIN) / (GLYPH_SIZE * BODY_SCALE)) as usize;
    let line_height = GLYPH_SIZE * BODY_SCALE + LINE_SPACING;
    let mut y = HEADING_TOP + GLYPH_SIZE * HEADING_SCALE + BODY_GAP;
    for line in wrap_text(&truncate_message(message), columns) {
        draw_text(&mut canvas, MARGIN, y, &line, BODY_SCALE, BODY_COLOR);
        y += line_height;
    }

    canvas
}

/// PNG bytes for the placeholder. The heading and error text are also stored
/// as `Title` and `Description` text chunks.
pub fn placeholder_png(message: &str) -> Result<Vec<u8>, FinishError> {
    let canvas = render_placeholder(message);
    let mut bytes = Vec::new();

    {
        let mut encoder = png::Encoder::new(&mut bytes, canvas.width(), canvas.height());
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Best);
        encoder.add_text_chunk("Title".to_string(), PLACEHOLDER_HEADING.to_string())?;
        encoder.add_itxt_chunk("Description".to_string(), truncate_message(message))?;

        let mut writer = encoder.write_header()?;
        writer.write_image_data(canvas.as_raw())?;
        writer.finish()?;
    }

    Ok(bytes)
}

fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_SIZE * scale
}

fn draw_text(canvas: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32, color: Rgb<u8>) {
    for (index, ch) in text.chars().enumerate() {
        let glyph = BASIC_FONTS
            .get(ch)
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or([0; 8]);
        let origin_x = x + index as u32 * GLYPH_SIZE * scale;

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                // Bit 0 is the leftmost pixel.
                if bits & (1 << col) == 0 {
                    continue;
                }
                fill_block(
                    canvas,
                    origin_x + col * scale,
                    y + row as u32 * scale,
                    scale,
                    color,
                );
            }
        }
    }
}

fn fill_block(canvas: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    for dy in 0..size {
        for dx in 0..size {
            let (px, py) = (x + dx, y + dy);
            if px < canvas.width() && py < canvas.height() {
                canvas.put_pixel(px, py, color);
            }
        }
    }
}

/// Greedy word wrap; words longer than a line are split.
pub(crate) fn wrap_text(text: &str, columns: usize) -> Vec<String> {
    let columns = columns.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();

        while word.len() > columns {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(columns);
            lines.push(word.into_iter().collect());
            word = rest;
        }

        let current_len = current.chars().count();
        if current_len > 0 && current_len + 1 + word.len() > columns {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
