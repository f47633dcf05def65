use crate::domain::model::{CaptchaChallenge, MULTIPLY_GLYPHS};
use crate::domain::ports::{CaptchaSolver, OcrEngine};
use crate::utils::error::Result;
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::io::Cursor;

/// Pixels kept as foreground: the portal draws its digits in orange.
const FOREGROUND_RED_MIN: u8 = 200;
const FOREGROUND_GREEN: (u8, u8) = (100, 220);
const FOREGROUND_BLUE_MAX: u8 = 80;
const LUMA_THRESHOLD: u8 = 200;
const BORDER: u32 = 10;

/// Cleans the CAPTCHA image, runs OCR on it and evaluates the arithmetic.
pub struct ImageCaptchaSolver<O: OcrEngine> {
    ocr: O,
}

impl<O: OcrEngine> ImageCaptchaSolver<O> {
    pub fn new(ocr: O) -> Self {
        Self { ocr }
    }

    async fn recognize(&self, image: &[u8]) -> Result<String> {
        let cleaned = clean_image(image)?;
        let text = self.ocr.recognize(&cleaned).await?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl<O: OcrEngine> CaptchaSolver for ImageCaptchaSolver<O> {
    async fn solve(&self, image: &[u8]) -> Option<String> {
        let text = match self.recognize(image).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("⚠️ CAPTCHA recognition failed: {}", e);
                return None;
            }
        };
        tracing::info!("OCR text: {:?}", text);

        if text.is_empty() {
            return None;
        }
        Some(interpret(&text))
    }
}

/// Isolates the orange glyphs, binarizes, blanks the frame and re-encodes as PNG.
pub fn clean_image(bytes: &[u8]) -> Result<Vec<u8>> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut cleaned = GrayImage::new(width, height);

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let in_border = x < BORDER
            || y < BORDER
            || x >= width.saturating_sub(BORDER)
            || y >= height.saturating_sub(BORDER);

        let value = if in_border || !is_foreground(r, g, b) || luma(r, g, b) >= LUMA_THRESHOLD {
            255
        } else {
            0
        };
        cleaned.put_pixel(x, y, Luma([value]));
    }

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(cleaned).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn is_foreground(r: u8, g: u8, b: u8) -> bool {
    r > FOREGROUND_RED_MIN && g > FOREGROUND_GREEN.0 && g < FOREGROUND_GREEN.1 && b < FOREGROUND_BLUE_MAX
}

/// ITU-R 601-2 luma.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000) as u8
}

/// Parses `<digits><×><alnum>` after removing whitespace.
pub fn parse_challenge(text: &str) -> Option<CaptchaChallenge> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let glyph_at = compact.find(|c: char| MULTIPLY_GLYPHS.contains(&c))?;
    let (left, rest) = compact.split_at(glyph_at);

    let mut right = rest.chars().skip(1);
    let right_token = right.next()?;
    if right.next().is_some() || !right_token.is_ascii_alphanumeric() {
        return None;
    }
    if left.is_empty() || !left.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    Some(CaptchaChallenge {
        decoded_text: compact.clone(),
        left_operand: left.parse().ok()?,
        right_token,
    })
}

/// The product as a decimal string, or the text itself when it does not
/// look like a challenge. The portal will reject such an answer and the
/// login attempt is retried with a new image.
pub fn interpret(text: &str) -> String {
    match parse_challenge(text).and_then(|c| c.answer().map(|answer| (c, answer))) {
        Some((challenge, answer)) => {
            tracing::info!(
                "{} × {} = {}",
                challenge.left_operand,
                challenge.right_token.to_ascii_uppercase(),
                answer
            );
            answer.to_string()
        }
        None => {
            tracing::warn!("Unrecognised CAPTCHA format, submitting raw text: {:?}", text);
            text.to_string()
        }
    }
}
