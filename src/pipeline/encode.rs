//! Image encoding: `DynamicImage` → PNG bytes → base64 `ImageData`.
//!
//! VLM APIs (OpenAI, Anthropic, Gemini) accept images as base64 data-URIs
//! embedded in the JSON request body. PNG is chosen over JPEG because it is
//! lossless; pencil strokes on a grey scan are exactly what JPEG artefacts
//! smear first.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap PNG bytes for the VLM API.
///
/// ## Why `detail: "high"`?
/// OpenAI's tiling algorithm divides images into 512 px tiles. `detail: "high"`
/// enables the full tile budget so small handwriting stays legible;
/// `detail: "low"` forces a single 512 px overview tile.
pub fn to_image_data(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
