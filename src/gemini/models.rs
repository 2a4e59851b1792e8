use base64::{engine::general_purpose, Engine as _};
use std::path::Path;

use crate::error::{ProbeError, Result};
use crate::gemini::types::{
    Content, CountTokensRequest, GenerateContentRequest, GenerationConfig, Part,
};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// 1x1 PNG, sent under an `image/jpeg` label. Proxies are expected to pass it
/// through untouched.
const SAMPLE_IMAGE_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";
const SAMPLE_IMAGE_MIME: &str = "image/jpeg";

pub fn generate_request() -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content::user(vec![Part::text(
            "Hello, please briefly introduce yourself.",
        )])],
        generation_config: Some(GenerationConfig {
            temperature: Some(0.7),
            top_p: Some(0.9),
            top_k: Some(40),
            max_output_tokens: Some(1000),
        }),
    }
}

pub fn stream_request() -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content::user(vec![Part::text("Write an 800-word essay.")])],
        generation_config: Some(GenerationConfig {
            temperature: Some(0.8),
            top_p: Some(0.9),
            top_k: Some(40),
            max_output_tokens: Some(500),
        }),
    }
}

pub fn count_tokens_request() -> CountTokensRequest {
    CountTokensRequest {
        contents: vec![Content::user(vec![Part::text(
            "This is a test sentence used to count tokens.",
        )])],
    }
}

/// Multimodal request. Uses the built-in pixel unless an image part is given.
pub fn image_request(image: Option<Part>) -> GenerateContentRequest {
    let image = image.unwrap_or_else(|| Part::inline(SAMPLE_IMAGE_MIME, SAMPLE_IMAGE_B64));
    GenerateContentRequest {
        contents: vec![Content::user(vec![
            Part::text("Please describe what is in this image."),
            image,
        ])],
        generation_config: Some(GenerationConfig {
            temperature: Some(0.7),
            max_output_tokens: Some(500),
            ..Default::default()
        }),
    }
}

/// Read an image from disk into an inline-data part.
pub fn load_image(path: &Path) -> Result<Part> {
    let bytes = std::fs::read(path).map_err(|e| {
        ProbeError::ConfigError(format!("cannot read image {}: {}", path.display(), e))
    })?;
    Ok(Part::inline(mime_for_path(path), general_purpose::STANDARD.encode(bytes)))
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}
