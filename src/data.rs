use anyhow::{Result, anyhow};
use std::path::Path;

pub const JPEG_MIME: &str = "image/jpeg";
pub const PNG_MIME: &str = "image/png";
pub const WEBP_MIME: &str = "image/webp";

/// Extensions accepted as manga page images, lower case, without the dot.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

#[derive(Debug, Clone)]
pub struct DataAttachment {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub name: Option<String>,
}

impl DataAttachment {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime: JPEG_MIME.to_string(),
            name: None,
        }
    }
}

pub fn is_image_file(path: &Path) -> bool {
    extension_lower(Some(path))
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// MIME for an accepted image extension.
pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    extension_lower(Some(path)).and_then(|ext| mime_from_extension(&ext))
}

/// Extension first (the file was accepted by its name), then the bytes.
pub fn detect_image_mime(bytes: &[u8], path: Option<&Path>) -> Result<String> {
    if let Some(mime) = extension_lower(path).and_then(|ext| mime_from_extension(&ext)) {
        return Ok(mime.to_string());
    }
    if let Some(mime) = sniff_image_mime(bytes) {
        return Ok(mime.to_string());
    }
    Err(anyhow!(
        "unable to detect image type for '{}'",
        path.map(|value| value.display().to_string())
            .unwrap_or_else(|| "captured bytes".to_string())
    ))
}

pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    let kind = infer::get(bytes)?;
    let detected = kind.mime_type();
    if detected.starts_with("image/") {
        Some(detected)
    } else {
        None
    }
}

fn extension_lower(path: Option<&Path>) -> Option<String> {
    path.and_then(|path| path.extension())
        .and_then(|value| value.to_str())
        .map(|value| value.to_lowercase())
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "jpg" | "jpeg" => Some(JPEG_MIME),
        "png" => Some(PNG_MIME),
        "webp" => Some(WEBP_MIME),
        _ => None,
    }
}
