use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// An image file staged for attachment to the next message: a local
/// reference plus the base64 payload sent on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub url: String,
    pub data: String,
    pub mime_type: String,
}

pub fn data_url(mime_type: &str, base64_data: &str) -> String {
    format!("data:{};base64,{}", mime_type, base64_data)
}

/// Splits a `data:<mime>;base64,<payload>` URL into its MIME type and
/// base64 payload.
pub fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;
    Some((mime_type, data))
}

pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Reads one image file and prepares it for attachment.
pub fn load_attachment(path: &Path) -> Result<Upload> {
    let mime_type = mime_for_path(path);
    if !mime_type.starts_with("image/") {
        bail!("Not an image file: {}", path.display());
    }
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Upload {
        url: format!("file://{}", path.display()),
        data: BASE64_STANDARD.encode(&bytes),
        mime_type: mime_type.to_string(),
    })
}

/// Decodes a data URL to a fresh file under `dir` and returns its path.
pub fn save_data_url(dir: &Path, url: &str) -> Result<PathBuf> {
    let (mime_type, data) =
        parse_data_url(url).with_context(|| format!("Not a data URL: {}", summarize_url(url)))?;
    let bytes = BASE64_STANDARD
        .decode(data)
        .context("Invalid base64 payload in data URL")?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    let path = dir.join(format!("{}.{}", Uuid::new_v4(), extension_for_mime(mime_type)));
    fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Saved image to {}", path.display());
    Ok(path)
}

/// Short human-readable form of an image reference; data URLs are far too
/// long to render verbatim.
pub fn summarize_url(url: &str) -> String {
    match parse_data_url(url) {
        Some((mime_type, data)) => format!("data:{} ({} KiB)", mime_type, data.len() / 1024),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_round_trips() {
        let url = data_url("image/png", "aGVsbG8=");
        assert_eq!(parse_data_url(&url), Some(("image/png", "aGVsbG8=")));
        assert_eq!(parse_data_url("https://example.com/cat.png"), None);
    }

    #[test]
    fn mime_is_derived_from_extension() {
        assert_eq!(mime_for_path(Path::new("a/b/cat.PNG")), "image/png");
        assert_eq!(mime_for_path(Path::new("photo.jpeg")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("notes.txt")), "application/octet-stream");
    }

    #[test]
    fn load_attachment_rejects_non_images() {
        assert!(load_attachment(Path::new("readme.md")).is_err());
    }

    #[test]
    fn save_data_url_writes_decoded_bytes() {
        let dir = std::env::temp_dir().join(format!("gemchat-test-{}", Uuid::new_v4()));
        let url = data_url("image/png", &BASE64_STANDARD.encode(b"fake-png"));
        let path = save_data_url(&dir, &url).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"fake-png");
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn summarize_url_shortens_data_urls() {
        let url = data_url("image/png", &"A".repeat(4096));
        assert_eq!(summarize_url(&url), "data:image/png (4 KiB)");
        assert_eq!(summarize_url("file:///tmp/x.png"), "file:///tmp/x.png");
    }
}
