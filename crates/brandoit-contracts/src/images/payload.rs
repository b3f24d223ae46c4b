use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIME: &str = "image/png";
pub const SVG_MIME: &str = "image/svg+xml";

/// Canonical in-memory image: bare base64 bytes plus a populated mime type.
/// `base64_data` never carries a `data:` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub mime_type: String,
    pub base64_data: String,
}

/// Loosely-typed image reference as it arrives from a provider or a stored
/// record: any of the fields may be absent or redundant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub image_url: Option<String>,
    pub base64_data: Option<String>,
    pub mime_type: Option<String>,
}

/// Provider output validated at the boundary: either inline bytes or a URL
/// the caller must fetch through its own transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageResult {
    InlineBase64 {
        mime_type: Option<String>,
        data: String,
    },
    RemoteUrl {
        url: String,
    },
}

impl ImageResult {
    pub fn as_image_ref(&self) -> ImageRef {
        match self {
            ImageResult::InlineBase64 { mime_type, data } => ImageRef {
                image_url: None,
                base64_data: Some(data.clone()),
                mime_type: mime_type.clone(),
            },
            ImageResult::RemoteUrl { url } => ImageRef {
                image_url: Some(url.clone()),
                base64_data: None,
                mime_type: None,
            },
        }
    }
}

// Optional parameter segment (charset etc.) tolerated between the mime type
// and the case-insensitive base64 marker.
static DATA_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?si)^data:([^;,]+)?(?:;[^,]*?)?;base64,(.*)$").expect("data URL pattern")
});

/// Extract the canonical payload from a loosely-typed image reference.
/// Returns `None` when nothing inline is available and the caller must
/// fetch `image_url` itself. String-level parsing only: base64 alphabet
/// validity is checked by whoever decodes.
pub fn image_payload(image: &ImageRef) -> Option<ImagePayload> {
    if let Some(inline) = non_empty(image.base64_data.as_deref()) {
        if let Some((mime, data)) = parse_data_url(inline) {
            return Some(ImagePayload {
                mime_type: mime.or_else(|| supplied_mime(image)).unwrap_or_else(default_mime),
                base64_data: data,
            });
        }
        return Some(ImagePayload {
            mime_type: supplied_mime(image).unwrap_or_else(default_mime),
            base64_data: inline.to_string(),
        });
    }
    if let Some(url) = non_empty(image.image_url.as_deref()) {
        if let Some((mime, data)) = parse_data_url(url) {
            return Some(ImagePayload {
                mime_type: mime.or_else(|| supplied_mime(image)).unwrap_or_else(default_mime),
                base64_data: data,
            });
        }
    }
    None
}

fn parse_data_url(value: &str) -> Option<(Option<String>, String)> {
    let captures = DATA_URL.captures(value)?;
    let mime = captures
        .get(1)
        .map(|m| m.as_str().trim().to_string())
        .filter(|m| !m.is_empty());
    let data = captures.get(2).map(|m| m.as_str().to_string())?;
    Some((mime, data))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn supplied_mime(image: &ImageRef) -> Option<String> {
    non_empty(image.mime_type.as_deref()).map(str::to_string)
}

fn default_mime() -> String {
    DEFAULT_MIME.to_string()
}
