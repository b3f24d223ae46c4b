mod payload;
mod svg;

pub use payload::{image_payload, ImagePayload, ImageRef, ImageResult, DEFAULT_MIME, SVG_MIME};
pub use svg::sanitize_svg;
