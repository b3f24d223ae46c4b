use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use brandoit_contracts::events::EventWriter;
use brandoit_contracts::export::export_filename;
use brandoit_contracts::history::{MarkEntry, SessionManifest};
use brandoit_contracts::images::{
    image_payload, sanitize_svg, ImagePayload, ImageResult, SVG_MIME,
};
use brandoit_contracts::ratio::{
    parse_ratio, ratio_policy, resolve_safe_ratio, AspectRatioOption, RatioPolicy,
};
use image::DynamicImage;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    pub output_format: String,
    pub n: u64,
    pub reference_images: Vec<String>,
    pub provider_options: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub provider_request: Map<String, Value>,
    pub warnings: Vec<String>,
    pub images: Vec<ImageResult>,
}

pub trait ImageProvider: Send + Sync {
    fn id(&self) -> &str;

    fn ratio_policy(&self) -> RatioPolicy {
        ratio_policy(self.id())
    }

    fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Box<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.id().to_string(), Box::new(provider));
    }

    pub fn get(&self, id: &str) -> Option<&dyn ImageProvider> {
        self.providers.get(id).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry() -> ImageProviderRegistry {
    let mut providers = ImageProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new());
    providers.register(ImagenProvider::new());
    providers
}

/// Offline provider: a flat-color artifact derived from the prompt hash.
/// Deterministic for a fixed prompt and index.
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn id(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let (width, height) = dims_for_ratio(&request.aspect_ratio);
        let want_svg = normalize_output_extension(&request.output_format) == "svg";
        let mut images = Vec::new();
        for idx in 0..request.n.max(1) {
            let image = if want_svg {
                dryrun_svg(width, height, &request.prompt, idx)
            } else {
                dryrun_png(width, height, &request.prompt, idx)?
            };
            images.push(image);
        }
        Ok(ProviderResponse {
            provider_request: map_object(json!({
                "prompt": request.prompt,
                "aspect_ratio": request.aspect_ratio,
                "output_format": request.output_format,
                "n": request.n.max(1),
            })),
            warnings: Vec::new(),
            images,
        })
    }
}

fn dryrun_png(width: u32, height: u32, prompt: &str, idx: u64) -> Result<ImageResult> {
    let (r, g, b) = color_from_prompt(prompt, idx);
    let mut canvas = image::RgbImage::new(width, height);
    for pixel in canvas.pixels_mut() {
        *pixel = image::Rgb([r, g, b]);
    }
    let mut bytes: Vec<u8> = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .context("dryrun png encode failed")?;
    Ok(ImageResult::InlineBase64 {
        mime_type: Some("image/png".to_string()),
        data: BASE64.encode(bytes),
    })
}

fn dryrun_svg(width: u32, height: u32, prompt: &str, idx: u64) -> ImageResult {
    let (r, g, b) = color_from_prompt(prompt, idx);
    let markup = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\">\
<rect width=\"100%\" height=\"100%\" fill=\"#{r:02x}{g:02x}{b:02x}\"/></svg>"
    );
    ImageResult::InlineBase64 {
        mime_type: Some(SVG_MIME.to_string()),
        data: BASE64.encode(markup.as_bytes()),
    }
}

/// Broad-ratio HTTP provider: the requested ratio passes through verbatim.
pub struct GeminiProvider {
    api_base: String,
    http: HttpClient,
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            api_base: api_base_from_env(
                "GEMINI_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_parts(request: &ProviderRequest) -> Result<Vec<Value>> {
        let mut parts = Vec::new();
        for reference in &request.reference_images {
            parts.push(image_part_from_path(Path::new(reference))?);
        }
        parts.push(json!({ "text": request.prompt }));
        Ok(parts)
    }

    fn extract_image_results(payload: &Value) -> Vec<ImageResult> {
        let mut images = Vec::new();
        let Some(candidates) = payload.get("candidates").and_then(Value::as_array) else {
            return images;
        };
        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array);
            let Some(parts) = parts else {
                continue;
            };
            for part in parts {
                if let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                {
                    let data = inline
                        .get("data")
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|value| !value.is_empty());
                    if let Some(data) = data {
                        let mime_type = inline
                            .get("mimeType")
                            .or_else(|| inline.get("mime_type"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        images.push(ImageResult::InlineBase64 {
                            mime_type,
                            data: data.to_string(),
                        });
                    }
                    continue;
                }
                if let Some(uri) = part
                    .get("fileData")
                    .and_then(|file| file.get("fileUri"))
                    .and_then(Value::as_str)
                {
                    images.push(ImageResult::RemoteUrl {
                        url: uri.to_string(),
                    });
                }
            }
        }
        images
    }
}

impl ImageProvider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let model = string_option(&request.provider_options, "model")
            .unwrap_or_else(|| "gemini-2.5-flash-image".to_string());
        let endpoint = self.endpoint_for_model(&model);

        let mut generation_config = Map::new();
        generation_config.insert(
            "candidateCount".to_string(),
            Value::Number(request.n.max(1).into()),
        );
        generation_config.insert(
            "responseModalities".to_string(),
            Value::Array(vec![Value::String("IMAGE".to_string())]),
        );
        let mut image_config = Map::new();
        if !request.aspect_ratio.is_empty() {
            image_config.insert(
                "aspectRatio".to_string(),
                Value::String(request.aspect_ratio.clone()),
            );
        }
        generation_config.insert("imageConfig".to_string(), Value::Object(image_config));

        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            Value::Array(vec![json!({
                "role": "user",
                "parts": Self::build_parts(request)?,
            })]),
        );
        payload.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );

        let payload_value = Value::Object(payload);
        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .json(&payload_value)
            .send()
            .context("Gemini request failed")?;
        let response_payload = response_json_or_error("Gemini", response)?;

        let images = Self::extract_image_results(&response_payload);
        if images.is_empty() {
            bail!("Gemini response contained no image parts");
        }
        Ok(ProviderResponse {
            provider_request: map_object(redact_payload(&payload_value)),
            warnings: Vec::new(),
            images,
        })
    }
}

/// Fixed-enumeration HTTP provider: accepts only its documented ratio
/// list; the engine resolves the ratio before dispatch.
pub struct ImagenProvider {
    api_base: String,
    http: HttpClient,
}

impl Default for ImagenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ImagenProvider {
    pub fn new() -> Self {
        Self {
            api_base: api_base_from_env(
                "IMAGEN_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("IMAGEN_API_KEY")
            .or_else(|| non_empty_env("GEMINI_API_KEY"))
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        format!("{}/models/{}:predict", self.api_base, model.trim())
    }

    fn extract_image_results(payload: &Value) -> Vec<ImageResult> {
        let mut images = Vec::new();
        let Some(predictions) = payload.get("predictions").and_then(Value::as_array) else {
            return images;
        };
        for prediction in predictions {
            let data = prediction
                .get("bytesBase64Encoded")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(data) = data {
                let mime_type = prediction
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                images.push(ImageResult::InlineBase64 {
                    mime_type,
                    data: data.to_string(),
                });
            }
        }
        images
    }
}

impl ImageProvider for ImagenProvider {
    fn id(&self) -> &str {
        "imagen"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let Some(api_key) = Self::api_key() else {
            bail!("IMAGEN_API_KEY, GEMINI_API_KEY, or GOOGLE_API_KEY not set");
        };
        if !request.reference_images.is_empty() {
            bail!("Imagen provider supports text-to-image only.");
        }
        let model = string_option(&request.provider_options, "model")
            .unwrap_or_else(|| "imagen-4.0-generate-001".to_string());
        let endpoint = self.endpoint_for_model(&model);

        let payload = json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": {
                "sampleCount": request.n.max(1),
                "aspectRatio": request.aspect_ratio,
            },
        });

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .context("Imagen request failed")?;
        let response_payload = response_json_or_error("Imagen", response)?;

        let images = Self::extract_image_results(&response_payload);
        if images.is_empty() {
            bail!("Imagen response contained no predictions");
        }
        Ok(ProviderResponse {
            provider_request: map_object(redact_payload(&payload)),
            warnings: Vec::new(),
            images,
        })
    }
}

enum PreparedArtifact {
    Inline {
        bytes: Vec<u8>,
        mime_type: String,
        ext: &'static str,
    },
    Remote {
        url: String,
    },
}

/// Orchestrates one generation session: resolves ratios, dispatches to a
/// provider, normalizes and sanitizes payloads, and keeps the session
/// manifest and event log current.
pub struct StudioEngine {
    out_dir: PathBuf,
    events: EventWriter,
    session: SessionManifest,
    providers: ImageProviderRegistry,
    ratio_options: Vec<AspectRatioOption>,
}

impl StudioEngine {
    pub fn create(
        out_dir: impl Into<PathBuf>,
        prompt_seed: &str,
        ratio_options: Vec<AspectRatioOption>,
    ) -> Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let session = SessionManifest::new(out_dir.join("session.json"), prompt_seed);
        let events = EventWriter::new(out_dir.join("events.jsonl"), session.session_id.clone());
        Ok(Self {
            out_dir,
            events,
            session,
            providers: default_provider_registry(),
            ratio_options,
        })
    }

    pub fn open(out_dir: impl Into<PathBuf>, ratio_options: Vec<AspectRatioOption>) -> Result<Self> {
        let out_dir = out_dir.into();
        let manifest_path = out_dir.join("session.json");
        if !manifest_path.exists() {
            bail!("no session manifest at {}", manifest_path.display());
        }
        let session = SessionManifest::load(&manifest_path);
        let events = EventWriter::new(out_dir.join("events.jsonl"), session.session_id.clone());
        Ok(Self {
            out_dir,
            events,
            session,
            providers: default_provider_registry(),
            ratio_options,
        })
    }

    pub fn session(&self) -> &SessionManifest {
        &self.session
    }

    pub fn register_provider<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers.register(provider);
    }

    pub fn generate(&mut self, prompt: &str, settings: &Map<String, Value>) -> Result<MarkEntry> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            bail!("prompt is empty");
        }
        self.run_mark(prompt.to_string(), None, settings)
    }

    pub fn refine(
        &mut self,
        instruction: &str,
        settings: &Map<String, Value>,
    ) -> Result<MarkEntry> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            bail!("refinement instruction is empty");
        }
        let Some(latest) = self.session.latest_mark() else {
            bail!("nothing to refine yet; generate first");
        };
        let prompt = format!("{}, {instruction}", latest.prompt);
        self.run_mark(prompt, Some(instruction.to_string()), settings)
    }

    pub fn export(
        &self,
        mark_number: Option<u64>,
        format: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let mark = match mark_number {
            Some(number) => self
                .session
                .mark_by_number(number)
                .with_context(|| format!("no mark numbered {number}"))?,
            None => self.session.latest_mark().context("session has no marks")?,
        };
        let source = mark
            .artifacts
            .iter()
            .find_map(|row| row.get("image_path").and_then(Value::as_str))
            .map(PathBuf::from)
            .context("mark has no stored artifact bytes")?;

        let ext = normalize_output_extension(format);
        let filename = export_filename(&mark.prompt, mark.number as i64, ext);
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("failed to create {}", dest_dir.display()))?;
        let dest = dest_dir.join(&filename);

        let source_ext = source
            .extension()
            .and_then(|value| value.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if source_ext == ext {
            fs::copy(&source, &dest)
                .with_context(|| format!("failed to copy {}", source.display()))?;
        } else if source_ext == "svg" || ext == "svg" {
            bail!(
                "cannot convert between vector and raster exports (artifact is {source_ext}, requested {ext})"
            );
        } else {
            let decoded = image::open(&source)
                .with_context(|| format!("failed to decode {}", source.display()))?;
            let decoded = if ext == "jpg" {
                DynamicImage::ImageRgb8(decoded.to_rgb8())
            } else {
                decoded
            };
            decoded
                .save(&dest)
                .with_context(|| format!("failed to write {}", dest.display()))?;
        }

        self.events.emit(
            "export_written",
            map_object(json!({
                "mark": mark.number,
                "label": mark.label,
                "format": ext,
                "path": dest.to_string_lossy(),
            })),
        )?;
        Ok(dest)
    }

    fn run_mark(
        &mut self,
        prompt: String,
        instruction: Option<String>,
        settings: &Map<String, Value>,
    ) -> Result<MarkEntry> {
        let provider_id = string_option(settings, "provider").unwrap_or_else(|| "gemini".to_string());
        let requested_ratio = settings
            .get("aspect_ratio")
            .and_then(Value::as_str)
            .unwrap_or("");
        let aspect_ratio = resolve_safe_ratio(&provider_id, requested_ratio, &self.ratio_options);
        let output_format = string_option(settings, "output_format").unwrap_or_else(|| "png".to_string());
        let n = settings
            .get("n")
            .and_then(Value::as_u64)
            .filter(|value| *value > 0)
            .unwrap_or(1);
        let reference_images = settings
            .get("reference_images")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();
        let provider_options = settings
            .get("provider_options")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        self.events.emit(
            "plan_preview",
            map_object(json!({
                "plan": {
                    "provider": provider_id,
                    "aspect_ratio": aspect_ratio,
                    "output_format": output_format,
                    "n": n,
                }
            })),
        )?;

        let Some(provider) = self.providers.get(&provider_id) else {
            let available = self.providers.names().join(", ");
            let error =
                format!("provider '{provider_id}' not registered (available: [{available}])");
            self.events.emit(
                "generation_failed",
                map_object(json!({ "provider": provider_id, "error": error })),
            )?;
            bail!("{error}");
        };

        let request = ProviderRequest {
            prompt: compose_prompt(&prompt, settings),
            aspect_ratio: aspect_ratio.clone(),
            output_format: output_format.clone(),
            n,
            reference_images,
            provider_options,
        };

        let response = match provider.generate(&request) {
            Ok(response) => response,
            Err(err) => {
                self.events.emit(
                    "generation_failed",
                    map_object(json!({
                        "provider": provider_id,
                        "error": format!("{err:#}"),
                    })),
                )?;
                return Err(err).context("provider generation failed");
            }
        };

        let mut warnings = response.warnings.clone();
        let prepared = prepare_artifacts(&response.images, &output_format, &mut warnings);
        if prepared.is_empty() {
            let error = format!(
                "provider returned no usable images ({})",
                warnings.join("; ")
            );
            self.events.emit(
                "generation_failed",
                map_object(json!({ "provider": provider_id, "error": error })),
            )?;
            bail!("{error}");
        }

        let mark = match instruction {
            Some(step) => self.session.add_refinement(
                prompt,
                step,
                aspect_ratio.clone(),
                provider_id.clone(),
            ),
            None => self
                .session
                .add_original(prompt, aspect_ratio.clone(), provider_id.clone()),
        };
        self.events.emit(
            "mark_created",
            map_object(json!({
                "mark_id": mark.mark_id,
                "number": mark.number,
                "label": mark.label,
                "provider": provider_id,
                "aspect_ratio": aspect_ratio,
                "provider_request": Value::Object(response.provider_request.clone()),
                "warnings": warnings,
            })),
        )?;

        let stamp = timestamp_millis();
        for (idx, artifact) in prepared.into_iter().enumerate() {
            let row = self.write_artifact(&mark, artifact, idx as u64, stamp)?;
            self.events.emit(
                "artifact_created",
                map_object(json!({
                    "mark_id": mark.mark_id,
                    "artifact_id": row.get("artifact_id"),
                    "image_path": row.get("image_path"),
                    "image_url": row.get("image_url"),
                })),
            )?;
            self.session.add_artifact(&mark.mark_id, row);
        }
        self.session.save()?;

        Ok(self
            .session
            .marks
            .iter()
            .find(|entry| entry.mark_id == mark.mark_id)
            .cloned()
            .unwrap_or(mark))
    }

    fn write_artifact(
        &self,
        mark: &MarkEntry,
        artifact: PreparedArtifact,
        idx: u64,
        stamp: u128,
    ) -> Result<Map<String, Value>> {
        let mut row = Map::new();
        match artifact {
            PreparedArtifact::Inline {
                bytes,
                mime_type,
                ext,
            } => {
                let image_path = self.out_dir.join(format!("artifact-{stamp}-{idx:02}.{ext}"));
                fs::write(&image_path, &bytes)
                    .with_context(|| format!("failed to write {}", image_path.display()))?;
                row.insert(
                    "artifact_id".to_string(),
                    Value::String(short_id(&mark.mark_id, idx)),
                );
                row.insert(
                    "image_path".to_string(),
                    Value::String(image_path.to_string_lossy().to_string()),
                );
                row.insert("mime_type".to_string(), Value::String(mime_type));
            }
            PreparedArtifact::Remote { url } => {
                row.insert(
                    "artifact_id".to_string(),
                    Value::String(short_id(&mark.mark_id, idx)),
                );
                row.insert("image_url".to_string(), Value::String(url));
            }
        }
        Ok(row)
    }
}

/// Normalize provider output into writable artifacts. Inline SVG markup is
/// sanitized here; callers downstream only ever see filtered bytes.
/// Unusable entries are skipped with a warning.
fn prepare_artifacts(
    images: &[ImageResult],
    output_format: &str,
    warnings: &mut Vec<String>,
) -> Vec<PreparedArtifact> {
    let mut prepared = Vec::new();
    for (idx, image) in images.iter().enumerate() {
        let Some(payload) = image_payload(&image.as_image_ref()) else {
            match image {
                ImageResult::RemoteUrl { url } => {
                    warnings.push(format!("artifact {idx} left as remote URL; bytes not fetched"));
                    prepared.push(PreparedArtifact::Remote { url: url.clone() });
                }
                ImageResult::InlineBase64 { .. } => {
                    warnings.push(format!("artifact {idx} had no usable inline payload"));
                }
            }
            continue;
        };

        let payload = if payload.mime_type.eq_ignore_ascii_case(SVG_MIME) {
            match sanitize_inline_svg(&payload) {
                Ok(clean) => clean,
                Err(err) => {
                    warnings.push(format!("artifact {idx} dropped: {err:#}"));
                    continue;
                }
            }
        } else {
            payload
        };

        match BASE64.decode(payload.base64_data.as_bytes()) {
            Ok(bytes) => {
                let ext = extension_for_mime(&payload.mime_type)
                    .unwrap_or_else(|| normalize_output_extension(output_format));
                prepared.push(PreparedArtifact::Inline {
                    bytes,
                    mime_type: payload.mime_type,
                    ext,
                });
            }
            Err(err) => {
                warnings.push(format!("artifact {idx} base64 decode failed: {err}"));
            }
        }
    }
    prepared
}

fn sanitize_inline_svg(payload: &ImagePayload) -> Result<ImagePayload> {
    let bytes = BASE64
        .decode(payload.base64_data.as_bytes())
        .context("svg payload base64 decode failed")?;
    let markup = String::from_utf8(bytes).context("svg payload is not UTF-8")?;
    let clean = sanitize_svg(&markup);
    Ok(ImagePayload {
        mime_type: payload.mime_type.clone(),
        base64_data: BASE64.encode(clean.as_bytes()),
    })
}

fn compose_prompt(prompt: &str, settings: &Map<String, Value>) -> String {
    let mut parts = vec![prompt.trim().to_string()];
    if let Some(graphic_type) = string_option(settings, "graphic_type") {
        parts.push(format!("rendered as a {graphic_type}"));
    }
    if let Some(style) = string_option(settings, "style") {
        parts.push(format!("in a {style} style"));
    }
    if let Some(palette) = string_option(settings, "palette") {
        parts.push(format!("using a {palette} color palette"));
    }
    parts.join(", ")
}

fn dims_for_ratio(aspect_ratio: &str) -> (u32, u32) {
    const BASE: f64 = 256.0;
    let ratio = parse_ratio(aspect_ratio).unwrap_or(1.0);
    if ratio >= 1.0 {
        (((BASE * ratio).round() as u32).max(1), BASE as u32)
    } else {
        (BASE as u32, ((BASE / ratio).round() as u32).max(1))
    }
}

fn normalize_output_extension(output_format: &str) -> &'static str {
    let mut lowered = output_format.trim().to_ascii_lowercase();
    if let Some(value) = lowered.strip_prefix("image/") {
        lowered = value.to_string();
    }
    match lowered.as_str() {
        "jpg" | "jpeg" => "jpg",
        "webp" => "webp",
        "svg" | "svg+xml" => "svg",
        _ => "png",
    }
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

fn image_part_from_path(path: &Path) -> Result<Value> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let mime = mime_for_path(path).unwrap_or("image/png");
    Ok(json!({
        "inlineData": {
            "mimeType": mime,
            "data": BASE64.encode(bytes),
        }
    }))
}

/// Inline image bytes never land in a manifest or event verbatim.
fn redact_payload(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(redact_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "data" | "b64_json" | "bytesbase64encoded" | "image" | "image_bytes"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), redact_payload(row));
            }
            Value::Object(out)
        }
    }
}

fn response_json_or_error(provider: &str, response: reqwest::blocking::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().unwrap_or_default();
    if !status.is_success() {
        bail!(
            "{provider} request failed with {status}: {}",
            truncate_text(&body, 512)
        );
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} returned a non-JSON body"))
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

fn string_option(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn api_base_from_env(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

fn color_from_prompt(prompt: &str, idx: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(seed: &str, idx: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use brandoit_contracts::history::MarkKind;
    use brandoit_contracts::images::ImageResult;
    use brandoit_contracts::ratio::RatioPolicy;
    use serde_json::{json, Map, Value};

    use super::{
        dims_for_ratio, dryrun_png, normalize_output_extension, redact_payload, DryrunProvider,
        ImageProvider, ImagenProvider, ProviderRequest, ProviderResponse, StudioEngine,
    };

    fn dryrun_settings() -> Map<String, Value> {
        let mut settings = Map::new();
        settings.insert("provider".to_string(), json!("dryrun"));
        settings
    }

    struct StubProvider {
        id: &'static str,
        images: Vec<ImageResult>,
    }

    impl ImageProvider for StubProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn generate(&self, _request: &ProviderRequest) -> anyhow::Result<ProviderResponse> {
            Ok(ProviderResponse {
                provider_request: Map::new(),
                warnings: Vec::new(),
                images: self.images.clone(),
            })
        }
    }

    #[test]
    fn dryrun_generate_writes_artifacts_and_marks() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = StudioEngine::create(temp.path(), "neon cafe logo", Vec::new())?;

        let mut settings = dryrun_settings();
        settings.insert("aspect_ratio".to_string(), json!("4:3"));
        let mark = engine.generate("neon cafe logo", &settings)?;

        assert_eq!(mark.number, 1);
        assert_eq!(mark.label, "Mark I");
        assert_eq!(mark.kind, MarkKind::Original);
        assert_eq!(mark.aspect_ratio, "4:3");
        assert_eq!(mark.artifacts.len(), 1);

        let image_path = mark.artifacts[0]
            .get("image_path")
            .and_then(Value::as_str)
            .expect("image path recorded");
        assert!(image_path.ends_with(".png"));
        assert!(fs::metadata(image_path)?.len() > 0);
        assert!(temp.path().join("session.json").exists());

        let events = fs::read_to_string(temp.path().join("events.jsonl"))?;
        let types: Vec<String> = events
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(types, vec!["plan_preview", "mark_created", "artifact_created"]);
        Ok(())
    }

    #[test]
    fn refine_appends_next_mark() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = StudioEngine::create(temp.path(), "poster", Vec::new())?;
        let settings = dryrun_settings();

        engine.generate("poster", &settings)?;
        let second = engine.refine("make it warmer", &settings)?;

        assert_eq!(second.number, 2);
        assert_eq!(second.label, "Mark II");
        assert_eq!(second.kind, MarkKind::Refinement);
        assert_eq!(second.instruction.as_deref(), Some("make it warmer"));
        assert!(second.prompt.contains("poster"));
        assert!(second.prompt.contains("make it warmer"));
        Ok(())
    }

    #[test]
    fn refine_without_a_mark_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = StudioEngine::create(temp.path(), "poster", Vec::new())?;
        assert!(engine.refine("warmer", &dryrun_settings()).is_err());
        Ok(())
    }

    #[test]
    fn svg_artifacts_are_sanitized_before_writing() -> anyhow::Result<()> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;

        let temp = tempfile::tempdir()?;
        let mut engine = StudioEngine::create(temp.path(), "badge", Vec::new())?;
        let dirty = r#"<svg><script>alert(1)</script><rect onclick="x()"/></svg>"#;
        engine.register_provider(StubProvider {
            id: "vector-stub",
            images: vec![ImageResult::InlineBase64 {
                mime_type: Some("image/svg+xml".to_string()),
                data: BASE64.encode(dirty.as_bytes()),
            }],
        });

        let mut settings = Map::new();
        settings.insert("provider".to_string(), json!("vector-stub"));
        settings.insert("output_format".to_string(), json!("svg"));
        let mark = engine.generate("badge", &settings)?;

        let image_path = mark.artifacts[0]
            .get("image_path")
            .and_then(Value::as_str)
            .expect("image path recorded");
        assert!(image_path.ends_with(".svg"));
        let written = fs::read_to_string(image_path)?;
        assert!(!written.contains("<script"));
        assert!(!written.contains("onclick="));
        assert!(written.contains("<rect"));
        Ok(())
    }

    #[test]
    fn enumerated_provider_requests_are_snapped_before_dispatch() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = StudioEngine::create(temp.path(), "banner", Vec::new())?;
        let ImageResult::InlineBase64 { mime_type, data } = dryrun_png(8, 8, "banner", 0)? else {
            panic!("dryrun png is inline");
        };
        engine.register_provider(StubProvider {
            id: "imagen",
            images: vec![ImageResult::InlineBase64 { mime_type, data }],
        });

        let mut settings = Map::new();
        settings.insert("provider".to_string(), json!("imagen"));
        settings.insert("aspect_ratio".to_string(), json!("1:2"));
        let mark = engine.generate("banner", &settings)?;
        assert_eq!(mark.aspect_ratio, "9:16");

        let mut exact = Map::new();
        exact.insert("provider".to_string(), json!("imagen"));
        exact.insert("aspect_ratio".to_string(), json!("4:3"));
        let mark = engine.generate("banner", &exact)?;
        assert_eq!(mark.aspect_ratio, "4:3");
        Ok(())
    }

    #[test]
    fn remote_urls_are_recorded_without_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = StudioEngine::create(temp.path(), "banner", Vec::new())?;
        engine.register_provider(StubProvider {
            id: "remote-stub",
            images: vec![ImageResult::RemoteUrl {
                url: "https://example.com/x.png".to_string(),
            }],
        });

        let mut settings = Map::new();
        settings.insert("provider".to_string(), json!("remote-stub"));
        let mark = engine.generate("banner", &settings)?;

        assert_eq!(
            mark.artifacts[0].get("image_url"),
            Some(&json!("https://example.com/x.png"))
        );
        assert!(mark.artifacts[0].get("image_path").is_none());

        let export = engine.export(None, "png", &temp.path().join("exports"));
        assert!(export.is_err());
        Ok(())
    }

    #[test]
    fn export_uses_versioned_filename() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = StudioEngine::create(temp.path(), "My Cool Chart", Vec::new())?;
        engine.generate("My Cool Chart", &dryrun_settings())?;

        let dest_dir = temp.path().join("exports");
        let exported = engine.export(None, "png", &dest_dir)?;
        assert_eq!(
            exported.file_name().and_then(|name| name.to_str()),
            Some("my-cool-chart-mark-i.png")
        );
        assert!(exported.exists());
        Ok(())
    }

    #[test]
    fn export_converts_raster_formats() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = StudioEngine::create(temp.path(), "chart", Vec::new())?;
        engine.generate("chart", &dryrun_settings())?;

        let dest_dir = temp.path().join("exports");
        let exported = engine.export(None, "jpg", &dest_dir)?;
        assert_eq!(
            exported.file_name().and_then(|name| name.to_str()),
            Some("chart-mark-i.jpg")
        );
        assert!(image::open(&exported).is_ok());
        Ok(())
    }

    #[test]
    fn unknown_provider_is_reported_with_available_names() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = StudioEngine::create(temp.path(), "chart", Vec::new())?;
        let mut settings = Map::new();
        settings.insert("provider".to_string(), json!("nonesuch"));
        let err = engine
            .generate("chart", &settings)
            .err()
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();
        assert!(err.contains("nonesuch"));
        assert!(err.contains("dryrun"));
        Ok(())
    }

    #[test]
    fn provider_ratio_policies_follow_the_constraint_table() {
        assert_eq!(DryrunProvider.ratio_policy(), RatioPolicy::Unrestricted);
        assert!(matches!(
            ImagenProvider::new().ratio_policy(),
            RatioPolicy::Enumerated(_)
        ));
    }

    #[test]
    fn dims_track_the_requested_ratio() {
        assert_eq!(dims_for_ratio("1:1"), (256, 256));
        assert_eq!(dims_for_ratio("2:1"), (512, 256));
        assert_eq!(dims_for_ratio("1:2"), (256, 512));
        assert_eq!(dims_for_ratio("garbage"), (256, 256));
    }

    #[test]
    fn output_extensions_normalize() {
        assert_eq!(normalize_output_extension("PNG"), "png");
        assert_eq!(normalize_output_extension("image/jpeg"), "jpg");
        assert_eq!(normalize_output_extension("svg"), "svg");
        assert_eq!(normalize_output_extension("tiff"), "png");
    }

    #[test]
    fn redaction_masks_inline_bytes() {
        let payload = json!({
            "instances": [{ "prompt": "hello" }],
            "predictions": [{ "bytesBase64Encoded": "AAAA", "mimeType": "image/png" }],
            "contents": [{ "parts": [{ "inlineData": { "data": "BBBB" } }] }],
        });
        let redacted = redact_payload(&payload);
        assert_eq!(
            redacted["predictions"][0]["bytesBase64Encoded"],
            json!("<omitted>")
        );
        assert_eq!(
            redacted["contents"][0]["parts"][0]["inlineData"]["data"],
            json!("<omitted>")
        );
        assert_eq!(redacted["instances"][0]["prompt"], json!("hello"));
    }
}
