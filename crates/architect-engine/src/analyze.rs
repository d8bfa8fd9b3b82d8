use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::openai::{completion_text, response_json_or_error, OpenAiClient};
use crate::store::AssetStore;
use crate::upload::{jpeg_thumbnail, media_type_for_path};

pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";
const ANALYSIS_MAX_TOKENS: u64 = 1000;
const INLINE_IMAGE_MAX_DIM: u32 = 1536;

pub const ANALYSIS_INSTRUCTION: &str = "Analyze this floorplan and provide detailed feedback on: \
1) Layout efficiency (score out of 100 and specific feedback) \
2) Natural lighting assessment (score and feedback) \
3) Traffic flow analysis (score and feedback). \
Format the response as JSON with the keys \"layout\", \"lighting\" and \"flow\", \
each an object holding a numeric \"score\" and a \"feedback\" array of strings.";

/// Turns a stored floorplan reference into an unvalidated analysis payload.
pub trait AnalysisProvider: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, image_url: &str) -> Result<Value>;
}

pub struct OpenAiVisionAnalyzer {
    client: OpenAiClient,
    model: String,
    assets: Option<Arc<dyn AssetStore>>,
}

impl OpenAiVisionAnalyzer {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            assets: None,
        }
    }

    /// Assets held by `store` are sent inline, since the remote model cannot
    /// fetch them.
    pub fn with_local_assets(mut self, store: Arc<dyn AssetStore>) -> Self {
        self.assets = Some(store);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// With a store attached only its own assets are read from disk; any other
    /// `file://` reference is refused.
    fn image_reference(&self, image_url: &str) -> Result<String> {
        let local_file = image_url.strip_prefix("file://");
        match self.assets.as_ref() {
            Some(store) => {
                if let Some(path) = store.local_path(image_url) {
                    return inline_image(&path);
                }
                if local_file.is_some() {
                    bail!("refusing to read {image_url}: not held by the upload store");
                }
            }
            None => {
                if let Some(raw_path) = local_file {
                    return inline_image(Path::new(raw_path));
                }
            }
        }
        Ok(image_url.to_string())
    }
}

impl AnalysisProvider for OpenAiVisionAnalyzer {
    fn name(&self) -> &str {
        "openai"
    }

    fn analyze(&self, image_url: &str) -> Result<Value> {
        let reference = self.image_reference(image_url)?;
        let payload = analysis_request(&self.model, &reference);
        debug!(model = %self.model, "requesting floorplan analysis");
        let response = self
            .client
            .chat_completion(&payload)
            .context("floorplan analysis request failed")?;
        let analysis = analysis_from_completion(&response)?;
        info!(model = %self.model, "floorplan analysis received");
        Ok(analysis)
    }
}

fn analysis_request(model: &str, image_reference: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    {"type": "text", "text": ANALYSIS_INSTRUCTION},
                    {"type": "image_url", "image_url": {"url": image_reference}}
                ]
            }
        ],
        "max_tokens": ANALYSIS_MAX_TOKENS,
        "response_format": {"type": "json_object"}
    })
}

/// An empty completion is treated as `{}` so the validator reports what is
/// missing; text that is not JSON is an error.
fn analysis_from_completion(response: &Value) -> Result<Value> {
    let Some(text) = completion_text(response) else {
        return Ok(json!({}));
    };
    serde_json::from_str(&text).context("model returned malformed analysis JSON")
}

fn inline_image(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    if let Some(jpeg) = jpeg_thumbnail(&bytes, INLINE_IMAGE_MAX_DIM) {
        return Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg)));
    }
    Ok(format!(
        "data:{};base64,{}",
        media_type_for_path(path),
        BASE64.encode(bytes)
    ))
}

/// Client for a remote `POST /api/analyze` endpoint.
#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    endpoint: String,
    http: HttpClient,
}

impl HttpAnalysisClient {
    pub fn new(base_url: &str, http: HttpClient) -> Self {
        Self {
            endpoint: format!("{}/api/analyze", base_url.trim_end_matches('/')),
            http,
        }
    }
}

impl AnalysisProvider for HttpAnalysisClient {
    fn name(&self) -> &str {
        "http"
    }

    fn analyze(&self, image_url: &str) -> Result<Value> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "imageUrl": image_url }))
            .send()
            .with_context(|| format!("analysis request failed ({})", self.endpoint))?;
        response_json_or_error("Analysis", response)
    }
}

/// Offline analyzer: scores are derived from a hash of the image URL, so the
/// same reference always gets the same result.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunAnalyzer;

impl AnalysisProvider for DryrunAnalyzer {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn analyze(&self, image_url: &str) -> Result<Value> {
        let digest = Sha256::digest(image_url.as_bytes());
        let score = |idx: usize| 50 + u64::from(digest[idx]) % 50;
        Ok(json!({
            "layout": {
                "score": score(0),
                "feedback": [
                    "Open-plan living and dining areas share light well.",
                    "The entry hall uses more area than it needs."
                ]
            },
            "lighting": {
                "score": score(1),
                "feedback": [
                    "South-facing windows cover the main living space.",
                    "Interior bathrooms have no natural light."
                ]
            },
            "flow": {
                "score": score(2),
                "feedback": [
                    "Kitchen to dining circulation is direct.",
                    "Bedrooms are reached through the living room."
                ]
            },
            "source": "dryrun"
        }))
    }
}
