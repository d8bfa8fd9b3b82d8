use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::openai::response_json_or_error;
use crate::upload::UploadedFile;

/// Where uploaded floorplans are kept so the analysis step can refer to them
/// by URL.
pub trait AssetStore: Send + Sync {
    fn name(&self) -> &str;

    fn store(&self, file: &UploadedFile) -> Result<String>;

    /// Removes a stored asset. Returns `false` when the store cannot delete.
    fn discard(&self, _image_url: &str) -> Result<bool> {
        Ok(false)
    }

    /// Filesystem location of an asset this store holds locally.
    fn local_path(&self, _image_url: &str) -> Option<PathBuf> {
        None
    }
}

/// Directory store. Every `store` call writes a new file, so discarding one
/// submission's asset never touches another's.
///
/// URLs are `{public_base}/{name}` when a public base is set (the server case),
/// `file://` URLs otherwise.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl LocalAssetStore {
    pub fn open(root: impl AsRef<Path>, public_base: Option<String>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create upload dir {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to resolve upload dir {}", root.display()))?;
        Ok(Self {
            root,
            public_base: public_base.map(|base| base.trim_end_matches('/').to_string()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a stored asset by its bare name, rejecting anything that could
    /// escape the store directory.
    pub fn resolve_name(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return None;
        }
        let path = self.root.join(name);
        path.is_file().then_some(path)
    }

    fn url_for(&self, name: &str, path: &Path) -> String {
        match self.public_base.as_deref() {
            Some(base) => format!("{base}/{name}"),
            None => format!("file://{}", path.display()),
        }
    }
}

impl AssetStore for LocalAssetStore {
    fn name(&self) -> &str {
        "local"
    }

    fn store(&self, file: &UploadedFile) -> Result<String> {
        let name = stored_file_name(file);
        let path = self.root.join(&name);
        fs::write(&path, &file.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        let url = self.url_for(&name, &path);
        info!(%url, size = file.size(), "asset stored");
        Ok(url)
    }

    fn discard(&self, image_url: &str) -> Result<bool> {
        let Some(path) = self.local_path(image_url) else {
            return Ok(false);
        };
        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
        debug!(path = %path.display(), "asset discarded");
        Ok(true)
    }

    fn local_path(&self, image_url: &str) -> Option<PathBuf> {
        if let Some(base) = self.public_base.as_deref() {
            if let Some(name) = image_url
                .strip_prefix(base)
                .and_then(|rest| rest.strip_prefix('/'))
            {
                return self.resolve_name(name);
            }
        }
        let raw_path = image_url.strip_prefix("file://")?;
        let path = Path::new(raw_path);
        if path.parent() != Some(self.root.as_path()) {
            return None;
        }
        self.resolve_name(path.file_name()?.to_str()?)
    }
}

/// `{sha256 prefix}-{random suffix}-{sanitized original name}`.
fn stored_file_name(file: &UploadedFile) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&file.bytes);
    let digest = hasher.finalize();
    let mut stem = String::with_capacity(file.file_name.len());
    for ch in file.file_name.chars() {
        match ch {
            '.' if stem.is_empty() || stem.ends_with('.') => {}
            '.' | '-' | '_' => stem.push(ch),
            ch if ch.is_ascii_alphanumeric() => stem.push(ch),
            _ => stem.push('_'),
        }
    }
    let stem = if stem.is_empty() { "floorplan" } else { stem.as_str() };
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{stem}", hex::encode(&digest[..8]), &nonce[..12])
}

/// Client for a remote `POST /api/upload` endpoint.
#[derive(Debug, Clone)]
pub struct HttpAssetStore {
    endpoint: String,
    http: HttpClient,
}

impl HttpAssetStore {
    pub fn new(base_url: &str, http: HttpClient) -> Self {
        Self {
            endpoint: format!("{}/api/upload", base_url.trim_end_matches('/')),
            http,
        }
    }
}

impl AssetStore for HttpAssetStore {
    fn name(&self) -> &str {
        "http"
    }

    fn store(&self, file: &UploadedFile) -> Result<String> {
        let part = MultipartPart::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.media_type)
            .with_context(|| format!("invalid media type '{}'", file.media_type))?;
        let form = MultipartForm::new().part("file", part);
        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .with_context(|| format!("upload request failed ({})", self.endpoint))?;
        let payload = response_json_or_error("Upload", response)?;
        image_url_from_payload(&payload)
    }
}

pub(crate) fn image_url_from_payload(payload: &Value) -> Result<String> {
    match payload.get("imageUrl").and_then(Value::as_str) {
        Some(url) if !url.trim().is_empty() => Ok(url.to_string()),
        _ => bail!("upload response did not include an imageUrl"),
    }
}
