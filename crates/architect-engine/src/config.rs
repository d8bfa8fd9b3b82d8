use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_UPLOAD_DIR: &str = "uploads";

/// Runtime settings read from the environment.
///
/// CLI flags are applied on top by the binary; nothing here reads files.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub vision_model: Option<String>,
    pub chat_model: Option<String>,
    pub http_timeout: Duration,
    pub upload_dir: PathBuf,
    pub narration_command: Option<String>,
    pub dictation_command: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            vision_model: None,
            chat_model: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            narration_command: None,
            dictation_command: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first_non_empty = |keys: &[&str]| -> Option<String> {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
        };

        let defaults = Self::default();
        let http_timeout = first_non_empty(&["ARCHITECT_HTTP_TIMEOUT_SECS"])
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        Self {
            openai_api_key: first_non_empty(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"]),
            openai_api_base: first_non_empty(&["OPENAI_API_BASE", "OPENAI_BASE_URL"])
                .map(|raw| normalize_api_base(&raw))
                .unwrap_or(defaults.openai_api_base),
            vision_model: first_non_empty(&["ARCHITECT_VISION_MODEL"]),
            chat_model: first_non_empty(&["ARCHITECT_CHAT_MODEL"]),
            http_timeout,
            upload_dir: first_non_empty(&["ARCHITECT_UPLOAD_DIR"])
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            narration_command: first_non_empty(&["ARCHITECT_NARRATION_CMD"]),
            dictation_command: first_non_empty(&["ARCHITECT_DICTATION_CMD"]),
        }
    }
}

/// Trailing slashes are dropped and a bare host gets `/v1` appended.
fn normalize_api_base(raw: &str) -> String {
    let base = raw.trim().trim_end_matches('/').to_string();
    match reqwest::Url::parse(&base) {
        Ok(parsed) if parsed.path().trim().is_empty() || parsed.path() == "/" => {
            format!("{base}/v1")
        }
        _ => base,
    }
}
