use std::sync::Arc;

use anyhow::{bail, Context, Result};
use architect_contracts::models::{
    ModelSelection, ModelSelector, TEXT_CAPABILITY, VISION_CAPABILITY,
};
use reqwest::blocking::Client as HttpClient;
use tracing::{info, warn};

use crate::analyze::{
    AnalysisProvider, DryrunAnalyzer, HttpAnalysisClient, OpenAiVisionAnalyzer,
    DEFAULT_VISION_MODEL,
};
use crate::chat::{
    ChatProvider, DryrunChatProvider, HttpChatClient, OpenAiChatProvider, DEFAULT_CHAT_MODEL,
};
use crate::config::EngineConfig;
use crate::openai::OpenAiClient;
use crate::store::{AssetStore, HttpAssetStore, LocalAssetStore};

/// Where the store, analyze and chat steps are carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMode {
    /// In-process, calling OpenAI directly.
    OpenAi,
    /// In-process, deterministic, no network.
    Dryrun,
    /// Forwarded to the endpoints of a running server.
    Remote { base_url: String },
}

impl BackendMode {
    fn model_provider(&self) -> Option<&'static str> {
        match self {
            BackendMode::OpenAi => Some("openai"),
            BackendMode::Dryrun => Some("dryrun"),
            BackendMode::Remote { .. } => None,
        }
    }
}

/// The three providers a session needs, built once from configuration.
pub struct Backend {
    pub store: Arc<dyn AssetStore>,
    /// Set when uploads are kept on this machine.
    pub local_store: Option<Arc<LocalAssetStore>>,
    pub analyzer: Arc<dyn AnalysisProvider>,
    pub chat: Arc<dyn ChatProvider>,
    pub vision_model: Option<ModelSelection>,
    pub chat_model: Option<ModelSelection>,
}

impl Backend {
    /// `public_base` is the URL prefix under which locally stored uploads are
    /// served; without it local assets get `file://` URLs.
    pub fn build(
        config: &EngineConfig,
        mode: &BackendMode,
        public_base: Option<String>,
    ) -> Result<Self> {
        if let BackendMode::Remote { base_url } = mode {
            let http = HttpClient::builder()
                .timeout(config.http_timeout)
                .build()
                .context("failed to build HTTP client")?;
            info!(%base_url, "using remote endpoints");
            return Ok(Self {
                store: Arc::new(HttpAssetStore::new(base_url, http.clone())),
                local_store: None,
                analyzer: Arc::new(HttpAnalysisClient::new(base_url, http.clone())),
                chat: Arc::new(HttpChatClient::new(base_url, http)),
                vision_model: None,
                chat_model: None,
            });
        }

        let local_store = Arc::new(LocalAssetStore::open(&config.upload_dir, public_base)?);
        let store: Arc<dyn AssetStore> = local_store.clone();
        let vision_model = select_model(
            mode,
            config.vision_model.as_deref().unwrap_or(DEFAULT_VISION_MODEL),
            VISION_CAPABILITY,
        )?;
        let chat_model = select_model(
            mode,
            config.chat_model.as_deref().unwrap_or(DEFAULT_CHAT_MODEL),
            TEXT_CAPABILITY,
        )?;

        let (analyzer, chat): (Arc<dyn AnalysisProvider>, Arc<dyn ChatProvider>) = match mode {
            BackendMode::Dryrun => (Arc::new(DryrunAnalyzer), Arc::new(DryrunChatProvider)),
            _ => {
                let client = OpenAiClient::from_config(config)?;
                (
                    Arc::new(
                        OpenAiVisionAnalyzer::new(client.clone(), vision_model.model.name.clone())
                            .with_local_assets(Arc::clone(&store)),
                    ),
                    Arc::new(OpenAiChatProvider::new(client, chat_model.model.name.clone())),
                )
            }
        };
        info!(
            store = store.name(),
            analyzer = analyzer.name(),
            vision_model = %vision_model.model.name,
            chat_model = %chat_model.model.name,
            "backend ready"
        );
        Ok(Self {
            store,
            local_store: Some(local_store),
            analyzer,
            chat,
            vision_model: Some(vision_model),
            chat_model: Some(chat_model),
        })
    }
}

/// Chat provider for a model picked at runtime (the `/chat_model` command).
pub fn chat_provider_for_model(
    config: &EngineConfig,
    mode: &BackendMode,
    requested: &str,
) -> Result<(Arc<dyn ChatProvider>, ModelSelection)> {
    let selection = select_model(mode, requested, TEXT_CAPABILITY)?;
    let provider: Arc<dyn ChatProvider> = match mode {
        BackendMode::OpenAi => Arc::new(OpenAiChatProvider::new(
            OpenAiClient::from_config(config)?,
            selection.model.name.clone(),
        )),
        BackendMode::Dryrun => Arc::new(DryrunChatProvider),
        BackendMode::Remote { .. } => bail!("the chat model is chosen by the remote server"),
    };
    Ok((provider, selection))
}

/// Picks a registered model for `capability`. Unknown names fall back to the
/// first suitable model of the mode's provider, with the reason logged.
pub fn select_model(
    mode: &BackendMode,
    requested: &str,
    capability: &str,
) -> Result<ModelSelection> {
    let selector = match mode.model_provider() {
        Some(provider) => ModelSelector::default().for_provider(provider),
        None => ModelSelector::default(),
    };
    let selection = selector.select(Some(requested), capability)?;
    if let Some(reason) = selection.fallback_reason.as_deref() {
        warn!(requested, model = %selection.model.name, "{reason}");
    }
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::{chat_provider_for_model, select_model, Backend, BackendMode};
    use crate::config::EngineConfig;

    #[test]
    fn known_models_are_selected_as_requested() -> anyhow::Result<()> {
        let selection = select_model(&BackendMode::OpenAi, "gpt-4.1", "vision")?;
        assert_eq!(selection.model.name, "gpt-4.1");
        assert!(selection.fallback_reason.is_none());
        Ok(())
    }

    #[test]
    fn unknown_or_foreign_models_fall_back_within_the_provider() -> anyhow::Result<()> {
        let selection = select_model(&BackendMode::OpenAi, "gpt-9", "vision")?;
        assert_eq!(selection.model.name, "gpt-4o");
        assert!(selection.fallback_reason.is_some());

        let selection = select_model(&BackendMode::Dryrun, "gpt-4o-mini", "text")?;
        assert_eq!(selection.model.name, "dryrun-text-1");
        assert_eq!(selection.requested.as_deref(), Some("gpt-4o-mini"));

        let selection = select_model(&BackendMode::OpenAi, "gpt-4-vision-preview", "text")?;
        assert_eq!(selection.model.provider, "openai");
        assert!(selection.model.capabilities.iter().any(|cap| cap == "text"));
        Ok(())
    }

    #[test]
    fn dryrun_backend_needs_no_api_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = EngineConfig {
            upload_dir: temp.path().join("uploads"),
            ..EngineConfig::default()
        };
        let backend = Backend::build(&config, &BackendMode::Dryrun, None)?;
        assert_eq!(backend.store.name(), "local");
        assert_eq!(backend.analyzer.name(), "dryrun");
        assert_eq!(backend.chat.name(), "dryrun");
        assert_eq!(
            backend.vision_model.map(|s| s.model.name).as_deref(),
            Some("dryrun-vision-1")
        );
        Ok(())
    }

    #[test]
    fn openai_backend_requires_api_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut config = EngineConfig {
            upload_dir: temp.path().join("uploads"),
            ..EngineConfig::default()
        };
        assert!(Backend::build(&config, &BackendMode::OpenAi, None).is_err());

        config.openai_api_key = Some("sk-test".to_string());
        let backend = Backend::build(&config, &BackendMode::OpenAi, None)?;
        assert_eq!(backend.analyzer.name(), "openai");
        assert_eq!(
            backend.chat_model.map(|s| s.model.name).as_deref(),
            Some("gpt-4o-mini")
        );
        Ok(())
    }

    #[test]
    fn remote_backend_uses_http_clients() -> anyhow::Result<()> {
        let mode = BackendMode::Remote {
            base_url: "http://127.0.0.1:3000".to_string(),
        };
        let backend = Backend::build(&EngineConfig::default(), &mode, None)?;
        assert_eq!(backend.store.name(), "http");
        assert_eq!(backend.analyzer.name(), "http");
        assert!(chat_provider_for_model(&EngineConfig::default(), &mode, "gpt-4o").is_err());
        Ok(())
    }
}
