use thiserror::Error;

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    /// Why the requested model was not used, when it was not.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no {provider} model available for capability '{capability}'")]
    NoProviderModel {
        provider: String,
        capability: String,
    },
    #[error("no models available for capability '{capability}'")]
    NoModel { capability: String },
}

/// Resolves a requested model name against the registry. Requests that name
/// an unknown model, a model lacking the capability, or a model from another
/// provider fall back to the capability default instead of failing.
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    registry: ModelRegistry,
    provider: Option<String>,
}

impl ModelSelector {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            provider: None,
        }
    }

    /// Only models served by `provider` are eligible.
    pub fn for_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, SelectionError> {
        let provider = self.provider.as_deref();
        let fallback_reason = match requested.map(|name| (name, self.registry.get(name))) {
            None => "No model specified.".to_string(),
            Some((name, None)) => format!("Model '{name}' is not registered."),
            Some((name, Some(model))) if !model.supports(capability) => {
                format!("Model '{name}' cannot be used for {capability}.")
            }
            Some((name, Some(model))) => match provider {
                Some(provider) if model.provider != provider => {
                    format!("Model '{name}' is not served by {provider}.")
                }
                _ => {
                    return Ok(ModelSelection {
                        model: model.clone(),
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    })
                }
            },
        };

        let Some(model) = self.registry.first_for(capability, provider) else {
            return Err(match provider {
                Some(provider) => SelectionError::NoProviderModel {
                    provider: provider.to_string(),
                    capability: capability.to_string(),
                },
                None => SelectionError::NoModel {
                    capability: capability.to_string(),
                },
            });
        };
        Ok(ModelSelection {
            fallback_reason: Some(format!("{fallback_reason} Using '{}'.", model.name)),
            model: model.clone(),
            requested: requested.map(str::to_string),
        })
    }
}
