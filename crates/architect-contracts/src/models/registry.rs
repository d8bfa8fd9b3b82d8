use indexmap::IndexMap;

/// A model the review can be run against, and what it is able to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn new(name: &str, provider: &str, capabilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            capabilities: capabilities.iter().map(|cap| cap.to_string()).collect(),
        }
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|cap| cap == capability)
    }
}

/// Known models keyed by name. Iteration order is registration order, so the
/// first match for a capability is that capability's default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

const BUILTIN: &[(&str, &str, &[&str])] = &[
    ("gpt-4o", "openai", &["text", "vision"]),
    ("gpt-4o-mini", "openai", &["text", "vision"]),
    ("gpt-4.1", "openai", &["text", "vision"]),
    ("gpt-4.1-mini", "openai", &["text", "vision"]),
    ("gpt-4-turbo", "openai", &["text", "vision"]),
    ("gpt-4-vision-preview", "openai", &["vision"]),
    ("gpt-4", "openai", &["text"]),
    ("dryrun-vision-1", "dryrun", &["vision"]),
    ("dryrun-text-1", "dryrun", &["text"]),
];

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::from_specs(
            BUILTIN
                .iter()
                .map(|(name, provider, caps)| ModelSpec::new(name, provider, caps)),
        )
    }
}

impl ModelRegistry {
    /// Later specs replace earlier ones with the same name.
    pub fn from_specs(specs: impl IntoIterator<Item = ModelSpec>) -> Self {
        Self {
            models: specs
                .into_iter()
                .map(|spec| (spec.name.clone(), spec))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// First registered model with `capability`, restricted to `provider` when given.
    pub fn first_for(&self, capability: &str, provider: Option<&str>) -> Option<&ModelSpec> {
        self.models.values().find(|model| {
            model.supports(capability) && provider.map_or(true, |p| model.provider == p)
        })
    }
}
