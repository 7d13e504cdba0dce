//! Provider catalog (providers.json) and resolution of client configuration

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::errors::{Result, TranslationError};

/// Default sampling temperature when neither provider nor common settings set one
pub const DEFAULT_TEMPERATURE: f64 = 1.3;

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Client implementation used for a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClientKind {
    /// OpenAI-compatible endpoint with JSON mode and optional batch jobs
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Plain chat completion POST, output parsed defensively
    #[serde(rename = "siliconflow", alias = "raw_http")]
    RawHttp,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKind::OpenAi => write!(f, "openai"),
            ClientKind::RawHttp => write!(f, "siliconflow"),
        }
    }
}

impl std::str::FromStr for ClientKind {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ClientKind::OpenAi),
            "siliconflow" | "raw_http" => Ok(ClientKind::RawHttp),
            other => Err(TranslationError::config(format!("Unsupported client type: {}", other))),
        }
    }
}

/// Model listed under a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Provider as written in the catalog; every field may come from common settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<ClientKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_1k_tokens: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_api: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Contents of providers.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCatalog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub common_settings: Map<String, Value>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,
}

/// Fully resolved configuration for one client
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub client_type: ClientKind,
    pub temperature: f64,
    pub default_model: Option<String>,
    pub models: Vec<ModelInfo>,
    pub timeout_secs: u64,
    pub cost_per_1k_tokens: f64,
    /// Forces bulk job support on or off instead of matching the host
    pub batch_api: Option<bool>,
}

impl ProviderConfig {
    /// Minimal configuration, mostly useful for pointing a client at a test server
    pub fn new(id: impl Into<String>, api_url: impl Into<String>, model: impl Into<String>, client_type: ClientKind) -> Self {
        let id = id.into();
        let model = model.into();
        Self {
            name: id.clone(),
            cost_per_1k_tokens: default_cost_rate(&id),
            id,
            api_url: api_url.into(),
            api_key: String::new(),
            models: vec![ModelInfo::new(model.clone())],
            default_model: Some(model.clone()),
            model,
            client_type,
            temperature: DEFAULT_TEMPERATURE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            batch_api: None,
        }
    }
}

/// Price per 1000 tokens used for the pre-flight cost estimate
pub fn default_cost_rate(provider_id: &str) -> f64 {
    if provider_id.to_lowercase().contains("dashscope") {
        0.004
    } else {
        0.002
    }
}

/// Registry over a provider catalog
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    catalog: ProviderCatalog,
    path: Option<PathBuf>,
    /// Keys resolved when the catalog was read; never written back by `save`
    api_keys: BTreeMap<String, String>,
}

impl ProviderRegistry {
    /// Load the catalog from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TranslationError::config(format!("Cannot read provider catalog {}: {}", path.display(), e))
        })?;

        let mut registry = Self::from_json(&content)?;
        registry.path = Some(path.to_path_buf());
        info!("Loaded {} providers from {}", registry.catalog.providers.len(), path.display());
        Ok(registry)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let catalog: ProviderCatalog = serde_json::from_str(content)
            .map_err(|e| TranslationError::config(format!("Malformed provider catalog: {}", e)))?;
        Self::from_catalog(catalog)
    }

    pub fn from_catalog(catalog: ProviderCatalog) -> Result<Self> {
        if let Some(default) = &catalog.default_provider {
            if !catalog.providers.contains_key(default) {
                return Err(TranslationError::config(format!(
                    "Default provider {} is not defined in the catalog",
                    default
                )));
            }
        }

        let mut registry = Self {
            catalog,
            path: None,
            api_keys: BTreeMap::new(),
        };
        let ids: Vec<String> = registry.catalog.providers.keys().cloned().collect();
        for id in ids {
            registry.resolve_key_of(&id);
        }
        Ok(registry)
    }

    /// Read the key of `id` from the catalog or its `api_key_env` variable
    fn resolve_key_of(&mut self, id: &str) {
        let key = match self.merged_entry(id) {
            Ok(entry) => resolve_api_key(id, &entry),
            Err(_) => None,
        };
        match key {
            Some(key) => self.api_keys.insert(id.to_string(), key),
            None => self.api_keys.remove(id),
        };
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// (id, display name) of every provider, sorted by id
    pub fn list_providers(&self) -> Vec<(String, String)> {
        self.catalog
            .providers
            .iter()
            .map(|(id, entry)| {
                let name = if entry.name.is_empty() { id.clone() } else { entry.name.clone() };
                (id.clone(), name)
            })
            .collect()
    }

    pub fn get_default_provider(&self) -> Result<String> {
        self.catalog
            .default_provider
            .clone()
            .or_else(|| self.catalog.providers.keys().next().cloned())
            .ok_or_else(|| TranslationError::config("Provider catalog is empty"))
    }

    pub fn get_provider_models(&self, id: &str) -> Result<Vec<ModelInfo>> {
        Ok(self.merged_entry(id)?.models)
    }

    pub fn get_default_model(&self, id: &str) -> Result<Option<String>> {
        let entry = self.merged_entry(id)?;
        Ok(entry.default_model.or_else(|| entry.models.first().map(|m| m.id.clone())))
    }

    /// Resolve a provider and optional model into a client configuration.
    ///
    /// Model precedence: explicit argument, then the provider default, then
    /// the first listed model.
    pub fn get_provider_config(&self, id: &str, model: Option<&str>) -> Result<ProviderConfig> {
        let entry = self.merged_entry(id)?;

        let api_url = entry
            .api_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TranslationError::config(format!("Provider {} has no api_url", id)))?;

        let model = match model {
            Some(explicit) => {
                if !entry.models.is_empty() && !entry.models.iter().any(|m| m.id == explicit) {
                    return Err(TranslationError::config(format!(
                        "Model {} is not listed for provider {}",
                        explicit, id
                    )));
                }
                explicit.to_string()
            }
            None => entry
                .default_model
                .clone()
                .or_else(|| entry.models.first().map(|m| m.id.clone()))
                .ok_or_else(|| TranslationError::config(format!("Provider {} has no models", id)))?,
        };

        let api_key = match self.api_keys.get(id) {
            Some(key) => key.clone(),
            None => {
                warn!("No API key configured for provider {}", id);
                String::new()
            }
        };

        let config = ProviderConfig {
            id: id.to_string(),
            name: if entry.name.is_empty() { id.to_string() } else { entry.name.clone() },
            api_url,
            api_key,
            model,
            client_type: entry.client_type.unwrap_or_default(),
            temperature: entry.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            default_model: entry.default_model.clone(),
            models: entry.models.clone(),
            timeout_secs: entry.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            cost_per_1k_tokens: entry.cost_per_1k_tokens.unwrap_or_else(|| default_cost_rate(id)),
            batch_api: entry.batch_api,
        };

        debug!("Resolved provider {} with model {}", config.id, config.model);
        Ok(config)
    }

    /// Provider entry with common settings filled in where it has no value of its own
    fn merged_entry(&self, id: &str) -> Result<ProviderEntry> {
        let entry = self
            .catalog
            .providers
            .get(id)
            .ok_or_else(|| TranslationError::NotFoundError {
                provider: id.to_string(),
            })?;

        let mut merged = match serde_json::to_value(entry)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        for (key, value) in &self.catalog.common_settings {
            let missing = merged.get(key).map_or(true, Value::is_null);
            if missing {
                merged.insert(key.clone(), value.clone());
            }
        }

        serde_json::from_value(Value::Object(merged))
            .map_err(|e| TranslationError::config(format!("Invalid settings for provider {}: {}", id, e)))
    }

    pub fn set_default_provider(&mut self, id: &str) -> Result<()> {
        if !self.catalog.providers.contains_key(id) {
            return Err(TranslationError::NotFoundError {
                provider: id.to_string(),
            });
        }
        self.catalog.default_provider = Some(id.to_string());
        Ok(())
    }

    pub fn set_default_model(&mut self, id: &str, model: &str) -> Result<()> {
        let models = self.get_provider_models(id)?;
        if !models.iter().any(|m| m.id == model) {
            return Err(TranslationError::config(format!(
                "Model {} does not exist for provider {}",
                model, id
            )));
        }

        if let Some(entry) = self.catalog.providers.get_mut(id) {
            entry.default_model = Some(model.to_string());
        }
        Ok(())
    }

    pub fn add_provider(&mut self, id: &str, entry: ProviderEntry) -> Result<()> {
        if self.catalog.providers.contains_key(id) {
            return Err(TranslationError::config(format!("Provider {} already exists", id)));
        }
        self.catalog.providers.insert(id.to_string(), entry);
        self.resolve_key_of(id);
        Ok(())
    }

    pub fn remove_provider(&mut self, id: &str) -> Result<ProviderEntry> {
        if self.catalog.default_provider.as_deref() == Some(id) {
            return Err(TranslationError::config(format!(
                "Cannot remove default provider {}; choose another default first",
                id
            )));
        }

        let entry = self
            .catalog
            .providers
            .remove(id)
            .ok_or_else(|| TranslationError::NotFoundError {
                provider: id.to_string(),
            })?;
        self.api_keys.remove(id);
        Ok(entry)
    }

    /// Write the catalog back to the file it was loaded from
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| TranslationError::config("Provider catalog was not loaded from a file"))?;
        self.save_to(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.catalog)?;
        std::fs::write(path, content).map_err(|e| TranslationError::file(path, e))
    }
}

fn resolve_api_key(id: &str, entry: &ProviderEntry) -> Option<String> {
    if let Some(key) = entry.api_key.as_ref().filter(|k| !k.is_empty()) {
        return Some(key.clone());
    }

    let var = entry.api_key_env.as_ref()?;
    match std::env::var(var) {
        Ok(key) => Some(key),
        Err(_) => {
            debug!("Environment variable {} for provider {} is not set", var, id);
            None
        }
    }
}
