//! Configuration for skillforge
//!
//! Loaded once at startup from a YAML file (default `config/models.yaml`):
//!
//! ```yaml
//! models:
//!   - id: r1
//!     provider: local
//!     name: deepseek-r1:14b
//!     description: Local reasoning model
//!     default: true
//!     reasoning: true
//!   - id: coder
//!     provider: remote
//!     name: deepseek-chat
//!     base_url: https://api.deepseek.com/v1
//!     api_key_env: DEEPSEEK_API_KEY
//! agent:
//!   skills_dir: ./skills
//!   max_iterations: 25
//! ```

use crate::provider::{Credentials, ModelProfile, Provider, DEFAULT_TEMPERATURE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no models configured")]
    NoModels,
    #[error("no default model configured and none requested")]
    NoDefaultModel,
    #[error("duplicate model id '{0}'")]
    DuplicateModel(String),
    #[error("more than one default model: {0:?}")]
    MultipleDefaults(Vec<String>),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// One entry of the `models:` list as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub provider: Provider,
    /// Backend model name
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Literal API key (prefer `api_key_env`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ModelEntry {
    /// Resolve credentials (literal key wins over env var) into a profile
    pub fn into_profile(self) -> ModelProfile {
        let api_key = self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
        });
        ModelProfile {
            id: self.id,
            provider: self.provider,
            backend_name: self.name,
            description: self.description,
            credentials: api_key.map(|api_key| Credentials { api_key }),
            base_url: self.base_url,
            is_default: self.default,
            reasoning: self.reasoning,
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        }
    }
}

/// Turn loop and registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Root directory holding skill packages
    pub skills_dir: PathBuf,
    /// Background document rendered at the top of the system prompt
    pub base_prompt: Option<PathBuf>,
    /// Skill manifest document rendered into the system prompt
    pub manifest: Option<PathBuf>,
    /// Maximum agent turns per external request
    pub max_iterations: usize,
    pub capability_timeout_secs: u64,
    pub model_timeout_secs: u64,
    /// Capabilities that write into the skills root; a rescan follows each call
    pub self_modifying: BTreeSet<String>,
    /// Action name -> argument key receiving the raw payload block
    pub payload_keys: HashMap<String, String>,
    /// Route to a package's preferred model after using one of its capabilities
    pub follow_skill_preferences: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            skills_dir: PathBuf::from("./skills"),
            base_prompt: Some(PathBuf::from("base.md")),
            manifest: Some(PathBuf::from("manifest.md")),
            max_iterations: 25,
            capability_timeout_secs: 120,
            model_timeout_secs: 120,
            self_modifying: [
                "write_local_file",
                "deploy_new_skill",
                "write_skill_doc",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            payload_keys: HashMap::from([(
                "deploy_new_skill".to_string(),
                "logic_content".to_string(),
            )]),
            follow_skill_preferences: true,
        }
    }
}

impl AgentSettings {
    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub agent: AgentSettings,
}

impl Config {
    /// Load config from a YAML file, honoring `.env` for credentials
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let _ = dotenvy::dotenv();

        let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Static checks: at least one model, unique ids, at most one default
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.models.is_empty() {
            return Err(ConfigurationError::NoModels);
        }

        let mut seen = HashSet::new();
        for entry in &self.models {
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigurationError::DuplicateModel(entry.id.clone()));
            }
        }

        let defaults: Vec<String> = self
            .models
            .iter()
            .filter(|m| m.default)
            .map(|m| m.id.clone())
            .collect();
        if defaults.len() > 1 {
            return Err(ConfigurationError::MultipleDefaults(defaults));
        }
        Ok(())
    }

    /// Fail unless a fresh session has a model to run on: the requested
    /// id, or else the configured default
    pub fn check_startup_model(&self, requested: Option<&str>) -> Result<(), ConfigurationError> {
        let requested = requested.map(str::trim).filter(|id| !id.is_empty());
        if requested.is_none() && !self.models.iter().any(|m| m.default) {
            return Err(ConfigurationError::NoDefaultModel);
        }
        Ok(())
    }

    /// Resolved model profiles in config order
    pub fn profiles(&self) -> Vec<ModelProfile> {
        self.models.iter().cloned().map(ModelEntry::into_profile).collect()
    }

    /// Default config path: `./config/models.yaml`, then
    /// `$XDG_CONFIG_HOME/skillforge/models.yaml`
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from("config").join("models.yaml");
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .map(|d| d.join("skillforge").join("models.yaml"))
            .unwrap_or(local)
    }
}
