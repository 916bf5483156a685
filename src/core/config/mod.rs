use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::pipeline::StageKind;
use crate::core::provider::CapabilityKind;

const DEFAULT_CONFIG: &str = include_str!("default_config.toml");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub trends: TrendSettings,

    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required on API routes. Without one the API only serves loopback.
    #[serde(default)]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_stages")]
    pub default_stages: Vec<StageKind>,

    #[serde(default = "default_true")]
    pub enforce_stage_ceiling: bool,

    /// Fixed ceiling per stage. Unset means the providers' worst case.
    #[serde(default)]
    pub stage_ceiling_ms: Option<u64>,

    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_keyword")]
    pub default_keyword: String,

    #[serde(default = "default_refresh_cron")]
    pub refresh_cron: String,
}

/// Vendor implementation behind a provider entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    OpenaiCompatible,
    Gemini,
    Elevenlabs,
    Voicerss,
    Ttsmp3,
    Pexels,
    GoogleSuggest,
    Manifest,
}

impl AdapterKind {
    pub fn capability(self) -> CapabilityKind {
        match self {
            AdapterKind::OpenaiCompatible | AdapterKind::Gemini => CapabilityKind::Script,
            AdapterKind::Elevenlabs | AdapterKind::Voicerss | AdapterKind::Ttsmp3 => {
                CapabilityKind::Voice
            }
            AdapterKind::Pexels => CapabilityKind::Visuals,
            AdapterKind::GoogleSuggest => CapabilityKind::Trends,
            AdapterKind::Manifest => CapabilityKind::Assembly,
        }
    }

    pub fn requires_credentials(self) -> bool {
        !matches!(
            self,
            AdapterKind::GoogleSuggest | AdapterKind::Manifest | AdapterKind::Ttsmp3
        )
    }
}

/// API key resolved from the environment at load time. Never serialized or printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials(Option<String>);

impl Credentials {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }

    pub fn api_key(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Credentials(<redacted>)"),
            None => f.write_str("Credentials(None)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub capability: CapabilityKind,
    pub adapter: AdapterKind,

    /// Lower runs first.
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempt budget for this provider before falling back.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Attempt budget when the provider keeps answering with nothing usable.
    #[serde(default)]
    pub max_empty_retries: Option<u32>,

    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(skip)]
    pub credentials: Credentials,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, adapter: AdapterKind) -> Self {
        Self {
            id: id.into(),
            capability: adapter.capability(),
            adapter,
            priority: default_priority(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            max_empty_retries: None,
            base_url: None,
            model: None,
            voice: None,
            api_key_env: None,
            per_page: None,
            output_dir: None,
            headers: BTreeMap::new(),
            credentials: Credentials::default(),
        }
    }

    pub fn empty_result_budget(&self) -> u32 {
        self.max_empty_retries
            .unwrap_or((self.max_retries / 2).max(1))
            .min(self.max_retries)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    17890
}
fn default_true() -> bool {
    true
}
fn default_stages() -> Vec<StageKind> {
    StageKind::ALL.to_vec()
}
fn default_progress_buffer() -> usize {
    256
}
fn default_keyword() -> String {
    "AI".to_string()
}
fn default_refresh_cron() -> String {
    "0 0/30 * * * *".to_string()
}
fn default_priority() -> u32 {
    100
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_token: None,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_stages: default_stages(),
            enforce_stage_ceiling: true,
            stage_ceiling_ms: None,
            progress_buffer: default_progress_buffer(),
        }
    }
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_keyword: default_keyword(),
            refresh_cron: default_refresh_cron(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML document and resolve provider credentials through `env`.
    pub fn from_toml_str<F>(content: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: AppConfig = toml::from_str(content)?;
        for provider in &mut config.providers {
            if let Some(var) = provider.api_key_env.as_deref() {
                provider.credentials = match env(var) {
                    Some(key) if !key.trim().is_empty() => Credentials::new(key.trim()),
                    _ => Credentials::default(),
                };
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn embedded_default() -> Result<Self, ConfigError> {
        Self::from_toml_str(DEFAULT_CONFIG, |var| std::env::var(var).ok())
    }

    /// Config file lookup order: explicit path, `$VIRALGEN_CONFIG`, then the user config dir.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("VIRALGEN_CONFIG")
            && !path.trim().is_empty()
        {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("viralgen").join("config.toml"))
            .filter(|path| path.exists())
    }

    pub async fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = Self::resolve_path(explicit) else {
            info!("No config file found, using embedded defaults.");
            return Ok(Self::embedded_default()?);
        };
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            anyhow::anyhow!("failed to read config file {}: {}", path.display(), e)
        })?;
        let config = Self::from_toml_str(&content, |var| std::env::var(var).ok())?;
        info!(
            "Loaded config from {}: {} provider(s)",
            path.display(),
            config.providers.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for p in &self.providers {
            if p.id.trim().is_empty() {
                return Err(ConfigError::Invalid("provider id must not be empty".into()));
            }
            if !seen.insert(p.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider id '{}'",
                    p.id
                )));
            }
            if p.adapter.capability() != p.capability {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}': adapter {:?} cannot serve the {} capability",
                    p.id, p.adapter, p.capability
                )));
            }
            if p.max_retries == 0 {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}': max_retries must be at least 1",
                    p.id
                )));
            }
            if p.max_empty_retries == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}': max_empty_retries must be at least 1",
                    p.id
                )));
            }
            if p.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}': timeout_ms must be positive",
                    p.id
                )));
            }
        }
        if self.pipeline.default_stages.is_empty() {
            return Err(ConfigError::Invalid(
                "pipeline.default_stages must not be empty".into(),
            ));
        }
        for p in &self.providers {
            if p.adapter.requires_credentials() && p.credentials.api_key().is_none() {
                warn!(
                    "Provider '{}' has no credentials ({}); it will not be registered",
                    p.id,
                    p.api_key_env.as_deref().unwrap_or("no api_key_env set")
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn embedded_default_parses() {
        let cfg = AppConfig::from_toml_str(DEFAULT_CONFIG, no_env).unwrap();
        assert_eq!(cfg.server.port, 17890);
        assert_eq!(cfg.pipeline.default_stages, StageKind::ALL.to_vec());
        assert!(cfg.providers.iter().any(|p| p.capability == CapabilityKind::Script));
        assert!(cfg.providers.iter().any(|p| p.capability == CapabilityKind::Trends));
        assert!(cfg.providers.iter().any(|p| p.capability == CapabilityKind::Assembly));
        let ttsmp3 = cfg.providers.iter().find(|p| p.adapter == AdapterKind::Ttsmp3).unwrap();
        assert_eq!(ttsmp3.capability, CapabilityKind::Voice);
        assert!(!ttsmp3.adapter.requires_credentials());
    }

    #[test]
    fn credentials_come_from_the_named_variable() {
        let toml = r#"
            [[provider]]
            id = "openrouter"
            capability = "script"
            adapter = "openai_compatible"
            api_key_env = "OPENROUTER_API_KEY"
        "#;
        let cfg = AppConfig::from_toml_str(toml, |var| {
            (var == "OPENROUTER_API_KEY").then(|| "sk-test".to_string())
        })
        .unwrap();
        assert_eq!(cfg.providers[0].credentials.api_key(), Some("sk-test"));
        assert_eq!(
            format!("{:?}", cfg.providers[0].credentials),
            "Credentials(<redacted>)"
        );
    }

    #[test]
    fn mismatched_adapter_capability_is_rejected() {
        let toml = r#"
            [[provider]]
            id = "pexels"
            capability = "voice"
            adapter = "pexels"
        "#;
        let err = AppConfig::from_toml_str(toml, no_env).unwrap_err();
        assert!(err.to_string().contains("cannot serve"));
    }

    #[test]
    fn zero_retry_budget_is_rejected() {
        let toml = r#"
            [[provider]]
            id = "suggest"
            capability = "trends"
            adapter = "google_suggest"
            max_retries = 0
        "#;
        assert!(AppConfig::from_toml_str(toml, no_env).is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let toml = r#"
            [[provider]]
            id = "a"
            capability = "trends"
            adapter = "google_suggest"

            [[provider]]
            id = "a"
            capability = "assembly"
            adapter = "manifest"
        "#;
        let err = AppConfig::from_toml_str(toml, no_env).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn empty_result_budget_is_lower_than_retry_budget() {
        let mut p = ProviderConfig::new("a", AdapterKind::Gemini);
        p.max_retries = 4;
        assert_eq!(p.empty_result_budget(), 2);
        p.max_retries = 1;
        assert_eq!(p.empty_result_budget(), 1);
        p.max_empty_retries = Some(9);
        assert_eq!(p.empty_result_budget(), 1);
    }

    #[test]
    fn unknown_stage_in_defaults_fails_to_parse() {
        let toml = r#"
            [pipeline]
            default_stages = ["script", "dance"]
        "#;
        assert!(matches!(
            AppConfig::from_toml_str(toml, no_env),
            Err(ConfigError::Parse(_))
        ));
    }
}
