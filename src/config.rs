//! Configuration management
//!
//! Settings live in `<config dir>/codeagent/config.json`. A missing file means
//! defaults; environment variables override whatever the file says.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::llm::RetryPolicy;
use crate::error::Error;
use crate::tools::{ToolSettings, DEFAULT_BLOCKED_COMMANDS};
use crate::Result;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    OpenRouter,
    HuggingFace,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Ollama, Self::OpenRouter, Self::HuggingFace];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
            Self::HuggingFace => "huggingface",
        }
    }

    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::HuggingFace => "https://router.huggingface.co/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => "qwen2.5-coder:7b",
            Self::OpenRouter => "deepseek/deepseek-chat",
            Self::HuggingFace => "Qwen/Qwen2.5-Coder-32B-Instruct",
        }
    }

    pub fn requires_api_key(self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// Models known to handle tool use reasonably well.
    pub fn recommended_models(self) -> &'static [&'static str] {
        match self {
            Self::Ollama => &[
                "qwen2.5-coder:7b",
                "qwen2.5-coder:14b",
                "qwen2.5-coder:32b",
                "qwen2.5:7b",
                "qwen2.5:14b",
                "llama3.1:8b",
                "llama3.1:70b",
                "mistral:7b",
                "mixtral:8x7b",
                "deepseek-coder-v2:16b",
                "codellama:7b",
                "codellama:13b",
            ],
            Self::OpenRouter => &[
                "deepseek/deepseek-chat",
                "deepseek/deepseek-coder",
                "anthropic/claude-3.5-sonnet",
                "anthropic/claude-3-haiku",
                "openai/gpt-4o",
                "openai/gpt-4o-mini",
                "google/gemini-pro-1.5",
                "meta-llama/llama-3.1-70b-instruct",
                "meta-llama/llama-3.1-8b-instruct",
                "mistralai/mistral-large",
                "qwen/qwen-2.5-coder-32b-instruct",
            ],
            Self::HuggingFace => &[
                "Qwen/Qwen2.5-Coder-32B-Instruct",
                "deepseek-ai/DeepSeek-Coder-V2-Instruct",
                "codellama/CodeLlama-34b-Instruct-hf",
                "bigcode/starcoder2-15b-instruct-v0.1",
                "meta-llama/Meta-Llama-3.1-70B-Instruct",
                "mistralai/Mixtral-8x7B-Instruct-v0.1",
                "meta-llama/Meta-Llama-3.1-8B-Instruct",
            ],
        }
    }

    fn key_url(self) -> Option<&'static str> {
        match self {
            Self::Ollama => None,
            Self::OpenRouter => Some("https://openrouter.ai/keys"),
            Self::HuggingFace => Some("https://huggingface.co/settings/tokens"),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openrouter" => Ok(Self::OpenRouter),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            other => Err(format!(
                "unknown provider '{other}' (expected one of: ollama, openrouter, huggingface)"
            )),
        }
    }
}

/// Everything a provider client needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Bound on a single request attempt.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ProviderConfig {
    /// Defaults for `kind`, without credentials.
    pub fn for_kind(kind: ProviderKind) -> Self {
        Self {
            kind,
            endpoint: kind.default_endpoint().to_string(),
            api_key: None,
            model: kind.default_model().to_string(),
            timeout: Duration::from_secs(default_timeout_secs()),
            retry: RetryPolicy::default(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Uses the provider's default when unset
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,

    #[serde(default)]
    pub openrouter_api_key: Option<String>,

    #[serde(default)]
    pub huggingface_api_key: Option<String>,

    /// Model round-trips allowed per user turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Per-attempt limit on model requests
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub shell_timeout_secs: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Ask before running destructive tools
    #[serde(default = "default_true")]
    pub confirm_destructive: bool,

    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_ollama_host() -> String {
    ProviderKind::Ollama.default_endpoint().to_string()
}

fn default_max_iterations() -> usize {
    25
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_output_bytes() -> usize {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_blocked_commands() -> Vec<String> {
    DEFAULT_BLOCKED_COMMANDS.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            ollama_host: default_ollama_host(),
            openrouter_api_key: None,
            huggingface_api_key: None,
            max_iterations: default_max_iterations(),
            timeout_secs: default_timeout_secs(),
            shell_timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            confirm_destructive: true,
            blocked_commands: default_blocked_commands(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Load from the default location with environment overrides applied.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path())?;
        config.apply_env();
        Ok(config)
    }

    /// Load a file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{} is not valid: {e}", path.display())))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get("CODEAGENT_PROVIDER") {
            match provider.parse() {
                Ok(kind) => self.provider = kind,
                Err(e) => tracing::warn!("ignoring CODEAGENT_PROVIDER: {e}"),
            }
        }
        if let Some(model) = get("CODEAGENT_MODEL") {
            self.model = Some(model);
        }
        if let Some(key) = get("OPENROUTER_API_KEY") {
            self.openrouter_api_key = Some(key);
        }
        if let Some(key) = get("HF_TOKEN") {
            self.huggingface_api_key = Some(key);
        }
        if let Some(host) = get("OLLAMA_HOST") {
            self.ollama_host = host;
        }
    }

    pub fn api_key_for(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Ollama => None,
            ProviderKind::OpenRouter => self.openrouter_api_key.as_deref(),
            ProviderKind::HuggingFace => self.huggingface_api_key.as_deref(),
        }
    }

    pub fn set_api_key(&mut self, kind: ProviderKind, key: Option<String>) {
        match kind {
            ProviderKind::Ollama => {}
            ProviderKind::OpenRouter => self.openrouter_api_key = key,
            ProviderKind::HuggingFace => self.huggingface_api_key = key,
        }
    }

    /// Switch provider. The model is reset to the new provider's default.
    pub fn set_provider(&mut self, kind: ProviderKind) {
        if self.provider != kind {
            self.model = None;
        }
        self.provider = kind;
    }

    /// Model in effect: the configured one or the provider default.
    pub fn effective_model(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn provider_config(&self) -> ProviderConfig {
        let kind = self.provider;
        ProviderConfig {
            kind,
            endpoint: match kind {
                ProviderKind::Ollama => self.ollama_host.clone(),
                _ => kind.default_endpoint().to_string(),
            },
            api_key: self.api_key_for(kind).map(str::to_string),
            model: self.effective_model().to_string(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            retry: self.retry.clone(),
        }
    }

    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            shell_timeout: Duration::from_secs(self.shell_timeout_secs.max(1)),
            blocked_commands: self.blocked_commands.clone(),
            max_output_bytes: self.max_output_bytes,
        }
    }

    /// Absorb a provider selection back into the stored fields.
    fn absorb(&mut self, provider: ProviderConfig) {
        self.set_provider(provider.kind);
        if provider.kind == ProviderKind::Ollama {
            self.ollama_host = provider.endpoint;
        }
        if provider.model != provider.kind.default_model() {
            self.model = Some(provider.model);
        }
        if provider.api_key.is_some() {
            self.set_api_key(provider.kind, provider.api_key);
        }
        self.timeout_secs = provider.timeout.as_secs().max(1);
        self.retry = provider.retry;
    }

    /// Display form with credentials masked.
    pub fn redacted(&self) -> Self {
        let mut shown = self.clone();
        shown.openrouter_api_key = shown.openrouter_api_key.as_deref().map(mask);
        shown.huggingface_api_key = shown.huggingface_api_key.as_deref().map(mask);
        shown
    }
}

fn mask(key: &str) -> String {
    let visible: String = key.chars().take(6).collect();
    format!("{visible}…")
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codeagent")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Where the agent core gets its provider settings from.
pub trait ConfigProvider: Send + Sync {
    fn get(&self) -> Result<ProviderConfig>;
    fn set(&self, config: ProviderConfig) -> Result<()>;
}

/// Backed by the JSON config file, with environment overrides on read.
pub struct FileConfigProvider {
    path: PathBuf,
    provider: Option<ProviderKind>,
    model: Option<String>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            provider: None,
            model: None,
        }
    }

    /// Command-line choices, applied after the file and the environment.
    pub fn with_overrides(mut self, provider: Option<ProviderKind>, model: Option<String>) -> Self {
        self.provider = provider;
        self.model = model;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigProvider {
    fn default() -> Self {
        Self::new(config_path())
    }
}

impl ConfigProvider for FileConfigProvider {
    fn get(&self) -> Result<ProviderConfig> {
        let mut config = Config::load_from(&self.path)?;
        config.apply_env();
        if let Some(kind) = self.provider {
            config.set_provider(kind);
        }
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
        Ok(config.provider_config())
    }

    fn set(&self, provider: ProviderConfig) -> Result<()> {
        let mut config = Config::load_from(&self.path)?;
        config.absorb(provider);
        config.save_to(&self.path)
    }
}

/// In-memory configuration for tests and embedding.
pub struct StaticConfigProvider {
    config: Mutex<ProviderConfig>,
}

impl StaticConfigProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn get(&self) -> Result<ProviderConfig> {
        self.config
            .lock()
            .map(|c| c.clone())
            .map_err(|_| Error::Other("config lock poisoned".to_string()))
    }

    fn set(&self, config: ProviderConfig) -> Result<()> {
        let mut guard = self
            .config
            .lock()
            .map_err(|_| Error::Other("config lock poisoned".to_string()))?;
        *guard = config;
        Ok(())
    }
}

/// Interactive first-run setup. Returns the saved configuration.
pub fn setup() -> Result<Config> {
    use crate::ui;
    use inquire::{Password, PasswordDisplayMode, Select, Text};

    ui::print_banner("Setup");
    println!("  Pick a provider and model. Settings are saved to {}\n", config_path().display());

    let mut config = Config::load_from(&config_path()).unwrap_or_default();

    let kind = Select::new("Choose your LLM provider:", ProviderKind::ALL.to_vec())
        .with_starting_cursor(ProviderKind::ALL.iter().position(|k| *k == config.provider).unwrap_or(0))
        .prompt()?;
    config.set_provider(kind);

    if kind == ProviderKind::Ollama {
        config.ollama_host = Text::new("Ollama host:")
            .with_default(&config.ollama_host)
            .prompt()?;
    } else {
        if let Some(url) = kind.key_url() {
            ui::print_step(&format!("Get an API key at {url}"));
        }
        let key = Password::new(&format!("API key for {kind}:"))
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()?;
        let key = key.trim();
        if key.is_empty() && config.api_key_for(kind).is_none() {
            return Err(Error::Config(format!("{kind} needs an API key")));
        }
        if !key.is_empty() {
            config.set_api_key(kind, Some(key.to_string()));
        }
    }

    const OTHER: &str = "Other (type a model name)";
    let mut choices: Vec<&str> = kind.recommended_models().to_vec();
    choices.push(OTHER);
    let picked = Select::new("Choose a model:", choices).prompt()?;
    let model = if picked == OTHER {
        Text::new("Model name:").with_default(kind.default_model()).prompt()?
    } else {
        picked.to_string()
    };
    config.model = (model != kind.default_model()).then_some(model);

    config.save()?;
    ui::print_success(&format!("Saved: {} / {}", config.provider, config.effective_model()));
    if kind == ProviderKind::Ollama {
        ui::print_step(&format!(
            "Make sure the model is available: codeagent pull {}",
            config.effective_model()
        ));
    }
    Ok(config)
}

/// Replace the stored configuration with defaults.
pub fn reset() -> Result<Config> {
    let config = Config::default();
    config.save()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.provider, ProviderKind::Ollama);
        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.max_output_bytes, 30_000);
        assert!(config.confirm_destructive);
        assert!(config.blocked_commands.iter().any(|c| c == "mkfs"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"provider": "openrouter", "openrouter_api_key": "sk-1"}"#).unwrap();
        assert_eq!(config.provider, ProviderKind::OpenRouter);
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("OpenRouter".parse::<ProviderKind>().unwrap(), ProviderKind::OpenRouter);
        assert_eq!("hf".parse::<ProviderKind>().unwrap(), ProviderKind::HuggingFace);
        assert!("gemini".parse::<ProviderKind>().is_err());
        assert_eq!(serde_json::to_string(&ProviderKind::HuggingFace).unwrap(), "\"huggingface\"");
    }

    #[test]
    fn test_provider_config_per_kind() {
        let mut config = Config {
            ollama_host: "http://gpu-box:11434".to_string(),
            openrouter_api_key: Some("sk-or".to_string()),
            timeout_secs: 30,
            ..Config::default()
        };
        let ollama = config.provider_config();
        assert_eq!(ollama.endpoint, "http://gpu-box:11434");
        assert_eq!(ollama.api_key, None);
        assert_eq!(ollama.model, "qwen2.5-coder:7b");
        assert_eq!(ollama.timeout, Duration::from_secs(30));

        config.set_provider(ProviderKind::OpenRouter);
        let router = config.provider_config();
        assert_eq!(router.endpoint, "https://openrouter.ai/api/v1");
        assert_eq!(router.api_key.as_deref(), Some("sk-or"));
        assert_eq!(router.model, "deepseek/deepseek-chat");
    }

    #[test]
    fn test_switching_provider_resets_model() {
        let mut config = Config {
            model: Some("llama3.1:8b".to_string()),
            ..Config::default()
        };
        config.set_provider(ProviderKind::Ollama);
        assert_eq!(config.effective_model(), "llama3.1:8b");
        config.set_provider(ProviderKind::HuggingFace);
        assert_eq!(config.effective_model(), "Qwen/Qwen2.5-Coder-32B-Instruct");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CODEAGENT_PROVIDER", "huggingface"),
            ("CODEAGENT_MODEL", "bigcode/starcoder2-15b-instruct-v0.1"),
            ("HF_TOKEN", "hf_abc"),
            ("OLLAMA_HOST", ""),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.provider, ProviderKind::HuggingFace);
        assert_eq!(config.huggingface_api_key.as_deref(), Some("hf_abc"));
        assert_eq!(config.effective_model(), "bigcode/starcoder2-15b-instruct-v0.1");
        assert_eq!(config.ollama_host, "http://localhost:11434");
    }

    #[test]
    fn test_load_missing_and_save_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());

        let config = Config {
            provider: ProviderKind::OpenRouter,
            max_iterations: 7,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_corrupt_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_file_provider_set_then_get() {
        let dir = TempDir::new().unwrap();
        let source = FileConfigProvider::new(dir.path().join("config.json"));
        let wanted = ProviderConfig {
            api_key: Some("sk-test".to_string()),
            model: "openai/gpt-4o".to_string(),
            ..ProviderConfig::for_kind(ProviderKind::OpenRouter)
        };
        source.set(wanted.clone()).unwrap();

        let stored = Config::load_from(source.path()).unwrap();
        assert_eq!(stored.provider, ProviderKind::OpenRouter);
        assert_eq!(stored.model.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(stored.openrouter_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_file_provider_overrides_win() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        Config {
            provider: ProviderKind::OpenRouter,
            model: Some("openai/gpt-4o".to_string()),
            huggingface_api_key: Some("hf_abc".to_string()),
            ..Config::default()
        }
        .save_to(&path)
        .unwrap();

        let source = FileConfigProvider::new(&path).with_overrides(Some(ProviderKind::HuggingFace), None);
        let config = source.get().unwrap();
        assert_eq!(config.kind, ProviderKind::HuggingFace);
        assert_eq!(config.model, ProviderKind::HuggingFace.default_model());
        assert_eq!(config.api_key.as_deref(), Some("hf_abc"));

        let source = FileConfigProvider::new(&path).with_overrides(None, Some("m".to_string()));
        assert_eq!(source.get().unwrap().model, "m");
    }

    #[test]
    fn test_static_provider() {
        let source = StaticConfigProvider::new(ProviderConfig::for_kind(ProviderKind::Ollama));
        assert_eq!(source.get().unwrap().kind, ProviderKind::Ollama);
        source.set(ProviderConfig::for_kind(ProviderKind::HuggingFace)).unwrap();
        assert_eq!(source.get().unwrap().model, "Qwen/Qwen2.5-Coder-32B-Instruct");
    }

    #[test]
    fn test_redacted_masks_keys() {
        let config = Config {
            openrouter_api_key: Some("sk-or-v1-secret".to_string()),
            ..Config::default()
        };
        let shown = config.redacted();
        assert_eq!(shown.openrouter_api_key.as_deref(), Some("sk-or-…"));
        assert_eq!(shown.huggingface_api_key, None);
    }
}
