use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::Path;
use std::time::Duration;

use crate::errors::ProviderError;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// SQLite database location, platform data dir when absent
    #[serde(default)]
    pub database_path: Option<String>,

    /// Provider used when neither the request nor the project names one
    #[serde(default = "default_provider_id")]
    pub default_provider: String,

    /// Configured chat-completion endpoints
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Translation config
    #[serde(default)]
    pub translation: TranslationSettings,

    /// Job registry settings
    #[serde(default)]
    pub jobs: JobSettings,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Built-in provider kinds. Everything else is a custom endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinProvider {
    OpenAI,
    DeepSeek,
    Gemini,
}

impl BuiltinProvider {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::DeepSeek => "DeepSeek",
            Self::Gemini => "Gemini",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::DeepSeek => "deepseek",
            Self::Gemini => "gemini",
        }
    }

    pub fn all() -> [BuiltinProvider; 3] {
        [Self::OpenAI, Self::DeepSeek, Self::Gemini]
    }
}

impl std::fmt::Display for BuiltinProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for BuiltinProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "deepseek" => Ok(Self::DeepSeek),
            "gemini" => Ok(Self::Gemini),
            _ => Err(anyhow!("Not a built-in provider: {}", s)),
        }
    }
}

/// Placeholder written into fresh config files
pub const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY_HERE";

static PROVIDER_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("Invalid provider id regex"));

/// One OpenAI-chat-compatible endpoint
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: Provider identifier, also used in "provider:model" references
    pub id: String,

    // @field: API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Full chat-completions URL
    #[serde(default = "String::new")]
    pub api_url: String,

    // @field: Offered models, the first one is the default
    #[serde(default)]
    pub models: Vec<String>,

    // @field: Attempts after the first failed call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    // @field: Timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    // @param provider: Built-in provider
    // @returns: Provider config with defaults
    pub fn builtin(provider: BuiltinProvider) -> Self {
        let (api_url, models) = match provider {
            BuiltinProvider::OpenAI => (
                "https://api.openai.com/v1/chat/completions",
                vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()],
            ),
            BuiltinProvider::DeepSeek => (
                "https://api.deepseek.com/chat/completions",
                vec!["deepseek-chat".to_string()],
            ),
            BuiltinProvider::Gemini => (
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
                vec!["gemini-2.5-flash".to_string()],
            ),
        };

        Self {
            id: provider.id().to_string(),
            api_key: API_KEY_PLACEHOLDER.to_string(),
            api_url: api_url.to_string(),
            models,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Custom endpoint speaking the same wire format
    pub fn custom(id: impl Into<String>, api_url: impl Into<String>, api_key: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            id: id.into(),
            api_key: api_key.into(),
            api_url: api_url.into(),
            models,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn default_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }

    pub fn has_usable_api_key(&self) -> bool {
        let key = self.api_key.trim();
        !key.is_empty() && key != API_KEY_PLACEHOLDER
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if !PROVIDER_ID_REGEX.is_match(&self.id) {
            return Err(anyhow!("Invalid provider id '{}': use letters, digits, '-' or '_'", self.id));
        }
        if self.models.is_empty() {
            return Err(anyhow!("Provider '{}' has no models configured", self.id));
        }
        url::Url::parse(&self.api_url)
            .with_context(|| format!("Provider '{}' has an invalid api_url: {}", self.id, self.api_url))?;
        if self.timeout_secs == 0 {
            return Err(anyhow!("Provider '{}' timeout must be greater than zero", self.id));
        }
        Ok(())
    }
}

/// Provider settings resolved for one job
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub config: ProviderConfig,
    pub model: String,
}

/// Translation settings applicable to all providers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationSettings {
    /// Word budget per provider request
    #[serde(default = "default_chunk_size_words")]
    pub chunk_size_words: usize,

    /// Check that variables survive translation
    #[serde(default = "default_true")]
    pub preserve_variables: bool,

    /// Regexes recognising placeholder tokens
    #[serde(default = "default_variable_patterns")]
    pub variable_patterns: Vec<String>,

    /// System message sent with every request
    #[serde(default = "default_system_message")]
    pub system_message: String,

    /// Backoff base for retryable errors (in milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Backoff base for rate limits (in milliseconds)
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,

    /// Upper bound for any single backoff sleep (in milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            chunk_size_words: default_chunk_size_words(),
            preserve_variables: true,
            variable_patterns: default_variable_patterns(),
            system_message: default_system_message(),
            retry_backoff_ms: default_retry_backoff_ms(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl TranslationSettings {
    /// Patterns the validator should enforce
    pub fn active_variable_patterns(&self) -> Vec<String> {
        if self.preserve_variables {
            self.variable_patterns.clone()
        } else {
            Vec::new()
        }
    }
}

/// In-memory job registry settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobSettings {
    /// Seconds a finished job stays queryable
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Smallest accepted word budget
pub const MIN_CHUNK_SIZE_WORDS: usize = 100;
/// Largest accepted word budget
pub const MAX_CHUNK_SIZE_WORDS: usize = 10_000;

fn default_provider_id() -> String {
    BuiltinProvider::OpenAI.id().to_string()
}

fn default_providers() -> Vec<ProviderConfig> {
    BuiltinProvider::all()
        .into_iter()
        .map(ProviderConfig::builtin)
        .collect()
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_chunk_size_words() -> usize {
    300
}

fn default_true() -> bool {
    true
}

fn default_variable_patterns() -> Vec<String> {
    vec![
        r"\{[^}]+\}".to_string(),
        r"\$\{[^}]+\}".to_string(),
        r"%[sd]".to_string(),
        r"\{\{[^}]+\}\}".to_string(),
    ]
}

fn default_system_message() -> String {
    "You are a professional translator. Return only valid JSON.".to_string()
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_rate_limit_backoff_ms() -> u64 {
    30_000
}

fn default_max_backoff_ms() -> u64 {
    300_000
}

fn default_retention_secs() -> u64 {
    600
}

/// Check a caller-supplied word budget
pub fn validate_chunk_size(chunk_size_words: usize) -> Result<()> {
    if !(MIN_CHUNK_SIZE_WORDS..=MAX_CHUNK_SIZE_WORDS).contains(&chunk_size_words) {
        return Err(anyhow!(
            "chunk_size_words must be between {} and {}, got {}",
            MIN_CHUNK_SIZE_WORDS,
            MAX_CHUNK_SIZE_WORDS,
            chunk_size_words
        ));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config, writing a default one first when the file is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("Config file {:?} not found, creating default configuration", path);
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }
        Self::from_file(path)
    }

    /// Write configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        crate::file_utils::FileManager::write_atomic(path, &json)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(anyhow!("At least one provider must be configured"));
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.id.to_lowercase()) {
                return Err(anyhow!("Duplicate provider id: {}", provider.id));
            }
        }

        if self.provider(&self.default_provider).is_none() {
            return Err(anyhow!("Default provider '{}' is not configured", self.default_provider));
        }

        validate_chunk_size(self.translation.chunk_size_words)?;

        for pattern in &self.translation.variable_patterns {
            Regex::new(pattern).with_context(|| format!("Invalid variable pattern: {}", pattern))?;
        }

        Ok(())
    }

    /// Look up a provider by id (case-insensitive)
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id.eq_ignore_ascii_case(id))
    }

    /// Resolve `"provider"` or `"provider:model"` into a usable provider.
    ///
    /// A missing or placeholder API key and an unknown model are fatal
    /// configuration errors.
    pub fn resolve_provider(&self, provider_ref: Option<&str>) -> Result<ResolvedProvider, ProviderError> {
        let reference = provider_ref
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(self.default_provider.as_str());

        let (provider_id, model) = match reference.split_once(':') {
            Some((id, model)) => (id.trim(), Some(model.trim()).filter(|m| !m.is_empty())),
            None => (reference, None),
        };

        let config = self
            .provider(provider_id)
            .ok_or_else(|| ProviderError::InvalidConfig(format!("Unknown provider: {}", provider_id)))?;

        if !config.has_usable_api_key() {
            return Err(ProviderError::InvalidConfig(format!(
                "API key for provider '{}' is not configured",
                config.id
            )));
        }

        let model = match model {
            Some(model) => {
                if !config.models.iter().any(|m| m == model) {
                    return Err(ProviderError::UnsupportedModel(format!(
                        "Model '{}' is not configured for provider '{}'",
                        model, config.id
                    )));
                }
                model.to_string()
            }
            None => config
                .default_model()
                .ok_or_else(|| ProviderError::InvalidConfig(format!("Provider '{}' has no models", config.id)))?
                .to_string(),
        };

        Ok(ResolvedProvider {
            config: config.clone(),
            model,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            default_provider: default_provider_id(),
            providers: default_providers(),
            translation: TranslationSettings::default(),
            jobs: JobSettings::default(),
            log_level: LogLevel::default(),
        }
    }
}
