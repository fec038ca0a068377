/*!
 * Provider implementations for different translation services.
 *
 * Every provider speaks the OpenAI chat-completion wire format:
 * - `openai`: built-in OpenAI, DeepSeek and Gemini endpoints plus custom ones
 * - `mock`: scripted provider for tests and dry runs
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::app_config::{ResolvedProvider, TranslationSettings};
use crate::database::models::ProtectedTerm;
use crate::errors::ProviderError;

pub mod mock;
pub mod openai;

/// One text to translate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem {
    pub key_path: String,
    pub source_text: String,
}

/// Everything a provider needs to translate a batch
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub items: Vec<BatchItem>,
    /// Terms applicable to at least one item; scopes are honoured per item
    pub protected_terms: Vec<ProtectedTerm>,
    pub context: Option<String>,
    pub source_language: String,
    pub target_language: String,
    pub model: String,
}

/// Translated text for one key
#[derive(Debug, Clone, PartialEq)]
pub struct BatchTranslation {
    pub key_path: String,
    pub translated_text: String,
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider answer. Keys without an entry count as untranslated.
#[derive(Debug, Clone, Default)]
pub struct BatchResponse {
    pub translations: Vec<BatchTranslation>,
    pub usage: TokenUsage,
}

/// Common trait for all translation providers
///
/// Implementations classify their failures through `ProviderError`, which the
/// job runner uses to decide between retrying and aborting.
#[async_trait]
pub trait TranslationProvider: Send + Sync + Debug {
    /// Translate a batch of texts
    async fn translate_batch(&self, request: &BatchRequest) -> Result<BatchResponse, ProviderError>;

    /// Provider identifier for logs
    fn name(&self) -> &str;
}

/// Builds providers for jobs
pub trait ProviderFactory: Send + Sync {
    fn create(
        &self,
        resolved: &ResolvedProvider,
        settings: &TranslationSettings,
    ) -> Result<Arc<dyn TranslationProvider>, ProviderError>;
}

/// Factory for real HTTP providers
#[derive(Debug, Default, Clone)]
pub struct HttpProviderFactory;

impl ProviderFactory for HttpProviderFactory {
    fn create(
        &self,
        resolved: &ResolvedProvider,
        settings: &TranslationSettings,
    ) -> Result<Arc<dyn TranslationProvider>, ProviderError> {
        let provider = openai::ChatCompletionProvider::new(&resolved.config, settings.system_message.clone())?;
        Ok(Arc::new(provider))
    }
}
