/*!
 * OpenAI-compatible chat-completion client.
 *
 * Serves the built-in OpenAI, DeepSeek and Gemini endpoints as well as any
 * custom endpoint that implements `POST /chat/completions`.
 */

use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BatchRequest, BatchResponse, BatchTranslation, TokenUsage, TranslationProvider};
use crate::app_config::ProviderConfig;
use crate::errors::ProviderError;
use crate::protection::{apply_protection, applicable_terms, restore_protection};
use crate::translation::prompts::{build_array_prompt, parse_translation_array};

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Chat completion request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
        }
    }

    /// Add a message to the request
    pub fn add_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role: role.into(),
            content: content.into(),
        });
        self
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Client for one configured endpoint
#[derive(Debug)]
pub struct ChatCompletionProvider {
    client: Client,
    id: String,
    api_url: String,
    api_key: String,
    timeout_secs: u64,
    system_message: String,
}

impl ChatCompletionProvider {
    /// Create a client from a provider config
    pub fn new(config: &ProviderConfig, system_message: String) -> Result<Self, ProviderError> {
        url::Url::parse(&config.api_url).map_err(|e| {
            ProviderError::InvalidConfig(format!("Invalid api_url '{}': {}", config.api_url, e))
        })?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            id: config.id.clone(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
            system_message,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout_secs)
        } else {
            ProviderError::ConnectionError(e.to_string())
        }
    }

    /// Send one chat request and return the assistant text with token usage
    pub async fn complete(&self, request: &ChatRequest) -> Result<(String, TokenUsage), ProviderError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("{} API error ({}): {}", self.id, status, error_text);
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::ParseError(format!("Invalid chat completion body: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::ParseError("Response contained no message content".to_string()))?;

        let usage = parsed.usage.unwrap_or_default();
        Ok((
            content,
            TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        ))
    }
}

#[async_trait]
impl TranslationProvider for ChatCompletionProvider {
    async fn translate_batch(&self, request: &BatchRequest) -> Result<BatchResponse, ProviderError> {
        if request.items.is_empty() {
            return Ok(BatchResponse::default());
        }

        let mut texts = Vec::with_capacity(request.items.len());
        let mut restorations = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let terms = applicable_terms(&request.protected_terms, &item.key_path);
            let protected = apply_protection(&item.source_text, &terms);
            texts.push(protected.text);
            restorations.push(protected.replacements);
        }
        let uses_placeholders = restorations.iter().any(|r| !r.is_empty());

        let prompt = build_array_prompt(
            &texts,
            &request.source_language,
            &request.target_language,
            request.context.as_deref(),
            uses_placeholders,
        );
        let chat = ChatRequest::new(&request.model)
            .add_message("system", &self.system_message)
            .add_message("user", prompt);

        debug!(
            "Sending {} texts to {} ({}) for {}",
            texts.len(),
            self.id,
            request.model,
            request.target_language
        );
        let (content, usage) = self.complete(&chat).await?;
        let values = parse_translation_array(&content, request.items.len())?;

        let translations = request
            .items
            .iter()
            .zip(values)
            .zip(restorations.iter())
            .filter_map(|((item, value), replacements)| {
                value.map(|text| BatchTranslation {
                    key_path: item.key_path.clone(),
                    translated_text: restore_protection(&text, replacements),
                })
            })
            .collect();

        Ok(BatchResponse { translations, usage })
    }

    fn name(&self) -> &str {
        &self.id
    }
}
