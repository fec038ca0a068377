/*!
 * Scripted provider for testing.
 *
 * Behaviour comes from a responder closure that sees every request and its
 * zero-based call index:
 * - `ScriptedProvider::echo(prefix)` - prefixes every source text
 * - `ScriptedProvider::per_item(f)` - translates item by item, `None` skips a key
 * - `ScriptedProvider::failing(err)` - always fails with `err`
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{BatchItem, BatchRequest, BatchResponse, BatchTranslation, TokenUsage, TranslationProvider};
use crate::errors::ProviderError;

type Responder = dyn Fn(&BatchRequest, usize) -> Result<BatchResponse, ProviderError> + Send + Sync;

/// Deterministic provider driven by a closure
#[derive(Clone)]
pub struct ScriptedProvider {
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<BatchRequest>>>,
    delay: Option<Duration>,
}

impl fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("calls", &self.call_count())
            .field("delay", &self.delay)
            .finish()
    }
}

impl ScriptedProvider {
    /// Provider answering with `responder(request, call_index)`
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&BatchRequest, usize) -> Result<BatchResponse, ProviderError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Translate item by item; `None` leaves the key out of the response
    pub fn per_item<F>(translate: F) -> Self
    where
        F: Fn(&BatchItem) -> Option<String> + Send + Sync + 'static,
    {
        Self::new(move |request, _| Ok(Self::respond(request, &translate)))
    }

    /// Prefix every source text, which keeps placeholders and terms intact
    pub fn echo(prefix: &str) -> Self {
        let prefix = prefix.to_string();
        Self::per_item(move |item| Some(format!("{}{}", prefix, item.source_text)))
    }

    /// Always fail with the given error
    pub fn failing(error: ProviderError) -> Self {
        Self::new(move |_, _| Err(error.clone()))
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Build a response from a per-item function, one token per word
    pub fn respond<F>(request: &BatchRequest, translate: F) -> BatchResponse
    where
        F: Fn(&BatchItem) -> Option<String>,
    {
        let mut usage = TokenUsage::default();
        let translations = request
            .items
            .iter()
            .filter_map(|item| {
                usage.prompt_tokens += item.source_text.split_whitespace().count() as u64;
                translate(item).map(|text| {
                    usage.completion_tokens += text.split_whitespace().count() as u64;
                    BatchTranslation {
                        key_path: item.key_path.clone(),
                        translated_text: text,
                    }
                })
            })
            .collect();
        BatchResponse { translations, usage }
    }

    /// Number of `translate_batch` calls so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Copies of every request received
    pub fn requests(&self) -> Vec<BatchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TranslationProvider for ScriptedProvider {
    async fn translate_batch(&self, request: &BatchRequest) -> Result<BatchResponse, ProviderError> {
        let index = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len() - 1
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        (self.responder)(request, index)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
