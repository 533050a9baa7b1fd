//! Transcription client: one page image in, that page's text out.
//!
//! The orchestrator only sees the [`Transcriber`] trait. [`VlmTranscriber`] is
//! the production implementation; it is intentionally thin, and all prompt
//! wording lives in [`crate::prompts`].
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids thundering-herd: with 500 ms base and 2 retries the wait sequence
//! is 500 ms → 1 s. Once retries are exhausted the page fails, and with it
//! the whole job.

use crate::config::{ScribeConfig, DEFAULT_MODEL};
use crate::error::ScribeError;
use crate::pipeline::{encode, render::PageImage};
use crate::prompts::{page_request, TRANSCRIPTION_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Turns one rendered page into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `page`, one of `total` pages. Any `Err` fails the job.
    async fn transcribe(&self, page: &PageImage, total: usize) -> Result<String, ScribeError>;
}

/// [`Transcriber`] backed by a vision LLM from `edgequake-llm`.
pub struct VlmTranscriber {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    call_timeout: Duration,
}

impl VlmTranscriber {
    /// Build a transcriber, resolving the provider from `config` and the environment.
    pub fn from_config(config: &ScribeConfig) -> Result<Self, ScribeError> {
        let provider = resolve_provider(config)?;
        Ok(Self::with_provider(provider, config))
    }

    pub fn with_provider(provider: Arc<dyn LLMProvider>, config: &ScribeConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| TRANSCRIPTION_PROMPT.to_string()),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

#[async_trait]
impl Transcriber for VlmTranscriber {
    /// ## Message Layout
    ///
    /// 1. **System message**: the transcription prompt (or user-supplied override)
    /// 2. **User message**: the page PNG as a base64 image attachment, with a
    ///    short "Page N of M." text part
    async fn transcribe(&self, page: &PageImage, total: usize) -> Result<String, ScribeError> {
        let page_num = page.page_num();
        let start = Instant::now();

        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user_with_images(
                page_request(page_num, total),
                vec![encode::to_image_data(&page.png)],
            ),
        ];

        let mut last_err = String::from("Unknown error");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page_num, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(
                self.call_timeout,
                self.provider.chat(&messages, Some(&self.options)),
            )
            .await
            {
                Ok(Ok(response)) => {
                    debug!(
                        "Page {}: {} input tokens, {} output tokens, {:?}",
                        page_num,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Ok(Err(e)) => {
                    last_err = e.to_string();
                }
                Err(_) => {
                    last_err = format!("no response within {}s", self.call_timeout.as_secs());
                }
            }
            warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, last_err);
        }

        Err(ScribeError::TranscriptionFailure {
            page: page_num,
            detail: format!("{} (after {} attempts)", last_err, self.max_retries + 1),
        })
    }
}

/// Build `CompletionOptions` from the service config.
fn build_options(config: &ScribeConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ScribeError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ScribeError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or the
///    default model; the API key comes from the provider's usual variable.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &ScribeConfig) -> Result<Arc<dyn LLMProvider>, ScribeError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ScribeError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
