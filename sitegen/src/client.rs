use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::config::GenerationConfig;
use crate::gemini::GeminiBackend;
use crate::request::GenerationRequest;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("stream error: {0}")]
    Stream(String),
    #[error("malformed response chunk: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Ordered text increments of one streaming response.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerateError>> + Send>>;

/// The "generate content, streaming" call of a remote text-generation service.
#[async_trait::async_trait]
pub trait ContentBackend: Send + Sync + 'static {
    async fn stream_generate(
        &self,
        api_key: &str,
        config: &GenerationConfig,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerateError>;
}

/// Wrap a message as an HTML comment that cannot close itself early.
pub fn diagnostic_comment(message: &str) -> String {
    let mut body = String::with_capacity(message.len() + 8);
    let mut prev = '\0';
    for c in message.chars() {
        if c == '-' && prev == '-' {
            body.push(' ');
        }
        body.push(c);
        prev = c;
    }
    if body.ends_with('-') {
        body.push(' ');
    }
    format!("<!-- Error: {body} -->")
}

/// Performs generation turns against a backend, converting every failure
/// into a diagnostic fragment.
#[derive(Clone)]
pub struct GenerationClient {
    config: GenerationConfig,
    backend: Arc<dyn ContentBackend>,
}

impl GenerationClient {
    pub fn new(config: GenerationConfig, backend: Arc<dyn ContentBackend>) -> Self {
        Self { config, backend }
    }

    /// Client talking to the Gemini API.
    pub fn gemini(config: GenerationConfig) -> Self {
        Self::new(config, Arc::new(GeminiBackend::new()))
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Run one turn. `sink` receives every non-empty increment in arrival
    /// order; on failure it receives one final diagnostic comment instead.
    /// Returns once the stream has ended or failed.
    pub async fn generate<F>(&self, request: &GenerationRequest, mut sink: F)
    where
        F: FnMut(&str),
    {
        let Some(api_key) = self.config.credential() else {
            tracing::warn!("Generation skipped: no API key configured");
            sink(&diagnostic_comment(
                "API key is missing. Set GEMINI_API_KEY (or pass --api-key) and try again.",
            ));
            return;
        };

        tracing::debug!(
            model = %self.config.model,
            prompt_chars = request.prompt.len(),
            document_chars = request.document.len(),
            history_turns = request.history.len(),
            has_image = request.attachment.is_some(),
            "Starting generation"
        );
        let start = std::time::Instant::now();

        let mut stream = match self
            .backend
            .stream_generate(api_key, &self.config, request)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Generation request failed: {}", e);
                sink(&diagnostic_comment(&e.to_string()));
                return;
            }
        };

        let mut fragments = 0usize;
        while let Some(item) = stream.next().await {
            match item {
                Ok(text) if text.is_empty() => {}
                Ok(text) => {
                    fragments += 1;
                    sink(&text);
                }
                Err(e) => {
                    tracing::warn!("Generation stream failed after {} fragments: {}", fragments, e);
                    sink(&diagnostic_comment(&e.to_string()));
                    return;
                }
            }
        }

        tracing::debug!(
            fragments,
            duration_ms = start.elapsed().as_millis() as u64,
            "Generation finished"
        );
    }
}
