//! Gemini `streamGenerateContent` backend.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::client::{ContentBackend, FragmentStream, GenerateError};
use crate::config::GenerationConfig;
use crate::instructions::SYSTEM_INSTRUCTION;
use crate::request::{ContentPart, GenerationRequest};

// ─── Request body ───

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    contents: Vec<Content>,
    system_instruction: SystemInstruction,
    generation_config: GenerationParams,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<ContentPart>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: [TextPart; 1],
}

#[derive(Serialize)]
struct TextPart {
    text: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    max_output_tokens: u32,
}

fn request_body(config: &GenerationConfig, request: &GenerationRequest) -> GenerateContentBody {
    GenerateContentBody {
        contents: vec![Content {
            role: "user",
            parts: request.parts(),
        }],
        system_instruction: SystemInstruction {
            parts: [TextPart {
                text: SYSTEM_INSTRUCTION,
            }],
        },
        generation_config: GenerationParams {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        },
    }
}

// ─── Response chunks ───

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ChunkContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkContent {
    #[serde(default)]
    parts: Vec<ChunkPart>,
}

#[derive(Debug, Deserialize)]
struct ChunkPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

/// Text increment carried by one SSE payload. `Ok(None)` for chunks with
/// no visible text (usage-only, finish markers, thoughts).
fn decode_chunk(data: &str) -> Result<Option<String>, GenerateError> {
    let chunk: StreamChunk = serde_json::from_str(data)?;
    if let Some(err) = chunk.error {
        return Err(GenerateError::Api {
            status: err.code,
            message: err.message,
        });
    }
    if let Some(usage) = &chunk.usage_metadata {
        tracing::trace!(
            prompt_tokens = usage.prompt_token_count,
            output_tokens = usage.candidates_token_count,
            "usage"
        );
    }
    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(None);
    };
    if let Some(reason) = &candidate.finish_reason
        && reason != "STOP"
    {
        tracing::warn!("Generation finished with reason {}", reason);
    }
    let text: String = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter(|p| !p.thought)
                .filter_map(|p| p.text)
                .collect()
        })
        .unwrap_or_default();
    Ok((!text.is_empty()).then_some(text))
}

/// Pull a readable message out of a non-success response body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(env) if !env.error.message.is_empty() => env.error.message,
        _ => {
            const MAX: usize = 500;
            let trimmed = body.trim();
            match trimmed.char_indices().nth(MAX) {
                Some((idx, _)) => format!("{}…", &trimmed[..idx]),
                None => trimmed.to_string(),
            }
        }
    }
}

/// Talks to the Gemini API over HTTPS with server-sent events.
pub struct GeminiBackend {
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(config: &GenerationConfig) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            config.base_url.trim_end_matches('/'),
            config.model
        )
    }
}

impl Default for GeminiBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ContentBackend for GeminiBackend {
    async fn stream_generate(
        &self,
        api_key: &str,
        config: &GenerationConfig,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerateError> {
        let url = Self::endpoint(config);
        tracing::debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request_body(config, request))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerateError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let fragments = resp
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) => decode_chunk(&event.data).transpose(),
                    Err(e) => Some(Err(GenerateError::Stream(e.to_string()))),
                }
            });
        Ok(Box::pin(fragments))
    }
}
