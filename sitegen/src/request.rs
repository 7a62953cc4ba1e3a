use serde::Serialize;

use crate::attachment::Attachment;
use crate::instructions::{CURRENT_DOCUMENT_LABEL, HISTORY_LABEL, REQUEST_LABEL};
use crate::transcript::{Turn, format_history};

/// Inline binary payload of a content part.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// One part of the user content sent to the model.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentPart {
    Text(String),
    InlineData(InlineData),
}

/// Everything one generation turn needs, captured by value at submit time.
#[derive(Clone, Debug, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Document as it stood before this turn reset it.
    pub document: String,
    /// Transcript as it stood before this turn's user entry.
    pub history: Vec<Turn>,
    pub attachment: Option<Attachment>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Content parts in context-priority order: prior document, history,
    /// active request, then the image.
    pub fn parts(&self) -> Vec<ContentPart> {
        let mut parts = Vec::with_capacity(4);
        if !self.document.is_empty() {
            parts.push(ContentPart::Text(format!(
                "{CURRENT_DOCUMENT_LABEL}\n{}",
                self.document
            )));
        }
        if !self.history.is_empty() {
            parts.push(ContentPart::Text(format!(
                "{HISTORY_LABEL}\n{}",
                format_history(&self.history)
            )));
        }
        parts.push(ContentPart::Text(format!("{REQUEST_LABEL}\n{}", self.prompt)));
        if let Some(att) = &self.attachment {
            parts.push(ContentPart::InlineData(InlineData {
                mime_type: att.media_type.as_str().to_string(),
                data: att.data.clone(),
            }));
        }
        parts
    }
}
