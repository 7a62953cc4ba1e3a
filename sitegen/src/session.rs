use serde::Serialize;

use crate::attachment::{Attachment, AttachmentError, MediaType};
use crate::client::GenerationClient;
use crate::request::GenerationRequest;
use crate::transcript::Turn;

/// In-memory state of one website-building session: the document under
/// construction, the transcript, the pending image and the busy flag.
///
/// All mutation goes through the update methods below. At most one turn is
/// in flight; `begin_turn` refuses to start another while busy.
#[derive(Debug, Default)]
pub struct Session {
    document: String,
    transcript: Vec<Turn>,
    attachment: Option<Attachment>,
    busy: bool,
}

/// Serializable view of a session for front ends.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub document: String,
    pub transcript: Vec<Turn>,
    pub busy: bool,
    pub attachment: Option<AttachmentInfo>,
    pub started: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttachmentInfo {
    pub media_type: MediaType,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// True once the first turn has been submitted.
    pub fn has_started(&self) -> bool {
        !self.transcript.is_empty()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            document: self.document.clone(),
            transcript: self.transcript.clone(),
            busy: self.busy,
            attachment: self.attachment.as_ref().map(|a| AttachmentInfo {
                media_type: a.media_type,
            }),
            started: self.has_started(),
        }
    }

    // ─── Update operations ───

    pub fn append_fragment(&mut self, fragment: &str) {
        self.document.push_str(fragment);
    }

    pub fn append_turn(&mut self, turn: Turn) {
        self.transcript.push(turn);
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn set_attachment(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    pub fn clear_attachment(&mut self) {
        self.attachment = None;
    }

    /// Validate and store an uploaded image. Unsupported types leave the
    /// session untouched.
    pub fn attach(&mut self, mime: &str, bytes: &[u8]) -> Result<(), AttachmentError> {
        let attachment = Attachment::from_bytes(mime, bytes)?;
        self.set_attachment(attachment);
        Ok(())
    }

    // ─── Turns ───

    /// Start a turn: capture prompt and attachment, record the user turn and
    /// reset the document. Returns `None` (and changes nothing) when busy, or
    /// when there is neither prompt text nor an attachment.
    pub fn begin_turn(&mut self, prompt: &str) -> Option<GenerationRequest> {
        if self.busy {
            tracing::debug!("Submit ignored: a generation is already running");
            return None;
        }
        if prompt.trim().is_empty() && self.attachment.is_none() {
            return None;
        }

        let attachment = self.attachment.take();
        let history = self.transcript.clone();
        self.set_busy(true);
        self.append_turn(Turn::user(prompt, attachment.is_some()));
        let document = std::mem::take(&mut self.document);

        tracing::info!(
            turn = self.transcript.len(),
            with_image = attachment.is_some(),
            "Turn started"
        );
        Some(GenerationRequest {
            prompt: prompt.to_string(),
            document,
            history,
            attachment,
        })
    }

    /// Close the in-flight turn with the confirmation entry.
    pub fn finish_turn(&mut self) {
        self.append_turn(Turn::confirmation());
        self.set_busy(false);
        tracing::info!(document_chars = self.document.len(), "Turn finished");
    }

    /// Run a whole turn: begin, stream every fragment into the document
    /// (also handing it to `on_fragment`), finish. Returns `false` if the
    /// submit was rejected.
    pub async fn submit<F>(&mut self, client: &GenerationClient, prompt: &str, mut on_fragment: F) -> bool
    where
        F: FnMut(&str),
    {
        let Some(request) = self.begin_turn(prompt) else {
            return false;
        };
        client
            .generate(&request, |fragment| {
                self.append_fragment(fragment);
                on_fragment(fragment);
            })
            .await;
        self.finish_turn();
        true
    }
}
