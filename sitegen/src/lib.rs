pub mod attachment;
pub mod client;
pub mod config;
pub mod gemini;
pub mod instructions;
pub mod request;
pub mod session;
pub mod transcript;

// Re-exports
pub use attachment::{Attachment, AttachmentError, MediaType};
pub use client::{ContentBackend, FragmentStream, GenerateError, GenerationClient, diagnostic_comment};
pub use config::{ConfigError, GenerationConfig, SitegenConfig};
pub use gemini::GeminiBackend;
pub use request::{ContentPart, GenerationRequest, InlineData};
pub use session::{AttachmentInfo, Session, SessionSnapshot};
pub use transcript::{CONFIRMATION, IMAGE_MARKER, Role, Turn};
