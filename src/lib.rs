//! uploadai - client-side media-to-text pipeline with streaming AI completion
//!
//! Drives the full flow against an upload.ai-style backend: convert a local
//! video into a compressed speech-optimized audio track, upload it, request
//! server-side transcription, then stream an AI completion conditioned on
//! that transcription.

pub mod api;
pub mod completion;
pub mod config;
pub mod pipeline;
pub mod prompts;
pub mod transcode;

// Re-export main types for easy access
pub use crate::api::{ApiClient, UploadedVideo};
pub use crate::completion::{CompletionController, CompletionRequest, CompletionStream};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::pipeline::{UploadPipeline, UploadSession, UploadStatus};
pub use crate::prompts::{PromptLibrary, PromptTemplate};
pub use crate::transcode::{AudioArtifact, FfmpegTranscoder, MediaTranscoder};

/// Placeholder token the server substitutes with the video transcription.
pub const TRANSCRIPTION_PLACEHOLDER: &str = "{transcription}";

/// Result type for client operations
pub type Result<T> = std::result::Result<T, UploadAiError>;

/// Error types for client operations
#[derive(thiserror::Error, Debug)]
pub enum UploadAiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transcoding failed: {0}")]
    Transcode(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("A completion request is already in flight")]
    CompletionInFlight,

    #[error("Completion stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}
