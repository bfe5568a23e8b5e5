use crate::api::ApiClient;
use crate::transcode::MediaTranscoder;
use crate::{Result, UploadAiError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;
use tracing::{error, info};
use url::Url;

/// Upload pipeline status, strictly forward-progressing per attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Waiting,
    Converting,
    Uploading,
    Generating,
    Success,
    Error,
}

impl UploadStatus {
    /// Transition table. Stages advance one step at a time, every
    /// non-terminal stage may fail into `Error`, and only `reset` returns
    /// to `Waiting`.
    pub fn can_transition(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Waiting, Converting)
                | (Converting, Uploading)
                | (Uploading, Generating)
                | (Generating, Success)
                | (Waiting | Converting | Uploading | Generating, Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Success | UploadStatus::Error)
    }

    /// User-visible label for the primary action control.
    pub fn message(self) -> &'static str {
        match self {
            UploadStatus::Waiting => "Upload video",
            UploadStatus::Converting => "Converting video to audio",
            UploadStatus::Uploading => "Sending audio to the server",
            UploadStatus::Generating => "Generating transcription",
            UploadStatus::Success => "Transcription generated successfully",
            UploadStatus::Error => "Something went wrong generating the transcription",
        }
    }
}

/// One video upload attempt: the selected file, its status, and the working
/// directory holding conversion artifacts.
pub struct UploadSession {
    selected_file: Option<PathBuf>,
    workdir: Option<TempDir>,
    transcription_prompt: Option<String>,
    status_tx: watch::Sender<UploadStatus>,
    /// Statuses entered during the current attempt, in order
    history: Vec<UploadStatus>,
    last_error: Option<String>,
}

impl UploadSession {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(UploadStatus::Waiting);
        Self {
            selected_file: None,
            workdir: None,
            transcription_prompt: None,
            status_tx,
            history: vec![UploadStatus::Waiting],
            last_error: None,
        }
    }

    /// Select a video file, discarding any previous selection along with its
    /// conversion artifacts and preview resource. Status returns to
    /// `Waiting`.
    pub fn select_file(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.workdir = Some(TempDir::new()?);
        self.selected_file = Some(path.into());
        self.transcription_prompt = None;
        self.last_error = None;
        self.status_tx.send_replace(UploadStatus::Waiting);
        self.history = vec![UploadStatus::Waiting];
        Ok(())
    }

    pub fn selected_file(&self) -> Option<&Path> {
        self.selected_file.as_deref()
    }

    /// file:// URL for previewing the selected video, if it resolves.
    pub fn preview_url(&self) -> Option<Url> {
        let path = self.selected_file.as_ref()?;
        let absolute = path.canonicalize().ok()?;
        Url::from_file_path(absolute).ok()
    }

    /// Transcription guidance keywords; editable only while `Waiting`.
    pub fn set_transcription_prompt(&mut self, prompt: impl Into<String>) -> Result<()> {
        if self.status() != UploadStatus::Waiting {
            return Err(UploadAiError::Validation(
                "transcription prompt is locked while an upload is in progress".to_string(),
            ));
        }
        self.transcription_prompt = Some(prompt.into());
        Ok(())
    }

    pub fn transcription_prompt(&self) -> Option<&str> {
        self.transcription_prompt.as_deref()
    }

    pub fn status(&self) -> UploadStatus {
        *self.status_tx.borrow()
    }

    /// Observe status changes as the pipeline advances.
    pub fn subscribe_status(&self) -> watch::Receiver<UploadStatus> {
        self.status_tx.subscribe()
    }

    /// Statuses entered during the current attempt, oldest first.
    pub fn status_history(&self) -> &[UploadStatus] {
        &self.history
    }

    /// Whether the submit action is currently available.
    pub fn can_submit(&self) -> bool {
        self.selected_file.is_some() && self.status() == UploadStatus::Waiting
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Return a finished or failed session to `Waiting` for a fresh attempt
    /// with the same file.
    pub fn reset(&mut self) {
        self.last_error = None;
        self.status_tx.send_replace(UploadStatus::Waiting);
        self.history = vec![UploadStatus::Waiting];
    }

    fn advance(&mut self, next: UploadStatus) -> Result<()> {
        let current = self.status();
        if !current.can_transition(next) {
            return Err(UploadAiError::Validation(format!(
                "invalid status transition {:?} -> {:?}",
                current, next
            )));
        }
        self.status_tx.send_replace(next);
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self, message: String) {
        error!("❌ Upload failed: {}", message);
        let current = self.status();
        if current.can_transition(UploadStatus::Error) {
            self.status_tx.send_replace(UploadStatus::Error);
            self.history.push(UploadStatus::Error);
        }
        self.last_error = Some(message);
    }

    fn workdir_path(&self) -> Result<&Path> {
        self.workdir
            .as_ref()
            .map(|dir| dir.path())
            .ok_or_else(|| {
                UploadAiError::Validation("no working directory; select a file first".to_string())
            })
    }
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback invoked with the server-assigned video identifier on success
pub type VideoUploadedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Drives the convert → upload → transcribe sequence for a session
pub struct UploadPipeline {
    api: ApiClient,
    transcoder: Arc<dyn MediaTranscoder>,
    on_video_uploaded: Option<VideoUploadedCallback>,
}

impl UploadPipeline {
    pub fn new(api: ApiClient, transcoder: Arc<dyn MediaTranscoder>) -> Self {
        Self {
            api,
            transcoder,
            on_video_uploaded: None,
        }
    }

    /// Register the upward callback for new video identifiers.
    pub fn with_video_uploaded_callback(mut self, callback: VideoUploadedCallback) -> Self {
        self.on_video_uploaded = Some(callback);
        self
    }

    /// Run the full sequence for the session's selected file. Returns the
    /// server-assigned video identifier, or `None` when no file is selected.
    /// Stage failures transition the session to `Error` and surface as the
    /// returned error; `reset` permits a retry.
    pub async fn submit(&self, session: &mut UploadSession) -> Result<Option<String>> {
        let Some(video_path) = session.selected_file().map(Path::to_path_buf) else {
            return Ok(None);
        };

        if session.status() != UploadStatus::Waiting {
            return Err(UploadAiError::Validation(
                "an upload is already in progress or finished; reset first".to_string(),
            ));
        }

        match self.run_stages(session, &video_path).await {
            Ok(video_id) => {
                info!("🎉 Transcription ready for video {}", video_id);
                if let Some(callback) = &self.on_video_uploaded {
                    callback(&video_id);
                }
                Ok(Some(video_id))
            }
            Err(e) => {
                session.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        session: &mut UploadSession,
        video_path: &Path,
    ) -> Result<String> {
        session.advance(UploadStatus::Converting)?;
        let workdir = session.workdir_path()?.to_path_buf();
        let audio = self
            .transcoder
            .convert_video_to_audio(video_path, &workdir)
            .await?;

        session.advance(UploadStatus::Uploading)?;
        let uploaded = self.api.upload_audio(&audio.path).await?;

        session.advance(UploadStatus::Generating)?;
        let prompt = session.transcription_prompt().unwrap_or("");
        self.api.request_transcription(&uploaded.id, prompt).await?;

        session.advance(UploadStatus::Success)?;
        Ok(uploaded.id)
    }
}
