use crate::config::ApiConfig;
use crate::prompts::PromptTemplate;
use crate::{Result, UploadAiError};
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Uploaded video record assigned by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedVideo {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    video: UploadedVideo,
}

#[derive(Debug, Serialize)]
struct TranscriptionRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
struct CreatePromptRequest<'a> {
    title: &'a str,
    prompt: &'a str,
}

/// JSON body of the streaming completion request
#[derive(Debug, Serialize)]
pub(crate) struct CompletionBody<'a> {
    #[serde(rename = "videoID")]
    video_id: &'a str,
    temperature: f32,
    prompt: &'a str,
}

impl<'a> CompletionBody<'a> {
    pub(crate) fn new(video_id: &'a str, temperature: f32, prompt: &'a str) -> Self {
        Self {
            video_id,
            temperature,
            prompt,
        }
    }
}

/// HTTP client for the upload.ai backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    client: reqwest::Client,
    /// Separate client without a total-request timeout, so long-lived
    /// completion streams are not cut off mid-response
    stream_client: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            UploadAiError::Configuration(format!(
                "invalid base URL {}: {}",
                config.base_url, e
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()?;

        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()?;

        Ok(Self {
            base_url,
            client,
            stream_client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| {
            UploadAiError::Configuration(format!("invalid endpoint path {}: {}", path, e))
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UploadAiError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Register converted audio with the server, obtaining the
    /// server-assigned video identifier.
    pub async fn upload_audio(&self, audio_path: &Path) -> Result<UploadedVideo> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")?;
        let form = multipart::Form::new().part("file", part);

        debug!("Uploading audio {} to /videos", audio_path.display());

        let response = self
            .client
            .post(self.endpoint("videos")?)
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let upload: UploadResponse = response.json().await?;
        Ok(upload.video)
    }

    /// Trigger server-side transcription of a stored audio record.
    pub async fn request_transcription(&self, video_id: &str, prompt: &str) -> Result<()> {
        let url = self.endpoint(&format!("videos/{}/transcription", video_id))?;

        debug!("Requesting transcription for video {}", video_id);

        let response = self
            .client
            .post(url)
            .json(&TranscriptionRequest { prompt })
            .send()
            .await?;
        Self::check_status(response).await?;

        Ok(())
    }

    /// Open the streaming completion request. The response body arrives as
    /// incremental text chunks.
    pub(crate) async fn stream_completion(
        &self,
        body: &CompletionBody<'_>,
    ) -> Result<reqwest::Response> {
        debug!("Opening completion stream at /ai/complete");

        let response = self
            .stream_client
            .post(self.endpoint("ai/complete")?)
            .json(body)
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Persist a reusable prompt template.
    pub async fn create_prompt(&self, title: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("prompt")?)
            .json(&CreatePromptRequest {
                title,
                prompt: body,
            })
            .send()
            .await?;
        Self::check_status(response).await?;

        Ok(())
    }

    /// Fetch the saved prompt templates, in server order.
    pub async fn list_prompts(&self) -> Result<Vec<PromptTemplate>> {
        let response = self.client.get(self.endpoint("prompt")?).send().await?;
        let response = Self::check_status(response).await?;

        Ok(response.json().await?)
    }
}
