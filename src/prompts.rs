use crate::api::ApiClient;
use crate::{Result, UploadAiError, TRANSCRIPTION_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Saved prompt template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Server-assigned identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Display title
    pub title: String,

    /// Prompt body; may reference the transcription placeholder
    #[serde(rename = "prompt")]
    pub body: String,
}

impl PromptTemplate {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            body: body.into(),
        }
    }

    /// Whether the body references the transcription placeholder.
    pub fn has_placeholder(&self) -> bool {
        self.body.contains(TRANSCRIPTION_PLACEHOLDER)
    }
}

/// CRUD-lite access to saved prompt templates
pub struct PromptLibrary {
    api: ApiClient,
}

impl PromptLibrary {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Fetch the saved templates, in server order. Each call re-fetches, so
    /// the sequence restarts from the beginning.
    pub async fn list_prompts(&self) -> Result<Vec<PromptTemplate>> {
        let templates = self.api.list_prompts().await?;
        debug!("Loaded {} prompt templates", templates.len());
        Ok(templates)
    }

    /// Find a saved template by title. Its body replaces the completion
    /// prompt text when selected.
    pub async fn select(&self, title: &str) -> Result<Option<PromptTemplate>> {
        Ok(self
            .list_prompts()
            .await?
            .into_iter()
            .find(|template| template.title == title))
    }

    /// Persist a new template. Both fields must be non-empty; validation
    /// failures never reach the network.
    pub async fn create_prompt(&self, title: &str, body: &str) -> Result<()> {
        Self::validate(title, body)?;

        if !body.contains(TRANSCRIPTION_PLACEHOLDER) {
            warn!(
                "Prompt '{}' does not reference {}",
                title, TRANSCRIPTION_PLACEHOLDER
            );
        }

        self.api.create_prompt(title, body).await?;
        info!("💾 Prompt '{}' saved", title);

        Ok(())
    }

    fn validate(title: &str, body: &str) -> Result<()> {
        if title.trim().is_empty() {
            return Err(UploadAiError::Validation(
                "prompt title must not be empty".to_string(),
            ));
        }
        if body.trim().is_empty() {
            return Err(UploadAiError::Validation(
                "prompt body must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
