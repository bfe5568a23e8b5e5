use crate::{Result, UploadAiError};
use serde::{Deserialize, Serialize};

/// Configuration for the uploadai client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote API settings
    pub api: ApiConfig,

    /// Video-to-audio conversion settings
    pub transcode: TranscodeConfig,

    /// Completion request settings
    pub completion: CompletionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the upload.ai backend
    pub base_url: String,

    /// Timeout for non-streaming requests (seconds)
    pub request_timeout_seconds: u64,

    /// Connection timeout (seconds)
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Accepted video container extensions
    pub accepted_extensions: Vec<String>,

    /// Target audio bitrate in kbps, kept low for speech transcription
    pub audio_bitrate_kbps: u32,

    /// Audio codec passed to ffmpeg
    pub audio_codec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Default sampling temperature
    pub default_temperature: f32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3333".to_string(),
            request_timeout_seconds: 30,
            connect_timeout_seconds: 10,
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            accepted_extensions: vec!["mp4".to_string()],
            audio_bitrate_kbps: 20,
            audio_codec: "libmp3lame".to_string(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            default_temperature: 0.5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            transcode: TranscodeConfig::default(),
            completion: CompletionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_paths = [
            "uploadai.toml",
            "config/uploadai.toml",
            "~/.config/uploadai/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Ok(Self::default().with_env_overrides())
    }

    /// Apply environment variable overrides
    fn with_env_overrides(mut self) -> Self {
        if let Ok(base_url) = std::env::var("UPLOADAI_API_URL") {
            self.api.base_url = base_url;
        }

        if let Ok(timeout) = std::env::var("UPLOADAI_REQUEST_TIMEOUT") {
            if let Ok(seconds) = timeout.parse() {
                self.api.request_timeout_seconds = seconds;
            }
        }

        if let Ok(bitrate) = std::env::var("UPLOADAI_AUDIO_BITRATE") {
            if let Ok(kbps) = bitrate.parse() {
                self.transcode.audio_bitrate_kbps = kbps;
            }
        }

        if let Ok(temperature) = std::env::var("UPLOADAI_TEMPERATURE") {
            if let Ok(value) = temperature.parse() {
                self.completion.default_temperature = value;
            }
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if url::Url::parse(&self.api.base_url).is_err() {
            return Err(UploadAiError::Configuration(format!(
                "base_url is not a valid URL: {}",
                self.api.base_url
            )));
        }

        if self.api.request_timeout_seconds == 0 {
            return Err(UploadAiError::Configuration(
                "request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.transcode.accepted_extensions.is_empty() {
            return Err(UploadAiError::Configuration(
                "accepted_extensions must not be empty".to_string(),
            ));
        }

        if self.transcode.audio_bitrate_kbps == 0 {
            return Err(UploadAiError::Configuration(
                "audio_bitrate_kbps must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.completion.default_temperature) {
            return Err(UploadAiError::Configuration(
                "default_temperature must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.api.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, seconds: u64) -> Self {
        self.config.api.request_timeout_seconds = seconds;
        self
    }

    pub fn with_accepted_extensions(mut self, extensions: Vec<String>) -> Self {
        self.config.transcode.accepted_extensions = extensions;
        self
    }

    pub fn with_audio_bitrate(mut self, kbps: u32) -> Self {
        self.config.transcode.audio_bitrate_kbps = kbps;
        self
    }

    pub fn with_default_temperature(mut self, temperature: f32) -> Self {
        self.config.completion.default_temperature = temperature;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:3333");
        assert_eq!(config.transcode.audio_bitrate_kbps, 20);
        assert_eq!(config.transcode.accepted_extensions, vec!["mp4"]);
        assert_eq!(config.completion.default_temperature, 0.5);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_base_url("http://api.example.com")
            .with_request_timeout(60)
            .with_audio_bitrate(32)
            .build();

        assert_eq!(config.api.base_url, "http://api.example.com");
        assert_eq!(config.api.request_timeout_seconds, 60);
        assert_eq!(config.transcode.audio_bitrate_kbps, 32);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.api.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transcode.audio_bitrate_kbps = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.completion.default_temperature = 1.5;
        assert!(config.validate().is_err());
    }
}
