use crate::config::TranscodeConfig;
use crate::{Result, UploadAiError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info};

/// Compressed audio produced from a video, ready for upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub duration: Duration,
    pub bitrate_kbps: u32,
    pub file_size: u64,
}

/// Black-box media capability: convert video bytes to audio bytes.
#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    /// Convert the video's audio stream into a compressed audio file
    /// inside `output_dir`.
    async fn convert_video_to_audio(
        &self,
        video_path: &Path,
        output_dir: &Path,
    ) -> Result<AudioArtifact>;

    /// Observe fractional conversion progress (0.0..=1.0).
    fn subscribe_progress(&self) -> watch::Receiver<f32>;
}

static SHARED: OnceCell<Arc<FfmpegTranscoder>> = OnceCell::const_new();

/// ffmpeg-backed transcoder. Extracts only the audio stream and encodes it
/// at a low bitrate optimized for speech transcription rather than fidelity.
pub struct FfmpegTranscoder {
    config: TranscodeConfig,
    /// Engine probe result, resolved once on first conversion
    loaded: OnceCell<()>,
    progress_tx: watch::Sender<f32>,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscodeConfig) -> Self {
        let (progress_tx, _) = watch::channel(0.0);
        Self {
            config,
            loaded: OnceCell::new(),
            progress_tx,
        }
    }

    /// Process-wide shared engine instance, created on first use. Repeated
    /// calls return the same instance; the configuration of the first caller
    /// wins. The instance lives for the rest of the process.
    pub async fn shared(config: &TranscodeConfig) -> Arc<FfmpegTranscoder> {
        SHARED
            .get_or_init(|| async { Arc::new(Self::new(config.clone())) })
            .await
            .clone()
    }

    /// Probe the engine binaries once; concurrent first calls share a single
    /// probe and every later call reuses its result.
    async fn ensure_loaded(&self) -> Result<()> {
        self.loaded
            .get_or_try_init(|| async {
                for tool in ["ffmpeg", "ffprobe"] {
                    let available = Command::new(tool)
                        .arg("-version")
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .await
                        .map(|status| status.success())
                        .unwrap_or(false);

                    if !available {
                        return Err(UploadAiError::Transcode(format!(
                            "{} not available on PATH",
                            tool
                        )));
                    }
                }
                info!("🎞️ Media engine loaded");
                Ok(())
            })
            .await
            .map(|_| ())
    }

    fn check_container(&self, video_path: &Path) -> Result<()> {
        let extension = video_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if !self
            .config
            .accepted_extensions
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(&extension))
        {
            return Err(UploadAiError::Transcode(format!(
                "unsupported container '{}', accepted: {}",
                extension,
                self.config.accepted_extensions.join(", ")
            )));
        }

        Ok(())
    }

    /// Probe the input duration, used to scale progress events
    async fn probe_duration(&self, video_path: &Path) -> Result<Duration> {
        let output = Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(video_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(UploadAiError::Transcode(format!(
                "ffprobe failed for {}",
                video_path.display()
            )));
        }

        let probe: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        let duration_seconds: f64 = probe["format"]["duration"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        Ok(Duration::from_secs_f64(duration_seconds))
    }
}

#[async_trait]
impl MediaTranscoder for FfmpegTranscoder {
    async fn convert_video_to_audio(
        &self,
        video_path: &Path,
        output_dir: &Path,
    ) -> Result<AudioArtifact> {
        self.check_container(video_path)?;
        self.ensure_loaded().await?;

        let stem = video_path
            .file_stem()
            .ok_or_else(|| UploadAiError::Transcode("invalid video filename".to_string()))?
            .to_string_lossy();
        let audio_path = output_dir.join(format!("{}.mp3", stem));

        tokio::fs::create_dir_all(output_dir).await?;

        let total = self.probe_duration(video_path).await?;

        info!(
            "🎵 Converting {} to audio at {} kbps",
            video_path.display(),
            self.config.audio_bitrate_kbps
        );
        self.progress_tx.send_replace(0.0);

        let mut command = Command::new("ffmpeg");
        command
            .arg("-i")
            .arg(video_path)
            .args(["-map", "0:a"])
            .args(["-b:a", &format!("{}k", self.config.audio_bitrate_kbps)])
            .args(["-acodec", &self.config.audio_codec])
            .args(["-progress", "pipe:1", "-nostats", "-y"])
            .arg(&audio_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command.spawn()?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                // out_time_ms is microseconds despite the name
                if let Some(raw) = line.strip_prefix("out_time_ms=") {
                    if let Ok(out_micros) = raw.trim().parse::<f64>() {
                        if total.as_micros() > 0 {
                            let fraction =
                                (out_micros / total.as_micros() as f64).clamp(0.0, 1.0) as f32;
                            self.progress_tx.send_replace(fraction);
                            debug!("convert progress: {}%", (fraction * 100.0).round());
                        }
                    }
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(UploadAiError::Transcode(format!(
                "ffmpeg failed for {}",
                video_path.display()
            )));
        }

        let file_size = tokio::fs::metadata(&audio_path).await?.len();
        if file_size == 0 {
            return Err(UploadAiError::Transcode(
                "conversion produced empty output".to_string(),
            ));
        }

        self.progress_tx.send_replace(1.0);
        info!(
            "✅ Audio ready: {} ({:.1} KB)",
            audio_path.display(),
            file_size as f64 / 1000.0
        );

        Ok(AudioArtifact {
            path: audio_path,
            duration: total,
            bitrate_kbps: self.config.audio_bitrate_kbps,
            file_size,
        })
    }

    fn subscribe_progress(&self) -> watch::Receiver<f32> {
        self.progress_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shared_instance_identity() {
        let config = TranscodeConfig::default();
        let first = FfmpegTranscoder::shared(&config).await;
        let second = FfmpegTranscoder::shared(&config).await;

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_container_check_rejects_unsupported() {
        let transcoder = FfmpegTranscoder::new(TranscodeConfig::default());

        let result = transcoder.check_container(Path::new("clip.mov"));
        assert!(matches!(result, Err(UploadAiError::Transcode(_))));

        assert!(transcoder.check_container(Path::new("clip.mp4")).is_ok());
        assert!(transcoder.check_container(Path::new("CLIP.MP4")).is_ok());
    }

    #[test]
    fn test_container_check_rejects_missing_extension() {
        let transcoder = FfmpegTranscoder::new(TranscodeConfig::default());
        assert!(transcoder.check_container(Path::new("clip")).is_err());
    }

    #[test]
    fn test_progress_starts_at_zero() {
        let transcoder = FfmpegTranscoder::new(TranscodeConfig::default());
        let progress = transcoder.subscribe_progress();
        assert_eq!(*progress.borrow(), 0.0);
    }
}
