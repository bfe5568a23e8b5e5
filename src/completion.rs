use crate::api::{ApiClient, CompletionBody};
use crate::{Result, UploadAiError};
use futures::stream::{AbortHandle, Abortable};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info};

/// Parameters for one completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    prompt: String,
    video_id: Option<String>,
    temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            video_id: None,
            temperature: 0.5,
        }
    }

    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }

    /// Sampling temperature. Values outside [0, 1] are clamped into range.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Replace the prompt text. The input stays editable until submission.
    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}

/// Releases the controller's in-flight slot when the stream is dropped
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Cancellable sequence of completion text deltas, in arrival order
pub struct CompletionStream {
    inner: Pin<Box<dyn Stream<Item = Result<String>> + Send>>,
    abort_handle: AbortHandle,
    _guard: InFlightGuard,
}

impl CompletionStream {
    /// Abort the underlying request. The stream ends after any delta
    /// already buffered.
    pub fn cancel(&self) {
        debug!("Completion stream cancelled");
        self.abort_handle.abort();
    }

    /// Handle that can cancel this stream from elsewhere, e.g. on teardown.
    pub fn cancellation_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Drain the stream, appending each delta to `output` as it arrives.
    /// On interruption the partial output is preserved and the error is
    /// returned.
    pub async fn collect_into(mut self, output: &mut String) -> Result<()> {
        while let Some(delta) = self.next().await {
            output.push_str(&delta?);
        }
        Ok(())
    }
}

impl Stream for CompletionStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

/// Manages the completion request/response cycle against the remote
/// endpoint. One request may be in flight per controller; submissions while
/// streaming are rejected.
pub struct CompletionController {
    api: ApiClient,
    in_flight: Arc<AtomicBool>,
}

impl CompletionController {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the submit affordance should be enabled for `request`.
    pub fn can_submit(&self, request: &CompletionRequest) -> bool {
        !request.prompt().trim().is_empty()
            && request.video_id().is_some()
            && !self.is_streaming()
    }

    /// Validate and open the streaming request, returning the delta stream.
    /// Validation failures never reach the network.
    pub async fn submit(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        if request.prompt().trim().is_empty() {
            return Err(UploadAiError::Validation(
                "completion prompt must not be empty".to_string(),
            ));
        }
        let video_id = request.video_id().ok_or_else(|| {
            UploadAiError::Validation("no video selected for completion".to_string())
        })?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(UploadAiError::CompletionInFlight);
        }
        // released on any early return below, or when the stream finishes
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let body = CompletionBody::new(video_id, request.temperature(), request.prompt());
        let response = self.api.stream_completion(&body).await?;

        info!("✨ Completion streaming started for video {}", video_id);

        let bytes = response.bytes_stream().map(|chunk| match chunk {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) => Err(UploadAiError::StreamInterrupted(e.to_string())),
        });
        let deltas = decode_text_deltas(bytes);

        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let inner = Abortable::new(deltas, abort_registration);

        Ok(CompletionStream {
            inner: Box::pin(inner),
            abort_handle,
            _guard: guard,
        })
    }
}

/// Decode a byte stream into UTF-8 text deltas, holding back incomplete
/// multi-byte sequences until the next chunk completes them.
fn decode_text_deltas<S>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<Vec<u8>>> + Send + 'static,
{
    futures::stream::unfold(
        (Box::pin(bytes), Vec::new()),
        |(mut bytes, mut carry)| async move {
            loop {
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        carry.extend_from_slice(&chunk);
                        match take_complete_utf8(&mut carry) {
                            Ok(Some(text)) => return Some((Ok(text), (bytes, carry))),
                            Ok(None) => continue,
                            Err(e) => return Some((Err(e), (bytes, carry))),
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), (bytes, carry))),
                    None => {
                        if carry.is_empty() {
                            return None;
                        }
                        let tail = String::from_utf8(std::mem::take(&mut carry)).map_err(|e| {
                            UploadAiError::StreamInterrupted(format!(
                                "stream ended mid UTF-8 sequence: {}",
                                e
                            ))
                        });
                        return Some((tail, (bytes, carry)));
                    }
                }
            }
        },
    )
}

/// Split off the longest valid UTF-8 prefix of `buffer`, leaving any
/// trailing incomplete sequence in place.
fn take_complete_utf8(buffer: &mut Vec<u8>) -> Result<Option<String>> {
    match std::str::from_utf8(buffer) {
        Ok(text) => {
            if text.is_empty() {
                return Ok(None);
            }
            let text = text.to_string();
            buffer.clear();
            Ok(Some(text))
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            if valid == 0 {
                return Ok(None);
            }
            let rest = buffer.split_off(valid);
            let text = String::from_utf8_lossy(buffer).into_owned();
            *buffer = rest;
            Ok(Some(text))
        }
        Err(e) => Err(UploadAiError::StreamInterrupted(format!(
            "invalid UTF-8 in completion stream: {}",
            e
        ))),
    }
}
