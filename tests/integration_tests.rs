use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};

use uploadai::{
    ApiClient, AudioArtifact, CompletionController, CompletionRequest, ConfigBuilder,
    MediaTranscoder, PromptLibrary, UploadAiError, UploadPipeline, UploadSession, UploadStatus,
};

/// Canned-response stand-in for the upload.ai backend
#[derive(Clone, Default)]
struct ServerState {
    prompts: Arc<Mutex<Vec<(String, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    fail_upload: bool,
}

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    path: String,
    content_type: Option<String>,
    body: Vec<u8>,
}

async fn spawn_backend(state: ServerState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(handle_connection(stream, state.clone()));
        }
    });

    format!("http://{}", addr)
}

async fn handle_connection(mut stream: TcpStream, state: ServerState) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    state.requests.lock().await.push(request.clone());

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/videos") => {
            if state.fail_upload {
                write_response(
                    &mut stream,
                    "500 Internal Server Error",
                    br#"{"error":"upload failed"}"#,
                )
                .await;
            } else {
                write_response(&mut stream, "200 OK", br#"{"video":{"id":"vid-123"}}"#).await;
            }
        }
        ("POST", path) if path.starts_with("/videos/") && path.ends_with("/transcription") => {
            write_response(&mut stream, "200 OK", b"{}").await;
        }
        ("POST", "/ai/complete") => {
            write_chunked(
                &mut stream,
                &["The video ", "walks through ", "async Rust streams."],
            )
            .await;
        }
        ("POST", "/prompt") => {
            let value: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            let title = value["title"].as_str().unwrap_or_default().to_string();
            let prompt = value["prompt"].as_str().unwrap_or_default().to_string();
            state.prompts.lock().await.push((title, prompt));
            write_response(&mut stream, "200 OK", b"{}").await;
        }
        ("GET", "/prompt") => {
            let prompts = state.prompts.lock().await;
            let entries: Vec<serde_json::Value> = prompts
                .iter()
                .enumerate()
                .map(|(i, (title, prompt))| {
                    serde_json::json!({
                        "id": format!("p-{}", i),
                        "title": title,
                        "prompt": prompt,
                    })
                })
                .collect();
            let body = serde_json::to_vec(&entries).unwrap();
            write_response(&mut stream, "200 OK", &body).await;
        }
        _ => {
            write_response(&mut stream, "404 Not Found", b"{}").await;
        }
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(pos) = find_subslice(&buffer, b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut content_length = 0usize;
    let mut content_type = None;
    let mut chunked = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().unwrap_or(0);
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value.eq_ignore_ascii_case("chunked");
        }
    }

    let mut body = buffer[header_end + 4..].to_vec();
    if chunked {
        while find_subslice(&body, b"0\r\n\r\n").is_none() {
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
    } else {
        while body.len() < content_length {
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
        body.truncate(content_length);
    }

    Some(RecordedRequest {
        method,
        path,
        content_type,
        body,
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(body).await;
    let _ = stream.flush().await;
}

async fn write_chunked(stream: &mut TcpStream, pieces: &[&str]) {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
    let _ = stream.write_all(head.as_bytes()).await;
    for piece in pieces {
        let framed = format!("{:x}\r\n{}\r\n", piece.len(), piece);
        let _ = stream.write_all(framed.as_bytes()).await;
        let _ = stream.flush().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let _ = stream.write_all(b"0\r\n\r\n").await;
    let _ = stream.flush().await;
}

fn client_for(base_url: &str) -> ApiClient {
    let config = ConfigBuilder::new().with_base_url(base_url).build();
    ApiClient::new(&config.api).unwrap()
}

/// Trait-seam transcoder that produces a fake audio file instantly
struct MockTranscoder {
    progress_tx: watch::Sender<f32>,
}

impl MockTranscoder {
    fn new() -> Self {
        let (progress_tx, _) = watch::channel(0.0);
        Self { progress_tx }
    }
}

#[async_trait]
impl MediaTranscoder for MockTranscoder {
    async fn convert_video_to_audio(
        &self,
        _video_path: &Path,
        output_dir: &Path,
    ) -> uploadai::Result<AudioArtifact> {
        let audio_path = output_dir.join("audio.mp3");
        tokio::fs::write(&audio_path, b"fake mp3 payload").await?;
        self.progress_tx.send_replace(1.0);
        Ok(AudioArtifact {
            path: audio_path,
            duration: Duration::from_secs(10),
            bitrate_kbps: 20,
            file_size: 16,
        })
    }

    fn subscribe_progress(&self) -> watch::Receiver<f32> {
        self.progress_tx.subscribe()
    }
}

struct FailingTranscoder;

#[async_trait]
impl MediaTranscoder for FailingTranscoder {
    async fn convert_video_to_audio(
        &self,
        _video_path: &Path,
        _output_dir: &Path,
    ) -> uploadai::Result<AudioArtifact> {
        Err(UploadAiError::Transcode(
            "engine failed to load".to_string(),
        ))
    }

    fn subscribe_progress(&self) -> watch::Receiver<f32> {
        let (tx, rx) = watch::channel(0.0);
        drop(tx);
        rx
    }
}

async fn selected_session() -> (TempDir, UploadSession) {
    let dir = TempDir::new().unwrap();
    let video_path = dir.path().join("talk.mp4");
    tokio::fs::write(&video_path, b"mock mp4 content").await.unwrap();

    let mut session = UploadSession::new();
    session.select_file(&video_path).unwrap();
    (dir, session)
}

#[tokio::test]
async fn test_pipeline_reaches_success_with_exact_status_sequence() {
    let server = spawn_backend(ServerState::default()).await;
    let api = client_for(&server);

    let (_dir, mut session) = selected_session().await;
    session.set_transcription_prompt("rust, async").unwrap();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_in_callback = Arc::clone(&seen);
    let pipeline = UploadPipeline::new(api, Arc::new(MockTranscoder::new()))
        .with_video_uploaded_callback(Arc::new(move |id: &str| {
            seen_in_callback.lock().unwrap().push(id.to_string());
        }));

    let video_id = pipeline.submit(&mut session).await.unwrap();

    assert_eq!(video_id.as_deref(), Some("vid-123"));
    assert_eq!(session.status(), UploadStatus::Success);
    assert_eq!(
        session.status_history(),
        &[
            UploadStatus::Waiting,
            UploadStatus::Converting,
            UploadStatus::Uploading,
            UploadStatus::Generating,
            UploadStatus::Success,
        ]
    );
    assert_eq!(seen.lock().unwrap().as_slice(), &["vid-123".to_string()]);
}

#[tokio::test]
async fn test_upload_and_transcription_wire_format() {
    let state = ServerState::default();
    let server = spawn_backend(state.clone()).await;
    let api = client_for(&server);

    let (_dir, mut session) = selected_session().await;
    session.set_transcription_prompt("keywords from the video").unwrap();

    let pipeline = UploadPipeline::new(api, Arc::new(MockTranscoder::new()));
    pipeline.submit(&mut session).await.unwrap();

    let requests = state.requests.lock().await;
    assert_eq!(requests.len(), 2);

    let upload = &requests[0];
    assert_eq!(upload.method, "POST");
    assert_eq!(upload.path, "/videos");
    assert!(upload
        .content_type
        .as_deref()
        .unwrap()
        .starts_with("multipart/form-data"));
    assert!(find_subslice(&upload.body, br#"name="file""#).is_some());
    assert!(find_subslice(&upload.body, b"fake mp3 payload").is_some());

    let transcription = &requests[1];
    assert_eq!(transcription.method, "POST");
    assert_eq!(transcription.path, "/videos/vid-123/transcription");
    let body: serde_json::Value = serde_json::from_slice(&transcription.body).unwrap();
    assert_eq!(body["prompt"], "keywords from the video");
}

#[tokio::test]
async fn test_submit_without_selection_is_noop() {
    let state = ServerState::default();
    let server = spawn_backend(state.clone()).await;

    let mut session = UploadSession::new();
    let pipeline = UploadPipeline::new(client_for(&server), Arc::new(MockTranscoder::new()));

    let result = pipeline.submit(&mut session).await.unwrap();

    assert!(result.is_none());
    assert_eq!(session.status(), UploadStatus::Waiting);
    assert!(state.requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_resubmission_blocked_until_reset() {
    let server = spawn_backend(ServerState::default()).await;
    let (_dir, mut session) = selected_session().await;

    let pipeline = UploadPipeline::new(client_for(&server), Arc::new(MockTranscoder::new()));
    pipeline.submit(&mut session).await.unwrap();
    assert_eq!(session.status(), UploadStatus::Success);

    let again = pipeline.submit(&mut session).await;
    assert!(matches!(again, Err(UploadAiError::Validation(_))));

    session.reset();
    let retried = pipeline.submit(&mut session).await.unwrap();
    assert_eq!(retried.as_deref(), Some("vid-123"));
}

#[tokio::test]
async fn test_upload_failure_transitions_to_error() {
    let state = ServerState {
        fail_upload: true,
        ..ServerState::default()
    };
    let server = spawn_backend(state).await;
    let (_dir, mut session) = selected_session().await;

    let pipeline = UploadPipeline::new(client_for(&server), Arc::new(MockTranscoder::new()));
    let result = pipeline.submit(&mut session).await;

    assert!(matches!(
        result,
        Err(UploadAiError::Api { status: 500, .. })
    ));
    assert_eq!(session.status(), UploadStatus::Error);
    assert_eq!(
        session.status_history(),
        &[
            UploadStatus::Waiting,
            UploadStatus::Converting,
            UploadStatus::Uploading,
            UploadStatus::Error,
        ]
    );
    assert!(session.last_error().unwrap().contains("500"));
    assert!(!session.can_submit());

    session.reset();
    assert!(session.can_submit());
}

#[tokio::test]
async fn test_transcoder_failure_transitions_to_error() {
    let server = spawn_backend(ServerState::default()).await;
    let (_dir, mut session) = selected_session().await;

    let pipeline = UploadPipeline::new(client_for(&server), Arc::new(FailingTranscoder));
    let result = pipeline.submit(&mut session).await;

    assert!(matches!(result, Err(UploadAiError::Transcode(_))));
    assert_eq!(
        session.status_history(),
        &[
            UploadStatus::Waiting,
            UploadStatus::Converting,
            UploadStatus::Error,
        ]
    );
}

#[tokio::test]
async fn test_completion_stream_accumulates_and_stays_stable() {
    let server = spawn_backend(ServerState::default()).await;
    let controller = CompletionController::new(client_for(&server));

    let request = CompletionRequest::new("Summarize: {transcription}")
        .with_video_id("vid-123")
        .with_temperature(0.5);

    let mut stream = controller.submit(&request).await.unwrap();
    assert!(controller.is_streaming());

    let mut output = String::new();
    let mut snapshots = Vec::new();
    while let Some(delta) = stream.next().await {
        output.push_str(&delta.unwrap());
        snapshots.push(output.clone());
    }

    assert_eq!(output, "The video walks through async Rust streams.");
    assert!(snapshots.len() > 1);
    for pair in snapshots.windows(2) {
        // append-only: every snapshot extends the previous one
        assert!(pair[1].starts_with(&pair[0]));
    }

    drop(stream);
    assert!(!controller.is_streaming());
}

#[tokio::test]
async fn test_completion_rejects_concurrent_submission() {
    let server = spawn_backend(ServerState::default()).await;
    let controller = CompletionController::new(client_for(&server));

    let request = CompletionRequest::new("Summarize: {transcription}").with_video_id("vid-123");

    let first = controller.submit(&request).await.unwrap();
    let second = controller.submit(&request).await;
    assert!(matches!(second, Err(UploadAiError::CompletionInFlight)));

    // dropping the active stream releases the slot
    drop(first);
    let third = controller.submit(&request).await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn test_completion_cancellation_releases_slot() {
    let server = spawn_backend(ServerState::default()).await;
    let controller = CompletionController::new(client_for(&server));

    let request = CompletionRequest::new("Summarize: {transcription}").with_video_id("vid-123");
    let mut stream = controller.submit(&request).await.unwrap();

    stream.cancel();
    while stream.next().await.is_some() {}
    drop(stream);

    assert!(!controller.is_streaming());
    assert!(controller.submit(&request).await.is_ok());
}

#[tokio::test]
async fn test_prompt_round_trip() {
    let server = spawn_backend(ServerState::default()).await;
    let library = PromptLibrary::new(client_for(&server));

    library
        .create_prompt("YouTube title", "Generate a title: {transcription}")
        .await
        .unwrap();

    let listed = library.list_prompts().await.unwrap();
    let entry = listed
        .iter()
        .find(|template| template.title == "YouTube title")
        .unwrap();
    assert_eq!(entry.body, "Generate a title: {transcription}");
    assert!(entry.has_placeholder());

    // selecting a template replaces the completion prompt text
    let mut request = CompletionRequest::new("");
    let selected = library.select("YouTube title").await.unwrap().unwrap();
    request.set_prompt(selected.body);
    assert_eq!(request.prompt(), "Generate a title: {transcription}");
}

#[tokio::test]
async fn test_prompt_validation_never_reaches_network() {
    let state = ServerState::default();
    let server = spawn_backend(state.clone()).await;
    let library = PromptLibrary::new(client_for(&server));

    assert!(matches!(
        library.create_prompt("", "body").await,
        Err(UploadAiError::Validation(_))
    ));
    assert!(matches!(
        library.create_prompt("title", "   ").await,
        Err(UploadAiError::Validation(_))
    ));

    assert!(state.requests.lock().await.is_empty());
}
