use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

use uploadai::{
    ApiClient, CompletionController, CompletionRequest, Config, FfmpegTranscoder,
    MediaTranscoder, PromptLibrary, UploadPipeline, UploadSession,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("uploadai=info,warn")
        .init();

    let matches = Command::new("uploadai")
        .version("0.1.0")
        .about("Upload a video, transcribe it, and stream an AI completion")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("api-url")
                .long("api-url")
                .value_name("URL")
                .help("Backend base URL")
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Convert, upload, transcribe, then stream a completion")
                .arg(
                    Arg::new("video")
                        .short('f')
                        .long("video")
                        .value_name("FILE")
                        .help("Video file to process (MP4)")
                        .required(true),
                )
                .arg(
                    Arg::new("prompt")
                        .short('p')
                        .long("prompt")
                        .value_name("TEXT")
                        .help("Completion prompt; may reference {transcription}"),
                )
                .arg(
                    Arg::new("template")
                        .short('t')
                        .long("template")
                        .value_name("TITLE")
                        .help("Use a saved prompt template by title"),
                )
                .arg(
                    Arg::new("transcription-prompt")
                        .long("transcription-prompt")
                        .value_name("TEXT")
                        .help("Keywords mentioned in the video, to guide transcription"),
                )
                .arg(
                    Arg::new("temperature")
                        .long("temperature")
                        .value_name("NUM")
                        .help("Sampling temperature in [0, 1]"),
                ),
        )
        .subcommand(Command::new("prompts").about("List saved prompt templates"))
        .subcommand(
            Command::new("save-prompt")
                .about("Save a reusable prompt template")
                .arg(
                    Arg::new("title")
                        .long("title")
                        .value_name("TEXT")
                        .required(true),
                )
                .arg(
                    Arg::new("body")
                        .long("body")
                        .value_name("TEXT")
                        .required(true),
                ),
        )
        .get_matches();

    // Load configuration
    let mut config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    if let Some(url) = matches.get_one::<String>("api-url") {
        config.api.base_url = url.clone();
    }
    config.validate()?;

    let api = ApiClient::new(&config.api)?;

    match matches.subcommand() {
        Some(("run", sub)) => run_flow(&config, api, sub).await,
        Some(("prompts", _)) => list_prompts(api).await,
        Some(("save-prompt", sub)) => save_prompt(api, sub).await,
        _ => unreachable!("subcommand is required"),
    }
}

async fn run_flow(config: &Config, api: ApiClient, matches: &ArgMatches) -> Result<()> {
    let video = PathBuf::from(matches.get_one::<String>("video").unwrap());
    if !video.exists() {
        return Err(anyhow::anyhow!("video file not found: {}", video.display()));
    }

    let temperature = match matches.get_one::<String>("temperature") {
        Some(raw) => raw.parse::<f32>()?,
        None => config.completion.default_temperature,
    };

    let prompt_text = if let Some(text) = matches.get_one::<String>("prompt") {
        text.clone()
    } else if let Some(title) = matches.get_one::<String>("template") {
        let library = PromptLibrary::new(api.clone());
        library
            .select(title)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no saved prompt titled '{}'", title))?
            .body
    } else {
        return Err(anyhow::anyhow!("either --prompt or --template is required"));
    };

    let transcoder = FfmpegTranscoder::shared(&config.transcode).await;

    let mut session = UploadSession::new();
    session.select_file(&video)?;
    if let Some(hint) = matches.get_one::<String>("transcription-prompt") {
        session.set_transcription_prompt(hint.clone())?;
    }

    // Surface conversion progress and stage changes while the pipeline runs
    let mut progress = transcoder.subscribe_progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let fraction = *progress.borrow();
            info!("🎬 Convert progress: {}%", (fraction * 100.0).round() as u32);
        }
    });

    let mut status = session.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            info!("📋 {}", status.borrow().message());
        }
    });

    let pipeline = UploadPipeline::new(api.clone(), transcoder);
    let video_id = pipeline
        .submit(&mut session)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no video selected"))?;

    info!("🎥 Video registered as {}", video_id);

    let request = CompletionRequest::new(prompt_text)
        .with_video_id(video_id)
        .with_temperature(temperature);

    let controller = CompletionController::new(api);
    let mut stream = controller.submit(&request).await?;

    let mut stdout = std::io::stdout();
    while let Some(delta) = stream.next().await {
        match delta {
            Ok(text) => {
                print!("{}", text);
                stdout.flush()?;
            }
            Err(e) => {
                println!();
                return Err(anyhow::anyhow!("completion stream interrupted: {}", e));
            }
        }
    }
    println!();

    info!("✅ Completion finished");
    Ok(())
}

async fn list_prompts(api: ApiClient) -> Result<()> {
    let library = PromptLibrary::new(api);
    let templates = library.list_prompts().await?;

    if templates.is_empty() {
        println!("No saved prompts");
        return Ok(());
    }

    for template in templates {
        println!("{}\n  {}\n", template.title, template.body);
    }
    Ok(())
}

async fn save_prompt(api: ApiClient, matches: &ArgMatches) -> Result<()> {
    let title = matches.get_one::<String>("title").unwrap();
    let body = matches.get_one::<String>("body").unwrap();

    let library = PromptLibrary::new(api);
    library.create_prompt(title, body).await?;

    // show the refreshed listing instead of reloading anything
    let count = library.list_prompts().await?.len();
    println!("Saved '{}' ({} prompts total)", title, count);
    Ok(())
}
