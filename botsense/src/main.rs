use std::path::Path;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use botsense::config::Config;
use botsense::models::{
    FetchMode, ImageRequest, ImageSource, OperationOutcome, OperationRequest, TextRequest,
};
use botsense::BotMediaAdapter;

#[derive(Parser)]
#[command(name = "botsense")]
#[command(about = "Bounded text analysis and OCR for chat bots")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a piece of text and print the service result as JSON
    Analyze { text: Option<String> },
    /// Extract text from an image URL, base64 data URI or local file
    Ocr {
        source: String,
        /// Stage the image in a temp file instead of memory
        #[arg(long)]
        file_mode: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "botsense=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    tracing::debug!(
        timeout_ms = config.operation.timeout_ms,
        "Operation budget at startup"
    );

    let cancel_token = CancellationToken::new();
    let adapter = BotMediaAdapter::from_config(&config)?.with_shutdown(cancel_token.clone());

    if !adapter.services().analysis.is_available() {
        tracing::warn!("Text analysis unavailable - `analyze` will fail");
    }
    if !adapter.services().ocr.is_available() {
        tracing::warn!("OCR unavailable - `ocr` will fail");
    }

    tokio::spawn(shutdown_signal(cancel_token));

    let request = match args.command {
        Command::Analyze { text } => OperationRequest::Text(TextRequest::new(text.as_deref())),
        Command::Ocr { source, file_mode } => OperationRequest::Image(ImageRequest {
            source: image_source(&source).await?,
            mode: if file_mode {
                FetchMode::File
            } else {
                FetchMode::Buffer
            },
        }),
    };

    match adapter.execute(request).await? {
        OperationOutcome::Analysis(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        OperationOutcome::Ocr(text) => println!("{text}"),
    }

    Ok(())
}

async fn image_source(input: &str) -> anyhow::Result<ImageSource> {
    let path = Path::new(input);
    if path.is_file() {
        let data = tokio::fs::read(path).await?;
        return Ok(ImageSource::Bytes {
            data: Bytes::from(data),
            content_type: mime_guess::from_path(path)
                .first()
                .map(|mime| mime.essence_str().to_string()),
        });
    }

    Ok(ImageSource::parse(input)?)
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Interrupt received, cancelling in-flight operation...");
        cancel_token.cancel();
    }
}
