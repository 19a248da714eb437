use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ocrflow::models::XhtmlWriter;
use ocrflow::ocr::TimingSnapshot;
use ocrflow::{Metadata, OcrConfig, OcrJob, OcrOutcome, OcrPipeline, OcrRuntime, OutputFormat};

#[derive(Parser)]
#[command(name = "ocrflow")]
#[command(about = "Extract text from an image with tesseract")]
struct Args {
    /// Image to run OCR on
    image: PathBuf,

    /// Result format requested from tesseract (overrides OCR_OUTPUT_FORMAT)
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Skip ImageMagick normalization and skew detection
    #[arg(long)]
    no_preprocess: bool,

    /// Skip skew detection only
    #[arg(long)]
    no_deskew: bool,

    /// Per-invocation timeout in seconds (overrides OCR_TIMEOUT)
    #[arg(long)]
    timeout: Option<u64>,

    /// Print a JSON report instead of the extracted markup
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    outcome: &'a OcrOutcome,
    content: &'a str,
    metadata: &'a Metadata,
    timings: TimingSnapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();
    init_tracing(args.log_json);

    let mut config = OcrConfig::from_env();
    if let Some(format) = args.format {
        config.output_format = format;
    }
    if args.no_preprocess {
        config.enable_preprocessing = false;
    }
    if args.no_deskew {
        config.enable_deskew = false;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let runtime = OcrRuntime::shared();
    let pipeline = OcrPipeline::new(runtime.clone());

    let mut metadata = Metadata::new();
    let mut content = XhtmlWriter::new();
    let job = OcrJob::new(&args.image, &config)
        .with_metadata(&mut metadata)
        .with_content(&mut content)
        .with_cancel(cancel);

    let outcome = pipeline.run(job).await?;

    if args.json {
        let report = Report {
            outcome: &outcome,
            content: content.as_str(),
            metadata: &metadata,
            timings: runtime.stats().snapshot(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &outcome {
            OcrOutcome::Skipped(reason) => tracing::warn!("No OCR performed: {}", reason),
            OcrOutcome::NoOutput => tracing::warn!("tesseract produced no output"),
            OcrOutcome::Extracted => println!("{}", content.as_str()),
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ocrflow=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Interrupt received, cancelling OCR job...");
            cancel.cancel();
        }
        Err(e) => tracing::warn!("Failed to install Ctrl+C handler: {}", e),
    }
}
