use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::time::Instant;

use verifycam_core::capture::domain::media::{MediaStream, PlaybackState};
use verifycam_core::detection::domain::detection_model::ModelHandle;
use verifycam_core::detection::infrastructure::model_resolver::ModelLocation;
use verifycam_core::detection::infrastructure::onnx_face_detector::OnnxModelSource;
use verifycam_core::detection::model_loader::ModelLoader;
use verifycam_core::media::image_sequence_stream::ImageSequenceStream;
use verifycam_core::presence::face_presence_monitor::{FacePresenceMonitor, MonitorConfig};
use verifycam_core::shared::config::VerificationConfig;
use verifycam_core::verification::domain::loan_product::LoanProduct;

/// Video-verification tooling: product catalog and face-presence checks.
#[derive(Parser)]
#[command(name = "verifycam")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the loan products and their verification questions as JSON.
    Products {
        /// Only print this product (unknown keys fall back to personal).
        #[arg(long)]
        product: Option<String>,
    },
    /// Play image frames through the face presence monitor and report each
    /// presence change.
    Presence {
        /// A directory of frames (played in file-name order) or one image.
        input: PathBuf,

        /// Face detection confidence threshold (0.0-1.0).
        #[arg(long)]
        confidence: Option<f64>,

        /// Sampling interval in milliseconds; also the frame spacing.
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Directory holding a pre-downloaded face model.
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Products { product } => print_products(product.as_deref()),
        Command::Presence {
            input,
            confidence,
            interval_ms,
            model_dir,
        } => {
            let mut config = VerificationConfig::load();
            if let Some(confidence) = confidence {
                config.confidence = confidence;
            }
            if let Some(interval_ms) = interval_ms {
                config.sampling_interval_ms = interval_ms;
            }
            config.validate()?;
            if !input.exists() {
                return Err(format!("Input not found: {}", input.display()).into());
            }
            run_presence(input, &config, model_dir).await
        }
    }
}

fn print_products(key: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let json = match key {
        Some(key) => {
            if !LoanProduct::keys().any(|k| k == key) {
                log::warn!("Unknown product '{key}', showing the personal loan");
            }
            serde_json::to_string_pretty(&LoanProduct::for_key(key))?
        }
        None => serde_json::to_string_pretty(&LoanProduct::catalog())?,
    };
    println!("{json}");
    Ok(())
}

async fn run_presence(
    input: PathBuf,
    config: &VerificationConfig,
    model_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = load_model(config, model_dir).await?;

    let interval = config.sampling_interval();
    let stream = Arc::new(ImageSequenceStream::open(&input, interval)?);
    let frames = stream.frame_count();

    let started = Instant::now();
    let mut monitor = FacePresenceMonitor::start(
        stream.clone(),
        &model,
        MonitorConfig::from(config),
        move |present| {
            let at = started.elapsed().as_secs_f64();
            println!(
                "{at:>8.1}s  face {}",
                if present { "present" } else { "absent" }
            );
        },
    )?;

    while stream.playback() == PlaybackState::Playing {
        tokio::time::sleep(interval).await;
    }
    // Let the last grabbed frame finish classification.
    tokio::time::sleep(interval).await;
    monitor.stop().await;
    stream.release();

    let state = monitor.state();
    log::info!(
        "Sampled {frames} frames; face {} at end",
        if state.present { "present" } else { "absent" }
    );
    Ok(())
}

async fn load_model(
    config: &VerificationConfig,
    model_dir: Option<PathBuf>,
) -> Result<ModelHandle, Box<dyn std::error::Error>> {
    let location = ModelLocation {
        bundled_dir: model_dir,
        ..ModelLocation::default()
    };
    log::info!("Resolving model: {}", location.name);
    let source =
        OnnxModelSource::new(location, config.confidence).with_progress(Box::new(download_progress));
    let loader = ModelLoader::new(Arc::new(source));
    let model = loader.load().await?;
    eprintln!();
    Ok(model)
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}
