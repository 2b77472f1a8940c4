use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use firewatch::agent_modules::capture::{DirectoryFrameSource, FrameSource, HttpSnapshotSource};
use firewatch::agent_modules::config::{AgentConfig, DEFAULT_CONFIG_PATH, load_config};
use firewatch::agent_modules::detection::DetectionClassifier;
use firewatch::agent_modules::detector::HttpDetector;
use firewatch::agent_modules::dispatcher::{AlertCandidate, AlertDispatcher};
use firewatch::agent_modules::evidence::EvidenceEncoder;
use firewatch::agent_modules::pipeline::{DetectionPipeline, PipelineSettings};
use firewatch::agent_modules::throttle::AlertThrottle;
use firewatch::version::VERSION;

type BoxError = Box<dyn Error + Send + Sync>;

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LOG_DIR: &str = "logs";

/// Fire and smoke detection agent.
#[derive(Parser, Debug)]
#[command(version = VERSION, about)]
struct Cli {
    /// Agent config file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the detection loop until interrupted.
    Run,
    /// Submit one existing image as an alert and exit.
    Send {
        /// Image file to submit.
        #[arg(long)]
        image: PathBuf,
        #[arg(long, default_value = "fire")]
        label: String,
        #[arg(long)]
        confidence: f32,
        /// Ingestion endpoint. Taken from the config file when omitted.
        #[arg(long)]
        alert_url: Option<String>,
    },
}

fn init_logging(log_dir: &str) {
    let file_appender = rolling::daily(log_dir, "agent.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

fn open_frame_source(config: &AgentConfig) -> Result<Box<dyn FrameSource>, BoxError> {
    if let Some(dir) = &config.frame_dir {
        let source = DirectoryFrameSource::open(dir, config.frame_width, config.frame_height)?;
        return Ok(Box::new(source));
    }
    if let Some(url) = &config.camera_url {
        info!(camera_url = %url, "Polling camera snapshots.");
        let source = HttpSnapshotSource::new(
            url.clone(),
            config.request_timeout(),
            config.frame_width,
            config.frame_height,
        )?;
        return Ok(Box::new(source));
    }
    Err("either camera_url or frame_dir must be set".into())
}

async fn run_detection(config: AgentConfig) -> Result<(), BoxError> {
    let detector_url = config
        .detector_url
        .clone()
        .ok_or("detector_url must be set to run the detection loop")?;
    let detector = HttpDetector::new(detector_url, config.request_timeout())?;
    let mut source = open_frame_source(&config)?;

    let font = config
        .font_path
        .as_deref()
        .map(EvidenceEncoder::load_font)
        .transpose()?;
    if font.is_none() {
        warn!("No font_path configured, evidence banners will carry no text.");
    }

    let throttle = Arc::new(AlertThrottle::new(config.cooldown()));
    info!(
        cooldown_secs = throttle.cooldown().as_secs(),
        threshold = config.confidence_threshold,
        alert_url = %config.alert_url,
        "Alert pipeline configured."
    );
    let mut pipeline = DetectionPipeline::new(
        DetectionClassifier::new(&config.fire_labels),
        throttle,
        EvidenceEncoder::new(config.jpeg_quality, font),
        AlertDispatcher::new(config.alert_url.clone(), config.request_timeout())?,
        PipelineSettings::from(&config),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping detection loop.");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for interrupt signal.");
                // the loop keeps running; only a kill stops it now
                std::future::pending::<()>().await;
            }
        }
    });

    let stats = pipeline.run(source.as_mut(), &detector, stop_rx).await;
    info!(
        frames = stats.frames_processed,
        alerts_sent = stats.alerts_sent,
        "Detection agent finished."
    );
    Ok(())
}

async fn send_once(
    config: Option<AgentConfig>,
    image: &Path,
    label: String,
    confidence: f32,
    alert_url: Option<String>,
) -> Result<(), BoxError> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence must be within [0.0, 1.0], got {confidence}").into());
    }
    if !image.is_file() {
        return Err(format!("image file not found: {}", image.display()).into());
    }

    let (url, timeout) = match (alert_url, &config) {
        (Some(url), config) => (url, config.as_ref().map_or(DEFAULT_SEND_TIMEOUT, AgentConfig::request_timeout)),
        (None, Some(config)) => (config.alert_url.clone(), config.request_timeout()),
        (None, None) => return Err("no alert_url given and no config file loaded".into()),
    };

    let filename = image
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or("image path has no file name")?;
    let bytes = tokio::fs::read(image).await?;

    let dispatcher = AlertDispatcher::new(url, timeout)?;
    let candidate = AlertCandidate {
        label,
        confidence,
        image: bytes,
        timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        filename,
    };
    let id = dispatcher.send(candidate).await?;
    println!("Alert created with id {id}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run => {
            let config = match load_config(&cli.config) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Failed to load agent config from {}: {e}", cli.config);
                    return Err(e);
                }
            };
            init_logging(&config.log_dir);
            info!(version = VERSION, config = %cli.config, "Starting firewatch agent...");
            run_detection(config).await.map_err(|e| {
                error!(error = %e, "Detection agent failed to start.");
                e
            })
        }
        Command::Send {
            image,
            label,
            confidence,
            alert_url,
        } => {
            let config = load_config(&cli.config).ok();
            let log_dir = config
                .as_ref()
                .map_or(DEFAULT_LOG_DIR, |c| c.log_dir.as_str())
                .to_string();
            init_logging(&log_dir);
            send_once(config, &image, label, confidence, alert_url)
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to send alert.");
                    e
                })
        }
    }
}
