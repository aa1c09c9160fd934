//! `echallan`: run the helmet-violation pipeline over an image, a frame
//! directory, a video file, a network stream or a local camera.
//!
//! ```bash
//! echallan --image samples/rider.jpg --lat 28.6139 --lng 77.2090
//! echallan --frames captures/ --stride 5 --auto-issue
//! echallan --video clips/junction.mp4 --stride 10
//! echallan --stream rtsp://10.0.0.12/live --duration 120 --config echallan.yaml
//! echallan --camera 0 --synthetic --metrics
//! ```
use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use echallan_challan::{ChallanManager, MemoryStore, RecordStore};
use echallan_detect::FrameProcessor;
use echallan_rules::SharedRuleTable;
use echallan_stream::{
    metrics, CaptureSession, FfmpegGrabber, FfmpegInput, FfmpegVideoReader, FrameSource,
    ImageSource, LiveSource, NetworkSource, PipelineConfig, SequenceSource, StreamMetrics,
    StreamOrchestrator, VideoSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "echallan", version)]
#[command(about = "Helmet violation detection and e-challan issuance")]
#[command(group(
    ArgGroup::new("input")
        .required(true)
        .args(["image", "frames", "video", "stream", "camera"])
))]
struct Args {
    /// YAML pipeline configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Single still image
    #[arg(long)]
    image: Option<PathBuf>,

    /// Directory of frame images, processed in name order
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Video file, every frame decoded in order
    #[arg(long)]
    video: Option<PathBuf>,

    /// Network stream URL (rtsp:// or http://)
    #[arg(long)]
    stream: Option<String>,

    /// Local camera index (/dev/video<N>)
    #[arg(long)]
    camera: Option<u32>,

    /// Stop live and network feeds after this many seconds (0 = no limit)
    #[arg(long)]
    duration: Option<u64>,

    /// Process every Nth frame
    #[arg(long)]
    stride: Option<u64>,

    /// Issue a challan for every violation instead of only recording it
    #[arg(long)]
    auto_issue: bool,

    #[arg(long, requires = "lng", allow_negative_numbers = true)]
    lat: Option<f64>,

    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    lng: Option<f64>,

    /// Human-readable location name
    #[arg(long)]
    location: Option<String>,

    /// Use synthetic detectors even when models are configured
    #[arg(long)]
    synthetic: bool,

    /// Print Prometheus metrics to stderr when the run ends
    #[arg(long)]
    metrics: bool,
}

impl Args {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(secs) = self.duration {
            config.stream.duration_secs = (secs > 0).then_some(secs);
        }
        if let Some(stride) = self.stride {
            config.stream = config.stream.clone().with_stride(stride);
        }
        if self.auto_issue {
            config.stream.auto_issue = true;
        }
        if let (Some(lat), Some(lng)) = (self.lat, self.lng) {
            config.location.latitude = Some(lat);
            config.location.longitude = Some(lng);
        }
        if let Some(name) = &self.location {
            config.location.name = Some(name.clone());
        }
        if self.synthetic {
            config.detection.force_synthetic = true;
        }
        if let Some(index) = self.camera {
            config
                .location
                .camera_id
                .get_or_insert_with(|| format!("camera-{}", index));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "echallan=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    args.apply(&mut config);
    info!(version = env!("CARGO_PKG_VERSION"), "echallan starting");

    let rules = SharedRuleTable::new(config.rule_table()?);
    let processor = Arc::new(FrameProcessor::from_config(&config.detection_config(), rules.clone()));

    let store = Arc::new(match &config.store.snapshot {
        Some(path) => MemoryStore::open(path)
            .with_context(|| format!("opening record store {}", path.display()))?,
        None => MemoryStore::new(),
    });
    let manager = Arc::new(
        ChallanManager::new(Arc::clone(&store) as Arc<dyn RecordStore>, rules)
            .with_notifications(config.notification.clone())
            .with_payment_window_days(config.challan.payment_window_days),
    );

    let registry = metrics::registry();
    let mut orchestrator = StreamOrchestrator::new(processor, config.stream.clone())
        .with_manager(Arc::clone(&manager))
        .with_context(config.capture_context());
    if args.metrics {
        orchestrator = orchestrator.with_metrics(StreamMetrics::register(&registry)?);
    }

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current frame");
            stop.stop();
        }
    });

    let mut session = None;
    let source: Box<dyn FrameSource> = if let Some(path) = &args.image {
        Box::new(ImageSource::open(path))
    } else if let Some(dir) = &args.frames {
        Box::new(SequenceSource::from_dir(dir)?)
    } else if let Some(path) = &args.video {
        let reader = FfmpegVideoReader::open(path, config.stream.frame_timeout())?;
        Box::new(VideoSource::new(Box::new(reader)))
    } else if let Some(url) = &args.stream {
        let grabber = FfmpegGrabber::on_current_runtime(
            FfmpegInput::Url(url.clone()),
            config.stream.frame_timeout(),
        )?;
        Box::new(NetworkSource::new(Box::new(grabber)))
    } else if let Some(index) = args.camera {
        let grabber =
            FfmpegGrabber::on_current_runtime(FfmpegInput::Device(index), config.stream.frame_timeout())?;
        let camera_id = config
            .location
            .camera_id
            .clone()
            .unwrap_or_else(|| format!("camera-{}", index));
        let capture = Arc::new(CaptureSession::new(camera_id, Box::new(grabber)));
        capture.start()?;
        session = Some(Arc::clone(&capture));
        Box::new(LiveSource::new(capture))
    } else {
        anyhow::bail!("one of --image, --frames, --video, --stream or --camera is required");
    };

    let outcome = orchestrator.run(source).await;

    if let Some(capture) = session {
        capture.stop();
    }
    if let Some(path) = &config.store.snapshot {
        store
            .save(path)
            .with_context(|| format!("saving record store {}", path.display()))?;
        info!(path = %path.display(), "record store saved");
    }
    if let Some(path) = &config.store.history {
        if let Err(e) = manager.history().write_jsonl(path) {
            warn!(path = %path.display(), error = %e, "lifecycle history not written");
        }
    }

    let report = outcome?;
    let summary = manager.summary(None)?;
    let output = serde_json::json!({
        "report": report,
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if args.metrics {
        eprintln!("{}", metrics::encode(&registry)?);
    }
    Ok(())
}
