//! Detection Adapter: selects the real or synthetic variant of each
//! capability once, at construction.
use crate::capability::{
    DetectError, Detection, DetectionBackend, HelmetDetector, PlateReader, PlateRegion,
};
use crate::external::{ModelSpec, ModelTask, RealHelmetDetector, RealPlateReader};
use crate::synthetic::{SyntheticHelmetDetector, SyntheticPlateReader};
use echallan_core::Frame;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_RUNNER: &str = "echallan-model-runner";
pub const DEFAULT_SEED: &str = "echallan";
/// Runner deadline when none is configured
pub const DEFAULT_RUNNER_TIMEOUT_SECS: u64 = 10;

/// `detection:` section of the pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Helmet classifier weights
    pub helmet_model: Option<PathBuf>,
    /// Plate localizer + OCR weights
    pub plate_model: Option<PathBuf>,
    /// External model runner executable
    pub runner: String,
    /// Arguments placed before the protocol flags, ex: the script of an
    /// interpreter runner (`runner: python3`, `runner_args: [run_model.py]`)
    pub runner_args: Vec<String>,
    /// A runner invocation still running after this long is killed
    pub runner_timeout_secs: Option<u64>,
    pub helmet_threshold: f32,
    pub plate_threshold: f32,
    pub ocr_threshold: f32,
    /// Skip loading entirely and run synthetic detectors
    pub force_synthetic: bool,
    pub seed: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            helmet_model: None,
            plate_model: None,
            runner: DEFAULT_RUNNER.to_string(),
            runner_args: Vec::new(),
            runner_timeout_secs: None,
            helmet_threshold: 0.5,
            plate_threshold: 0.4,
            ocr_threshold: 0.3,
            force_synthetic: false,
            seed: DEFAULT_SEED.to_string(),
        }
    }
}

impl DetectionConfig {
    pub fn synthetic() -> Self {
        Self {
            force_synthetic: true,
            ..Self::default()
        }
    }

    fn spec(&self, task: ModelTask) -> Result<ModelSpec, DetectError> {
        let (model, threshold) = match task {
            ModelTask::Helmet => (&self.helmet_model, self.helmet_threshold),
            ModelTask::Plate => (&self.plate_model, self.plate_threshold),
        };
        let model_path = model
            .clone()
            .ok_or_else(|| DetectError::Load(format!("no {} model configured", task.as_str())))?;
        let timeout = self.runner_timeout_secs.unwrap_or(DEFAULT_RUNNER_TIMEOUT_SECS);
        Ok(ModelSpec {
            program: self.runner.clone(),
            args: self.runner_args.clone(),
            model_path,
            task,
            confidence_threshold: threshold,
            timeout: Duration::from_secs(timeout.max(1)),
        })
    }
}

/// Both capabilities, each already resolved to one variant
pub struct DetectionAdapter {
    helmet: Box<dyn HelmetDetector>,
    plates: Box<dyn PlateReader>,
}

impl DetectionAdapter {
    /// Try the real variant of each capability and fall back to synthetic
    /// when it cannot be loaded. The choice holds for the adapter's lifetime.
    pub fn from_config(config: &DetectionConfig) -> Self {
        if config.force_synthetic {
            info!("synthetic detection forced by configuration");
            return Self::synthetic(&config.seed);
        }

        let helmet: Box<dyn HelmetDetector> = match config
            .spec(ModelTask::Helmet)
            .and_then(RealHelmetDetector::load)
        {
            Ok(detector) => {
                info!(detector = detector.id(), "helmet model loaded");
                Box::new(detector)
            }
            Err(e) => {
                warn!(error = %e, "helmet model unavailable, switching to synthetic detection");
                Box::new(SyntheticHelmetDetector::new(config.seed.clone()))
            }
        };

        let plates: Box<dyn PlateReader> = match config
            .spec(ModelTask::Plate)
            .and_then(|spec| RealPlateReader::load(spec, config.ocr_threshold))
        {
            Ok(reader) => {
                info!(reader = reader.id(), "plate model loaded");
                Box::new(reader)
            }
            Err(e) => {
                warn!(error = %e, "plate model unavailable, switching to synthetic plate reading");
                Box::new(SyntheticPlateReader::new(config.seed.clone()))
            }
        };

        Self { helmet, plates }
    }

    pub fn synthetic(seed: &str) -> Self {
        Self {
            helmet: Box::new(SyntheticHelmetDetector::new(seed)),
            plates: Box::new(SyntheticPlateReader::new(seed)),
        }
    }

    /// Inject specific detectors, ex: test doubles.
    pub fn with_detectors(helmet: Box<dyn HelmetDetector>, plates: Box<dyn PlateReader>) -> Self {
        Self { helmet, plates }
    }

    pub fn helmet_backend(&self) -> DetectionBackend {
        self.helmet.backend()
    }

    pub fn plate_backend(&self) -> DetectionBackend {
        self.plates.backend()
    }

    /// True when either capability runs synthetic.
    pub fn is_synthetic(&self) -> bool {
        self.helmet_backend().is_synthetic() || self.plate_backend().is_synthetic()
    }

    /// Helmet detections, with the synthetic marker forced on when the
    /// synthetic variant produced them.
    pub fn detect_helmets(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let synthetic = self.helmet_backend().is_synthetic();
        let mut detections = self.helmet.detect(frame)?;
        for d in &mut detections {
            d.synthetic |= synthetic;
        }
        Ok(detections)
    }

    pub fn read_plates(&self, frame: &Frame) -> Result<Vec<PlateRegion>, DetectError> {
        let synthetic = self.plate_backend().is_synthetic();
        let mut regions = self.plates.read(frame)?;
        for r in &mut regions {
            r.synthetic |= synthetic;
        }
        Ok(regions)
    }
}

impl std::fmt::Debug for DetectionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionAdapter")
            .field("helmet", &self.helmet.id())
            .field("plates", &self.plates.id())
            .finish()
    }
}
