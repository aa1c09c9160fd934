//! Pipeline configuration, loaded from YAML.
//!
//! ```yaml
//! detection:
//!   helmet_model: models/helmet/best.pt
//!   plate_model: models/plate/best.pt
//!   helmet_threshold: 0.5
//! stream:
//!   auto_issue: true
//!   duration_secs: 300
//! location:
//!   latitude: 28.6139
//!   longitude: 77.2090
//!   name: Connaught Place
//! rules:
//!   SPEED_VIOLATION:
//!     penalty: 1000
//! store:
//!   snapshot: data/records.json
//! ```
use crate::source::SourceKind;
use echallan_challan::NotificationConfig;
use echallan_core::{CaptureContext, EchallanError, GeoLocation, Result};
use echallan_detect::DetectionConfig;
use echallan_rules::{RuleOverrides, RuleTable};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub image_stride: u64,
    pub file_stride: u64,
    pub live_stride: u64,
    pub network_stride: u64,
    /// Wall-clock bound for live and network feeds; `None` runs until the
    /// feed ends or is stopped
    pub duration_secs: Option<u64>,
    /// Per-frame detection timeout
    pub frame_timeout_secs: u64,
    /// Write each processed frame's result as JSON into `annotation_dir`
    pub annotate: bool,
    pub annotation_dir: PathBuf,
    /// Frames with violations are saved here when set
    pub evidence_dir: Option<PathBuf>,
    /// Issue a challan for every candidate instead of only recording it
    pub auto_issue: bool,
    /// How many of the latest candidates and challan numbers the run
    /// report keeps; counts in the stats are unaffected
    pub report_limit: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            image_stride: 1,
            file_stride: 5,
            live_stride: 5,
            network_stride: 5,
            duration_secs: Some(300),
            frame_timeout_secs: 10,
            annotate: false,
            annotation_dir: PathBuf::from("output/annotations"),
            evidence_dir: None,
            auto_issue: false,
            report_limit: 1000,
        }
    }
}

impl StreamConfig {
    pub fn stride_for(&self, kind: SourceKind) -> u64 {
        let stride = match kind {
            SourceKind::Image => self.image_stride,
            SourceKind::Sequence => self.file_stride,
            SourceKind::Live => self.live_stride,
            SourceKind::Network => self.network_stride,
        };
        stride.max(1)
    }

    /// Same stride for every source kind
    pub fn with_stride(mut self, stride: u64) -> Self {
        self.file_stride = stride;
        self.live_stride = stride;
        self.network_stride = stride;
        self
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_secs(self.frame_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub name: Option<String>,
    pub camera_id: Option<String>,
}

impl LocationConfig {
    pub fn geo(&self) -> Option<GeoLocation> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(GeoLocation::new(lat, lng)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallanConfig {
    pub payment_window_days: i64,
}

impl Default for ChallanConfig {
    fn default() -> Self {
        Self {
            payment_window_days: 15,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot of the record store, loaded at start and saved at exit
    pub snapshot: Option<PathBuf>,
    /// Lifecycle history exported as JSON Lines at exit
    pub history: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub stream: StreamConfig,
    pub location: LocationConfig,
    pub rules: RuleOverrides,
    pub challan: ChallanConfig,
    pub notification: NotificationConfig,
    pub store: StoreConfig,
}

impl PipelineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| EchallanError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| EchallanError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    /// Standard rules with the configured overrides applied.
    pub fn rule_table(&self) -> Result<RuleTable> {
        let mut table = RuleTable::standard();
        table
            .apply_overrides(&self.rules)
            .map_err(|e| EchallanError::Config(e.to_string()))?;
        Ok(table)
    }

    /// Detection settings with the runner timeout defaulting to the
    /// per-frame timeout, so a runner never outlives the frame it serves.
    pub fn detection_config(&self) -> DetectionConfig {
        let mut detection = self.detection.clone();
        detection
            .runner_timeout_secs
            .get_or_insert(self.stream.frame_timeout().as_secs());
        detection
    }

    pub fn capture_context(&self) -> CaptureContext {
        let mut ctx = CaptureContext::new();
        ctx.location = self.location.geo();
        ctx.location_name = self.location.name.clone();
        ctx.camera_id = self.location.camera_id.clone();
        ctx.evidence_dir = self
            .stream
            .evidence_dir
            .as_ref()
            .map(|dir| dir.to_string_lossy().into_owned());
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echallan_core::ViolationCategory;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.detection.helmet_threshold, 0.5);
        assert_eq!(config.detection.plate_threshold, 0.4);
        assert_eq!(config.detection.ocr_threshold, 0.3);
        assert_eq!(config.stream.stride_for(SourceKind::Sequence), 5);
        assert_eq!(config.stream.stride_for(SourceKind::Live), 5);
        assert_eq!(config.stream.stride_for(SourceKind::Image), 1);
        assert_eq!(config.stream.duration(), Some(Duration::from_secs(300)));
        assert_eq!(config.stream.frame_timeout(), Duration::from_secs(10));
        assert_eq!(config.challan.payment_window_days, 15);
        assert_eq!(config.stream.report_limit, 1000);
        assert_eq!(config.detection_config().runner_timeout_secs, Some(10));
        assert!(config.notification.sms_enabled);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
stream:
  auto_issue: true
  file_stride: 10
location:
  latitude: 28.6139
  longitude: 77.2090
  name: Connaught Place
rules:
  SPEED_VIOLATION:
    penalty: 1000
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert!(config.stream.auto_issue);
        assert_eq!(config.stream.stride_for(SourceKind::Sequence), 10);
        assert_eq!(config.stream.live_stride, 5);

        let ctx = config.capture_context();
        assert_eq!(ctx.location, Some(GeoLocation::new(28.6139, 77.2090)));
        assert_eq!(ctx.location_name.as_deref(), Some("Connaught Place"));

        let table = config.rule_table().unwrap();
        assert_eq!(table.penalty(ViolationCategory::SpeedViolation), 1000.0);
        assert_eq!(table.penalty(ViolationCategory::HelmetNotWorn), 500.0);
    }

    #[test]
    fn test_runner_timeout_follows_frame_timeout() {
        let config = PipelineConfig::from_yaml("stream:\n  frame_timeout_secs: 3\n").unwrap();
        assert_eq!(config.detection_config().runner_timeout_secs, Some(3));

        let yaml = "stream:\n  frame_timeout_secs: 3\ndetection:\n  runner_timeout_secs: 2\n";
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.detection_config().runner_timeout_secs, Some(2));
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = PipelineConfig::from_yaml("stream: [not, a, map]").unwrap_err();
        assert!(matches!(err, EchallanError::Config(_)));

        let err = PipelineConfig::from_yaml("rules:\n  SIGNAL_VIOLATION:\n    penalty: -1\n")
            .unwrap()
            .rule_table()
            .unwrap_err();
        assert!(matches!(err, EchallanError::Config(_)));
    }
}
