//! Capability contracts: helmet classification and plate localization + OCR
use echallan_core::{BoundingBox, Frame};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label emitted for a rider wearing a helmet
pub const LABEL_HELMET: &str = "helmet";
/// Label emitted for a rider without a helmet
pub const LABEL_NO_HELMET: &str = "no_helmet";
/// Label emitted for a localized number plate
pub const LABEL_PLATE: &str = "plate";

/// Which variant of a capability produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionBackend {
    /// Backed by an external model invocation
    Real,
    /// Deterministic placeholder used when the real model is unavailable
    Synthetic,
}

impl DetectionBackend {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic)
    }
}

/// One labeled region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
    pub synthetic: bool,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
            synthetic: false,
        }
    }

    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub fn is_label(&self, label: &str) -> bool {
        self.label.eq_ignore_ascii_case(label)
    }
}

/// A localized plate with the text recognized inside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateRegion {
    pub bbox: BoundingBox,
    /// Localization confidence
    pub confidence: f32,
    /// Raw OCR text, before normalization. Empty when OCR read nothing.
    pub recognized_text: String,
    pub ocr_confidence: f32,
    pub synthetic: bool,
}

#[derive(Debug, Clone, Error)]
pub enum DetectError {
    #[error("DETECT/LOAD: {0}")]
    Load(String),
    #[error("DETECT/INVOKE: {0}")]
    Invoke(String),
    #[error("DETECT/DECODE: {0}")]
    Decode(String),
    #[error("DETECT/INPUT: {0}")]
    EmptyFrame(String),
    #[error("DETECT/TIMEOUT: {0}")]
    Timeout(String),
}

/// Helmet / no-helmet classification over a frame
pub trait HelmetDetector: Send + Sync {
    /// Stable identifier (ex: "helmet.external.v1")
    fn id(&self) -> &'static str;

    fn backend(&self) -> DetectionBackend;

    /// Zero or more labeled regions, each with a confidence score.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError>;
}

/// Plate localization followed by OCR inside each localized region
pub trait PlateReader: Send + Sync {
    fn id(&self) -> &'static str;

    fn backend(&self) -> DetectionBackend;

    fn read(&self, frame: &Frame) -> Result<Vec<PlateRegion>, DetectError>;
}
