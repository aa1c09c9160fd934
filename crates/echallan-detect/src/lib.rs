//! E-Challan Detect: Detection Adapter and Frame Processor
//!
//! Two capabilities (helmet classification, plate localization + OCR), each
//! either backed by an external model runner or by a deterministic synthetic
//! stand-in. The [`FrameProcessor`] composes them into violation candidates.

pub mod adapter;
pub mod capability;
pub mod external;
pub mod processor;
pub mod synthetic;

pub use adapter::{DetectionAdapter, DetectionConfig};
pub use capability::{
    DetectError, Detection, DetectionBackend, HelmetDetector, PlateReader, PlateRegion,
    LABEL_HELMET, LABEL_NO_HELMET, LABEL_PLATE,
};
pub use external::{ExternalModel, ModelSpec, ModelTask, RealHelmetDetector, RealPlateReader};
pub use processor::{FrameProcessor, FrameResult, ProcessingStep, StepFailure};
pub use synthetic::{synthetic_plate_text, SyntheticHelmetDetector, SyntheticPlateReader};
