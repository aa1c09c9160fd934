//! Frame Processor: one frame in, violation candidates out.
//!
//! Each step may fail on its own. A failed step contributes nothing and is
//! recorded in [`FrameResult::failures`]; the call itself always returns a
//! complete result. No persistence and no challan issuance happen here.
use crate::adapter::{DetectionAdapter, DetectionConfig};
use crate::capability::{Detection, PlateRegion, LABEL_HELMET, LABEL_NO_HELMET};
use echallan_core::{CaptureContext, Frame, GeoLocation, ViolationCandidate, ViolationCategory};
use echallan_plate::{valid_plates, PlateReading};
use echallan_rules::SharedRuleTable;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStep {
    HelmetDetection,
    PlateRecognition,
    Evidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: ProcessingStep,
    pub message: String,
}

/// Everything learned from one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_index: u64,
    /// In detection order
    pub candidates: Vec<ViolationCandidate>,
    /// Riders seen wearing a helmet
    pub helmet_count: usize,
    pub no_helmet_count: usize,
    /// Localized plates above the plate threshold
    pub plate_regions: usize,
    pub plate_readings: Vec<PlateReading>,
    /// Normalized plates that satisfy the grammar, in scan order
    pub valid_plates: Vec<String>,
    /// True when any contributing detection was synthetic
    pub synthetic: bool,
    pub failures: Vec<StepFailure>,
    pub evidence_path: Option<String>,
}

impl FrameResult {
    fn empty(frame_index: u64) -> Self {
        Self {
            frame_index,
            candidates: Vec::new(),
            helmet_count: 0,
            no_helmet_count: 0,
            plate_regions: 0,
            plate_readings: Vec::new(),
            valid_plates: Vec::new(),
            synthetic: false,
            failures: Vec::new(),
            evidence_path: None,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failed(&self, step: ProcessingStep) -> bool {
        self.failures.iter().any(|f| f.step == step)
    }

    fn fail(&mut self, step: ProcessingStep, message: impl Into<String>) {
        let message = message.into();
        error!(frame = self.frame_index, step = ?step, error = %message, "frame step failed");
        self.failures.push(StepFailure { step, message });
    }
}

pub struct FrameProcessor {
    adapter: DetectionAdapter,
    rules: SharedRuleTable,
    helmet_threshold: f32,
    plate_threshold: f32,
    evidence_dir: Option<PathBuf>,
}

impl FrameProcessor {
    pub fn new(adapter: DetectionAdapter, rules: SharedRuleTable) -> Self {
        let defaults = DetectionConfig::default();
        Self {
            adapter,
            rules,
            helmet_threshold: defaults.helmet_threshold,
            plate_threshold: defaults.plate_threshold,
            evidence_dir: None,
        }
    }

    /// Adapter resolved from `config`, thresholds taken from it too.
    pub fn from_config(config: &DetectionConfig, rules: SharedRuleTable) -> Self {
        Self::new(DetectionAdapter::from_config(config), rules)
            .with_thresholds(config.helmet_threshold, config.plate_threshold)
    }

    pub fn with_thresholds(mut self, helmet: f32, plate: f32) -> Self {
        self.helmet_threshold = helmet;
        self.plate_threshold = plate;
        self
    }

    pub fn with_evidence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.evidence_dir = Some(dir.into());
        self
    }

    pub fn adapter(&self) -> &DetectionAdapter {
        &self.adapter
    }

    pub fn rules(&self) -> &SharedRuleTable {
        &self.rules
    }

    pub fn process(
        &self,
        frame: &Frame,
        location: Option<GeoLocation>,
        location_name: Option<&str>,
    ) -> FrameResult {
        self.run(frame, location, location_name, self.evidence_dir.as_deref())
    }

    /// Like [`process`](Self::process), taking location and evidence
    /// directory from the capture context.
    pub fn process_in(&self, frame: &Frame, ctx: &CaptureContext) -> FrameResult {
        let evidence_dir = ctx
            .evidence_dir
            .as_deref()
            .map(Path::new)
            .or(self.evidence_dir.as_deref());
        self.run(frame, ctx.location, ctx.location_name.as_deref(), evidence_dir)
    }

    fn run(
        &self,
        frame: &Frame,
        location: Option<GeoLocation>,
        location_name: Option<&str>,
        evidence_dir: Option<&Path>,
    ) -> FrameResult {
        let mut result = FrameResult::empty(frame.index);

        if frame.is_empty() {
            result.fail(ProcessingStep::HelmetDetection, "frame has no data");
            result.fail(ProcessingStep::PlateRecognition, "frame has no data");
            return result;
        }

        // 1. helmet classification
        let detections = match self.adapter.detect_helmets(frame) {
            Ok(detections) => detections,
            Err(e) => {
                result.fail(ProcessingStep::HelmetDetection, e.to_string());
                Vec::new()
            }
        };

        // 2. plate localization + OCR
        let regions = match self.adapter.read_plates(frame) {
            Ok(regions) => regions,
            Err(e) => {
                result.fail(ProcessingStep::PlateRecognition, e.to_string());
                Vec::new()
            }
        };
        let regions: Vec<PlateRegion> = regions
            .into_iter()
            .filter(|r| r.confidence >= self.plate_threshold)
            .collect();
        result.plate_regions = regions.len();
        result.plate_readings = regions
            .iter()
            .filter(|r| !r.recognized_text.is_empty())
            .map(|r| PlateReading::new(r.recognized_text.clone(), r.ocr_confidence))
            .collect();
        result.valid_plates = valid_plates(&result.plate_readings);
        let plates_synthetic = regions.iter().any(|r| r.synthetic);

        // 3. association: first valid plate goes to every candidate
        let vehicle = result.valid_plates.first().cloned();
        for detection in detections
            .iter()
            .filter(|d| d.confidence >= self.helmet_threshold)
        {
            let category = if detection.is_label(LABEL_NO_HELMET) {
                result.no_helmet_count += 1;
                ViolationCategory::HelmetNotWorn
            } else if detection.is_label(LABEL_HELMET) {
                result.helmet_count += 1;
                continue;
            } else {
                match self.rules.snapshot().lookup_label(&detection.label) {
                    (Some(category), _) => category,
                    (None, _) => continue,
                }
            };

            let synthetic = detection.synthetic || (vehicle.is_some() && plates_synthetic);
            result.candidates.push(self.candidate(
                category,
                detection,
                frame,
                vehicle.clone(),
                location,
                location_name,
                synthetic,
            ));
        }

        result.synthetic = detections.iter().any(|d| d.synthetic) || plates_synthetic;
        if result.synthetic && !result.candidates.is_empty() {
            debug!(frame = frame.index, "candidates built from synthetic detections");
        }

        // 4. evidence, once per frame with candidates
        if let (Some(dir), false) = (evidence_dir, result.candidates.is_empty()) {
            match write_evidence(dir, frame) {
                Ok(path) => {
                    for c in &mut result.candidates {
                        c.evidence_path = Some(path.clone());
                    }
                    result.evidence_path = Some(path);
                }
                Err(e) => result.fail(ProcessingStep::Evidence, e.to_string()),
            }
        }

        if vehicle.is_none() && !result.candidates.is_empty() {
            warn!(
                frame = frame.index,
                candidates = result.candidates.len(),
                "no valid plate, recording violations against unknown vehicle"
            );
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    fn candidate(
        &self,
        category: ViolationCategory,
        detection: &Detection,
        frame: &Frame,
        vehicle_number: Option<String>,
        location: Option<GeoLocation>,
        location_name: Option<&str>,
        synthetic: bool,
    ) -> ViolationCandidate {
        let rule = self.rules.lookup(category);
        ViolationCandidate {
            category,
            severity: rule.severity,
            penalty: rule.penalty,
            description: rule.description,
            bbox: detection.bbox,
            confidence: detection.confidence,
            vehicle_number,
            location,
            location_name: location_name.map(str::to_string),
            captured_at: frame.captured_at,
            synthetic,
            evidence_path: None,
        }
    }
}

impl std::fmt::Debug for FrameProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProcessor")
            .field("adapter", &self.adapter)
            .field("helmet_threshold", &self.helmet_threshold)
            .field("plate_threshold", &self.plate_threshold)
            .field("evidence_dir", &self.evidence_dir)
            .finish()
    }
}

/// `violation_<YYYYmmdd_HHMMSS>_<frame>.jpg` under `dir`
fn write_evidence(dir: &Path, frame: &Frame) -> std::io::Result<String> {
    std::fs::create_dir_all(dir)?;
    let name = format!(
        "violation_{}_{}.jpg",
        frame.captured_at.format("%Y%m%d_%H%M%S"),
        frame.index
    );
    let path = dir.join(name);
    std::fs::write(&path, &frame.data)?;
    Ok(path.to_string_lossy().into_owned())
}
