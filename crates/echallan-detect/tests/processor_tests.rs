//! Integration tests for the frame processor with scripted detectors.
//!
//! The stubs below stand in for the model runner so that each scenario can
//! fix exactly what the detectors report.

use echallan_core::{
    BoundingBox, CaptureContext, Frame, GeoLocation, Severity, ViolationCategory,
};
use echallan_detect::{
    DetectError, Detection, DetectionAdapter, DetectionBackend, FrameProcessor, HelmetDetector,
    PlateReader, PlateRegion, ProcessingStep, LABEL_HELMET, LABEL_NO_HELMET,
};
use echallan_rules::{RuleTable, SharedRuleTable};

struct ScriptedHelmets(Result<Vec<Detection>, DetectError>);

impl HelmetDetector for ScriptedHelmets {
    fn id(&self) -> &'static str {
        "helmet.scripted"
    }

    fn backend(&self) -> DetectionBackend {
        DetectionBackend::Real
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        self.0.clone()
    }
}

struct ScriptedPlates(Result<Vec<PlateRegion>, DetectError>);

impl PlateReader for ScriptedPlates {
    fn id(&self) -> &'static str {
        "plate.scripted"
    }

    fn backend(&self) -> DetectionBackend {
        DetectionBackend::Real
    }

    fn read(&self, _frame: &Frame) -> Result<Vec<PlateRegion>, DetectError> {
        self.0.clone()
    }
}

fn plate(text: &str, confidence: f32) -> PlateRegion {
    PlateRegion {
        bbox: BoundingBox::new(400, 500, 520, 540),
        confidence,
        recognized_text: text.to_string(),
        ocr_confidence: 0.9,
        synthetic: false,
    }
}

fn no_helmet(confidence: f32) -> Detection {
    Detection::new(BoundingBox::new(100, 80, 220, 300), LABEL_NO_HELMET, confidence)
}

fn processor(
    helmets: Result<Vec<Detection>, DetectError>,
    plates: Result<Vec<PlateRegion>, DetectError>,
) -> FrameProcessor {
    let adapter = DetectionAdapter::with_detectors(
        Box::new(ScriptedHelmets(helmets)),
        Box::new(ScriptedPlates(plates)),
    );
    FrameProcessor::new(adapter, SharedRuleTable::new(RuleTable::standard()))
}

fn frame() -> Frame {
    Frame::new(0, vec![0xFF, 0xD8, 0xFF, 0xE0]).with_dimensions(1280, 720)
}

// =============================================================================
// Association
// =============================================================================

#[test]
fn test_no_helmet_with_plate() {
    let processor = processor(Ok(vec![no_helmet(0.87)]), Ok(vec![plate("DL01AB1234", 0.8)]));
    let location = GeoLocation::new(28.6139, 77.2090);
    let result = processor.process(&frame(), Some(location), Some("Connaught Place"));

    assert!(!result.has_failures());
    assert!(!result.synthetic);
    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.no_helmet_count, 1);

    let c = &result.candidates[0];
    assert_eq!(c.category, ViolationCategory::HelmetNotWorn);
    assert_eq!(c.severity, Severity::High);
    assert_eq!(c.penalty, 500.0);
    assert_eq!(c.vehicle_number.as_deref(), Some("DL01AB1234"));
    assert_eq!(c.location, Some(location));
    assert_eq!(c.location_name.as_deref(), Some("Connaught Place"));
    assert!((c.confidence - 0.87).abs() < 1e-6);
    assert!(!c.synthetic);
}

#[test]
fn test_first_valid_plate_wins() {
    let processor = processor(
        Ok(vec![no_helmet(0.9), no_helmet(0.7)]),
        Ok(vec![
            plate("garbage", 0.95),
            plate("mh 12 ab 1234", 0.5),
            plate("DL01AB1234", 0.99),
        ]),
    );
    let result = processor.process(&frame(), None, None);

    assert_eq!(result.valid_plates, vec!["MH12AB1234", "DL01AB1234"]);
    assert_eq!(result.candidates.len(), 2);
    for c in &result.candidates {
        assert_eq!(c.vehicle_number.as_deref(), Some("MH12AB1234"));
    }
}

#[test]
fn test_violation_kept_without_plate() {
    let processor = processor(Ok(vec![no_helmet(0.8)]), Ok(vec![plate("??", 0.9)]));
    let result = processor.process(&frame(), None, None);

    assert_eq!(result.candidates.len(), 1);
    assert!(result.candidates[0].vehicle_number.is_none());
    assert_eq!(result.candidates[0].vehicle_or_unknown(), "UNKNOWN");
    assert_eq!(result.plate_readings.len(), 1);
    assert!(result.valid_plates.is_empty());
}

// =============================================================================
// Labels and thresholds
// =============================================================================

#[test]
fn test_helmet_wearers_are_counted_not_fined() {
    let processor = processor(
        Ok(vec![
            Detection::new(BoundingBox::new(0, 0, 50, 50), LABEL_HELMET, 0.9),
            Detection::new(BoundingBox::new(60, 0, 110, 50), LABEL_HELMET, 0.8),
        ]),
        Ok(Vec::new()),
    );
    let result = processor.process(&frame(), None, None);
    assert_eq!(result.helmet_count, 2);
    assert!(result.candidates.is_empty());
}

#[test]
fn test_low_confidence_detections_discarded() {
    let processor = processor(Ok(vec![no_helmet(0.3)]), Ok(vec![plate("DL01AB1234", 0.2)]));
    let result = processor.process(&frame(), None, None);
    assert!(result.candidates.is_empty());
    assert_eq!(result.plate_regions, 0);
}

#[test]
fn test_category_labels_and_unknown_labels() {
    let processor = processor(
        Ok(vec![
            Detection::new(BoundingBox::default(), "triple_riding", 0.9),
            Detection::new(BoundingBox::default(), "wrong_way", 0.9),
        ]),
        Ok(Vec::new()),
    );
    let result = processor.process(&frame(), None, None);
    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.candidates[0].category, ViolationCategory::TripleRiding);
    assert_eq!(result.candidates[0].penalty, 1000.0);
}

// =============================================================================
// Partial failures
// =============================================================================

#[test]
fn test_plate_failure_degrades_to_unknown_vehicle() {
    let processor = processor(
        Ok(vec![no_helmet(0.87)]),
        Err(DetectError::Invoke("runner crashed".to_string())),
    );
    let result = processor.process(&frame(), None, None);

    assert!(result.failed(ProcessingStep::PlateRecognition));
    assert!(!result.failed(ProcessingStep::HelmetDetection));
    assert_eq!(result.candidates.len(), 1);
    assert!(result.candidates[0].vehicle_number.is_none());
}

#[test]
fn test_helmet_failure_yields_no_candidates() {
    let processor = processor(
        Err(DetectError::Decode("bad json".to_string())),
        Ok(vec![plate("DL01AB1234", 0.8)]),
    );
    let result = processor.process(&frame(), None, None);

    assert!(result.failed(ProcessingStep::HelmetDetection));
    assert!(result.candidates.is_empty());
    assert_eq!(result.valid_plates, vec!["DL01AB1234"]);
}

#[test]
fn test_context_supplies_location() {
    let processor = processor(Ok(vec![no_helmet(0.87)]), Ok(vec![plate("DL01AB1234", 0.8)]));
    let ctx = CaptureContext::new()
        .at(GeoLocation::new(12.97, 77.59), "MG Road")
        .with_camera("cam-3");
    let result = processor.process_in(&frame(), &ctx);

    assert_eq!(result.candidates[0].location_name.as_deref(), Some("MG Road"));
    assert!(result.evidence_path.is_none());
}
