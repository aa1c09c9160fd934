//! Integration tests for the stream orchestrator.
//!
//! Detectors are stubbed: every frame shows one rider without a helmet and
//! the plate text is the frame's own bytes, so each scenario controls what
//! the pipeline sees through the frames it feeds in.

use echallan_challan::{is_challan_number, ChallanManager, MemoryStore, RecordStore};
use echallan_core::{
    BoundingBox, CaptureContext, ChallanStatus, EchallanError, Frame, GeoLocation,
    ViolationCategory,
};
use echallan_detect::{
    DetectError, Detection, DetectionAdapter, DetectionBackend, FrameProcessor, HelmetDetector,
    PlateReader, PlateRegion, LABEL_NO_HELMET,
};
use echallan_rules::{RuleTable, SharedRuleTable};
use echallan_stream::{
    metrics, CaptureSession, EndReason, FrameSource, ImageSource, LiveSource, MemoryGrabber,
    NetworkSource, SequenceSource, SourceKind, StreamConfig, StreamMetrics, StreamOrchestrator,
    VideoSource,
};
use std::sync::Arc;
use std::time::Duration;

struct RiderWithoutHelmet {
    delay: Option<Duration>,
}

impl HelmetDetector for RiderWithoutHelmet {
    fn id(&self) -> &'static str {
        "helmet.stub"
    }

    fn backend(&self) -> DetectionBackend {
        DetectionBackend::Real
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(vec![Detection::new(
            BoundingBox::new(100, 80, 220, 300),
            LABEL_NO_HELMET,
            0.87,
        )])
    }
}

/// Reads the frame bytes back as the plate text
struct PlateFromFrame;

impl PlateReader for PlateFromFrame {
    fn id(&self) -> &'static str {
        "plate.stub"
    }

    fn backend(&self) -> DetectionBackend {
        DetectionBackend::Real
    }

    fn read(&self, frame: &Frame) -> Result<Vec<PlateRegion>, DetectError> {
        Ok(vec![PlateRegion {
            bbox: BoundingBox::new(400, 500, 520, 540),
            confidence: 0.8,
            recognized_text: String::from_utf8_lossy(&frame.data).into_owned(),
            ocr_confidence: 0.9,
            synthetic: false,
        }])
    }
}

fn rules() -> SharedRuleTable {
    SharedRuleTable::new(RuleTable::standard())
}

fn processor_with_delay(delay: Option<Duration>) -> Arc<FrameProcessor> {
    let adapter = DetectionAdapter::with_detectors(
        Box::new(RiderWithoutHelmet { delay }),
        Box::new(PlateFromFrame),
    );
    Arc::new(FrameProcessor::new(adapter, rules()))
}

fn processor() -> Arc<FrameProcessor> {
    processor_with_delay(None)
}

fn manager(store: Arc<MemoryStore>) -> Arc<ChallanManager> {
    Arc::new(ChallanManager::new(store as Arc<dyn RecordStore>, rules()))
}

fn plates(texts: &[&str]) -> Vec<Vec<u8>> {
    texts.iter().map(|t| t.as_bytes().to_vec()).collect()
}

fn sequence(texts: &[&str]) -> Box<dyn FrameSource> {
    Box::new(SequenceSource::from_frames(plates(texts)))
}

// =============================================================================
// Sampling
// =============================================================================

#[tokio::test]
async fn test_stride_samples_every_fifth_frame() {
    let frames = vec!["DL01AB1234"; 20];
    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default());

    let report = orchestrator.run(sequence(&frames)).await.unwrap();

    assert_eq!(report.source, SourceKind::Sequence);
    assert_eq!(report.stride, 5);
    assert_eq!(report.end, EndReason::EndOfStream);
    assert_eq!(report.stats.frames_seen, 20);
    assert_eq!(report.stats.frames_processed, 4);
    assert_eq!(report.stats.violations, 4);
    assert_eq!(report.stats.failed_frames, 0);
}

#[tokio::test]
async fn test_custom_stride() {
    let frames = vec!["DL01AB1234"; 10];
    let config = StreamConfig::default().with_stride(3);
    let orchestrator = StreamOrchestrator::new(processor(), config);

    let report = orchestrator.run(sequence(&frames)).await.unwrap();

    // positions 0, 3, 6, 9
    assert_eq!(report.stats.frames_processed, 4);
}

#[tokio::test]
async fn test_single_image_is_always_processed() {
    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default().with_stride(5));

    let report = orchestrator
        .run(Box::new(ImageSource::from_bytes(b"DL01AB1234".to_vec())))
        .await
        .unwrap();

    assert_eq!(report.source, SourceKind::Image);
    assert_eq!(report.stats.frames_seen, 1);
    assert_eq!(report.stats.frames_processed, 1);
    assert_eq!(report.candidates.len(), 1);
}

#[tokio::test]
async fn test_video_is_a_finite_sequence() {
    let config = StreamConfig {
        duration_secs: Some(0),
        ..StreamConfig::default()
    };
    let video = VideoSource::new(Box::new(MemoryGrabber::new(plates(&["DL01AB1234"; 10]))));
    let orchestrator = StreamOrchestrator::new(processor(), config);

    let report = orchestrator.run(Box::new(video)).await.unwrap();

    assert_eq!(report.source, SourceKind::Sequence);
    assert_eq!(report.end, EndReason::EndOfStream);
    assert_eq!(report.stats.frames_seen, 10);
    assert_eq!(report.stats.frames_processed, 2);
}

// =============================================================================
// Recording and issuance
// =============================================================================

#[tokio::test]
async fn test_auto_issue_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let config = StreamConfig {
        auto_issue: true,
        ..StreamConfig::default()
    };
    let context = CaptureContext::new().at(GeoLocation::new(28.6139, 77.2090), "Connaught Place");
    let orchestrator = StreamOrchestrator::new(processor(), config)
        .with_manager(manager(Arc::clone(&store)))
        .with_context(context);

    let report = orchestrator
        .run(Box::new(ImageSource::from_bytes(b"DL01AB1234".to_vec())))
        .await
        .unwrap();

    assert_eq!(report.stats.challans_issued, 1);
    assert_eq!(report.challans.len(), 1);
    assert!(is_challan_number(&report.challans[0]));

    let challans = store.list_challans().unwrap();
    assert_eq!(challans.len(), 1);
    let challan = &challans[0];
    assert_eq!(challan.status, ChallanStatus::Issued);
    assert_eq!(challan.penalty_amount, 500.0);
    assert_eq!(challan.violation_category, ViolationCategory::HelmetNotWorn);
    assert_eq!(challan.registration_number.as_deref(), Some("DL01AB1234"));

    let violation = store.get_violation(challan.violation_id).unwrap();
    assert!(violation.processed);
    assert_eq!(violation.challan_id, Some(challan.id));
    assert_eq!(violation.location_name.as_deref(), Some("Connaught Place"));
}

#[tokio::test]
async fn test_violations_recorded_without_auto_issue() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default().with_stride(1))
        .with_manager(manager(Arc::clone(&store)));

    let report = orchestrator
        .run(sequence(&["DL01AB1234", "MH12AB1234"]))
        .await
        .unwrap();

    assert_eq!(report.stats.violations, 2);
    assert_eq!(report.stats.challans_issued, 0);
    assert_eq!(store.list_violations().unwrap().len(), 2);
    assert!(store.list_challans().unwrap().is_empty());
    assert!(store.list_violations().unwrap().iter().all(|v| !v.processed));
}

#[tokio::test]
async fn test_distinct_vehicles_exclude_unplated() {
    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default().with_stride(1));

    let report = orchestrator
        .run(sequence(&["DL01AB1234", "DL01AB1234", "MH12AB1234", "unreadable"]))
        .await
        .unwrap();

    assert_eq!(report.stats.violations, 4);
    assert_eq!(report.stats.distinct_vehicles, 2);
    let vehicles: Vec<&str> = report.stats.vehicles().collect();
    assert_eq!(vehicles, vec!["DL01AB1234", "MH12AB1234"]);
    assert!(report.candidates[3].vehicle_number.is_none());
}

// =============================================================================
// Ending a run
// =============================================================================

#[tokio::test]
async fn test_empty_image_is_no_input() {
    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default());

    let err = orchestrator
        .run(Box::new(ImageSource::from_bytes(Vec::new())))
        .await
        .unwrap_err();

    assert!(matches!(err, EchallanError::NoInput(_)));
}

#[tokio::test]
async fn test_unreadable_sequence_frame_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..10 {
        let plate = format!("DL01AB12{:02}", i);
        std::fs::write(dir.path().join(format!("f{:02}.jpg", i)), plate).unwrap();
    }
    let source = SequenceSource::from_dir(dir.path()).unwrap();
    std::fs::remove_file(dir.path().join("f02.jpg")).unwrap();

    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default().with_stride(1));
    let report = orchestrator.run(Box::new(source)).await.unwrap();

    assert_eq!(report.end, EndReason::EndOfStream);
    assert_eq!(report.stats.frames_seen, 10);
    assert_eq!(report.stats.frames_processed, 9);
    assert_eq!(report.stats.failed_frames, 1);
    assert_eq!(report.stats.violations, 9);
    assert!(report
        .candidates
        .iter()
        .all(|c| c.vehicle_number.as_deref() != Some("DL01AB1202")));
}

#[tokio::test]
async fn test_sequence_with_no_readable_frame_is_no_input() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f00.jpg"), "DL01AB1200").unwrap();
    std::fs::write(dir.path().join("f01.jpg"), "DL01AB1201").unwrap();
    let source = SequenceSource::from_dir(dir.path()).unwrap();
    std::fs::remove_file(dir.path().join("f00.jpg")).unwrap();
    std::fs::remove_file(dir.path().join("f01.jpg")).unwrap();

    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default());
    let err = orchestrator.run(Box::new(source)).await.unwrap_err();

    assert!(matches!(err, EchallanError::NoInput(_)));
}

#[tokio::test]
async fn test_camera_without_frames_is_no_input() {
    let session = Arc::new(CaptureSession::new("cam-dead", Box::new(MemoryGrabber::new(Vec::new()))));
    session.start().unwrap();

    let source = LiveSource::new(Arc::clone(&session)).with_wait(Duration::from_secs(2));
    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default());
    let err = orchestrator.run(Box::new(source)).await.unwrap_err();
    session.stop();

    assert!(matches!(err, EchallanError::NoInput(_)));
}

#[tokio::test]
async fn test_stop_before_first_frame() {
    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default());
    orchestrator.stop_handle().stop();

    let report = orchestrator.run(sequence(&["DL01AB1234"; 3])).await.unwrap();

    assert_eq!(report.end, EndReason::Stopped);
    assert_eq!(report.stats.frames_seen, 0);
}

#[tokio::test]
async fn test_duration_bounds_only_continuous_sources() {
    let config = StreamConfig {
        duration_secs: Some(0),
        ..StreamConfig::default()
    };

    let network = NetworkSource::new(Box::new(
        MemoryGrabber::new(plates(&["DL01AB1234"])).looping(),
    ));
    let orchestrator = StreamOrchestrator::new(processor(), config.clone());
    let report = orchestrator.run(Box::new(network)).await.unwrap();
    assert_eq!(report.end, EndReason::DurationElapsed);
    assert_eq!(report.stats.frames_seen, 0);

    let orchestrator = StreamOrchestrator::new(processor(), config);
    let report = orchestrator.run(sequence(&["DL01AB1234"; 6])).await.unwrap();
    assert_eq!(report.end, EndReason::EndOfStream);
    assert_eq!(report.stats.frames_seen, 6);
}

#[tokio::test]
async fn test_network_source_runs_to_end_of_feed() {
    let network = NetworkSource::new(Box::new(MemoryGrabber::new(plates(&[
        "DL01AB1234",
        "DL01AB1234",
        "DL01AB1234",
        "DL01AB1234",
        "DL01AB1234",
        "MH12AB1234",
    ]))));
    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default());

    let report = orchestrator.run(Box::new(network)).await.unwrap();

    assert_eq!(report.source, SourceKind::Network);
    assert_eq!(report.stats.frames_seen, 6);
    assert_eq!(report.stats.frames_processed, 2);
    assert_eq!(report.stats.distinct_vehicles, 2);
}

#[tokio::test]
async fn test_live_session_source() {
    let session = Arc::new(
        CaptureSession::new("cam-test", Box::new(MemoryGrabber::new(plates(&["DL01AB1234"; 3]))))
            .with_interval(Duration::from_millis(1)),
    );
    session.start().unwrap();

    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default().with_stride(1));
    let report = orchestrator
        .run(Box::new(LiveSource::new(Arc::clone(&session))))
        .await
        .unwrap();
    session.stop();

    assert_eq!(report.source, SourceKind::Live);
    assert_eq!(report.end, EndReason::EndOfStream);
    assert!(report.stats.frames_seen >= 1);
    assert!(report.stats.frames_seen <= 3);
    assert_eq!(report.stats.frames_processed, report.stats.frames_seen);
}

#[tokio::test]
async fn test_slow_frame_times_out_and_is_skipped() {
    let config = StreamConfig {
        frame_timeout_secs: 1,
        ..StreamConfig::default()
    };
    let orchestrator =
        StreamOrchestrator::new(processor_with_delay(Some(Duration::from_millis(1500))), config);

    let report = orchestrator
        .run(Box::new(ImageSource::from_bytes(b"DL01AB1234".to_vec())))
        .await
        .unwrap();

    assert_eq!(report.end, EndReason::EndOfStream);
    assert_eq!(report.stats.frames_seen, 1);
    assert_eq!(report.stats.frames_processed, 0);
    assert_eq!(report.stats.failed_frames, 1);
    assert!(report.candidates.is_empty());
}

// =============================================================================
// Outputs
// =============================================================================

#[tokio::test]
async fn test_annotations_written_per_processed_frame() {
    let dir = tempfile::tempdir().unwrap();
    let config = StreamConfig {
        annotate: true,
        annotation_dir: dir.path().join("annotations"),
        ..StreamConfig::default()
    };
    let orchestrator = StreamOrchestrator::new(processor(), config);

    orchestrator.run(sequence(&["DL01AB1234"; 6])).await.unwrap();

    let first = dir.path().join("annotations/frame_000000.json");
    let second = dir.path().join("annotations/frame_000005.json");
    assert!(first.exists());
    assert!(second.exists());
    assert!(!dir.path().join("annotations/frame_000001.json").exists());

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(first).unwrap()).unwrap();
    assert_eq!(json["valid_plates"][0], "DL01AB1234");
}

#[tokio::test]
async fn test_report_keeps_only_latest_entries() {
    let store = Arc::new(MemoryStore::new());
    let config = StreamConfig {
        report_limit: 2,
        auto_issue: true,
        ..StreamConfig::default()
    }
    .with_stride(1);
    let orchestrator =
        StreamOrchestrator::new(processor(), config).with_manager(manager(Arc::clone(&store)));

    let frames = ["DL01AB1230", "DL01AB1231", "DL01AB1232", "DL01AB1233", "DL01AB1234"];
    let report = orchestrator.run(sequence(&frames)).await.unwrap();

    assert_eq!(report.stats.violations, 5);
    assert_eq!(report.stats.challans_issued, 5);
    assert_eq!(report.stats.distinct_vehicles, 5);
    let kept: Vec<_> = report
        .candidates
        .iter()
        .map(|c| c.vehicle_number.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(kept, vec!["DL01AB1233", "DL01AB1234"]);
    assert_eq!(report.challans.len(), 2);
    assert_eq!(store.list_challans().unwrap().len(), 5);
    assert_eq!(report.version, echallan_core::ECHALLAN_VERSION);
}

#[tokio::test]
async fn test_metrics_follow_stats() {
    let registry = metrics::registry();
    let orchestrator = StreamOrchestrator::new(processor(), StreamConfig::default())
        .with_metrics(StreamMetrics::register(&registry).unwrap());

    orchestrator.run(sequence(&["DL01AB1234"; 20])).await.unwrap();

    let text = metrics::encode(&registry).unwrap();
    assert!(text.contains("echallan_frames_seen_total 20"));
    assert!(text.contains("echallan_frames_processed_total 4"));
    assert!(text.contains("echallan_violations_total 4"));
    assert!(text.contains("echallan_distinct_vehicles 1"));
}
