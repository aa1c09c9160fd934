//! Stream Orchestrator: drives the frame processor over a frame source.
//!
//! Per pulled frame:
//! 1. stop / duration check (continuous feeds only honor the duration)
//! 2. stride check on the running frame count
//! 3. detection on a blocking thread, bounded by the frame timeout
//! 4. candidates recorded, or issued when auto-issue is on
//!
//! A frame that fails or times out is counted and skipped, and so is an
//! unreadable frame of a finite sequence. Only a source that never yields
//! a frame, or a persistence failure, ends the run with an error.
use crate::config::StreamConfig;
use crate::metrics::StreamMetrics;
use crate::source::{FrameSource, SourceKind};
use echallan_challan::{ChallanManager, OwnerContact};
use echallan_core::{
    CaptureContext, EchallanError, Frame, Result, ViolationCandidate, ECHALLAN_VERSION,
};
use echallan_detect::{FrameProcessor, FrameResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Log a progress line every this many frames
const PROGRESS_EVERY: u64 = 100;

/// Cooperative stop signal, checked between frames
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub frames_seen: u64,
    pub frames_processed: u64,
    pub violations: u64,
    /// Distinct vehicle numbers; violations without a plate are not counted
    pub distinct_vehicles: usize,
    pub challans_issued: u64,
    pub failed_frames: u64,
    pub synthetic_frames: u64,

    #[serde(skip)]
    vehicles: BTreeSet<String>,
}

impl StreamStats {
    pub fn vehicles(&self) -> impl Iterator<Item = &str> {
        self.vehicles.iter().map(String::as_str)
    }

    fn note_vehicle(&mut self, vehicle: &str) {
        self.vehicles.insert(vehicle.to_string());
        self.distinct_vehicles = self.vehicles.len();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    EndOfStream,
    DurationElapsed,
    Stopped,
    /// The source failed after having produced frames
    SourceError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamReport {
    pub version: String,
    pub trace_id: String,
    pub source: SourceKind,
    pub stride: u64,
    pub stats: StreamStats,
    pub end: EndReason,
    pub elapsed_ms: u64,
    /// Most recent candidates, at most `report_limit` of them
    pub candidates: Vec<ViolationCandidate>,
    /// Most recent challan numbers issued during the run, at most
    /// `report_limit` of them
    pub challans: Vec<String>,
}

pub struct StreamOrchestrator {
    processor: Arc<FrameProcessor>,
    manager: Option<Arc<ChallanManager>>,
    config: StreamConfig,
    context: CaptureContext,
    stop: StopHandle,
    metrics: Option<StreamMetrics>,
}

impl StreamOrchestrator {
    pub fn new(processor: Arc<FrameProcessor>, config: StreamConfig) -> Self {
        Self {
            processor,
            manager: None,
            config,
            context: CaptureContext::new(),
            stop: StopHandle::new(),
            metrics: None,
        }
    }

    /// Candidates are recorded through the manager, and issued when
    /// `auto_issue` is set.
    pub fn with_manager(mut self, manager: Arc<ChallanManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn with_context(mut self, context: CaptureContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_metrics(mut self, metrics: StreamMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub async fn run(&self, source: Box<dyn FrameSource>) -> Result<StreamReport> {
        let kind = source.kind();
        let stride = self.config.stride_for(kind);
        let started = Instant::now();
        let deadline = self
            .config
            .duration()
            .filter(|_| kind.is_continuous())
            .map(|d| started + d);

        if self.config.annotate {
            std::fs::create_dir_all(&self.config.annotation_dir)?;
        }

        info!(
            source = %kind,
            stride,
            trace = %self.context.trace_id,
            auto_issue = self.config.auto_issue,
            synthetic = self.processor.adapter().is_synthetic(),
            "stream started"
        );

        let limit = self.config.report_limit;
        let mut stats = StreamStats::default();
        let mut candidates = VecDeque::new();
        let mut challans = VecDeque::new();
        let mut unreadable = 0u64;
        let mut source = source;

        let end = loop {
            if self.stop.is_stopped() {
                break EndReason::Stopped;
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                break EndReason::DurationElapsed;
            }

            let (returned, pulled) = pull(source).await?;
            source = returned;
            let frame = match pulled {
                Ok(Some(frame)) => frame,
                Ok(None) => break EndReason::EndOfStream,
                Err(e) if kind == SourceKind::Sequence => {
                    error!(frame = stats.frames_seen, error = %e, "unreadable frame, skipping");
                    stats.frames_seen += 1;
                    stats.failed_frames += 1;
                    unreadable += 1;
                    self.count(|m| {
                        m.frames_seen.inc();
                        m.failed_frames.inc();
                    });
                    continue;
                }
                Err(e) if stats.frames_seen == 0 => return Err(e),
                Err(e) => {
                    error!(source = %kind, error = %e, "frame source failed, ending stream");
                    break EndReason::SourceError;
                }
            };

            let position = stats.frames_seen;
            stats.frames_seen += 1;
            self.count(|m| m.frames_seen.inc());
            if position > 0 && position % PROGRESS_EVERY == 0 {
                info!(
                    frames = stats.frames_seen,
                    processed = stats.frames_processed,
                    violations = stats.violations,
                    "stream progress"
                );
            }
            if position % stride != 0 {
                continue;
            }

            let Some(result) = self.process(frame).await else {
                stats.failed_frames += 1;
                self.count(|m| m.failed_frames.inc());
                continue;
            };

            stats.frames_processed += 1;
            self.count(|m| m.frames_processed.inc());
            if result.has_failures() {
                stats.failed_frames += 1;
                self.count(|m| m.failed_frames.inc());
            }
            if result.synthetic {
                stats.synthetic_frames += 1;
                self.count(|m| m.synthetic_frames.inc());
            }
            if self.config.annotate {
                self.annotate(&result);
            }

            for candidate in result.candidates {
                stats.violations += 1;
                self.count(|m| m.violations.inc());
                if let Some(vehicle) = &candidate.vehicle_number {
                    stats.note_vehicle(vehicle);
                    self.count(|m| m.distinct_vehicles.set(stats.distinct_vehicles as i64));
                }
                if let Some(number) = self.commit(&candidate)? {
                    stats.challans_issued += 1;
                    self.count(|m| m.challans_issued.inc());
                    keep_recent(&mut challans, number, limit);
                }
                keep_recent(&mut candidates, candidate, limit);
            }
        };

        if unreadable > 0 && unreadable == stats.frames_seen {
            return Err(EchallanError::NoInput(format!(
                "none of the {} frames could be read",
                unreadable
            )));
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            source = %kind,
            end = ?end,
            frames = stats.frames_seen,
            processed = stats.frames_processed,
            violations = stats.violations,
            vehicles = stats.distinct_vehicles,
            challans = stats.challans_issued,
            failed = stats.failed_frames,
            elapsed_ms,
            "stream finished"
        );

        Ok(StreamReport {
            version: ECHALLAN_VERSION.to_string(),
            trace_id: self.context.trace_id.clone(),
            source: kind,
            stride,
            stats,
            end,
            elapsed_ms,
            candidates: candidates.into(),
            challans: challans.into(),
        })
    }

    /// Run detection off the async threads. `None` when the frame timed out
    /// or the detection task died.
    async fn process(&self, frame: Frame) -> Option<FrameResult> {
        let index = frame.index;
        let processor = Arc::clone(&self.processor);
        let ctx = self.context.clone();
        let task = tokio::task::spawn_blocking(move || processor.process_in(&frame, &ctx));

        match tokio::time::timeout(self.config.frame_timeout(), task).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) => {
                error!(frame = index, error = %e, "detection task failed");
                None
            }
            Err(_) => {
                error!(
                    frame = index,
                    timeout_ms = self.config.frame_timeout().as_millis() as u64,
                    "detection timed out, skipping frame"
                );
                None
            }
        }
    }

    /// Record or issue one candidate. Returns the challan number when issued.
    fn commit(&self, candidate: &ViolationCandidate) -> Result<Option<String>> {
        let Some(manager) = &self.manager else {
            return Ok(None);
        };
        if self.config.auto_issue {
            let (_, challan) = manager.issue_for_candidate(candidate, OwnerContact::default())?;
            Ok(Some(challan.challan_number))
        } else {
            manager.record_violation(candidate)?;
            Ok(None)
        }
    }

    fn annotate(&self, result: &FrameResult) {
        let path = self
            .config
            .annotation_dir
            .join(format!("frame_{:06}.json", result.frame_index));
        let written = serde_json::to_vec_pretty(result)
            .map_err(EchallanError::from)
            .and_then(|json| std::fs::write(&path, json).map_err(EchallanError::from));
        match written {
            Ok(()) => debug!(path = %path.display(), "annotation written"),
            Err(e) => warn!(path = %path.display(), error = %e, "annotation not written"),
        }
    }

    fn count(&self, update: impl FnOnce(&StreamMetrics)) {
        if let Some(metrics) = &self.metrics {
            update(metrics);
        }
    }
}

impl std::fmt::Debug for StreamOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOrchestrator")
            .field("processor", &self.processor)
            .field("config", &self.config)
            .field("auto_issue", &self.config.auto_issue)
            .finish()
    }
}

/// Append, dropping the oldest entries beyond `limit`.
fn keep_recent<T>(buffer: &mut VecDeque<T>, item: T, limit: usize) {
    if limit == 0 {
        return;
    }
    if buffer.len() == limit {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

type Pulled = (Box<dyn FrameSource>, Result<Option<Frame>>);

/// Pull one frame on a blocking thread; the source travels there and back.
async fn pull(source: Box<dyn FrameSource>) -> Result<Pulled> {
    tokio::task::spawn_blocking(move || {
        let mut source = source;
        let frame = source.next_frame();
        (source, frame)
    })
    .await
    .map_err(|e| EchallanError::NoInput(format!("frame source task failed: {}", e)))
}
