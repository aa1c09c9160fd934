//! Real detectors backed by an external model runner process.
//!
//! The runner is invoked once per frame:
//!
//! ```text
//! <program> [args..] --task <helmet|plate> --model <weights> --conf <threshold>
//!   stdin:  encoded frame bytes
//!   stdout: {"detections":[{"bbox":[x1,y1,x2,y2],"label":"no_helmet","confidence":0.87,
//!             "text":"DL01AB1234","text_confidence":0.91,"fragments":[...]}]}
//! ```
//!
//! Loading runs `<program> [args..] --check --task <task> --model <weights>`
//! once and requires a zero exit status. Every run is bounded by
//! [`ModelSpec::timeout`]; a runner still alive at the deadline is killed.
//!
//! Runs are driven on the current tokio runtime when there is one. On a
//! current-thread runtime the detectors must be called from a blocking
//! context (`spawn_blocking`, a plain thread), never from an async task.

use crate::capability::{
    DetectError, Detection, DetectionBackend, HelmetDetector, PlateReader, PlateRegion,
};
use echallan_core::{BoundingBox, Frame};
use echallan_plate::{assemble_fragments, OcrFragment, PlateReading};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::RuntimeFlavor;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    Helmet,
    Plate,
}

impl ModelTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Helmet => "helmet",
            Self::Plate => "plate",
        }
    }
}

/// Where a model lives and how to run it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub program: String,
    /// Leading arguments, ex: the script an interpreter should run
    #[serde(default)]
    pub args: Vec<String>,
    pub model_path: PathBuf,
    pub task: ModelTask,
    pub confidence_threshold: f32,
    /// Deadline for a single runner invocation
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
struct RunnerOutput {
    #[serde(default)]
    detections: Vec<RunnerDetection>,
}

#[derive(Debug, Clone, Deserialize)]
struct RunnerDetection {
    bbox: [i32; 4],
    #[serde(default)]
    label: String,
    confidence: f32,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    text_confidence: Option<f32>,
    #[serde(default)]
    fragments: Option<Vec<OcrFragment>>,
}

impl RunnerDetection {
    fn bbox(&self) -> BoundingBox {
        let [x1, y1, x2, y2] = self.bbox;
        BoundingBox::new(x1, y1, x2, y2)
    }
}

/// A checked, ready-to-invoke model
#[derive(Debug, Clone)]
pub struct ExternalModel {
    spec: ModelSpec,
}

impl ExternalModel {
    pub fn load(spec: ModelSpec) -> Result<Self, DetectError> {
        if !spec.model_path.is_file() {
            return Err(DetectError::Load(format!(
                "model weights not found: {}",
                spec.model_path.display()
            )));
        }

        let args = vec![
            OsString::from("--check"),
            OsString::from("--task"),
            OsString::from(spec.task.as_str()),
            OsString::from("--model"),
            spec.model_path.clone().into_os_string(),
        ];
        let output = drive(run_runner(&spec, args, None))
            .and_then(|ran| ran)
            .map_err(|e| DetectError::Load(format!("{} not usable: {}", spec.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectError::Load(format!(
                "{} check failed ({}): {}",
                spec.program,
                output.status,
                stderr.trim()
            )));
        }

        debug!(program = %spec.program, task = spec.task.as_str(), "model runner ready");
        Ok(Self { spec })
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn invoke(&self, frame: &Frame) -> Result<Vec<RunnerDetection>, DetectError> {
        if frame.is_empty() {
            return Err(DetectError::EmptyFrame(format!("frame {} has no data", frame.index)));
        }

        let args = vec![
            OsString::from("--task"),
            OsString::from(self.spec.task.as_str()),
            OsString::from("--model"),
            self.spec.model_path.clone().into_os_string(),
            OsString::from("--conf"),
            OsString::from(self.spec.confidence_threshold.to_string()),
        ];
        let output = drive(run_runner(&self.spec, args, Some(frame.data.clone())))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectError::Invoke(format!(
                "{} exited with {}: {}",
                self.spec.program,
                output.status,
                stderr.trim()
            )));
        }

        let parsed: RunnerOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| DetectError::Decode(e.to_string()))?;
        Ok(parsed.detections)
    }
}

/// Run the runner once with `input` on stdin. The child is killed when the
/// deadline passes, since dropping the wait future drops the child.
async fn run_runner(
    spec: &ModelSpec,
    args: Vec<OsString>,
    input: Option<Vec<u8>>,
) -> Result<Output, DetectError> {
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DetectError::Invoke(format!("spawn {}: {}", spec.program, e)))?;

    // Feed stdin while collecting output so a runner that writes before it
    // has read the whole frame cannot deadlock us.
    let stdin = child.stdin.take();
    let feed = async move {
        match (stdin, input) {
            (Some(mut stdin), Some(data)) => stdin.write_all(&data).await,
            _ => Ok(()),
        }
    };

    let run = async { tokio::join!(feed, child.wait_with_output()) };
    let (written, output) = tokio::time::timeout(spec.timeout, run).await.map_err(|_| {
        warn!(
            program = %spec.program,
            task = spec.task.as_str(),
            timeout_ms = spec.timeout.as_millis() as u64,
            "model runner timed out, killed"
        );
        DetectError::Timeout(format!(
            "{} still running after {:?}",
            spec.program, spec.timeout
        ))
    })?;

    let output = output.map_err(|e| DetectError::Invoke(e.to_string()))?;
    // The exit status decides; a runner may answer or fail without
    // draining stdin.
    if let Err(e) = written {
        debug!(program = %spec.program, error = %e, "runner closed stdin early");
    }
    Ok(output)
}

/// Block on `fut` using the ambient runtime, or a throwaway one outside of
/// any runtime.
fn drive<F: Future>(fut: F) -> Result<F::Output, DetectError> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Ok(handle.block_on(fut)),
            _ => Ok(tokio::task::block_in_place(|| handle.block_on(fut))),
        },
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| DetectError::Invoke(format!("runtime: {}", e)))?;
            Ok(runtime.block_on(fut))
        }
    }
}

pub struct RealHelmetDetector {
    model: ExternalModel,
}

impl RealHelmetDetector {
    pub fn load(spec: ModelSpec) -> Result<Self, DetectError> {
        Ok(Self {
            model: ExternalModel::load(spec)?,
        })
    }
}

impl HelmetDetector for RealHelmetDetector {
    fn id(&self) -> &'static str {
        "helmet.external.v1"
    }

    fn backend(&self) -> DetectionBackend {
        DetectionBackend::Real
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let detections = self
            .model
            .invoke(frame)?
            .into_iter()
            .map(|d| Detection::new(d.bbox(), d.label, d.confidence))
            .collect();
        Ok(detections)
    }
}

pub struct RealPlateReader {
    model: ExternalModel,
    ocr_threshold: f32,
}

impl RealPlateReader {
    pub fn load(spec: ModelSpec, ocr_threshold: f32) -> Result<Self, DetectError> {
        Ok(Self {
            model: ExternalModel::load(spec)?,
            ocr_threshold,
        })
    }

    fn region(&self, d: RunnerDetection) -> PlateRegion {
        let bbox = d.bbox();
        let text_confidence = d.text_confidence.unwrap_or(1.0);
        let reading = match d.fragments {
            Some(fragments) => assemble_fragments(&fragments, self.ocr_threshold),
            None => d
                .text
                .filter(|_| text_confidence > self.ocr_threshold)
                .map(|text| PlateReading::new(text, text_confidence)),
        };

        let (recognized_text, ocr_confidence) = reading
            .map(|r| (r.text, r.confidence))
            .unwrap_or_default();

        PlateRegion {
            bbox,
            confidence: d.confidence,
            recognized_text,
            ocr_confidence,
            synthetic: false,
        }
    }
}

impl PlateReader for RealPlateReader {
    fn id(&self) -> &'static str {
        "plate.external.v1"
    }

    fn backend(&self) -> DetectionBackend {
        DetectionBackend::Real
    }

    fn read(&self, frame: &Frame) -> Result<Vec<PlateRegion>, DetectError> {
        let regions = self
            .model
            .invoke(frame)?
            .into_iter()
            .map(|d| self.region(d))
            .collect();
        Ok(regions)
    }
}
