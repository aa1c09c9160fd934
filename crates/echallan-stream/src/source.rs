//! Frame sources the orchestrator pulls from
use crate::capture::CaptureSession;
use crate::grabber::{list_frame_files, FrameGrabber};
use echallan_core::{EchallanError, Frame, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// One still image
    Image,
    /// Finite ordered frames (a video file or a directory of frames)
    Sequence,
    /// Local camera through a capture session
    Live,
    /// Network stream (RTSP/HTTP)
    Network,
}

impl SourceKind {
    /// Continuous feeds honor the duration bound.
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Live | Self::Network)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Image => "IMAGE",
            Self::Sequence => "SEQUENCE",
            Self::Live => "LIVE",
            Self::Network => "NETWORK",
        };
        f.write_str(s)
    }
}

pub trait FrameSource: Send {
    fn kind(&self) -> SourceKind;

    /// Next frame, or `Ok(None)` at end of stream. May block.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

enum ImageInput {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// A single image; yields it once.
pub struct ImageSource {
    input: Option<ImageInput>,
}

impl ImageSource {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            input: Some(ImageInput::Path(path.into())),
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            input: Some(ImageInput::Bytes(data)),
        }
    }
}

impl FrameSource for ImageSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Image
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let data = match self.input.take() {
            None => return Ok(None),
            Some(ImageInput::Bytes(data)) => data,
            Some(ImageInput::Path(path)) => std::fs::read(&path).map_err(|e| {
                EchallanError::NoInput(format!("cannot read image {}: {}", path.display(), e))
            })?,
        };
        if data.is_empty() {
            return Err(EchallanError::NoInput("image is empty".to_string()));
        }
        Ok(Some(Frame::new(0, data)))
    }
}

enum SequenceInput {
    Files(Vec<PathBuf>),
    Frames(Vec<Vec<u8>>),
}

/// Finite, ordered frames: a directory of images (name order) or frames
/// already held in memory.
pub struct SequenceSource {
    input: SequenceInput,
    next: usize,
}

impl SequenceSource {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let files = list_frame_files(&dir)?;
        if files.is_empty() {
            return Err(EchallanError::NoInput(format!(
                "no frame images in {}",
                dir.display()
            )));
        }
        Ok(Self {
            input: SequenceInput::Files(files),
            next: 0,
        })
    }

    pub fn from_frames(frames: Vec<Vec<u8>>) -> Self {
        Self {
            input: SequenceInput::Frames(frames),
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        match &self.input {
            SequenceInput::Files(files) => files.len(),
            SequenceInput::Frames(frames) => frames.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSource for SequenceSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Sequence
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next >= self.len() {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;

        let data = match &self.input {
            SequenceInput::Frames(frames) => frames[index].clone(),
            SequenceInput::Files(files) => std::fs::read(&files[index]).map_err(|e| {
                EchallanError::NoInput(format!("cannot read {}: {}", files[index].display(), e))
            })?,
        };
        Ok(Some(Frame::new(index as u64, data)))
    }
}

/// Newest frames of a running [`CaptureSession`]. Each call waits for a
/// frame newer than the last one returned; frames captured in between are
/// skipped.
pub struct LiveSource {
    session: Arc<CaptureSession>,
    last_seen: Option<u64>,
    next_index: u64,
    wait: Duration,
}

impl LiveSource {
    pub fn new(session: Arc<CaptureSession>) -> Self {
        Self {
            session,
            last_seen: None,
            next_index: 0,
            wait: Duration::from_secs(5),
        }
    }

    /// How long to wait for a fresh frame before reporting no input
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }
}

impl FrameSource for LiveSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let deadline = Instant::now() + self.wait;
        loop {
            if let Some(frame) = self.session.snapshot() {
                if self.last_seen.map_or(true, |seen| frame.index > seen) {
                    self.last_seen = Some(frame.index);
                    let mut frame = frame;
                    frame.index = self.next_index;
                    self.next_index += 1;
                    return Ok(Some(frame));
                }
            }
            if !self.session.is_running() {
                if self.last_seen.is_none() {
                    return Err(EchallanError::NoInput(format!(
                        "camera {} stopped before producing a frame",
                        self.session.camera_id()
                    )));
                }
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Err(EchallanError::NoInput(format!(
                    "camera {} produced no new frame within {:?}",
                    self.session.camera_id(),
                    self.wait
                )));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Every frame of a video file, decoded in order by a grabber such as
/// [`FfmpegVideoReader`](crate::grabber::FfmpegVideoReader). Finite: the
/// source ends with the file, and stops for good after a read error.
pub struct VideoSource {
    grabber: Box<dyn FrameGrabber>,
    next_index: u64,
    finished: bool,
}

impl VideoSource {
    pub fn new(grabber: Box<dyn FrameGrabber>) -> Self {
        Self {
            grabber,
            next_index: 0,
            finished: false,
        }
    }
}

impl FrameSource for VideoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Sequence
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        match self.grabber.grab() {
            Ok(Some(data)) => {
                let frame = Frame::new(self.next_index, data);
                self.next_index += 1;
                Ok(Some(frame))
            }
            Ok(None) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }
}

/// Frames pulled straight from a grabber, ex: RTSP through ffmpeg.
pub struct NetworkSource {
    grabber: Box<dyn FrameGrabber>,
    next_index: u64,
}

impl NetworkSource {
    pub fn new(grabber: Box<dyn FrameGrabber>) -> Self {
        Self {
            grabber,
            next_index: 0,
        }
    }
}

impl FrameSource for NetworkSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Network
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.grabber.grab()? {
            Some(data) => {
                let frame = Frame::new(self.next_index, data);
                self.next_index += 1;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}
