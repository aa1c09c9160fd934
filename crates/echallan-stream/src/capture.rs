//! Live capture session
//!
//! One background thread pulls from a [`FrameGrabber`] and keeps only the
//! most recent frame. Readers copy it out under the lock and never wait on
//! the producer; a slow reader simply misses frames.
use crate::grabber::FrameGrabber;
use chrono::Utc;
use echallan_core::{EchallanError, Frame, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// State shared with the capture thread
#[derive(Default)]
struct Shared {
    latest: Mutex<Option<Frame>>,
    running: AtomicBool,
    captured: AtomicU64,
    failures: AtomicU64,
}

impl Shared {
    fn latest(&self) -> MutexGuard<'_, Option<Frame>> {
        match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct CaptureSession {
    camera_id: String,
    shared: Arc<Shared>,
    grabber: Mutex<Option<Box<dyn FrameGrabber>>>,
    worker: Mutex<Option<JoinHandle<Box<dyn FrameGrabber>>>>,
    interval: Duration,
    width: u32,
    height: u32,
}

impl CaptureSession {
    pub fn new(camera_id: impl Into<String>, grabber: Box<dyn FrameGrabber>) -> Self {
        Self {
            camera_id: camera_id.into(),
            shared: Arc::new(Shared::default()),
            grabber: Mutex::new(Some(grabber)),
            worker: Mutex::new(None),
            interval: Duration::from_millis(33),
            width: 1280,
            height: 720,
        }
    }

    /// Pause between grabs (default ~30 fps)
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Start the capture thread. Starting a running session is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }
        let mut grabber = lock(&self.grabber)
            .take()
            .ok_or_else(|| EchallanError::Config(format!("capture session {} has no grabber", self.camera_id)))?;

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let (width, height) = (self.width, self.height);
        let camera_id = self.camera_id.clone();
        info!(camera = %camera_id, source = %grabber.describe(), "capture started");

        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", camera_id))
            .spawn(move || {
                while shared.running.load(Ordering::SeqCst) {
                    match grabber.grab() {
                        Ok(Some(data)) => {
                            let index = shared.captured.load(Ordering::SeqCst);
                            let frame = Frame::new(index, data).with_dimensions(width, height);
                            *shared.latest() = Some(frame);
                            shared.captured.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(None) => {
                            debug!(camera = %camera_id, "capture feed ended");
                            shared.running.store(false, Ordering::SeqCst);
                            break;
                        }
                        Err(e) => {
                            shared.failures.fetch_add(1, Ordering::SeqCst);
                            warn!(camera = %camera_id, error = %e, "frame grab failed");
                        }
                    }
                    std::thread::sleep(interval);
                }
                grabber
            })
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                EchallanError::Config(format!("cannot spawn capture thread: {}", e))
            })?;

        *worker = Some(handle);
        Ok(())
    }

    /// Stop the capture thread and wait for it. The last frame stays
    /// available to [`snapshot`](Self::snapshot).
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(grabber) => *lock(&self.grabber) = Some(grabber),
                Err(_) => warn!(camera = %self.camera_id, "capture thread panicked"),
            }
            info!(
                camera = %self.camera_id,
                frames = self.frames_captured(),
                "capture stopped"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Copy of the most recent frame, if any has been captured.
    pub fn snapshot(&self) -> Option<Frame> {
        self.shared.latest().clone()
    }

    pub fn frames_captured(&self) -> u64 {
        self.shared.captured.load(Ordering::SeqCst)
    }

    pub fn grab_failures(&self) -> u64 {
        self.shared.failures.load(Ordering::SeqCst)
    }

    /// Save the current frame as `violation_<YYYYmmdd_HHMMSS>.jpg` in `dir`.
    pub fn capture_photo(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let frame = self.snapshot().ok_or_else(|| {
            EchallanError::NoInput(format!("camera {} has not produced a frame", self.camera_id))
        })?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("violation_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S")));
        std::fs::write(&path, &frame.data)?;
        info!(camera = %self.camera_id, path = %path.display(), "photo captured");
        Ok(path)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("camera_id", &self.camera_id)
            .field("running", &self.is_running())
            .field("frames_captured", &self.frames_captured())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grabber::MemoryGrabber;

    fn wait_for(session: &CaptureSession, frames: u64) {
        for _ in 0..500 {
            if session.frames_captured() >= frames {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("capture produced only {} frames", session.frames_captured());
    }

    #[test]
    fn test_latest_frame_wins() {
        let frames = (0..5u8).map(|i| vec![i]).collect();
        let session = CaptureSession::new("cam-0", Box::new(MemoryGrabber::new(frames)))
            .with_interval(Duration::from_millis(1));
        assert!(session.snapshot().is_none());

        session.start().unwrap();
        wait_for(&session, 5);
        session.stop();

        let frame = session.snapshot().unwrap();
        assert_eq!(frame.data, vec![4]);
        assert_eq!(frame.index, 4);
        assert_eq!((frame.width, frame.height), (1280, 720));
        assert!(!session.is_running());
    }

    #[test]
    fn test_restart_after_stop() {
        let grabber = MemoryGrabber::new(vec![b"jpeg".to_vec()]).looping();
        let session = CaptureSession::new("cam-1", Box::new(grabber)).with_interval(Duration::from_millis(1));
        session.start().unwrap();
        session.start().unwrap();
        wait_for(&session, 1);
        session.stop();

        session.start().unwrap();
        assert!(session.is_running());
        session.stop();
    }

    #[test]
    fn test_capture_photo() {
        let dir = tempfile::tempdir().unwrap();
        let session = CaptureSession::new(
            "cam-2",
            Box::new(MemoryGrabber::new(vec![b"jpeg".to_vec()]).looping()),
        )
        .with_interval(Duration::from_millis(1));

        assert!(matches!(session.capture_photo(dir.path()), Err(EchallanError::NoInput(_))));

        session.start().unwrap();
        wait_for(&session, 1);
        let path = session.capture_photo(dir.path()).unwrap();
        session.stop();

        assert_eq!(std::fs::read(path).unwrap(), b"jpeg");
    }
}
