//! Frame grabbers: where raw encoded frames come from.
//!
//! A grabber is pulled from a blocking context (the capture thread or a
//! `spawn_blocking` task), never from async code directly.
use echallan_core::{EchallanError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Image extensions picked up from frame directories
pub const FRAME_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 64 * 1024;

pub trait FrameGrabber: Send {
    /// Next encoded frame. `Ok(None)` means the feed has ended.
    fn grab(&mut self) -> Result<Option<Vec<u8>>>;

    /// Human-readable origin for logs
    fn describe(&self) -> String;
}

/// Where ffmpeg reads from. Video files go through [`FfmpegVideoReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FfmpegInput {
    /// Live network feed, `rtsp://` or `http://`
    Url(String),
    /// Local V4L2 camera, `/dev/video<N>`
    Device(u32),
}

/// One MJPEG frame per call, grabbed by a short-lived ffmpeg process.
pub struct FfmpegGrabber {
    input: FfmpegInput,
    timeout: Duration,
    runtime: Handle,
    width: u32,
    height: u32,
}

impl FfmpegGrabber {
    pub fn new(input: FfmpegInput, timeout: Duration, runtime: Handle) -> Self {
        Self {
            input,
            timeout,
            runtime,
            width: 1280,
            height: 720,
        }
    }

    /// Bind to the runtime of the calling task.
    pub fn on_current_runtime(input: FfmpegInput, timeout: Duration) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| EchallanError::Config(format!("ffmpeg grabber needs a tokio runtime: {}", e)))?;
        Ok(Self::new(input, timeout, runtime))
    }

    /// Capture size requested from local cameras
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match &self.input {
            FfmpegInput::Url(url) => {
                if url.starts_with("rtsp://") {
                    args.extend(["-rtsp_transport".into(), "tcp".into()]);
                }
                args.extend(["-i".into(), url.clone()]);
            }
            FfmpegInput::Device(index) => {
                args.extend([
                    "-f".into(),
                    "v4l2".into(),
                    "-video_size".into(),
                    format!("{}x{}", self.width, self.height),
                    "-i".into(),
                    format!("/dev/video{}", index),
                ]);
            }
        }
        args.extend(
            [
                "-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "-loglevel", "error",
                "-y", "-",
            ]
            .map(String::from),
        );
        args
    }

    async fn grab_once(&self) -> Result<Vec<u8>> {
        // kill_on_drop: when the timeout fires the child is dropped and killed
        let child = Command::new("ffmpeg")
            .args(self.args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EchallanError::NoInput(format!("ffmpeg spawn failed: {}", e)))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(EchallanError::NoInput(format!(
                        "ffmpeg failed on {}: {}",
                        self.describe(),
                        stderr.trim()
                    )));
                }
                if output.stdout.is_empty() {
                    return Err(EchallanError::NoInput(format!(
                        "ffmpeg returned no frame from {}",
                        self.describe()
                    )));
                }
                Ok(output.stdout)
            }
            Ok(Err(e)) => Err(EchallanError::NoInput(format!("ffmpeg execution failed: {}", e))),
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    input = %self.describe(),
                    "ffmpeg timeout, process killed"
                );
                Err(EchallanError::Timeout(format!(
                    "ffmpeg grab from {} exceeded {:?}",
                    self.describe(),
                    self.timeout
                )))
            }
        }
    }
}

impl FrameGrabber for FfmpegGrabber {
    fn grab(&mut self) -> Result<Option<Vec<u8>>> {
        let runtime = self.runtime.clone();
        runtime.block_on(self.grab_once()).map(Some)
    }

    fn describe(&self) -> String {
        match &self.input {
            FfmpegInput::Url(url) => url.clone(),
            FfmpegInput::Device(index) => format!("/dev/video{}", index),
        }
    }
}

/// Every frame of a video file, in order, from one ffmpeg process that
/// writes MJPEG frames back to back on its stdout.
pub struct FfmpegVideoReader {
    path: PathBuf,
    read_timeout: Duration,
    runtime: Handle,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    buffer: Vec<u8>,
    frames: u64,
    finished: bool,
}

impl FfmpegVideoReader {
    /// Start decoding `path` on the runtime of the calling task. A read
    /// that stalls past `read_timeout` ends the video with a timeout error.
    pub fn open(path: impl Into<PathBuf>, read_timeout: Duration) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(EchallanError::NoInput(format!(
                "video not found: {}",
                path.display()
            )));
        }
        let runtime = Handle::try_current()
            .map_err(|e| EchallanError::Config(format!("video reader needs a tokio runtime: {}", e)))?;
        let args = video_args(&path);
        Self::start(path, "ffmpeg", args, read_timeout, runtime)
    }

    fn start(
        path: PathBuf,
        program: &str,
        args: Vec<OsString>,
        read_timeout: Duration,
        runtime: Handle,
    ) -> Result<Self> {
        let mut child = {
            let _entered = runtime.enter();
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| EchallanError::NoInput(format!("{} spawn failed: {}", program, e)))?
        };
        let stdout = child.stdout.take();
        info!(video = %path.display(), "video decoding started");
        Ok(Self {
            path,
            read_timeout,
            runtime,
            child: Some(child),
            stdout,
            buffer: Vec::new(),
            frames: 0,
            finished: false,
        })
    }

    /// Frames handed out so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Reap the decoder once its output is exhausted.
    fn finish(&mut self) -> Result<Option<Vec<u8>>> {
        self.finished = true;
        self.stdout = None;
        let Some(child) = self.child.take() else {
            return Ok(None);
        };
        let runtime = self.runtime.clone();
        let waited = runtime.block_on(tokio::time::timeout(self.read_timeout, child.wait_with_output()));
        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(EchallanError::NoInput(format!("ffmpeg execution failed: {}", e)));
            }
            Err(_) => {
                warn!(video = %self.path.display(), "ffmpeg did not exit after the last frame, killed");
                return Ok(None);
            }
        };

        if self.frames == 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EchallanError::NoInput(format!(
                "no frames decoded from {} ({}): {}",
                self.path.display(),
                output.status,
                stderr.trim()
            )));
        }
        if !output.status.success() {
            warn!(
                video = %self.path.display(),
                status = %output.status,
                frames = self.frames,
                "ffmpeg stopped early"
            );
        }
        debug!(video = %self.path.display(), frames = self.frames, "video finished");
        Ok(None)
    }
}

impl FrameGrabber for FfmpegVideoReader {
    fn grab(&mut self) -> Result<Option<Vec<u8>>> {
        let runtime = self.runtime.clone();
        let read_timeout = self.read_timeout;
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(frame) = split_jpeg(&mut self.buffer) {
                self.frames += 1;
                return Ok(Some(frame));
            }
            if self.finished {
                return Ok(None);
            }
            let Some(stdout) = self.stdout.as_mut() else {
                return self.finish();
            };

            match runtime.block_on(tokio::time::timeout(read_timeout, stdout.read(&mut chunk))) {
                Ok(Ok(0)) => return self.finish(),
                Ok(Ok(n)) => self.buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    self.finished = true;
                    self.child = None;
                    return Err(EchallanError::NoInput(format!(
                        "reading {} failed: {}",
                        self.describe(),
                        e
                    )));
                }
                Err(_) => {
                    self.finished = true;
                    self.child = None;
                    warn!(
                        timeout_ms = read_timeout.as_millis() as u64,
                        video = %self.path.display(),
                        "ffmpeg stalled, process killed"
                    );
                    return Err(EchallanError::Timeout(format!(
                        "no frame from {} within {:?}",
                        self.describe(),
                        read_timeout
                    )));
                }
            }
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn video_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-nostdin", "-loglevel", "error", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_os_string());
    args.extend(
        ["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "2", "-"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

/// Cut the first complete JPEG (`FF D8` through `FF D9`) out of `buffer`.
/// Bytes ahead of it are dropped; an incomplete frame stays buffered.
pub fn split_jpeg(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let Some(start) = find_marker(buffer, JPEG_SOI, 0) else {
        // keep a trailing 0xFF, it may open the next marker
        let keep_from = buffer.len().saturating_sub(1);
        buffer.drain(..keep_from);
        return None;
    };
    let end = find_marker(buffer, JPEG_EOI, start + 2)? + 2;
    let frame = buffer[start..end].to_vec();
    buffer.drain(..end);
    Some(frame)
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|at| at + from)
}

/// Image files of a directory in name order.
pub fn list_frame_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| EchallanError::NoInput(format!("cannot read {}: {}", dir.display(), e)))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Replays the image files of a directory, optionally in a loop.
pub struct DirectoryGrabber {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    looping: bool,
}

impl DirectoryGrabber {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let files = list_frame_files(&dir)?;
        if files.is_empty() {
            return Err(EchallanError::NoInput(format!(
                "no frame images in {}",
                dir.display()
            )));
        }
        debug!(dir = %dir.display(), frames = files.len(), "frame directory opened");
        Ok(Self {
            dir,
            files,
            next: 0,
            looping: false,
        })
    }

    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }
}

impl FrameGrabber for DirectoryGrabber {
    fn grab(&mut self) -> Result<Option<Vec<u8>>> {
        if self.next >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            self.next = 0;
        }
        let path = &self.files[self.next];
        self.next += 1;
        std::fs::read(path)
            .map(Some)
            .map_err(|e| EchallanError::NoInput(format!("cannot read {}: {}", path.display(), e)))
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// In-memory frames, ex: for tests or pre-decoded clips.
pub struct MemoryGrabber {
    frames: Vec<Vec<u8>>,
    next: usize,
    looping: bool,
}

impl MemoryGrabber {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames,
            next: 0,
            looping: false,
        }
    }

    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }
}

impl FrameGrabber for MemoryGrabber {
    fn grab(&mut self) -> Result<Option<Vec<u8>>> {
        if self.frames.is_empty() {
            return Ok(None);
        }
        if self.next >= self.frames.len() {
            if !self.looping {
                return Ok(None);
            }
            self.next = 0;
        }
        self.next += 1;
        Ok(Some(self.frames[self.next - 1].clone()))
    }

    fn describe(&self) -> String {
        format!("memory ({} frames)", self.frames.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_arguments() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let rtsp = FfmpegGrabber::new(
            FfmpegInput::Url("rtsp://10.0.0.5/stream".into()),
            Duration::from_secs(10),
            rt.handle().clone(),
        );
        let args = rtsp.args();
        assert_eq!(&args[..4], ["-rtsp_transport", "tcp", "-i", "rtsp://10.0.0.5/stream"]);
        assert!(args.ends_with(&["-y".to_string(), "-".to_string()]));

        let cam = FfmpegGrabber::new(FfmpegInput::Device(0), Duration::from_secs(10), rt.handle().clone());
        assert!(cam.args().contains(&"/dev/video0".to_string()));
        assert!(cam.args().contains(&"1280x720".to_string()));
        assert_eq!(cam.describe(), "/dev/video0");
    }

    fn jpeg(body: &[u8]) -> Vec<u8> {
        [&JPEG_SOI[..], body, &JPEG_EOI[..]].concat()
    }

    #[test]
    fn test_split_jpeg_across_chunks() {
        let first = jpeg(b"frame-one");
        let second = jpeg(b"frame-two");

        let mut buffer = b"junk".to_vec();
        buffer.extend_from_slice(&first);
        buffer.extend_from_slice(&second[..5]);
        assert_eq!(split_jpeg(&mut buffer), Some(first));
        assert_eq!(split_jpeg(&mut buffer), None);

        buffer.extend_from_slice(&second[5..]);
        assert_eq!(split_jpeg(&mut buffer), Some(second));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_split_jpeg_keeps_a_split_marker() {
        let mut buffer = b"noise\xFF".to_vec();
        assert_eq!(split_jpeg(&mut buffer), None);
        assert_eq!(buffer, vec![0xFF]);

        buffer.extend_from_slice(&[0xD8, b'x', 0xFF, 0xD9]);
        assert_eq!(split_jpeg(&mut buffer), Some(jpeg(b"x")));
    }

    #[test]
    fn test_missing_video_is_no_input() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _entered = rt.enter();
        assert!(matches!(
            FfmpegVideoReader::open("/nonexistent/clip.mp4", Duration::from_secs(1)),
            Err(EchallanError::NoInput(_))
        ));
    }

    #[test]
    fn test_video_arguments_stream_every_frame() {
        let args = video_args(Path::new("clips/junction.mp4"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.windows(2).any(|w| w == ["-i", "clips/junction.mp4"]));
        assert!(args.windows(2).any(|w| w == ["-f", "image2pipe"]));
        assert!(!args.contains(&"-frames:v".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[cfg(unix)]
    #[test]
    fn test_video_reader_splits_decoder_output() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mjpeg");
        let frames = vec![jpeg(b"one"), jpeg(b"two"), jpeg(b"three")];
        std::fs::write(&clip, frames.concat()).unwrap();

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let args = vec![OsString::from("-c"), OsString::from(format!("cat {}", clip.display()))];
        let mut reader =
            FfmpegVideoReader::start(clip, "/bin/sh", args, Duration::from_secs(5), rt.handle().clone())
                .unwrap();

        let pulled: Vec<Vec<u8>> = std::iter::from_fn(|| reader.grab().unwrap()).collect();
        assert_eq!(pulled, frames);
        assert_eq!(reader.frames(), 3);
        assert!(reader.grab().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_video_reader_without_frames_is_no_input() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("broken.mp4");
        std::fs::write(&clip, b"not a video").unwrap();

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let args = vec![OsString::from("-c"), OsString::from("echo 'invalid data' >&2; exit 1")];
        let mut reader =
            FfmpegVideoReader::start(clip, "/bin/sh", args, Duration::from_secs(5), rt.handle().clone())
                .unwrap();
        assert!(matches!(reader.grab(), Err(EchallanError::NoInput(ref m)) if m.contains("invalid data")));
        assert!(reader.grab().unwrap().is_none());
    }

    #[test]
    fn test_directory_grabber_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"second").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"first").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip").unwrap();

        let mut grabber = DirectoryGrabber::open(dir.path()).unwrap();
        assert_eq!(grabber.grab().unwrap().unwrap(), b"first");
        assert_eq!(grabber.grab().unwrap().unwrap(), b"second");
        assert!(grabber.grab().unwrap().is_none());
    }

    #[test]
    fn test_empty_directory_is_no_input() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DirectoryGrabber::open(dir.path()),
            Err(EchallanError::NoInput(_))
        ));
    }

    #[test]
    fn test_memory_grabber_loops() {
        let mut grabber = MemoryGrabber::new(vec![b"a".to_vec(), b"b".to_vec()]).looping();
        let pulled: Vec<Vec<u8>> = (0..3).map(|_| grabber.grab().unwrap().unwrap()).collect();
        assert_eq!(pulled, vec![b"a".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }
}
