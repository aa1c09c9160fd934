//! Synthetic detectors.
//!
//! Results are a pure function of (seed, frame index, frame bytes): the same
//! frame always yields the same detections, different frames look random.
//! Every result carries `synthetic = true`. Generated plate text always
//! satisfies the plate grammar and contains no confusable letters, so it
//! survives normalization unchanged.

use crate::capability::{
    DetectError, Detection, DetectionBackend, HelmetDetector, PlateReader, PlateRegion,
    LABEL_NO_HELMET,
};
use echallan_core::{BoundingBox, Frame};

/// Frame size assumed when a frame does not report its dimensions
pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;

const STATE_CODES: [&str; 8] = ["DL", "MH", "KA", "UP", "HR", "TN", "GJ", "RJ"];

/// Letters that are never rewritten by confusable substitution
const SERIES_LETTERS: &[u8] = b"ACDEFGHJKLMNPRTUVWXY";

/// Deterministic stream of draws for one (seed, purpose, frame)
struct Draws(blake3::OutputReader);

impl Draws {
    fn new(seed: &str, purpose: &str, frame: &Frame) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(seed.as_bytes());
        hasher.update(purpose.as_bytes());
        hasher.update(&frame.index.to_le_bytes());
        hasher.update(&frame.data);
        Self(hasher.finalize_xof())
    }

    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.0.fill(&mut buf);
        u32::from_le_bytes(buf)
    }

    /// Uniform in `lo..=hi`
    fn range(&mut self, lo: u32, hi: u32) -> u32 {
        lo + self.next_u32() % (hi - lo + 1)
    }

    /// Uniform in `lo..hi`, rounded to two decimals
    fn score(&mut self, lo: f32, hi: f32) -> f32 {
        let unit = self.next_u32() as f32 / u32::MAX as f32;
        ((lo + unit * (hi - lo)) * 100.0).round() / 100.0
    }

    fn region(&mut self, frame: &Frame, w: (u32, u32), h: (u32, u32)) -> BoundingBox {
        let (fw, fh) = frame_size(frame);
        let width = self.range(w.0, w.1).min(fw);
        let height = self.range(h.0, h.1).min(fh);
        let x = self.range(0, fw - width);
        let y = self.range(0, fh - height);
        BoundingBox::new(x as i32, y as i32, (x + width) as i32, (y + height) as i32)
    }
}

fn frame_size(frame: &Frame) -> (u32, u32) {
    let w = if frame.width == 0 { DEFAULT_WIDTH } else { frame.width };
    let h = if frame.height == 0 { DEFAULT_HEIGHT } else { frame.height };
    (w, h)
}

/// Grammar-compliant plate text for a frame, ex: `DL07CA4821`
pub fn synthetic_plate_text(seed: &str, frame: &Frame) -> String {
    let mut draws = Draws::new(seed, "plate.text", frame);
    let state = STATE_CODES[draws.range(0, STATE_CODES.len() as u32 - 1) as usize];
    let district = draws.range(1, 20);
    let series_len = draws.range(1, 2);
    let series: String = (0..series_len)
        .map(|_| SERIES_LETTERS[draws.range(0, SERIES_LETTERS.len() as u32 - 1) as usize] as char)
        .collect();
    let number = draws.range(1000, 9999);
    format!("{}{:02}{}{}", state, district, series, number)
}

/// Always reports one rider without a helmet.
#[derive(Debug, Clone)]
pub struct SyntheticHelmetDetector {
    seed: String,
}

impl SyntheticHelmetDetector {
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }
}

impl HelmetDetector for SyntheticHelmetDetector {
    fn id(&self) -> &'static str {
        "helmet.synthetic.v1"
    }

    fn backend(&self) -> DetectionBackend {
        DetectionBackend::Synthetic
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let mut draws = Draws::new(&self.seed, "helmet", frame);
        let bbox = draws.region(frame, (80, 200), (100, 240));
        let confidence = draws.score(0.55, 0.95);
        Ok(vec![Detection::new(bbox, LABEL_NO_HELMET, confidence).synthetic()])
    }
}

/// Always reports one plate with grammar-compliant text.
#[derive(Debug, Clone)]
pub struct SyntheticPlateReader {
    seed: String,
}

impl SyntheticPlateReader {
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }
}

impl PlateReader for SyntheticPlateReader {
    fn id(&self) -> &'static str {
        "plate.synthetic.v1"
    }

    fn backend(&self) -> DetectionBackend {
        DetectionBackend::Synthetic
    }

    fn read(&self, frame: &Frame) -> Result<Vec<PlateRegion>, DetectError> {
        let mut draws = Draws::new(&self.seed, "plate", frame);
        let bbox = draws.region(frame, (90, 160), (25, 45));
        Ok(vec![PlateRegion {
            bbox,
            confidence: draws.score(0.6, 0.95),
            recognized_text: synthetic_plate_text(&self.seed, frame),
            ocr_confidence: draws.score(0.5, 0.95),
            synthetic: true,
        }])
    }
}
