//! Plate Validator
//!
//! Turns raw OCR output into a normalized registration string and decides
//! whether it satisfies the plate grammar.
//!
//! # Example
//!
//! ```
//! use echallan_plate::{normalize, select_first_valid};
//!
//! let plate = normalize(" dl01ab 1234 ");
//! assert!(plate.valid);
//! assert_eq!(plate.text, "DL01AB1234");
//!
//! let chosen = select_first_valid(["??", "MH12AB1234", "DL01AB1234"]);
//! assert_eq!(chosen.as_deref(), Some("MH12AB1234"));
//! ```

pub mod grammar;
pub mod normalizer;

pub use grammar::{matches_grammar, PLATE_PATTERN};
pub use normalizer::{clean, normalize, substitute_confusables, NormalizedPlate};

use serde::{Deserialize, Serialize};

/// One piece of text an OCR engine read inside a plate region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrFragment {
    pub text: String,
    pub confidence: f32,
}

/// Text read from one plate region, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateReading {
    pub text: String,
    pub confidence: f32,
}

impl PlateReading {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    pub fn normalized(&self) -> NormalizedPlate {
        normalize(&self.text)
    }
}

/// Join the fragments of one region that clear `min_confidence`, in reading
/// order. Confidence is the mean over the kept fragments. Returns `None`
/// when nothing clears the threshold.
pub fn assemble_fragments(fragments: &[OcrFragment], min_confidence: f32) -> Option<PlateReading> {
    let kept: Vec<&OcrFragment> = fragments
        .iter()
        .filter(|f| f.confidence > min_confidence)
        .collect();
    if kept.is_empty() {
        return None;
    }

    let text: String = kept.iter().map(|f| f.text.as_str()).collect();
    let confidence = kept.iter().map(|f| f.confidence).sum::<f32>() / kept.len() as f32;
    Some(PlateReading { text, confidence })
}

/// Validate candidates in scan order and return the first normalized plate
/// that passes. No confidence comparison is made between candidates.
pub fn select_first_valid<I, S>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .map(|c| normalize(c.as_ref()))
        .find(|p| p.valid)
        .map(|p| p.text)
}

/// Every candidate that validates, normalized, in scan order.
pub fn valid_plates<'a, I>(readings: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a PlateReading>,
{
    readings
        .into_iter()
        .map(PlateReading::normalized)
        .filter(|p| p.valid)
        .map(|p| p.text)
        .collect()
}
