//! Challan numbers: `ECH-YYYYMMDD-NNNNN`
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use echallan_core::{EchallanError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

pub const CHALLAN_PREFIX: &str = "ECH";

/// Distinct suffixes available per day
pub const SUFFIX_SPACE: u32 = 100_000;

lazy_static! {
    static ref CHALLAN_NUMBER_RE: Regex =
        Regex::new(r"^ECH-[0-9]{8}-[0-9]{5}$").expect("static regex");
}

pub fn format_challan_number(issued_at: DateTime<Utc>, suffix: u32) -> String {
    format!(
        "{}-{}-{:05}",
        CHALLAN_PREFIX,
        issued_at.format("%Y%m%d"),
        suffix % SUFFIX_SPACE
    )
}

pub fn is_challan_number(s: &str) -> bool {
    CHALLAN_NUMBER_RE.is_match(s)
}

/// Picks a random suffix and re-draws while the number is already taken.
#[derive(Debug, Clone)]
pub struct ChallanNumberGenerator {
    max_attempts: usize,
}

impl ChallanNumberGenerator {
    pub fn new() -> Self {
        Self { max_attempts: 16 }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn generate(&self, store: &dyn RecordStore, issued_at: DateTime<Utc>) -> Result<String> {
        for attempt in 1..=self.max_attempts {
            let number = format_challan_number(issued_at, random_suffix());
            if !store.challan_number_exists(&number)? {
                return Ok(number);
            }
            warn!(challan = %number, attempt, "challan number collision, drawing again");
        }
        Err(EchallanError::Conflict(format!(
            "no free challan number after {} attempts",
            self.max_attempts
        )))
    }
}

impl Default for ChallanNumberGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn random_suffix() -> u32 {
    (uuid::Uuid::new_v4().as_u128() % SUFFIX_SPACE as u128) as u32
}
