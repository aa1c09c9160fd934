//! Data Model: categories, detections, violations and challans
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vehicle identifier recorded when no plate could be validated.
pub const UNKNOWN_VEHICLE: &str = "UNKNOWN";

/// Vehicle type recorded for helmet violations.
pub const TWO_WHEELER: &str = "Two-wheeler";

/// Closed set of violation categories the pipeline can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCategory {
    HelmetNotWorn,
    TripleRiding,
    SignalViolation,
    SpeedViolation,
}

impl ViolationCategory {
    pub const ALL: [ViolationCategory; 4] = [
        ViolationCategory::HelmetNotWorn,
        ViolationCategory::TripleRiding,
        ViolationCategory::SignalViolation,
        ViolationCategory::SpeedViolation,
    ];

    /// Wire name (ex: "HELMET_NOT_WORN")
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HelmetNotWorn => "HELMET_NOT_WORN",
            Self::TripleRiding => "TRIPLE_RIDING",
            Self::SignalViolation => "SIGNAL_VIOLATION",
            Self::SpeedViolation => "SPEED_VIOLATION",
        }
    }
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a label does not name any known category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown violation category '{}'", self.0)
    }
}

impl std::error::Error for UnknownCategory {}

impl FromStr for ViolationCategory {
    type Err = UnknownCategory;

    /// Accepts wire names case-insensitively, with `-` or ` ` as separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == key)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Severity attached to a category by the rule table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a challan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallanStatus {
    Issued,
    Served,
    Paid,
    Disputed,
    Cancelled,
}

impl ChallanStatus {
    /// PAID and CANCELLED accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }

    /// Active challans block a second issuance for the same violation.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for ChallanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Issued => "ISSUED",
            Self::Served => "SERVED",
            Self::Paid => "PAID",
            Self::Disputed => "DISPUTED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Axis-aligned region in pixel coordinates (x1,y1 top-left; x2,y2 bottom-right)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// A single still image. The bytes are an encoded image (JPEG/PNG) and are
/// never decoded inside the pipeline.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in its source, starting at 0
    pub index: u64,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(index: u64, data: Vec<u8>) -> Self {
        Self {
            index,
            captured_at: Utc::now(),
            width: 0,
            height: 0,
            data,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Ephemeral per-frame candidate, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationCandidate {
    pub category: ViolationCategory,
    pub severity: Severity,
    pub penalty: f64,
    pub description: String,
    pub bbox: BoundingBox,
    /// Detector confidence (0.0 to 1.0)
    pub confidence: f32,
    pub vehicle_number: Option<String>,
    pub location: Option<GeoLocation>,
    pub location_name: Option<String>,
    pub captured_at: DateTime<Utc>,
    /// True when produced by the synthetic detector
    pub synthetic: bool,
    pub evidence_path: Option<String>,
}

impl ViolationCandidate {
    /// Vehicle identifier, or [`UNKNOWN_VEHICLE`] when none was associated.
    pub fn vehicle_or_unknown(&self) -> &str {
        self.vehicle_number.as_deref().unwrap_or(UNKNOWN_VEHICLE)
    }
}

/// Persisted violation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Assigned by the record store on insert
    pub id: u64,
    pub category: ViolationCategory,
    pub severity: Severity,
    pub description: String,
    pub location: Option<GeoLocation>,
    pub location_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub vehicle_number: Option<String>,
    pub vehicle_type: Option<String>,
    pub evidence_path: Option<String>,
    pub detection_confidence: f32,
    pub synthetic: bool,
    pub processed: bool,
    pub challan_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Violation {
    /// Build an unsaved record (id 0) from a candidate.
    pub fn from_candidate(candidate: &ViolationCandidate) -> Self {
        let vehicle_type = match candidate.category {
            ViolationCategory::HelmetNotWorn | ViolationCategory::TripleRiding => {
                Some(TWO_WHEELER.to_string())
            }
            _ => None,
        };

        Self {
            id: 0,
            category: candidate.category,
            severity: candidate.severity,
            description: candidate.description.clone(),
            location: candidate.location,
            location_name: candidate.location_name.clone(),
            timestamp: candidate.captured_at,
            vehicle_number: candidate.vehicle_number.clone(),
            vehicle_type,
            evidence_path: candidate.evidence_path.clone(),
            detection_confidence: candidate.confidence,
            synthetic: candidate.synthetic,
            processed: false,
            challan_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Electronic fine notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challan {
    pub id: u64,
    /// `ECH-YYYYMMDD-NNNNN`
    pub challan_number: String,
    pub status: ChallanStatus,
    pub violation_id: u64,
    pub violation_category: ViolationCategory,
    pub violation_timestamp: DateTime<Utc>,
    pub owner_name: String,
    pub owner_phone: Option<String>,
    pub owner_email: Option<String>,
    pub registration_number: Option<String>,
    /// Fixed at issuance
    pub penalty_amount: f64,
    /// Latest reported total, never decreases
    pub paid_amount: f64,
    pub payment_deadline: DateTime<Utc>,
    pub evidence_image_url: Option<String>,
    pub violation_location: Option<String>,
    pub location: Option<GeoLocation>,
    pub payment_method: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    pub email_sent: bool,
    pub sms_sent: bool,
    pub issued_date: DateTime<Utc>,
    pub served_date: Option<DateTime<Utc>>,
    pub disputed_date: Option<DateTime<Utc>>,
    pub cancelled_date: Option<DateTime<Utc>>,
    /// Bumped by the store on every successful update
    pub version: u64,
}

impl Challan {
    pub fn balance_amount(&self) -> f64 {
        (self.penalty_amount - self.paid_amount).max(0.0)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now > self.payment_deadline
    }
}

/// Flattened, display-oriented view of a challan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallanDetails {
    pub challan_number: String,
    pub status: ChallanStatus,
    pub violation_type: ViolationCategory,
    pub violation_date: DateTime<Utc>,
    pub location: Option<String>,
    pub vehicle_number: String,
    pub owner_name: String,
    pub owner_phone: Option<String>,
    pub owner_email: Option<String>,
    pub penalty_amount: f64,
    pub paid_amount: f64,
    pub balance_amount: f64,
    pub payment_deadline: DateTime<Utc>,
    pub evidence_image_url: Option<String>,
    pub issued_date: DateTime<Utc>,
}

impl From<&Challan> for ChallanDetails {
    fn from(c: &Challan) -> Self {
        Self {
            challan_number: c.challan_number.clone(),
            status: c.status,
            violation_type: c.violation_category,
            violation_date: c.violation_timestamp,
            location: c.violation_location.clone(),
            vehicle_number: c
                .registration_number
                .clone()
                .unwrap_or_else(|| UNKNOWN_VEHICLE.to_string()),
            owner_name: c.owner_name.clone(),
            owner_phone: c.owner_phone.clone(),
            owner_email: c.owner_email.clone(),
            penalty_amount: c.penalty_amount,
            paid_amount: c.paid_amount,
            balance_amount: c.balance_amount(),
            payment_deadline: c.payment_deadline,
            evidence_image_url: c.evidence_image_url.clone(),
            issued_date: c.issued_date,
        }
    }
}
