//! E-Challan Core: data model, error taxonomy and capture context
//!
//! Shared vocabulary for every stage of the detection-to-challan pipeline.

pub mod context;
pub mod data_model;
pub mod error;

pub use context::CaptureContext;
pub use data_model::{
    BoundingBox, Challan, ChallanDetails, ChallanStatus, Frame, GeoLocation, Severity,
    UnknownCategory, Violation, ViolationCandidate, ViolationCategory, TWO_WHEELER,
    UNKNOWN_VEHICLE,
};
pub use error::{EchallanError, Result};

/// Engine version stamped into logs and summaries
pub const ECHALLAN_VERSION: &str = "1.0.0";
