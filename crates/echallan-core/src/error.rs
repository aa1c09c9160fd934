//! Unified Error Model
//!
//! Upstream-unavailable detectors and unrecognized categories are absorbed
//! where they happen and never show up here.
use crate::data_model::ChallanStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EchallanError {
    #[error("INPUT/{0}")]
    NoInput(String),

    #[error("STORE/{0}")]
    Persistence(String),

    #[error("TRANSITION/{action} not allowed on challan {challan} in state {from}")]
    InvalidTransition {
        challan: String,
        from: ChallanStatus,
        action: &'static str,
    },

    #[error("PAYMENT/{0}")]
    InvalidPayment(String),

    #[error("NOT_FOUND/{0}")]
    NotFound(String),

    #[error("CONFLICT/{0}")]
    Conflict(String),

    #[error("CONFIG/{0}")]
    Config(String),

    #[error("TIMEOUT/{0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, EchallanError>;

impl EchallanError {
    /// Invalid-transition errors are the only ones a caller may treat as a
    /// business rejection rather than an operational fault.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

impl From<std::io::Error> for EchallanError {
    fn from(e: std::io::Error) -> Self {
        EchallanError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for EchallanError {
    fn from(e: serde_json::Error) -> Self {
        EchallanError::Persistence(e.to_string())
    }
}
