//! Capture Context: where and under which trace a frame was taken
use crate::data_model::GeoLocation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureContext {
    pub trace_id: String,
    pub camera_id: Option<String>,
    pub location: Option<GeoLocation>,
    pub location_name: Option<String>,
    /// Directory evidence frames are written to, if any
    pub evidence_dir: Option<String>,
}

impl CaptureContext {
    pub fn new() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            camera_id: None,
            location: None,
            location_name: None,
            evidence_dir: None,
        }
    }

    pub fn at(mut self, location: GeoLocation, name: impl Into<String>) -> Self {
        self.location = Some(location);
        self.location_name = Some(name.into());
        self
    }

    pub fn with_camera(mut self, camera_id: impl Into<String>) -> Self {
        self.camera_id = Some(camera_id.into());
        self
    }

    pub fn with_evidence_dir(mut self, dir: impl Into<String>) -> Self {
        self.evidence_dir = Some(dir.into());
        self
    }
}

impl Default for CaptureContext {
    fn default() -> Self {
        Self::new()
    }
}
