//! Prometheus counters mirroring [`StreamStats`](crate::StreamStats).
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct StreamMetrics {
    pub frames_seen: IntCounter,
    pub frames_processed: IntCounter,
    pub violations: IntCounter,
    pub challans_issued: IntCounter,
    pub failed_frames: IntCounter,
    pub synthetic_frames: IntCounter,
    pub distinct_vehicles: IntGauge,
}

impl StreamMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self {
            frames_seen: IntCounter::new("echallan_frames_seen_total", "Frames pulled from the source")?,
            frames_processed: IntCounter::new(
                "echallan_frames_processed_total",
                "Frames run through detection",
            )?,
            violations: IntCounter::new("echallan_violations_total", "Violation candidates produced")?,
            challans_issued: IntCounter::new("echallan_challans_issued_total", "Challans auto-issued")?,
            failed_frames: IntCounter::new(
                "echallan_failed_frames_total",
                "Frames with a failed or timed out step",
            )?,
            synthetic_frames: IntCounter::new(
                "echallan_synthetic_frames_total",
                "Frames whose detections came from synthetic detectors",
            )?,
            distinct_vehicles: IntGauge::new(
                "echallan_distinct_vehicles",
                "Distinct vehicle numbers seen in the current run",
            )?,
        };

        registry.register(Box::new(metrics.frames_seen.clone()))?;
        registry.register(Box::new(metrics.frames_processed.clone()))?;
        registry.register(Box::new(metrics.violations.clone()))?;
        registry.register(Box::new(metrics.challans_issued.clone()))?;
        registry.register(Box::new(metrics.failed_frames.clone()))?;
        registry.register(Box::new(metrics.synthetic_frames.clone()))?;
        registry.register(Box::new(metrics.distinct_vehicles.clone()))?;
        Ok(metrics)
    }
}

pub fn registry() -> Registry {
    Registry::new()
}

/// Text exposition format
pub fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}
