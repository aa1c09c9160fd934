//! Analytics summary over stored violations and challans
use chrono::{DateTime, Utc};
use echallan_core::{Challan, ChallanStatus, Violation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Location key used for violations recorded without a location name
pub const UNNAMED_LOCATION: &str = "Unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_violations: usize,
    pub total_challans_issued: usize,
    /// Sum of paid amounts on PAID challans
    pub total_revenue_collected: f64,
    pub violations_by_type: BTreeMap<String, usize>,
    pub violations_by_location: BTreeMap<String, usize>,
    pub challans_by_status: BTreeMap<String, usize>,
    pub synthetic_violations: usize,
}

impl AnalyticsSummary {
    pub fn compute(
        violations: &[Violation],
        challans: &[Challan],
        since: Option<DateTime<Utc>>,
    ) -> Self {
        let in_window = |at: DateTime<Utc>| since.map_or(true, |s| at >= s);
        let mut summary = Self::default();

        for v in violations.iter().filter(|v| in_window(v.timestamp)) {
            summary.total_violations += 1;
            if v.synthetic {
                summary.synthetic_violations += 1;
            }
            *summary
                .violations_by_type
                .entry(v.category.to_string())
                .or_default() += 1;
            *summary
                .violations_by_location
                .entry(
                    v.location_name
                        .clone()
                        .unwrap_or_else(|| UNNAMED_LOCATION.to_string()),
                )
                .or_default() += 1;
        }

        for c in challans.iter().filter(|c| in_window(c.issued_date)) {
            summary.total_challans_issued += 1;
            *summary
                .challans_by_status
                .entry(c.status.to_string())
                .or_default() += 1;
            if c.status == ChallanStatus::Paid {
                summary.total_revenue_collected += c.paid_amount;
            }
        }

        summary
    }

    /// Locations with the most violations, highest first. Ties keep name order.
    pub fn high_risk_zones(&self, limit: usize) -> Vec<(String, usize)> {
        let mut zones: Vec<(String, usize)> = self
            .violations_by_location
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect();
        zones.sort_by(|a, b| b.1.cmp(&a.1));
        zones.truncate(limit);
        zones
    }
}
