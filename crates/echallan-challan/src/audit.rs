//! Lifecycle history
//!
//! Every issuance and status change is appended here, in order.

use chrono::{DateTime, Utc};
use echallan_core::{ChallanStatus, EchallanError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallanEvent {
    pub challan_id: u64,
    pub challan: String,
    /// Operation that caused the transition (ex: "record_payment")
    pub action: String,
    /// `None` on issuance
    pub from: Option<ChallanStatus>,
    pub to: ChallanStatus,
    pub at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ChallanEvent {
    pub fn new(
        challan_id: u64,
        challan: impl Into<String>,
        action: impl Into<String>,
        from: Option<ChallanStatus>,
        to: ChallanStatus,
    ) -> Self {
        Self {
            challan_id,
            challan: challan.into(),
            action: action.into(),
            from,
            to,
            at: Utc::now(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Bounded, append-only list of [`ChallanEvent`]s
#[derive(Debug)]
pub struct LifecycleLog {
    entries: Mutex<Vec<ChallanEvent>>,
    max_entries: usize,
}

impl LifecycleLog {
    pub fn new() -> Self {
        Self::with_max_entries(10_000)
    }

    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_entries: max,
        }
    }

    pub fn record(&self, event: ChallanEvent) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push(event);

        if entries.len() > self.max_entries {
            let drain_count = entries.len() - self.max_entries;
            entries.drain(0..drain_count);
        }
    }

    pub fn entries(&self) -> Vec<ChallanEvent> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// History of one challan, oldest first.
    pub fn for_challan(&self, challan_number: &str) -> Vec<ChallanEvent> {
        self.entries()
            .into_iter()
            .filter(|e| e.challan == challan_number)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_jsonl(&self) -> String {
        self.entries()
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn write_jsonl(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut body = self.to_jsonl();
        if !body.is_empty() {
            body.push('\n');
        }
        std::fs::write(path.as_ref(), body)
            .map_err(|e| EchallanError::Persistence(format!("write history: {}", e)))
    }
}

impl Default for LifecycleLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_and_filtered() {
        let log = LifecycleLog::with_max_entries(2);
        log.record(ChallanEvent::new(1, "ECH-20240115-00001", "issue", None, ChallanStatus::Issued));
        log.record(ChallanEvent::new(2, "ECH-20240115-00002", "issue", None, ChallanStatus::Issued));
        log.record(
            ChallanEvent::new(1, "ECH-20240115-00001", "serve", Some(ChallanStatus::Issued), ChallanStatus::Served)
                .with_note("hand delivered"),
        );

        assert_eq!(log.len(), 2);
        let history = log.for_challan("ECH-20240115-00001");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to, ChallanStatus::Served);

        let jsonl = log.to_jsonl();
        assert_eq!(jsonl.lines().count(), 2);
        assert!(jsonl.contains("\"to\":\"SERVED\""));
    }
}
