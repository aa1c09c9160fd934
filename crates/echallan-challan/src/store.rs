//! Record store: create/read/update for violations and challans.
//!
//! [`MemoryStore`] keeps everything behind one mutex, which makes it the
//! single point where challan inserts and updates are serialized.
use echallan_core::{Challan, EchallanError, Result, Violation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub trait RecordStore: Send + Sync {
    /// Store a new violation and return it with its assigned id.
    fn insert_violation(&self, violation: Violation) -> Result<Violation>;
    fn get_violation(&self, id: u64) -> Result<Violation>;
    fn update_violation(&self, violation: &Violation) -> Result<()>;

    /// Store a new challan and link it to its violation. Fails with
    /// `Conflict` when the number is taken or the violation already has an
    /// active challan.
    fn insert_challan(&self, challan: Challan) -> Result<Challan>;
    fn get_challan(&self, id: u64) -> Result<Challan>;
    fn get_challan_by_number(&self, number: &str) -> Result<Challan>;

    /// Replace a challan if its `version` still matches the stored one.
    /// Returns the stored copy with the bumped version.
    fn update_challan(&self, challan: &Challan) -> Result<Challan>;

    fn list_violations(&self) -> Result<Vec<Violation>>;
    fn list_challans(&self) -> Result<Vec<Challan>>;
    fn challan_number_exists(&self, number: &str) -> Result<bool>;
    fn active_challan_for_violation(&self, violation_id: u64) -> Result<Option<Challan>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    next_violation_id: u64,
    next_challan_id: u64,
    violations: BTreeMap<u64, Violation>,
    challans: BTreeMap<u64, Challan>,
}

impl StoreState {
    fn active_challan(&self, violation_id: u64) -> Option<&Challan> {
        self.challans
            .values()
            .find(|c| c.violation_id == violation_id && c.status.is_active())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a JSON snapshot written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let state: StoreState = serde_json::from_slice(&bytes)?;
        debug!(
            violations = state.violations.len(),
            challans = state.challans.len(),
            "record store loaded"
        );
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Load the snapshot when it exists, start empty otherwise.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = {
            let state = self.state()?;
            serde_json::to_vec_pretty(&*state)?
        };
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| EchallanError::Persistence("record store lock poisoned".to_string()))
    }
}

impl RecordStore for MemoryStore {
    fn insert_violation(&self, mut violation: Violation) -> Result<Violation> {
        let mut state = self.state()?;
        state.next_violation_id += 1;
        violation.id = state.next_violation_id;
        state.violations.insert(violation.id, violation.clone());
        Ok(violation)
    }

    fn get_violation(&self, id: u64) -> Result<Violation> {
        self.state()?
            .violations
            .get(&id)
            .cloned()
            .ok_or_else(|| EchallanError::NotFound(format!("violation {}", id)))
    }

    fn update_violation(&self, violation: &Violation) -> Result<()> {
        let mut state = self.state()?;
        match state.violations.get_mut(&violation.id) {
            Some(stored) => {
                *stored = violation.clone();
                Ok(())
            }
            None => Err(EchallanError::NotFound(format!("violation {}", violation.id))),
        }
    }

    fn insert_challan(&self, mut challan: Challan) -> Result<Challan> {
        let mut state = self.state()?;

        if !state.violations.contains_key(&challan.violation_id) {
            return Err(EchallanError::NotFound(format!(
                "violation {}",
                challan.violation_id
            )));
        }
        if state
            .challans
            .values()
            .any(|c| c.challan_number == challan.challan_number)
        {
            return Err(EchallanError::Conflict(format!(
                "challan number {} already exists",
                challan.challan_number
            )));
        }
        if let Some(active) = state.active_challan(challan.violation_id) {
            return Err(EchallanError::Conflict(format!(
                "violation {} already has active challan {}",
                challan.violation_id, active.challan_number
            )));
        }

        state.next_challan_id += 1;
        challan.id = state.next_challan_id;
        challan.version = 1;
        state.challans.insert(challan.id, challan.clone());

        if let Some(violation) = state.violations.get_mut(&challan.violation_id) {
            violation.challan_id = Some(challan.id);
            violation.processed = true;
        }
        Ok(challan)
    }

    fn get_challan(&self, id: u64) -> Result<Challan> {
        self.state()?
            .challans
            .get(&id)
            .cloned()
            .ok_or_else(|| EchallanError::NotFound(format!("challan {}", id)))
    }

    fn get_challan_by_number(&self, number: &str) -> Result<Challan> {
        self.state()?
            .challans
            .values()
            .find(|c| c.challan_number == number)
            .cloned()
            .ok_or_else(|| EchallanError::NotFound(format!("challan {}", number)))
    }

    fn update_challan(&self, challan: &Challan) -> Result<Challan> {
        let mut state = self.state()?;
        let stored = state
            .challans
            .get_mut(&challan.id)
            .ok_or_else(|| EchallanError::NotFound(format!("challan {}", challan.id)))?;

        if stored.version != challan.version {
            return Err(EchallanError::Conflict(format!(
                "challan {} changed concurrently (version {} != {})",
                challan.challan_number, challan.version, stored.version
            )));
        }

        *stored = challan.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    fn list_violations(&self) -> Result<Vec<Violation>> {
        Ok(self.state()?.violations.values().cloned().collect())
    }

    fn list_challans(&self) -> Result<Vec<Challan>> {
        Ok(self.state()?.challans.values().cloned().collect())
    }

    fn challan_number_exists(&self, number: &str) -> Result<bool> {
        Ok(self
            .state()?
            .challans
            .values()
            .any(|c| c.challan_number == number))
    }

    fn active_challan_for_violation(&self, violation_id: u64) -> Result<Option<Challan>> {
        Ok(self.state()?.active_challan(violation_id).cloned())
    }
}
