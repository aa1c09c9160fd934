//! Violation Rule Table
//!
//! Static mapping from violation category to penalty, severity and
//! description. The table is consulted at the moment a candidate is built
//! and again when a challan is issued; issued challans keep the penalty they
//! were created with.
//!
//! # Example
//!
//! ```
//! use echallan_core::{Severity, ViolationCategory};
//! use echallan_rules::{RuleTable, ViolationRule};
//!
//! let mut table = RuleTable::standard();
//! assert_eq!(table.penalty(ViolationCategory::HelmetNotWorn), 500.0);
//!
//! table.set(
//!     ViolationCategory::SpeedViolation,
//!     ViolationRule::new(2000.0, Severity::High, "Speed limit exceeded"),
//! );
//! assert_eq!(table.penalty(ViolationCategory::SpeedViolation), 2000.0);
//!
//! // Labels the table does not know resolve to the permissive default.
//! let (category, rule) = table.lookup_label("wrong_way");
//! assert!(category.is_none());
//! assert_eq!(rule.penalty, 0.0);
//! ```

use echallan_core::{Severity, ViolationCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::warn;

/// Penalty, severity and description for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRule {
    /// Penalty in rupees
    pub penalty: f64,
    pub severity: Severity,
    pub description: String,
}

impl ViolationRule {
    pub fn new(penalty: f64, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            penalty,
            severity,
            description: description.into(),
        }
    }

    /// Zero penalty, LOW severity, empty description.
    pub fn permissive_default() -> Self {
        Self {
            penalty: 0.0,
            severity: Severity::Low,
            description: String::new(),
        }
    }
}

/// Partial override of a rule, as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleOverride {
    #[serde(default)]
    pub penalty: Option<f64>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub description: Option<String>,
}

pub type RuleOverrides = BTreeMap<ViolationCategory, RuleOverride>;

#[derive(Debug, Error)]
pub enum RuleTableError {
    #[error("RULES/parse: {0}")]
    Parse(String),
    #[error("RULES/{category}: penalty must be non-negative, got {penalty}")]
    NegativePenalty {
        category: ViolationCategory,
        penalty: f64,
    },
}

/// Category → rule lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    rules: BTreeMap<ViolationCategory, ViolationRule>,
}

impl RuleTable {
    /// The deployed penalty schedule.
    pub fn standard() -> Self {
        Self::empty()
            .with_rule(
                ViolationCategory::HelmetNotWorn,
                ViolationRule::new(500.0, Severity::High, "Rider not wearing helmet"),
            )
            .with_rule(
                ViolationCategory::TripleRiding,
                ViolationRule::new(1000.0, Severity::High, "More than 2 persons on 2-wheeler"),
            )
            .with_rule(
                ViolationCategory::SignalViolation,
                ViolationRule::new(500.0, Severity::Medium, "Traffic signal violation"),
            )
            .with_rule(
                ViolationCategory::SpeedViolation,
                ViolationRule::new(400.0, Severity::Medium, "Speed limit exceeded"),
            )
    }

    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn with_rule(mut self, category: ViolationCategory, rule: ViolationRule) -> Self {
        self.rules.insert(category, rule);
        self
    }

    /// Replace the rule for a category, returning the previous one.
    pub fn set(&mut self, category: ViolationCategory, rule: ViolationRule) -> Option<ViolationRule> {
        self.rules.insert(category, rule)
    }

    pub fn remove(&mut self, category: ViolationCategory) -> Option<ViolationRule> {
        self.rules.remove(&category)
    }

    /// Look up a category. A category missing from the table resolves to
    /// [`ViolationRule::permissive_default`] and is logged.
    pub fn lookup(&self, category: ViolationCategory) -> ViolationRule {
        match self.rules.get(&category) {
            Some(rule) => rule.clone(),
            None => {
                warn!(category = %category, "no rule configured for category, using zero penalty");
                ViolationRule::permissive_default()
            }
        }
    }

    /// Look up a raw detector label. Labels that do not parse to a category
    /// resolve to the permissive default and are logged.
    pub fn lookup_label(&self, label: &str) -> (Option<ViolationCategory>, ViolationRule) {
        match label.parse::<ViolationCategory>() {
            Ok(category) => (Some(category), self.lookup(category)),
            Err(_) => {
                warn!(label = %label, "unrecognized violation label, using zero penalty");
                (None, ViolationRule::permissive_default())
            }
        }
    }

    pub fn penalty(&self, category: ViolationCategory) -> f64 {
        self.lookup(category).penalty
    }

    pub fn severity(&self, category: ViolationCategory) -> Severity {
        self.lookup(category).severity
    }

    pub fn contains(&self, category: ViolationCategory) -> bool {
        self.rules.contains_key(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ViolationCategory, &ViolationRule)> {
        self.rules.iter()
    }

    /// Layer overrides on top of the current rules. Categories without a
    /// current rule start from the permissive default.
    pub fn apply_overrides(&mut self, overrides: &RuleOverrides) -> Result<(), RuleTableError> {
        for (category, patch) in overrides {
            if let Some(penalty) = patch.penalty {
                if penalty < 0.0 || !penalty.is_finite() {
                    return Err(RuleTableError::NegativePenalty {
                        category: *category,
                        penalty,
                    });
                }
            }

            let rule = self
                .rules
                .entry(*category)
                .or_insert_with(ViolationRule::permissive_default);
            if let Some(penalty) = patch.penalty {
                rule.penalty = penalty;
            }
            if let Some(severity) = patch.severity {
                rule.severity = severity;
            }
            if let Some(description) = &patch.description {
                rule.description = description.clone();
            }
        }
        Ok(())
    }

    /// Standard table with YAML overrides applied, ex:
    ///
    /// ```yaml
    /// SPEED_VIOLATION:
    ///   penalty: 1000
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self, RuleTableError> {
        let overrides: RuleOverrides =
            serde_yaml::from_str(yaml).map_err(|e| RuleTableError::Parse(e.to_string()))?;
        let mut table = Self::standard();
        table.apply_overrides(&overrides)?;
        Ok(table)
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Rule table shared between the frame processor and the challan manager.
/// Readers take a snapshot; edits apply to lookups made afterwards.
#[derive(Debug, Clone, Default)]
pub struct SharedRuleTable {
    inner: Arc<RwLock<RuleTable>>,
}

impl SharedRuleTable {
    pub fn new(table: RuleTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(table)),
        }
    }

    /// Copy of the table as it is right now.
    pub fn snapshot(&self) -> RuleTable {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn lookup(&self, category: ViolationCategory) -> ViolationRule {
        match self.inner.read() {
            Ok(guard) => guard.lookup(category),
            Err(poisoned) => poisoned.into_inner().lookup(category),
        }
    }

    /// Replace the rule for a category, returning the previous one.
    pub fn set(&self, category: ViolationCategory, rule: ViolationRule) -> Option<ViolationRule> {
        match self.inner.write() {
            Ok(mut guard) => guard.set(category, rule),
            Err(poisoned) => poisoned.into_inner().set(category, rule),
        }
    }
}

impl From<RuleTable> for SharedRuleTable {
    fn from(table: RuleTable) -> Self {
        Self::new(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_categories_have_fixed_rules() {
        let table = RuleTable::standard();
        for category in ViolationCategory::ALL {
            let rule = table.lookup(category);
            assert!(rule.penalty >= 0.0);
            assert!(!rule.description.is_empty(), "missing description for {}", category);
        }
        assert_eq!(table.penalty(ViolationCategory::HelmetNotWorn), 500.0);
        assert_eq!(table.penalty(ViolationCategory::TripleRiding), 1000.0);
        assert_eq!(table.penalty(ViolationCategory::SignalViolation), 500.0);
        assert_eq!(table.penalty(ViolationCategory::SpeedViolation), 400.0);
        assert_eq!(table.severity(ViolationCategory::HelmetNotWorn), Severity::High);
        assert_eq!(table.severity(ViolationCategory::SpeedViolation), Severity::Medium);
    }

    #[test]
    fn test_unknown_label_is_permissive() {
        let table = RuleTable::standard();
        let (category, rule) = table.lookup_label("PARKING_VIOLATION");
        assert!(category.is_none());
        assert_eq!(rule.penalty, 0.0);
        assert_eq!(rule.severity, Severity::Low);
        assert!(rule.description.is_empty());
    }

    #[test]
    fn test_missing_category_is_permissive() {
        let mut table = RuleTable::standard();
        table.remove(ViolationCategory::TripleRiding);
        let rule = table.lookup(ViolationCategory::TripleRiding);
        assert_eq!(rule, ViolationRule::permissive_default());
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
SPEED_VIOLATION:
  penalty: 1000
  severity: HIGH
HELMET_NOT_WORN:
  description: "No helmet"
"#;
        let table = RuleTable::from_yaml(yaml).unwrap();
        assert_eq!(table.penalty(ViolationCategory::SpeedViolation), 1000.0);
        assert_eq!(table.severity(ViolationCategory::SpeedViolation), Severity::High);
        assert_eq!(table.penalty(ViolationCategory::HelmetNotWorn), 500.0);
        assert_eq!(table.lookup(ViolationCategory::HelmetNotWorn).description, "No helmet");
    }

    #[test]
    fn test_shared_table_edits_are_visible() {
        let shared = SharedRuleTable::new(RuleTable::standard());
        let before = shared.snapshot();
        shared.set(
            ViolationCategory::HelmetNotWorn,
            ViolationRule::new(1000.0, Severity::High, "Rider not wearing helmet"),
        );
        assert_eq!(before.penalty(ViolationCategory::HelmetNotWorn), 500.0);
        assert_eq!(shared.lookup(ViolationCategory::HelmetNotWorn).penalty, 1000.0);
    }

    #[test]
    fn test_negative_penalty_rejected() {
        let err = RuleTable::from_yaml("SIGNAL_VIOLATION:\n  penalty: -5\n").unwrap_err();
        assert!(matches!(err, RuleTableError::NegativePenalty { .. }));
    }
}
