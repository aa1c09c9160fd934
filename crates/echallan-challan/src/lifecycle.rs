//! Challan Lifecycle Manager
//!
//! ```text
//!            serve            pay (total >= penalty)
//!  ISSUED ─────────► SERVED ───────────────────────► PAID
//!    │  │              │  │                            ▲
//!    │  └── dispute ───┼──┴──► DISPUTED ───── pay ─────┘
//!    │                 │          │
//!    └──── cancel ─────┴──────────┴──► CANCELLED
//! ```
//!
//! PAID and CANCELLED are terminal. Status changes go through the record
//! store's versioned update, so two writers racing on one challan cannot
//! both win.

use crate::analytics::AnalyticsSummary;
use crate::audit::{ChallanEvent, LifecycleLog};
use crate::notify::{
    LogNotifier, NotificationChannel, NotificationConfig, NotificationOutcome, Notifier,
};
use crate::number::ChallanNumberGenerator;
use crate::store::RecordStore;
use chrono::{DateTime, Duration, Utc};
use echallan_core::{
    Challan, ChallanDetails, ChallanStatus, EchallanError, Result, Violation, ViolationCandidate,
};
use echallan_rules::SharedRuleTable;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_PAYMENT_WINDOW_DAYS: i64 = 15;
pub const DEFAULT_OWNER_NAME: &str = "Unknown";
pub const DEFAULT_PAYMENT_METHOD: &str = "ONLINE";

/// How many times issuance redraws a number after losing an insert race
const ISSUE_ATTEMPTS: usize = 3;

/// Vehicle owner contact, as far as it is known at issuance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerContact {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl OwnerContact {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// A reported payment. `amount` is the latest total paid so far, not a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub amount: f64,
    pub method: String,
    pub transaction_id: Option<String>,
}

impl Payment {
    pub fn online(amount: f64) -> Self {
        Self {
            amount,
            method: DEFAULT_PAYMENT_METHOD.to_string(),
            transaction_id: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

pub struct ChallanManager {
    store: Arc<dyn RecordStore>,
    rules: SharedRuleTable,
    notifier: Arc<dyn Notifier>,
    notifications: NotificationConfig,
    numbers: ChallanNumberGenerator,
    payment_window: Duration,
    history: LifecycleLog,
}

impl ChallanManager {
    pub fn new(store: Arc<dyn RecordStore>, rules: SharedRuleTable) -> Self {
        Self {
            store,
            rules,
            notifier: Arc::new(LogNotifier),
            notifications: NotificationConfig::default(),
            numbers: ChallanNumberGenerator::new(),
            payment_window: Duration::days(DEFAULT_PAYMENT_WINDOW_DAYS),
            history: LifecycleLog::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_notifications(mut self, config: NotificationConfig) -> Self {
        self.notifications = config;
        self
    }

    pub fn with_payment_window_days(mut self, days: i64) -> Self {
        self.payment_window = Duration::days(days);
        self
    }

    pub fn with_number_generator(mut self, numbers: ChallanNumberGenerator) -> Self {
        self.numbers = numbers;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn history(&self) -> &LifecycleLog {
        &self.history
    }

    /// Persist a candidate as a violation record, without issuing.
    pub fn record_violation(&self, candidate: &ViolationCandidate) -> Result<Violation> {
        let violation = self.store.insert_violation(Violation::from_candidate(candidate))?;
        info!(
            violation = violation.id,
            category = %violation.category,
            vehicle = candidate.vehicle_or_unknown(),
            synthetic = violation.synthetic,
            "violation recorded"
        );
        Ok(violation)
    }

    /// Persist a candidate and issue a challan for it.
    pub fn issue_for_candidate(
        &self,
        candidate: &ViolationCandidate,
        owner: OwnerContact,
    ) -> Result<(Violation, Challan)> {
        let violation = self.record_violation(candidate)?;
        let challan = self.issue(violation.id, owner)?;
        Ok((violation, challan))
    }

    /// Create a challan in ISSUED for a stored violation. The penalty is
    /// the rule table's value for the category right now and is never
    /// recomputed.
    pub fn issue(&self, violation_id: u64, owner: OwnerContact) -> Result<Challan> {
        let violation = self.store.get_violation(violation_id)?;
        if let Some(active) = self.store.active_challan_for_violation(violation_id)? {
            return Err(EchallanError::Conflict(format!(
                "violation {} already has active challan {}",
                violation_id, active.challan_number
            )));
        }

        let rule = self.rules.lookup(violation.category);
        let mut last_err = None;

        for _ in 0..ISSUE_ATTEMPTS {
            let now = Utc::now();
            let number = self.numbers.generate(self.store.as_ref(), now)?;
            let challan = self.draft(&violation, &owner, number, rule.penalty, now);

            match self.store.insert_challan(challan) {
                Ok(challan) => {
                    self.history.record(ChallanEvent::new(
                        challan.id,
                        &challan.challan_number,
                        "issue",
                        None,
                        ChallanStatus::Issued,
                    ));
                    info!(
                        challan = %challan.challan_number,
                        violation = violation_id,
                        penalty = challan.penalty_amount,
                        "challan issued"
                    );
                    return Ok(self.notify_issued(challan));
                }
                Err(EchallanError::Conflict(msg)) => {
                    // Only a number collision is worth another draw.
                    if self.store.active_challan_for_violation(violation_id)?.is_some() {
                        return Err(EchallanError::Conflict(msg));
                    }
                    warn!(violation = violation_id, error = %msg, "challan insert lost a race, retrying");
                    last_err = Some(EchallanError::Conflict(msg));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            EchallanError::Conflict(format!("could not issue challan for violation {}", violation_id))
        }))
    }

    fn draft(
        &self,
        violation: &Violation,
        owner: &OwnerContact,
        challan_number: String,
        penalty: f64,
        now: DateTime<Utc>,
    ) -> Challan {
        Challan {
            id: 0,
            challan_number,
            status: ChallanStatus::Issued,
            violation_id: violation.id,
            violation_category: violation.category,
            violation_timestamp: violation.timestamp,
            owner_name: owner
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_OWNER_NAME.to_string()),
            owner_phone: owner.phone.clone(),
            owner_email: owner.email.clone(),
            registration_number: violation.vehicle_number.clone(),
            penalty_amount: penalty,
            paid_amount: 0.0,
            payment_deadline: now + self.payment_window,
            evidence_image_url: violation.evidence_path.clone(),
            violation_location: violation.location_name.clone(),
            location: violation.location,
            payment_method: None,
            payment_date: None,
            transaction_id: None,
            email_sent: false,
            sms_sent: false,
            issued_date: now,
            served_date: None,
            disputed_date: None,
            cancelled_date: None,
            version: 0,
        }
    }

    /// Notification failures are logged and leave the challan ISSUED.
    fn notify_issued(&self, challan: Challan) -> Challan {
        let number = challan.challan_number.clone();
        match self.deliver(challan.clone()) {
            Ok((updated, _)) => updated,
            Err(e) => {
                warn!(challan = %number, error = %e, "could not record notification outcome");
                challan
            }
        }
    }

    fn deliver(&self, mut challan: Challan) -> Result<(Challan, NotificationOutcome)> {
        let mut outcome = NotificationOutcome::default();

        if self.notifications.email_enabled {
            if let Some(email) = challan.owner_email.clone() {
                outcome.email_sent = self.send(NotificationChannel::Email, &email, &challan);
            }
        }
        if self.notifications.sms_enabled {
            if let Some(phone) = challan.owner_phone.clone() {
                outcome.sms_sent = self.send(NotificationChannel::Sms, &phone, &challan);
            }
        }

        if !outcome.email_sent && !outcome.sms_sent {
            return Ok((challan, outcome));
        }
        challan.email_sent |= outcome.email_sent;
        challan.sms_sent |= outcome.sms_sent;
        let updated = self.store.update_challan(&challan)?;
        Ok((updated, outcome))
    }

    fn send(&self, channel: NotificationChannel, address: &str, challan: &Challan) -> bool {
        let delivered = self.notifier.notify(channel, address, challan);
        if delivered {
            info!(challan = %challan.challan_number, channel = %channel, "notification delivered");
        } else {
            warn!(challan = %challan.challan_number, channel = %channel, "notification not delivered");
        }
        delivered
    }

    /// Re-send notifications for an existing challan, optionally to new
    /// addresses. Delivered flags are sticky.
    pub fn send_notifications(
        &self,
        challan_number: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<NotificationOutcome> {
        let mut challan = self.store.get_challan_by_number(challan_number)?;
        if challan.status == ChallanStatus::Cancelled {
            return Err(EchallanError::InvalidTransition {
                challan: challan.challan_number,
                from: challan.status,
                action: "send_notifications",
            });
        }
        if let Some(email) = email {
            challan.owner_email = Some(email.to_string());
        }
        if let Some(phone) = phone {
            challan.owner_phone = Some(phone.to_string());
        }
        let (_, outcome) = self.deliver(challan)?;
        Ok(outcome)
    }

    /// ISSUED → SERVED
    pub fn serve(&self, challan_number: &str) -> Result<Challan> {
        self.transition(
            challan_number,
            "serve",
            &[ChallanStatus::Issued],
            None,
            |c, now| {
                c.status = ChallanStatus::Served;
                c.served_date = Some(now);
                Ok(())
            },
        )
    }

    /// Record the latest reported total paid. Reaching the penalty moves
    /// the challan to PAID; a partial total only updates the amount.
    pub fn record_payment(&self, challan_number: &str, payment: Payment) -> Result<Challan> {
        if !payment.amount.is_finite() || payment.amount < 0.0 {
            return Err(EchallanError::InvalidPayment(format!(
                "amount must be a non-negative number, got {}",
                payment.amount
            )));
        }

        self.transition(
            challan_number,
            "record_payment",
            &[ChallanStatus::Issued, ChallanStatus::Served, ChallanStatus::Disputed],
            payment.transaction_id.clone(),
            |c, now| {
                if payment.amount < c.paid_amount {
                    return Err(EchallanError::InvalidPayment(format!(
                        "reported total {} is below the {} already recorded on {}",
                        payment.amount, c.paid_amount, c.challan_number
                    )));
                }
                c.paid_amount = payment.amount;
                c.payment_method = Some(payment.method.clone());
                c.payment_date = Some(now);
                c.transaction_id = payment.transaction_id.clone();
                if c.paid_amount >= c.penalty_amount {
                    c.status = ChallanStatus::Paid;
                }
                Ok(())
            },
        )
    }

    /// ISSUED/SERVED → DISPUTED. Paid amount is kept.
    pub fn dispute(&self, challan_number: &str, reason: Option<&str>) -> Result<Challan> {
        self.transition(
            challan_number,
            "dispute",
            &[ChallanStatus::Issued, ChallanStatus::Served],
            reason.map(str::to_string),
            |c, now| {
                c.status = ChallanStatus::Disputed;
                c.disputed_date = Some(now);
                Ok(())
            },
        )
    }

    /// ISSUED/SERVED/DISPUTED → CANCELLED
    pub fn cancel(&self, challan_number: &str, reason: Option<&str>) -> Result<Challan> {
        self.transition(
            challan_number,
            "cancel",
            &[ChallanStatus::Issued, ChallanStatus::Served, ChallanStatus::Disputed],
            reason.map(str::to_string),
            |c, now| {
                c.status = ChallanStatus::Cancelled;
                c.cancelled_date = Some(now);
                Ok(())
            },
        )
    }

    fn transition<F>(
        &self,
        challan_number: &str,
        action: &'static str,
        allowed: &[ChallanStatus],
        note: Option<String>,
        apply: F,
    ) -> Result<Challan>
    where
        F: FnOnce(&mut Challan, DateTime<Utc>) -> Result<()>,
    {
        let mut challan = self.store.get_challan_by_number(challan_number)?;
        let from = challan.status;
        if !allowed.contains(&from) {
            warn!(challan = %challan_number, from = %from, action, "transition rejected");
            return Err(EchallanError::InvalidTransition {
                challan: challan.challan_number,
                from,
                action,
            });
        }

        apply(&mut challan, Utc::now())?;
        let updated = self.store.update_challan(&challan)?;

        let mut event = ChallanEvent::new(updated.id, &updated.challan_number, action, Some(from), updated.status);
        if let Some(note) = note {
            event = event.with_note(note);
        }
        self.history.record(event);
        info!(challan = %challan_number, from = %from, to = %updated.status, action, "challan transition");
        Ok(updated)
    }

    pub fn get(&self, challan_number: &str) -> Result<Challan> {
        self.store.get_challan_by_number(challan_number)
    }

    pub fn details(&self, challan_number: &str) -> Result<ChallanDetails> {
        Ok(ChallanDetails::from(&self.get(challan_number)?))
    }

    /// Open challans past their payment deadline.
    pub fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<Challan>> {
        Ok(self
            .store
            .list_challans()?
            .into_iter()
            .filter(|c| c.is_overdue(now))
            .collect())
    }

    /// Totals over records created at or after `since` (all when `None`).
    pub fn summary(&self, since: Option<DateTime<Utc>>) -> Result<AnalyticsSummary> {
        let violations = self.store.list_violations()?;
        let challans = self.store.list_challans()?;
        Ok(AnalyticsSummary::compute(&violations, &challans, since))
    }
}

impl std::fmt::Debug for ChallanManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallanManager")
            .field("payment_window_days", &self.payment_window.num_days())
            .field("notifications", &self.notifications)
            .field("history", &self.history.len())
            .finish()
    }
}
