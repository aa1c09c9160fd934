//! Notification boundary. Only the decision to notify lives here; delivery
//! belongs to whatever implements [`Notifier`].
use echallan_core::{Challan, UNKNOWN_VEHICLE};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationChannel {
    Email,
    Sms,
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => f.write_str("EMAIL"),
            Self::Sms => f.write_str("SMS"),
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Returns whether the message was delivered.
    fn notify(&self, channel: NotificationChannel, address: &str, challan: &Challan) -> bool;
}

/// `notification:` section of the pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub email_enabled: bool,
    pub sms_enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            email_enabled: true,
            sms_enabled: true,
        }
    }
}

/// Per-channel delivery result for one challan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub email_sent: bool,
    pub sms_sent: bool,
}

pub fn sms_text(challan: &Challan) -> String {
    format!(
        "E-Challan Alert: Violation detected for vehicle {}. Challan No: {}. Penalty: Rs.{:.2}. Pay by: {}",
        challan.registration_number.as_deref().unwrap_or(UNKNOWN_VEHICLE),
        challan.challan_number,
        challan.penalty_amount,
        challan.payment_deadline.format("%Y-%m-%d"),
    )
}

pub fn email_subject(challan: &Challan) -> String {
    format!("E-Challan {} issued", challan.challan_number)
}

/// Writes every notification to the log and reports it delivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, channel: NotificationChannel, address: &str, challan: &Challan) -> bool {
        match channel {
            NotificationChannel::Sms => {
                info!(channel = %channel, to = %address, message = %sms_text(challan), "notification sent");
            }
            NotificationChannel::Email => {
                info!(channel = %channel, to = %address, subject = %email_subject(challan), "notification sent");
            }
        }
        true
    }
}
