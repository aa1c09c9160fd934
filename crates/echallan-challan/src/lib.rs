//! E-Challan Lifecycle
//!
//! Issues challans from stored violations, drives them through the status
//! state machine and records what happened. Persistence and notification
//! delivery sit behind the [`RecordStore`] and [`Notifier`] traits.

pub mod analytics;
pub mod audit;
pub mod lifecycle;
pub mod notify;
pub mod number;
pub mod store;

pub use analytics::AnalyticsSummary;
pub use audit::{ChallanEvent, LifecycleLog};
pub use lifecycle::{
    ChallanManager, OwnerContact, Payment, DEFAULT_OWNER_NAME, DEFAULT_PAYMENT_WINDOW_DAYS,
};
pub use notify::{
    sms_text, LogNotifier, NotificationChannel, NotificationConfig, NotificationOutcome, Notifier,
};
pub use number::{format_challan_number, is_challan_number, ChallanNumberGenerator};
pub use store::{MemoryStore, RecordStore};
