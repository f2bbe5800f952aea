use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(severity: Severity, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError {
    pub reason: String,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification delivery failed: {}", self.reason)
    }
}

impl std::error::Error for NotifyError {}

/// Outbound alert channel (email, chat, pager). Delivery is never on the
/// critical path: callers go through [`notify_best_effort`].
pub trait Notifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        match n.severity {
            Severity::Info => tracing::info!(title = %n.title, detail = %n.detail, "notification"),
            Severity::Warning => {
                tracing::warn!(title = %n.title, detail = %n.detail, "notification")
            }
            Severity::Critical => {
                tracing::error!(title = %n.title, detail = %n.detail, "notification")
            }
        }
        Ok(())
    }
}

/// Captures notifications in memory. `failing()` builds one that records the
/// attempt and then reports a delivery failure.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: RefCell<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: RefCell::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.borrow().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent.borrow().iter().map(|n| n.title.clone()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        self.sent.borrow_mut().push(n.clone());
        if self.fail {
            return Err(NotifyError {
                reason: "recording notifier configured to fail".to_string(),
            });
        }
        Ok(())
    }
}

/// Deliver and swallow failures. Returns whether delivery succeeded.
pub fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) -> bool {
    match notifier.notify(&notification) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(title = %notification.title, error = %e, "notification not delivered");
            false
        }
    }
}
