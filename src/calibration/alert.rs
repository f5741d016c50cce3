//! Template change alerts: the interception detector's output.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::error;

use super::diff::Change;
use super::template::TemplateId;

/// Buffered alerts per subscriber before the slowest one starts lagging.
const ALERT_CHANNEL_CAPACITY: usize = 64;

/// How alarming a template change is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Only HTTP/2 settings moved
    Medium,
    /// TLS parameters changed
    High,
}

/// A fingerprint for a host changed unexpectedly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateChangeAlert {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Host whose fingerprint changed
    pub hostname: String,
    /// High when any TLS field changed
    pub severity: Severity,
    /// ID of the previously cached template
    pub old_template_id: TemplateId,
    /// ID computed from the new observation
    pub new_template_id: TemplateId,
    /// Every changed leaf
    pub changes: Vec<Change>,
}

impl TemplateChangeAlert {
    /// Build an alert; severity follows from which paths changed.
    pub fn new(
        hostname: impl Into<String>,
        old_template_id: TemplateId,
        new_template_id: TemplateId,
        changes: Vec<Change>,
        timestamp: u64,
    ) -> Self {
        let severity = if changes.iter().any(|c| c.path.starts_with("tls")) {
            Severity::High
        } else {
            Severity::Medium
        };

        Self {
            timestamp,
            hostname: hostname.into(),
            severity,
            old_template_id,
            new_template_id,
            changes,
        }
    }

    /// Dotted paths of every changed field.
    pub fn changed_paths(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.path.as_str()).collect()
    }
}

/// Bounded alert history with live fan-out.
pub(crate) struct AlertLog {
    history: Mutex<VecDeque<TemplateChangeAlert>>,
    max: usize,
    tx: broadcast::Sender<TemplateChangeAlert>,
}

impl AlertLog {
    pub(crate) fn new(max: usize) -> Self {
        let (tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            history: Mutex::new(VecDeque::new()),
            max: max.max(1),
            tx,
        }
    }

    /// Record, log and broadcast an alert.
    pub(crate) fn emit(&self, alert: TemplateChangeAlert) {
        error!(
            target: "security",
            hostname = %alert.hostname,
            severity = ?alert.severity,
            old = %alert.old_template_id,
            new = %alert.new_template_id,
            changes = ?alert.changed_paths(),
            "template change detected, possible interception"
        );

        {
            let mut history = self.history.lock();
            history.push_back(alert.clone());
            while history.len() > self.max {
                history.pop_front();
            }
        }

        // No subscribers is fine
        let _ = self.tx.send(alert);
    }

    /// Alerts strictly newer than `since`.
    pub(crate) fn since(&self, since: u64) -> Vec<TemplateChangeAlert> {
        self.history
            .lock()
            .iter()
            .filter(|a| a.timestamp > since)
            .cloned()
            .collect()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TemplateChangeAlert> {
        self.tx.subscribe()
    }

    pub(crate) fn clear(&self) {
        self.history.lock().clear();
    }
}
