//! Outbound alert seam.
//!
//! The batch runner raises a warning when a run's failure rate crosses
//! its threshold. Delivery (Slack, email, paging) belongs to the host
//! application; this crate only defines the seam and a log-backed
//! default so the runner works standalone.

use std::sync::Mutex;

/// Receives warning-severity alerts from the batch runner.
pub trait AlertSink: Send + Sync {
    fn warn(&self, title: &str, body: &str);
}

/// Default sink: alerts land in the log at warn level.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn warn(&self, title: &str, body: &str) {
        log::warn!("[alert] {}: {}", title, body);
    }
}

/// Test sink that records every alert.
#[derive(Default)]
pub struct CollectingAlertSink {
    alerts: Mutex<Vec<(String, String)>>,
}

impl CollectingAlertSink {
    pub fn taken(&self) -> Vec<(String, String)> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl AlertSink for CollectingAlertSink {
    fn warn(&self, title: &str, body: &str) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push((title.to_string(), body.to_string()));
        }
    }
}
