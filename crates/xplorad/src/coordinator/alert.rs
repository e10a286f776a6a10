use tracing::error;

use crate::watch::WatchId;

/// A user-visible problem with one watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub watch: WatchId,
    pub kind: AlertKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Transient failures kept happening past the configured threshold.
    Degraded,
    /// Polling stopped until the watch is reconfigured.
    Unavailable,
}

/// Platform-level alert callback.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
}

/// Reports alerts through the log.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: Alert) {
        error!("[{}] {:?}: {}", alert.watch, alert.kind, alert.message);
    }
}

/// Collects alerts for assertions
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    pub alerts: std::sync::Mutex<Vec<Alert>>,
}

#[cfg(test)]
impl RecordingAlertSink {
    pub fn kinds(&self) -> Vec<(String, AlertKind)> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|a| (a.watch.to_string(), a.kind))
            .collect()
    }
}

#[cfg(test)]
impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}
