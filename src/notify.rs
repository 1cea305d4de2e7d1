//! Human-facing notification sink
//!
//! Circuit-open and terminal-failure conditions surface to a person through
//! this trait; the host wires it to a toast, status bar, or whatever it has.
//! Notifications are best-effort and never alter control flow.

use serde::Serialize;

/// Message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

/// Default sink: drops messages, leaving only the tracing log.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _message: &str, _severity: Severity) {}
}

/// Log-only sink for hosts without a UI surface.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        // `notification`, not shorthand `message`: the latter collides with
        // tracing's own `message` field for the format string.
        match severity {
            Severity::Info => tracing::info!(notification = message, "user notification"),
            Severity::Warning => tracing::warn!(notification = message, "user notification"),
            Severity::Error => tracing::error!(notification = message, "user notification"),
        }
    }
}
