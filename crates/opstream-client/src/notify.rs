use opstream_core::Severity;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastVariant {
    Info,
    Success,
    Warning,
    Danger,
}

impl From<Severity> for ToastVariant {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Info => ToastVariant::Info,
            Severity::Success => ToastVariant::Success,
            Severity::Warning => ToastVariant::Warning,
            Severity::Error => ToastVariant::Danger,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub body: String,
    pub variant: ToastVariant,
}

/// Fire-and-forget sink for user-facing notifications.
pub trait NotificationSink: Send + 'static {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.variant {
            ToastVariant::Info | ToastVariant::Success => info!(
                event = "toast",
                variant = ?notification.variant,
                body = %notification.body
            ),
            ToastVariant::Warning => warn!(event = "toast", body = %notification.body),
            ToastVariant::Danger => error!(event = "toast", body = %notification.body),
        }
    }
}

/// Forwards notifications to a receiver owned by the UI layer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}
