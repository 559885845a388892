//! Host notification callbacks.

use serde::Serialize;
use std::fmt;
use strum_macros::Display;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Error,
    Info,
}

/// User-facing message raised by the reconciler or the handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Provided by the host. Called from background tasks, must not block.
pub trait HostCallbacks: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Logs notifications through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingCallbacks;

impl HostCallbacks for TracingCallbacks {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => tracing::error!("{}", notification.message),
            NotificationLevel::Success | NotificationLevel::Info => {
                tracing::info!(level = %notification.level, "{}", notification.message)
            }
        }
    }
}

/// Forwards notifications to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelCallbacks {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl HostCallbacks for ChannelCallbacks {
    fn notify(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            tracing::debug!("notification receiver dropped: {}", e.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_callbacks() {
        let (callbacks, mut rx) = ChannelCallbacks::new();
        callbacks.notify(Notification::success("Workflow completed"));
        callbacks.notify(Notification::error("boom"));
        assert_eq!(rx.try_recv().unwrap(), Notification::success("Workflow completed"));
        assert_eq!(rx.try_recv().unwrap().level, NotificationLevel::Error);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (callbacks, rx) = ChannelCallbacks::new();
        drop(rx);
        callbacks.notify(Notification::info("ignored"));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Notification::info("Workflow cancelled").to_string(),
            "[info] Workflow cancelled"
        );
    }
}
