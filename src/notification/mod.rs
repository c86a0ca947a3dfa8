//! Transient user feedback ("toasts") for save outcomes

use std::str::FromStr;
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Fire-and-forget feedback sink. Implementations must never block the caller.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, kind: NoticeKind, message: &str);
}

/// Notification backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationBackend {
    /// No notifications
    None,
    /// Log and print to stderr
    #[default]
    Log,
    /// Desktop notifications only (via notify-rust)
    System,
    /// Both stderr and desktop notifications
    Both,
}

impl NotificationBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Log => "log",
            Self::System => "system",
            Self::Both => "both",
        }
    }

    fn targets(self) -> (bool, bool) {
        match self {
            Self::None => (false, false),
            Self::Log => (true, false),
            Self::System => (false, true),
            Self::Both => (true, true),
        }
    }
}

impl FromStr for NotificationBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "log" | "stderr" => Ok(Self::Log),
            "system" => Ok(Self::System),
            "both" => Ok(Self::Both),
            _ => Err(()),
        }
    }
}

/// Toasts routed to stderr and/or the desktop notification daemon.
#[derive(Debug, Clone)]
pub struct ToastNotifier {
    backend: NotificationBackend,
    display_duration_ms: u64,
}

impl ToastNotifier {
    pub fn new(backend: NotificationBackend, display_duration_ms: u64) -> Self {
        Self {
            backend,
            display_duration_ms,
        }
    }
}

impl Notifier for ToastNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        match kind {
            NoticeKind::Success => info!(kind = kind.as_str(), message, "toast"),
            NoticeKind::Error => error!(kind = kind.as_str(), message, "toast"),
        }

        let (send_stderr, send_system) = self.backend.targets();
        if send_stderr {
            let marker = match kind {
                NoticeKind::Success => "ok",
                NoticeKind::Error => "error",
            };
            eprintln!("[{marker}] {message}");
        }

        if send_system {
            send_system_notification(kind, message, self.display_duration_ms);
        }
    }
}

fn send_system_notification(kind: NoticeKind, message: &str, display_duration_ms: u64) {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        let timeout_ms = display_duration_ms.min(u32::MAX as u64) as u32;
        let icon = match kind {
            NoticeKind::Success => "dialog-information",
            NoticeKind::Error => "dialog-error",
        };

        let message = message.to_string();
        dispatch_detached(move || {
            let result = notify_rust::Notification::new()
                .summary("CRM")
                .body(&message)
                .icon(icon)
                .timeout(notify_rust::Timeout::Milliseconds(timeout_ms))
                .show();

            if let Err(err) = result {
                warn!(error = %err, "failed to send system notification");
            }
        });
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = (kind, message, display_duration_ms);
        debug!("system notifications not supported on this OS");
    }
}

/// Runs `job` away from the caller: on tokio's blocking pool inside a
/// runtime, otherwise on a short-lived thread. Talking to the notification
/// daemon can stall for seconds.
#[cfg_attr(not(any(target_os = "linux", target_os = "macos")), allow(dead_code))]
fn dispatch_detached(job: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(job);
        }
        Err(_) => {
            if let Err(err) = std::thread::Builder::new()
                .name("crm-notify".to_string())
                .spawn(job)
            {
                warn!(error = %err, "failed to spawn notification thread");
            }
        }
    }
}

/// Collects notices in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notices: Mutex<Vec<(NoticeKind, String)>>,
}

impl MemoryNotifier {
    pub fn notices(&self) -> Vec<(NoticeKind, String)> {
        match self.notices.lock() {
            Ok(notices) => notices.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn errors(&self) -> usize {
        self.notices()
            .iter()
            .filter(|(kind, _)| *kind == NoticeKind::Error)
            .count()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        debug!(kind = kind.as_str(), message, "recorded notice");
        match self.notices.lock() {
            Ok(mut notices) => notices.push((kind, message.to_string())),
            Err(poisoned) => poisoned.into_inner().push((kind, message.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatched_thread() -> std::thread::ThreadId {
        let (tx, rx) = std::sync::mpsc::channel();
        dispatch_detached(move || {
            let _ = tx.send(std::thread::current().id());
        });
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_runs_off_the_runtime_thread() {
        assert_ne!(dispatched_thread(), std::thread::current().id());
    }

    #[test]
    fn test_dispatch_without_runtime_uses_its_own_thread() {
        assert_ne!(dispatched_thread(), std::thread::current().id());
    }

    #[test]
    fn test_notification_backend_from_str() {
        assert_eq!(
            NotificationBackend::from_str("Log"),
            Ok(NotificationBackend::Log)
        );
        assert_eq!(
            NotificationBackend::from_str("stderr"),
            Ok(NotificationBackend::Log)
        );
        assert_eq!(
            NotificationBackend::from_str(" SYSTEM "),
            Ok(NotificationBackend::System)
        );
        assert_eq!(
            NotificationBackend::from_str("both"),
            Ok(NotificationBackend::Both)
        );
        assert_eq!(
            NotificationBackend::from_str("none"),
            Ok(NotificationBackend::None)
        );
        assert!(NotificationBackend::from_str("tmux").is_err());
    }

    #[test]
    fn test_backend_roundtrip() {
        for backend in [
            NotificationBackend::None,
            NotificationBackend::Log,
            NotificationBackend::System,
            NotificationBackend::Both,
        ] {
            assert_eq!(NotificationBackend::from_str(backend.as_str()), Ok(backend));
        }
    }

    #[test]
    fn test_backend_targets() {
        assert_eq!(NotificationBackend::None.targets(), (false, false));
        assert_eq!(NotificationBackend::Log.targets(), (true, false));
        assert_eq!(NotificationBackend::System.targets(), (false, true));
        assert_eq!(NotificationBackend::Both.targets(), (true, true));
    }

    #[test]
    fn test_memory_notifier_counts_errors() {
        let notifier = MemoryNotifier::default();
        notifier.notify(NoticeKind::Success, "Task created");
        notifier.notify(NoticeKind::Error, "Failed to save");

        assert_eq!(notifier.notices().len(), 2);
        assert_eq!(notifier.errors(), 1);
    }
}
