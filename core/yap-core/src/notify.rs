//! Desktop notifications for lifecycle events.
//!
//! The `notifications` config string decides which events notify and at what
//! urgency. Sending is fire-and-forget: the notifier process is reaped on a
//! detached thread and its failures are only logged.

use std::collections::BTreeSet;
use std::process::{Command, Stdio};
use std::thread;

/// Lifecycle events a user can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NotificationEvent {
    Start,
    Pause,
    Stop,
}

impl NotificationEvent {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "start" => Some(Self::Start),
            "pause" => Some(Self::Pause),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// Parsed form of the `notifications` config value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationSpec {
    pub events: BTreeSet<NotificationEvent>,
    pub urgent: bool,
}

impl NotificationSpec {
    /// Parses `"start,pause,stop,urgent"`-style strings.
    ///
    /// `""`, `"false"` and `"disabled"` disable everything. Unknown tokens are
    /// ignored. `"urgent"` on its own is shorthand for `"start,urgent"`.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if matches!(spec, "" | "false" | "disabled") {
            return Self::default();
        }

        let mut parsed = Self::default();
        for token in spec.split(',').map(str::trim) {
            if token == "urgent" {
                parsed.urgent = true;
            } else if let Some(event) = NotificationEvent::from_token(token) {
                parsed.events.insert(event);
            }
        }

        if parsed.events.is_empty() && parsed.urgent {
            parsed.events.insert(NotificationEvent::Start);
        }
        parsed
    }

    pub fn should_notify(&self, event: NotificationEvent) -> bool {
        self.events.contains(&event)
    }

    pub fn urgency(&self) -> Urgency {
        if self.urgent {
            Urgency::Critical
        } else {
            Urgency::Normal
        }
    }
}

/// Delivers a notification to the user. Implementations must not block on
/// or report delivery failures.
pub trait Notifier: Send + Sync {
    fn send(&self, message: &str, urgency: Urgency);
}

/// Sends `message` if `spec` subscribes to `event`.
pub fn notify(notifier: &dyn Notifier, spec: &NotificationSpec, event: NotificationEvent, message: &str) {
    if !spec.should_notify(event) {
        tracing::debug!(?event, "Notification filtered by config");
        return;
    }
    notifier.send(message, spec.urgency());
}

/// `notify-send` backed notifier.
#[derive(Debug, Default)]
pub struct DesktopNotifier;

const NOTIFY_COMMAND: &str = "notify-send";
const NOTIFY_ICON: &str = "audio-input-microphone";
const NOTIFY_TITLE: &str = "Yap";

impl Notifier for DesktopNotifier {
    fn send(&self, message: &str, urgency: Urgency) {
        let spawned = Command::new(NOTIFY_COMMAND)
            .args(["-i", NOTIFY_ICON, "-u", urgency.as_str(), NOTIFY_TITLE, message])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                thread::spawn(move || match child.wait() {
                    Ok(status) if !status.success() => {
                        tracing::debug!(%status, "notify-send exited unsuccessfully");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::debug!(error = %err, "Failed to reap notify-send"),
                });
            }
            Err(err) => {
                tracing::debug!(error = %err, "Failed to spawn notify-send");
            }
        }
    }
}
