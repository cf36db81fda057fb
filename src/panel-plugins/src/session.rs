//! Host services consumed by the plugin runtime.
//!
//! Identity, notifications and routing belong to the host application; the
//! runtime only sees them through [`HostServices`] and [`Navigator`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// The authenticated user as known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uuid: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub root_admin: bool,
}

impl User {
    /// Create a regular user.
    pub fn new(uuid: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            username: username.into(),
            email: None,
            root_admin: false,
        }
    }

    /// Create a root administrator.
    pub fn admin(uuid: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            root_admin: true,
            ..Self::new(uuid, username)
        }
    }
}

/// Kind of a transient notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// A transient notification shown by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub kind: NotificationKind,
}

/// Services the host exposes to the plugin runtime.
///
/// Implementations must be initialised before plugins are loaded.
pub trait HostServices: Send + Sync {
    /// The current user, if any. Read on every call; never cached.
    fn current_user(&self) -> Option<User>;

    /// Whether the current user holds host-level administrator rights.
    fn is_admin(&self) -> bool {
        self.current_user().is_some_and(|u| u.root_admin)
    }

    /// Show a transient notification.
    fn notify(&self, notification: Notification);
}

/// Host routing callback.
pub type Navigator = Arc<dyn Fn(&str) + Send + Sync>;

/// A navigator that only logs the requested path.
pub fn logging_navigator() -> Navigator {
    Arc::new(|path: &str| tracing::debug!(path = %path, "Navigation requested"))
}

/// Notifications a [`SessionState`] keeps; older ones are dropped.
pub const MAX_NOTIFICATIONS: usize = 100;

/// In-memory session used by the CLI and by embedders without a UI.
///
/// Notifications are logged and the most recent [`MAX_NOTIFICATIONS`] are
/// kept for inspection.
#[derive(Default)]
pub struct SessionState {
    user: RwLock<Option<User>>,
    notifications: RwLock<VecDeque<Notification>>,
}

impl SessionState {
    /// Create an anonymous session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for a user.
    pub fn with_user(user: User) -> Self {
        Self {
            user: RwLock::new(Some(user)),
            notifications: RwLock::new(VecDeque::new()),
        }
    }

    /// Replace the current user (login, logout, role change).
    pub fn set_user(&self, user: Option<User>) {
        *self.user.write() = user;
    }

    /// Retained notifications, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().iter().cloned().collect()
    }

    /// Drain the retained notifications.
    pub fn take_notifications(&self) -> Vec<Notification> {
        self.notifications.write().drain(..).collect()
    }
}

impl HostServices for SessionState {
    fn current_user(&self) -> Option<User> {
        self.user.read().clone()
    }

    fn notify(&self, notification: Notification) {
        tracing::info!(
            title = %notification.title,
            kind = ?notification.kind,
            "Notification: {}",
            notification.message
        );
        let mut notifications = self.notifications.write();
        if notifications.len() == MAX_NOTIFICATIONS {
            notifications.pop_front();
        }
        notifications.push_back(notification);
    }
}
