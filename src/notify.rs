use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::util::generate_id;

/// How long a toast stays up unless dismissed by hand.
pub const TOAST_AUTO_DISMISS: Duration = Duration::from_secs(6);
const MAX_TOASTS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Success,
    Warning,
    Error,
}

impl ToastKind {
    pub fn icon(&self) -> &'static str {
        match self {
            ToastKind::Info => "ℹ️",
            ToastKind::Success => "✅",
            ToastKind::Warning => "⚠️",
            ToastKind::Error => "⛔",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToastMessage {
    pub id: String,
    pub kind: ToastKind,
    pub text: String,
}

impl ToastMessage {
    pub fn new(kind: ToastKind, text: impl Into<String>) -> Self {
        Self {
            id: generate_id("toast"),
            kind,
            text: text.into(),
        }
    }
}

/// Dismissible notifications shared by every part of the portal. Holds at most
/// five; pushing a sixth evicts the oldest.
#[derive(Clone, Default)]
pub struct Notifications {
    toasts: Arc<Mutex<Vec<ToastMessage>>>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a toast and return its id for [`Notifications::dismiss`].
    pub fn push(&self, kind: ToastKind, message: impl Into<String>) -> String {
        let toast = ToastMessage::new(kind, message);
        let id = toast.id.clone();
        match kind {
            ToastKind::Error => tracing::warn!(toast = %toast.text, "error notification"),
            _ => tracing::debug!(toast = %toast.text, ?kind, "notification"),
        }

        let mut entries = self.toasts.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= MAX_TOASTS {
            entries.remove(0);
        }
        entries.push(toast);
        id
    }

    /// Shorthand for `push(ToastKind::Success, ..)`.
    pub fn success(&self, message: impl Into<String>) -> String {
        self.push(ToastKind::Success, message)
    }

    /// Shorthand for `push(ToastKind::Error, ..)`. Also logged at warn level.
    pub fn error(&self, message: impl Into<String>) -> String {
        self.push(ToastKind::Error, message)
    }

    /// Returns false if `id` was already gone.
    pub fn dismiss(&self, id: &str) -> bool {
        let mut entries = self.toasts.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|toast| toast.id != id);
        entries.len() != before
    }

    /// Remove `id` after [`TOAST_AUTO_DISMISS`]. Needs a Tokio runtime.
    pub fn dismiss_later(&self, id: String) {
        let notifications = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TOAST_AUTO_DISMISS).await;
            notifications.dismiss(&id);
        });
    }

    /// Current toasts, oldest first.
    pub fn list(&self) -> Vec<ToastMessage> {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
