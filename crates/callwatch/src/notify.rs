//! Notification presentation.
//!
//! The debouncer talks to the platform's notification system only through
//! [`NotificationPresenter`]. Presentation is fire-and-forget: callers log and
//! drop any error a presenter returns.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::call::CallState;
use crate::clock::{elapsed_between, Clock};
use crate::error::Result;
use crate::policy::NotificationContent;

/// Sink for call notifications.
pub trait NotificationPresenter: Send + Sync + fmt::Debug {
    /// Show or replace the notification for a call.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the notification.
    fn show_notification(
        &self,
        state: CallState,
        phone_number: &str,
        student_name: Option<&str>,
        parent_name: Option<&str>,
    ) -> Result<()>;

    /// Remove any notification shown for `phone_number`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform call fails.
    fn clear_notifications_for_number(&self, phone_number: &str) -> Result<()>;

    /// Remove every call notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform call fails.
    fn clear_all_notifications(&self) -> Result<()>;
}

impl<P: NotificationPresenter + ?Sized> NotificationPresenter for Arc<P> {
    fn show_notification(
        &self,
        state: CallState,
        phone_number: &str,
        student_name: Option<&str>,
        parent_name: Option<&str>,
    ) -> Result<()> {
        (**self).show_notification(state, phone_number, student_name, parent_name)
    }

    fn clear_notifications_for_number(&self, phone_number: &str) -> Result<()> {
        (**self).clear_notifications_for_number(phone_number)
    }

    fn clear_all_notifications(&self) -> Result<()> {
        (**self).clear_all_notifications()
    }
}

/// Presenter that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl NotificationPresenter for LogPresenter {
    fn show_notification(
        &self,
        state: CallState,
        phone_number: &str,
        student_name: Option<&str>,
        parent_name: Option<&str>,
    ) -> Result<()> {
        let content = NotificationContent::for_call(state, phone_number, student_name, parent_name);
        info!(%state, phone_number, title = %content.title, body = %content.body, "notification");
        Ok(())
    }

    fn clear_notifications_for_number(&self, phone_number: &str) -> Result<()> {
        info!(phone_number, "notification cleared");
        Ok(())
    }

    fn clear_all_notifications(&self) -> Result<()> {
        info!("all notifications cleared");
        Ok(())
    }
}

/// A presenter request captured by [`RecordingPresenter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// A notification was shown.
    Shown {
        /// Call state the notification describes.
        state: CallState,
        /// Normalized phone number.
        phone_number: String,
        /// Rendered title.
        title: String,
        /// Rendered body.
        body: String,
    },
    /// Notifications for one number were cleared.
    Cleared {
        /// Normalized phone number.
        phone_number: String,
    },
    /// All notifications were cleared.
    ClearedAll,
}

/// Presenter that records every request in memory.
///
/// Clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct RecordingPresenter {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingPresenter {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.lock().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of notifications shown so far.
    #[must_use]
    pub fn shown_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|n| matches!(n, Notice::Shown { .. }))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Notice>> {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotificationPresenter for RecordingPresenter {
    fn show_notification(
        &self,
        state: CallState,
        phone_number: &str,
        student_name: Option<&str>,
        parent_name: Option<&str>,
    ) -> Result<()> {
        let content = NotificationContent::for_call(state, phone_number, student_name, parent_name);
        self.lock().push(Notice::Shown {
            state,
            phone_number: phone_number.to_string(),
            title: content.title,
            body: content.body,
        });
        Ok(())
    }

    fn clear_notifications_for_number(&self, phone_number: &str) -> Result<()> {
        self.lock().push(Notice::Cleared {
            phone_number: phone_number.to_string(),
        });
        Ok(())
    }

    fn clear_all_notifications(&self) -> Result<()> {
        self.lock().push(Notice::ClearedAll);
        Ok(())
    }
}

/// Wrapper that suppresses identical show requests within a window.
///
/// Two requests are identical when state, number and both names match. The
/// comparison key is the BLAKE3 hash of those fields.
#[derive(Debug)]
pub struct DuplicateGuard<P, C> {
    inner: P,
    clock: C,
    window: Duration,
    recent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl<P: NotificationPresenter, C: Clock> DuplicateGuard<P, C> {
    /// Wrap `inner`, suppressing repeats within `window`.
    #[must_use]
    pub fn new(inner: P, clock: C, window: Duration) -> Self {
        Self {
            inner,
            clock,
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Compute the dedup key for a show request.
    #[must_use]
    pub fn request_key(
        state: CallState,
        phone_number: &str,
        student_name: Option<&str>,
        parent_name: Option<&str>,
    ) -> String {
        let joined = format!(
            "{state}\u{1f}{phone_number}\u{1f}{}\u{1f}{}",
            student_name.unwrap_or_default(),
            parent_name.unwrap_or_default()
        );
        blake3::hash(joined.as_bytes()).to_hex().to_string()
    }

    /// The wrapped presenter.
    #[must_use]
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: NotificationPresenter, C: Clock> NotificationPresenter for DuplicateGuard<P, C> {
    fn show_notification(
        &self,
        state: CallState,
        phone_number: &str,
        student_name: Option<&str>,
        parent_name: Option<&str>,
    ) -> Result<()> {
        let key = Self::request_key(state, phone_number, student_name, parent_name);
        let now = self.clock.now();
        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            recent.retain(|_, shown_at| elapsed_between(*shown_at, now) < self.window);
            if recent.contains_key(&key) {
                debug!(%state, phone_number, "skipping duplicate notification");
                return Ok(());
            }
            recent.insert(key, now);
        }
        self.inner
            .show_notification(state, phone_number, student_name, parent_name)
    }

    fn clear_notifications_for_number(&self, phone_number: &str) -> Result<()> {
        self.inner.clear_notifications_for_number(phone_number)
    }

    fn clear_all_notifications(&self) -> Result<()> {
        self.inner.clear_all_notifications()
    }
}
