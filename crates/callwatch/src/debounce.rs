//! Per-number call event debouncer.
//!
//! The platform's telephony layer delivers the same phone-state broadcast
//! several times for one physical call, sometimes with spurious intermediate
//! states. [`CallDebouncer`] decides which events deserve a directory lookup
//! and owns the per-number history those decisions are based on.
//!
//! The protocol for one event is:
//!
//! 1. [`CallDebouncer::should_process_call`]; drop the event on `false`.
//! 2. [`CallDebouncer::mark_api_in_progress`] before issuing the lookup.
//! 3. [`CallDebouncer::mark_api_completed`] once the lookup settles, however
//!    it settles.
//! 4. For IDLE, [`CallDebouncer::handle_call_ended`], then schedule the
//!    returned [`Deferred`] actions and feed them back through
//!    [`CallDebouncer::run_deferred`] when due.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::call::CallState;
use crate::clock::{elapsed_between, offset, Clock};
use crate::config::Config;
use crate::notify::NotificationPresenter;
use crate::phone::normalize;
use crate::policy::StudentMatch;

/// Timing parameters for the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceSettings {
    /// A repeat of the previous state inside this window is dropped.
    pub same_state_window: Duration,
    /// A different state inside this window is dropped as flicker.
    pub state_change_window: Duration,
    /// Delay between handling IDLE and evicting the history entry.
    pub eviction_delay: Duration,
    /// Delay before the "call ended" notification is cleared.
    pub ended_clear_delay: Duration,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            same_state_window: Duration::from_millis(2000),
            state_change_window: Duration::from_millis(500),
            eviction_delay: Duration::from_secs(30),
            ended_clear_delay: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for DebounceSettings {
    fn from(config: &Config) -> Self {
        Self {
            same_state_window: config.same_state_window(),
            state_change_window: config.state_change_window(),
            eviction_delay: config.eviction_delay(),
            ended_clear_delay: config.ended_clear_delay(),
        }
    }
}

/// Bookkeeping for one normalized phone number.
#[derive(Debug)]
pub struct CallHistoryEntry {
    /// Last state processed for this number.
    pub last_event: CallState,
    /// When the last processed event was accepted.
    pub last_timestamp: DateTime<Utc>,
    /// Whether a directory lookup is outstanding.
    pub api_in_progress: bool,
    /// Identifies the call lifecycle deferred actions were scheduled for.
    pub generation: u64,
    timers: Vec<AbortHandle>,
}

impl CallHistoryEntry {
    fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

/// What a deferred action does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredAction {
    /// Clear the "call ended" notification.
    ClearNotification,
    /// Remove the history entry.
    EvictHistory,
}

impl std::fmt::Display for DeferredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClearNotification => write!(f, "clear_notification"),
            Self::EvictHistory => write!(f, "evict_history"),
        }
    }
}

/// An action scheduled for later by [`CallDebouncer::handle_call_ended`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deferred {
    /// Normalized phone number the action applies to.
    pub key: String,
    /// When the action should run.
    pub due: DateTime<Utc>,
    /// Entry generation at scheduling time.
    pub generation: u64,
    /// The action itself.
    pub action: DeferredAction,
}

/// Per-number debounce state machine.
///
/// Owns the `normalized number -> CallHistoryEntry` map exclusively. None of
/// its operations fail.
#[derive(Debug)]
pub struct CallDebouncer<C> {
    settings: DebounceSettings,
    clock: C,
    history: HashMap<String, CallHistoryEntry>,
    last_generation: u64,
}

impl<C: Clock> CallDebouncer<C> {
    /// Create an empty debouncer.
    #[must_use]
    pub fn new(settings: DebounceSettings, clock: C) -> Self {
        Self {
            settings,
            clock,
            history: HashMap::new(),
            last_generation: 0,
        }
    }

    /// The clock decisions are made against.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The active timing parameters.
    #[must_use]
    pub fn settings(&self) -> &DebounceSettings {
        &self.settings
    }

    /// Decide whether an event should be processed.
    ///
    /// Does not modify any state.
    #[must_use]
    pub fn should_process_call(&self, phone_number: Option<&str>, state: CallState) -> bool {
        let key = normalize(phone_number);
        let Some(entry) = self.history.get(&key) else {
            trace!(phone_number = %key, %state, "first event for number");
            return true;
        };

        if entry.api_in_progress {
            debug!(phone_number = %key, %state, "lookup already in progress");
            return false;
        }

        let dt = elapsed_between(entry.last_timestamp, self.clock.now());
        if state == entry.last_event && dt < self.settings.same_state_window {
            debug!(phone_number = %key, %state, ?dt, "duplicate state");
            return false;
        }
        if state != entry.last_event && dt < self.settings.state_change_window {
            debug!(
                phone_number = %key,
                from = %entry.last_event,
                to = %state,
                ?dt,
                "state flicker"
            );
            return false;
        }

        true
    }

    /// Record an approved event and mark its lookup as outstanding.
    ///
    /// Starts a new call lifecycle for the number: the generation advances and
    /// any deferred actions still pending for the previous one are cancelled.
    pub fn mark_api_in_progress(&mut self, phone_number: Option<&str>, state: CallState) {
        let key = normalize(phone_number);
        let now = self.clock.now();
        self.last_generation += 1;
        let generation = self.last_generation;

        match self.history.get_mut(&key) {
            Some(entry) => {
                entry.cancel_timers();
                entry.last_event = state;
                // Keeps timestamps non-decreasing even if the clock steps back.
                entry.last_timestamp = entry.last_timestamp.max(now);
                entry.api_in_progress = true;
                entry.generation = generation;
            }
            None => {
                self.history.insert(
                    key,
                    CallHistoryEntry {
                        last_event: state,
                        last_timestamp: now,
                        api_in_progress: true,
                        generation,
                        timers: Vec::new(),
                    },
                );
            }
        }
    }

    /// Mark the outstanding lookup for a number as settled.
    ///
    /// A no-op when the number has no entry.
    pub fn mark_api_completed(&mut self, phone_number: Option<&str>, state: CallState) {
        let key = normalize(phone_number);
        if let Some(entry) = self.history.get_mut(&key) {
            entry.api_in_progress = false;
            trace!(phone_number = %key, %state, "lookup settled");
        }
    }

    /// Wrap up a call that reached IDLE.
    ///
    /// With a complete match, shows a final "call ended" notification and
    /// schedules clearing it; otherwise clears the number's notifications now.
    /// Always schedules eviction of the history entry. Presenter failures are
    /// logged and ignored.
    pub fn handle_call_ended(
        &mut self,
        phone_number: Option<&str>,
        student: &StudentMatch,
        presenter: &dyn NotificationPresenter,
    ) -> Vec<Deferred> {
        let key = normalize(phone_number);
        let now = self.clock.now();
        let generation = self.generation(&key).unwrap_or(0);
        let mut deferred = Vec::with_capacity(2);

        if student.is_complete() {
            if let Err(e) =
                presenter.show_notification(CallState::Idle, &key, student.student(), student.parent())
            {
                warn!(phone_number = %key, error = %e, "failed to show call-ended notification");
            }
            deferred.push(Deferred {
                key: key.clone(),
                due: offset(now, self.settings.ended_clear_delay),
                generation,
                action: DeferredAction::ClearNotification,
            });
        } else if let Err(e) = presenter.clear_notifications_for_number(&key) {
            warn!(phone_number = %key, error = %e, "failed to clear notifications");
        }

        deferred.push(Deferred {
            due: offset(now, self.settings.eviction_delay),
            key,
            generation,
            action: DeferredAction::EvictHistory,
        });
        deferred
    }

    /// Whether a deferred action still belongs to the number's current call.
    ///
    /// Actions for a number without an entry are still current: a newer call
    /// would have created one.
    #[must_use]
    pub fn is_current(&self, deferred: &Deferred) -> bool {
        self.history
            .get(&deferred.key)
            .map_or(true, |entry| entry.generation == deferred.generation)
    }

    /// Run a deferred action that has come due.
    ///
    /// Returns `false` if the action was superseded by a newer call and
    /// skipped.
    pub fn run_deferred(
        &mut self,
        deferred: &Deferred,
        presenter: &dyn NotificationPresenter,
    ) -> bool {
        if !self.is_current(deferred) {
            debug!(
                phone_number = %deferred.key,
                action = %deferred.action,
                "skipping superseded deferred action"
            );
            return false;
        }

        match deferred.action {
            DeferredAction::ClearNotification => {
                if let Err(e) = presenter.clear_notifications_for_number(&deferred.key) {
                    warn!(phone_number = %deferred.key, error = %e, "failed to clear notifications");
                }
            }
            DeferredAction::EvictHistory => {
                if let Some(mut entry) = self.history.remove(&deferred.key) {
                    entry.timers.clear();
                    debug!(phone_number = %deferred.key, "history entry evicted");
                }
            }
        }
        true
    }

    /// Tie a running timer task to the number's entry so that a newer call
    /// cancels it.
    ///
    /// Returns `false` (leaving the timer running) if the number has no entry.
    pub fn attach_timer(&mut self, key: &str, timer: AbortHandle) -> bool {
        match self.history.get_mut(key) {
            Some(entry) => {
                entry.timers.retain(|t| !t.is_finished());
                entry.timers.push(timer);
                true
            }
            None => false,
        }
    }

    /// Remove entries whose last event is older than `max_age`.
    ///
    /// Entries with an outstanding lookup are kept. Returns the number of
    /// entries removed.
    pub fn cleanup_old_history(&mut self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let before = self.history.len();
        self.history.retain(|key, entry| {
            let keep =
                entry.api_in_progress || elapsed_between(entry.last_timestamp, now) <= max_age;
            if !keep {
                debug!(phone_number = %key, "sweeping stale history entry");
                entry.cancel_timers();
            }
            keep
        });
        before - self.history.len()
    }

    /// The history entry for a raw phone number, if any.
    #[must_use]
    pub fn entry(&self, phone_number: Option<&str>) -> Option<&CallHistoryEntry> {
        self.history.get(&normalize(phone_number))
    }

    /// Current generation for a normalized key.
    #[must_use]
    pub fn generation(&self, key: &str) -> Option<u64> {
        self.history.get(key).map(|entry| entry.generation)
    }

    /// Number of tracked phone numbers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Number of lookups currently outstanding.
    #[must_use]
    pub fn lookups_in_flight(&self) -> usize {
        self.history.values().filter(|e| e.api_in_progress).count()
    }

    /// Whether no phone numbers are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Drop all history and cancel every pending timer.
    pub fn clear(&mut self) {
        for entry in self.history.values_mut() {
            entry.cancel_timers();
        }
        self.history.clear();
    }
}
