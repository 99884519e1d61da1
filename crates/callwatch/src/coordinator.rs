//! Glue between the debouncer and its collaborators.
//!
//! [`CallCoordinator`] runs the per-event protocol: accept or drop an event,
//! and once its lookup settles, decide what to show. It performs no I/O of
//! its own; the live [`crate::service::CallMonitor`] and the virtual-time
//! [`crate::replay`] both drive it.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::call::{CallEvent, CallState};
use crate::clock::Clock;
use crate::config::Config;
use crate::debounce::{CallDebouncer, DebounceSettings, Deferred};
use crate::directory::{LookupError, LookupRequest};
use crate::notify::NotificationPresenter;
use crate::phone::{is_unknown, normalize};
use crate::policy::{should_show_notification_for_event, StudentMatch};
use crate::store::{CallDisplay, CallStore};

/// An event the debouncer accepted, waiting for its lookup to settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedCall {
    /// Normalized phone number.
    pub key: String,
    /// The accepted state.
    pub state: CallState,
}

impl AcceptedCall {
    /// Whether a directory lookup is worth issuing.
    ///
    /// Calls without a number settle immediately as "no match".
    #[must_use]
    pub fn needs_lookup(&self) -> bool {
        !is_unknown(&self.key)
    }

    /// The request body for this call's lookup.
    #[must_use]
    pub fn lookup_request(&self) -> LookupRequest {
        LookupRequest::new(self.key.clone(), self.state)
    }
}

/// Drives the debouncer, presenter and UI store for one event stream.
#[derive(Debug)]
pub struct CallCoordinator<C> {
    debouncer: CallDebouncer<C>,
    presenter: Box<dyn NotificationPresenter>,
    store: CallStore,
    max_history_age: Duration,
}

impl<C: Clock> CallCoordinator<C> {
    /// Assemble a coordinator.
    #[must_use]
    pub fn new(
        debouncer: CallDebouncer<C>,
        presenter: Box<dyn NotificationPresenter>,
        store: CallStore,
        max_history_age: Duration,
    ) -> Self {
        Self {
            debouncer,
            presenter,
            store,
            max_history_age,
        }
    }

    /// Build a coordinator from configuration, returning the UI receiver.
    #[must_use]
    pub fn from_config(
        config: &Config,
        clock: C,
        presenter: Box<dyn NotificationPresenter>,
    ) -> (Self, watch::Receiver<CallDisplay>) {
        let (store, display) = CallStore::channel();
        let debouncer = CallDebouncer::new(DebounceSettings::from(config), clock);
        (
            Self::new(debouncer, presenter, store, config.max_history_age()),
            display,
        )
    }

    /// Offer an incoming event.
    ///
    /// Sweeps stale history first. On acceptance the number's lookup is
    /// marked in progress, so [`settle`](Self::settle) must follow exactly
    /// once.
    pub fn begin(&mut self, event: &CallEvent) -> Option<AcceptedCall> {
        self.sweep();

        let phone_number = event.phone_number();
        if !self.debouncer.should_process_call(phone_number, event.state) {
            return None;
        }
        self.debouncer.mark_api_in_progress(phone_number, event.state);

        let call = AcceptedCall {
            key: normalize(phone_number),
            state: event.state,
        };
        info!(phone_number = %call.key, state = %call.state, "call event accepted");
        Some(call)
    }

    /// Finish an accepted event once its lookup has settled.
    ///
    /// Any lookup error counts as "no match". Returns the deferred actions
    /// the caller must schedule.
    pub fn settle(
        &mut self,
        call: &AcceptedCall,
        outcome: Result<StudentMatch, LookupError>,
    ) -> Vec<Deferred> {
        self.debouncer.mark_api_completed(Some(&call.key), call.state);

        let student = outcome.unwrap_or_else(|e| {
            if matches!(e, LookupError::NotConfigured(_)) {
                debug!(phone_number = %call.key, error = %e, "lookup skipped");
            } else {
                warn!(phone_number = %call.key, error = %e, "lookup failed");
            }
            StudentMatch::none()
        });

        if self.store.show_match(&student) {
            debug!(phone_number = %call.key, "caller modal updated");
        }

        if call.state == CallState::Idle {
            return self.debouncer.handle_call_ended(
                Some(&call.key),
                &student,
                self.presenter.as_ref(),
            );
        }

        if should_show_notification_for_event(call.state, student.is_complete()) {
            if let Err(e) = self.presenter.show_notification(
                call.state,
                &call.key,
                student.student(),
                student.parent(),
            ) {
                warn!(phone_number = %call.key, error = %e, "failed to show notification");
            }
        }
        Vec::new()
    }

    /// Run a deferred action that has come due.
    pub fn fire(&mut self, deferred: &Deferred) -> bool {
        self.debouncer.run_deferred(deferred, self.presenter.as_ref())
    }

    /// Whether a deferred action still applies.
    #[must_use]
    pub fn is_current(&self, deferred: &Deferred) -> bool {
        self.debouncer.is_current(deferred)
    }

    /// Tie a timer task to its number so a newer call cancels it.
    pub fn attach_timer(&mut self, key: &str, timer: AbortHandle) -> bool {
        self.debouncer.attach_timer(key, timer)
    }

    /// Remove history entries older than the configured maximum age.
    pub fn sweep(&mut self) -> usize {
        let removed = self.debouncer.cleanup_old_history(self.max_history_age);
        if removed > 0 {
            debug!(removed, "swept stale call history");
        }
        removed
    }

    /// Hide the caller modal.
    pub fn dismiss_modal(&self) {
        self.store.dismiss();
    }

    /// Clear all notifications and history.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.presenter.clear_all_notifications() {
            warn!(error = %e, "failed to clear notifications on shutdown");
        }
        self.debouncer.clear();
    }

    /// The underlying debouncer.
    #[must_use]
    pub fn debouncer(&self) -> &CallDebouncer<C> {
        &self.debouncer
    }

    /// The current UI display state.
    #[must_use]
    pub fn display(&self) -> CallDisplay {
        self.store.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::debounce::DeferredAction;
    use crate::error::{Error, Result};
    use crate::notify::{Notice, RecordingPresenter};

    #[derive(Debug)]
    struct FailingPresenter;

    impl NotificationPresenter for FailingPresenter {
        fn show_notification(
            &self,
            _state: CallState,
            _phone_number: &str,
            _student_name: Option<&str>,
            _parent_name: Option<&str>,
        ) -> Result<()> {
            Err(Error::presentation("no channel"))
        }

        fn clear_notifications_for_number(&self, _phone_number: &str) -> Result<()> {
            Err(Error::presentation("no channel"))
        }

        fn clear_all_notifications(&self) -> Result<()> {
            Err(Error::presentation("no channel"))
        }
    }

    fn coordinator() -> (CallCoordinator<ManualClock>, RecordingPresenter, ManualClock) {
        crate::logging::init_test_logging();
        let clock = ManualClock::at_epoch();
        let presenter = RecordingPresenter::new();
        let (coordinator, _display) =
            CallCoordinator::from_config(&Config::default(), clock.clone(), Box::new(presenter.clone()));
        (coordinator, presenter, clock)
    }

    fn ringing(number: &str) -> CallEvent {
        CallEvent::with_number(CallState::Ringing, number)
    }

    #[test]
    fn test_ringing_without_match_still_notifies() {
        let (mut coordinator, presenter, _) = coordinator();
        let call = coordinator.begin(&ringing("021-555-0100")).unwrap();
        assert_eq!(call.key, "0215550100");

        let deferred = coordinator.settle(&call, Ok(StudentMatch::none()));
        assert!(deferred.is_empty());
        assert_eq!(presenter.shown_count(), 1);
        assert!(!coordinator.display().modal_visible);
    }

    #[test]
    fn test_offhook_without_match_is_silent() {
        let (mut coordinator, presenter, _) = coordinator();
        let event = CallEvent::with_number(CallState::Offhook, "0211234567");
        let call = coordinator.begin(&event).unwrap();
        coordinator.settle(&call, Ok(StudentMatch::none()));
        assert!(presenter.notices().is_empty());
    }

    #[test]
    fn test_offhook_with_match_notifies_and_shows_modal() {
        let (mut coordinator, presenter, _) = coordinator();
        let event = CallEvent::with_number(CallState::Offhook, "0211234567");
        let call = coordinator.begin(&event).unwrap();
        coordinator.settle(&call, Ok(StudentMatch::new("Amit", "Raj")));

        assert_eq!(presenter.shown_count(), 1);
        let display = coordinator.display();
        assert!(display.modal_visible);
        assert_eq!(display.student.unwrap().parent_name, "Raj");
    }

    #[test]
    fn test_lookup_error_counts_as_no_match() {
        let (mut coordinator, presenter, clock) = coordinator();
        let event = CallEvent::with_number(CallState::Offhook, "0211234567");
        let call = coordinator.begin(&event).unwrap();
        coordinator.settle(&call, Err(LookupError::Status(502)));

        assert!(presenter.notices().is_empty());
        assert!(!coordinator.debouncer().entry(Some("0211234567")).unwrap().api_in_progress);

        clock.advance(Duration::from_secs(3));
        assert!(coordinator.begin(&event).is_some());
    }

    #[test]
    fn test_second_event_rejected_while_lookup_outstanding() {
        let (mut coordinator, _, clock) = coordinator();
        let first = coordinator.begin(&ringing("0211234567")).unwrap();

        clock.advance(Duration::from_secs(5));
        let answered = CallEvent::with_number(CallState::Offhook, "021 123 4567");
        assert!(coordinator.begin(&answered).is_none());

        coordinator.settle(&first, Ok(StudentMatch::none()));
        assert!(coordinator.begin(&answered).is_some());
    }

    #[test]
    fn test_idle_goes_through_call_ended() {
        let (mut coordinator, presenter, _) = coordinator();
        let event = CallEvent::with_number(CallState::Idle, "0211234567");
        let call = coordinator.begin(&event).unwrap();
        let deferred = coordinator.settle(&call, Ok(StudentMatch::new("Amit", "Raj")));

        assert_eq!(presenter.shown_count(), 1);
        assert_eq!(deferred.len(), 2);

        let clear = deferred
            .iter()
            .find(|d| d.action == DeferredAction::ClearNotification)
            .unwrap();
        assert!(coordinator.fire(clear));
        assert_eq!(
            presenter.notices().last(),
            Some(&Notice::Cleared {
                phone_number: "0211234567".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_caller_needs_no_lookup() {
        let (mut coordinator, presenter, _) = coordinator();
        let call = coordinator
            .begin(&CallEvent::new(CallState::Ringing, None::<String>))
            .unwrap();
        assert!(!call.needs_lookup());

        coordinator.settle(&call, Ok(StudentMatch::none()));
        assert!(matches!(
            &presenter.notices()[0],
            Notice::Shown { body, .. } if body == "Call from: Unknown"
        ));
    }

    #[test]
    fn test_presentation_failures_are_swallowed() {
        crate::logging::init_test_logging();
        let clock = ManualClock::at_epoch();
        let (mut coordinator, _) =
            CallCoordinator::from_config(&Config::default(), clock, Box::new(FailingPresenter));

        let call = coordinator.begin(&ringing("1")).unwrap();
        assert!(coordinator.settle(&call, Ok(StudentMatch::none())).is_empty());

        let idle = CallEvent::with_number(CallState::Idle, "2");
        let call = coordinator.begin(&idle).unwrap();
        let deferred = coordinator.settle(&call, Ok(StudentMatch::new("Amit", "Raj")));
        for d in &deferred {
            assert!(coordinator.fire(d));
        }
        coordinator.shutdown();
        assert!(coordinator.debouncer().is_empty());
    }

    #[test]
    fn test_begin_sweeps_old_history() {
        let (mut coordinator, _, clock) = coordinator();
        let call = coordinator.begin(&ringing("1")).unwrap();
        coordinator.settle(&call, Ok(StudentMatch::none()));

        clock.advance(Duration::from_secs(61 * 60));
        coordinator.begin(&ringing("2"));
        assert!(coordinator.debouncer().entry(Some("1")).is_none());
    }

    #[test]
    fn test_lookup_request_uses_key() {
        let call = AcceptedCall {
            key: "0211234567".to_string(),
            state: CallState::Outgoing,
        };
        assert!(call.needs_lookup());
        assert_eq!(call.lookup_request().phone_number, "0211234567");
        assert_eq!(call.lookup_request().event, CallState::Outgoing);
    }

    #[test]
    fn test_dismiss_and_shutdown() {
        let (mut coordinator, presenter, _) = coordinator();
        let event = CallEvent::with_number(CallState::Offhook, "1");
        let call = coordinator.begin(&event).unwrap();
        coordinator.settle(&call, Ok(StudentMatch::new("Amit", "Raj")));

        coordinator.dismiss_modal();
        assert!(!coordinator.display().modal_visible);

        coordinator.shutdown();
        assert_eq!(presenter.notices().last(), Some(&Notice::ClearedAll));
        assert!(coordinator.debouncer().is_empty());
    }
}
