//! `callwatch` - Call-state debouncing and caller identification
//!
//! The platform's telephony layer reports each physical call as a burst of
//! noisy, repeated state changes. This library filters that stream per phone
//! number, looks accepted callers up in a student directory, and decides which
//! notifications to show and when to clear them.
//!
//! The pieces, bottom-up:
//!
//! - [`phone`] turns raw numbers into history keys.
//! - [`debounce`] holds the per-number state machine.
//! - [`coordinator`] runs one event through debouncer, lookup and presenter.
//! - [`service`] is the live single-task monitor; [`replay`] drives the same
//!   coordinator in virtual time.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod call;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod directory;
pub mod error;
pub mod logging;
pub mod notify;
pub mod phone;
pub mod policy;
pub mod replay;
pub mod service;
pub mod store;

pub use call::{CallEvent, CallState};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::Config;
pub use coordinator::{AcceptedCall, CallCoordinator};
pub use debounce::{CallDebouncer, DebounceSettings, Deferred, DeferredAction};
pub use directory::{HttpDirectory, LookupError, StaticDirectory, StudentDirectory};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use notify::{DuplicateGuard, LogPresenter, NotificationPresenter};
pub use policy::{should_show_notification_for_event, StudentMatch};
pub use service::{CallMonitor, CallMonitorHandle, MonitorStatus};
pub use store::CallDisplay;
