//! Deterministic replay of recorded call events.
//!
//! A recording is a JSON-lines file, one event per line:
//!
//! ```text
//! {"atMs": 0, "state": "RINGING", "phoneNumber": "021-555-0100"}
//! {"atMs": 2500, "state": "OFFHOOK", "phoneNumber": "021-555-0100"}
//! ```
//!
//! Replay runs the same coordinator as the live monitor against a
//! [`ManualClock`] positioned at each event's offset from the Unix epoch.
//! Lookups are awaited inline and deferred actions fire in due order between
//! events, so the outcome depends only on the recording and the directory.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::call::{CallEvent, CallState};
use crate::clock::{elapsed_between, offset, Clock, ManualClock};
use crate::config::Config;
use crate::coordinator::CallCoordinator;
use crate::debounce::{Deferred, DeferredAction};
use crate::directory::{LookupRequest, StudentDirectory};
use crate::error::{Error, Result};
use crate::notify::{Notice, RecordingPresenter};
use crate::phone::normalize;
use crate::policy::StudentMatch;
use crate::store::CallDisplay;

/// One recorded call event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEvent {
    /// Milliseconds since the start of the recording.
    pub at_ms: u64,
    /// Platform state string.
    pub state: CallState,
    /// Raw phone number, if the platform supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl ReplayEvent {
    /// The call event this record describes.
    #[must_use]
    pub fn event(&self) -> CallEvent {
        CallEvent::new(self.state, self.phone_number.as_deref())
    }
}

/// Parse a JSON-lines recording.
///
/// Blank lines and lines starting with `#` are ignored.
///
/// # Errors
///
/// Returns [`Error::EventParse`] naming the first line that is not a valid
/// event.
pub fn parse_events(input: &str) -> Result<Vec<ReplayEvent>> {
    let mut events = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event = serde_json::from_str(line).map_err(|e| Error::EventParse {
            line: index + 1,
            message: e.to_string(),
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Read and parse a recording file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_events(path: &Path) -> Result<Vec<ReplayEvent>> {
    parse_events(&std::fs::read_to_string(path)?)
}

/// What happened at one point of a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplayStep {
    /// The event was accepted and settled.
    Accepted {
        /// Virtual time in milliseconds.
        at_ms: u64,
        /// Normalized phone number.
        key: String,
        /// Event state.
        state: CallState,
        /// Directory request issued, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        request: Option<LookupRequest>,
        /// Whether the lookup produced a complete match.
        matched: bool,
    },
    /// The event was dropped by the debouncer.
    Rejected {
        /// Virtual time in milliseconds.
        at_ms: u64,
        /// Normalized phone number.
        key: String,
        /// Event state.
        state: CallState,
    },
    /// A deferred action ran.
    Fired {
        /// Virtual time in milliseconds.
        at_ms: u64,
        /// Normalized phone number.
        key: String,
        /// The action.
        action: DeferredAction,
    },
    /// A deferred action was superseded by a newer call.
    Skipped {
        /// Virtual time in milliseconds.
        at_ms: u64,
        /// Normalized phone number.
        key: String,
        /// The action.
        action: DeferredAction,
    },
}

impl ReplayStep {
    /// Virtual time of the step.
    #[must_use]
    pub fn at_ms(&self) -> u64 {
        match self {
            Self::Accepted { at_ms, .. }
            | Self::Rejected { at_ms, .. }
            | Self::Fired { at_ms, .. }
            | Self::Skipped { at_ms, .. } => *at_ms,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::Fired { .. } => "fired",
            Self::Skipped { .. } => "skipped",
        }
    }

    fn key(&self) -> &str {
        match self {
            Self::Accepted { key, .. }
            | Self::Rejected { key, .. }
            | Self::Fired { key, .. }
            | Self::Skipped { key, .. } => key,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Accepted { state, matched, .. } => {
                if *matched {
                    format!("{state} (matched)")
                } else {
                    state.to_string()
                }
            }
            Self::Rejected { state, .. } => state.to_string(),
            Self::Fired { action, .. } | Self::Skipped { action, .. } => action.to_string(),
        }
    }
}

/// The full outcome of a replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    /// Steps in virtual-time order.
    pub steps: Vec<ReplayStep>,
    /// Notifications presented along the way.
    pub notifications: Vec<Notice>,
    /// UI display state at the end.
    pub display: CallDisplay,
    /// History entries left at the end.
    pub tracked_numbers: usize,
}

impl ReplayReport {
    /// Number of accepted events.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, ReplayStep::Accepted { .. }))
            .count()
    }

    /// Number of rejected events.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, ReplayStep::Rejected { .. }))
            .count()
    }

    /// Human-readable table of steps.
    #[must_use]
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:>10}  {:<9} {:<16} DETAIL", "AT (ms)", "OUTCOME", "NUMBER");
        for step in &self.steps {
            let _ = writeln!(
                out,
                "{:>10}  {:<9} {:<16} {}",
                step.at_ms(),
                step.label(),
                step.key(),
                step.detail()
            );
        }
        let _ = writeln!(
            out,
            "\n{} accepted, {} rejected, {} notifications, {} numbers tracked",
            self.accepted(),
            self.rejected(),
            self.notifications.len(),
            self.tracked_numbers
        );
        out
    }
}

/// Replay a recording against a directory.
///
/// Events are processed in `atMs` order; events sharing a timestamp keep
/// their recorded order. Deferred actions due at or before an event's time
/// run before it; any still pending after the last event run at the end.
pub async fn replay(
    config: &Config,
    directory: &dyn StudentDirectory,
    events: &[ReplayEvent],
) -> ReplayReport {
    let clock = ManualClock::at_epoch();
    let start = clock.now();
    let presenter = RecordingPresenter::new();
    let (mut coordinator, display) =
        CallCoordinator::from_config(config, clock.clone(), Box::new(presenter.clone()));

    let mut ordered = events.to_vec();
    ordered.sort_by_key(|e| e.at_ms);

    let mut pending: Vec<Deferred> = Vec::new();
    let mut steps = Vec::with_capacity(ordered.len());

    for record in &ordered {
        let at = offset(start, Duration::from_millis(record.at_ms));
        run_due(&mut coordinator, &clock, start, &mut pending, Some(at), &mut steps);
        clock.set(at);

        let event = record.event();
        let Some(call) = coordinator.begin(&event) else {
            steps.push(ReplayStep::Rejected {
                at_ms: record.at_ms,
                key: normalize(event.phone_number()),
                state: event.state,
            });
            continue;
        };

        let request = call.needs_lookup().then(|| call.lookup_request());
        let outcome = if call.needs_lookup() {
            directory.lookup(&call.key, call.state).await
        } else {
            Ok(StudentMatch::none())
        };
        let matched = outcome.as_ref().is_ok_and(StudentMatch::is_complete);

        steps.push(ReplayStep::Accepted {
            at_ms: record.at_ms,
            key: call.key.clone(),
            state: call.state,
            request,
            matched,
        });
        pending.extend(coordinator.settle(&call, outcome));
    }

    run_due(&mut coordinator, &clock, start, &mut pending, None, &mut steps);

    let tracked_numbers = coordinator.debouncer().len();
    let report = ReplayReport {
        steps,
        notifications: presenter.take(),
        display: display.borrow().clone(),
        tracked_numbers,
    };
    debug!(
        accepted = report.accepted(),
        rejected = report.rejected(),
        "replay finished"
    );
    report
}

/// Run pending actions due at or before `until` (all of them if `None`).
fn run_due(
    coordinator: &mut CallCoordinator<ManualClock>,
    clock: &ManualClock,
    start: DateTime<Utc>,
    pending: &mut Vec<Deferred>,
    until: Option<DateTime<Utc>>,
    steps: &mut Vec<ReplayStep>,
) {
    pending.sort_by_key(|d| std::cmp::Reverse((d.due, d.generation)));
    while let Some(next) = pending.last() {
        if until.is_some_and(|limit| next.due > limit) {
            break;
        }
        let Some(deferred) = pending.pop() else { break };

        if deferred.due > clock.now() {
            clock.set(deferred.due);
        }
        let at_ms = millis(elapsed_between(start, deferred.due));
        let step = if coordinator.fire(&deferred) {
            ReplayStep::Fired {
                at_ms,
                key: deferred.key,
                action: deferred.action,
            }
        } else {
            ReplayStep::Skipped {
                at_ms,
                key: deferred.key,
                action: deferred.action,
            }
        };
        steps.push(step);
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
