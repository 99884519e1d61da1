//! The live call monitor.
//!
//! [`CallMonitor`] is a single task that owns the coordinator (and through it
//! the debouncer's history map). Call events, lookup results and due timers
//! all arrive as messages and are handled one at a time, so the map is never
//! touched concurrently. Lookups run in their own tasks and report back
//! through the same queue.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::call::CallEvent;
use crate::clock::{elapsed_between, Clock};
use crate::config::Config;
use crate::coordinator::{AcceptedCall, CallCoordinator};
use crate::debounce::Deferred;
use crate::directory::{LookupError, StudentDirectory};
use crate::error::{Error, Result};
use crate::notify::NotificationPresenter;
use crate::policy::StudentMatch;
use crate::store::CallDisplay;

/// Commands accepted by the monitor.
#[derive(Debug)]
pub enum Command {
    /// A call-state change from the platform.
    Event(CallEvent),
    /// Hide the caller modal.
    DismissModal,
    /// Report the monitor's status.
    Status(oneshot::Sender<MonitorStatus>),
}

/// Snapshot of the monitor's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    /// Phone numbers with a history entry.
    pub tracked_numbers: usize,
    /// Lookups issued but not yet settled.
    pub lookups_in_flight: usize,
}

/// Messages the monitor sends to itself.
#[derive(Debug)]
enum Internal {
    Settled {
        call: AcceptedCall,
        outcome: std::result::Result<StudentMatch, LookupError>,
    },
    Due(Deferred),
}

/// Reports a lookup's outcome exactly once.
///
/// Dropping the guard without calling [`settle`](Self::settle) (for example
/// because the lookup task panicked or was cancelled) reports
/// [`LookupError::Abandoned`], so a number is never left blocked.
#[derive(Debug)]
struct SettleGuard {
    tx: mpsc::UnboundedSender<Internal>,
    call: Option<AcceptedCall>,
}

impl SettleGuard {
    fn new(tx: mpsc::UnboundedSender<Internal>, call: AcceptedCall) -> Self {
        Self {
            tx,
            call: Some(call),
        }
    }

    fn settle(mut self, outcome: std::result::Result<StudentMatch, LookupError>) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: std::result::Result<StudentMatch, LookupError>) {
        if let Some(call) = self.call.take() {
            // A closed channel means the monitor is gone; nothing left to unblock.
            let _ = self.tx.send(Internal::Settled { call, outcome });
        }
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.send(Err(LookupError::Abandoned));
    }
}

/// Cloneable handle for feeding the monitor.
#[derive(Debug, Clone)]
pub struct CallMonitorHandle {
    commands: mpsc::Sender<Command>,
    display: watch::Receiver<CallDisplay>,
}

impl CallMonitorHandle {
    /// Submit a call event, waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MonitorClosed`] if the monitor has stopped.
    pub async fn submit(&self, event: CallEvent) -> Result<()> {
        self.send(Command::Event(event)).await
    }

    /// Submit a call event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] if the queue is full or
    /// [`Error::MonitorClosed`] if the monitor has stopped.
    pub fn try_submit(&self, event: CallEvent) -> Result<()> {
        self.commands
            .try_send(Command::Event(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull,
                mpsc::error::TrySendError::Closed(_) => Error::MonitorClosed,
            })
    }

    /// Hide the caller modal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MonitorClosed`] if the monitor has stopped.
    pub async fn dismiss_modal(&self) -> Result<()> {
        self.send(Command::DismissModal).await
    }

    /// Ask the monitor for its status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MonitorClosed`] if the monitor has stopped.
    pub async fn status(&self) -> Result<MonitorStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status(tx)).await?;
        rx.await.map_err(|_| Error::MonitorClosed)
    }

    /// A receiver for the UI display state.
    #[must_use]
    pub fn display(&self) -> watch::Receiver<CallDisplay> {
        self.display.clone()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::MonitorClosed)
    }
}

/// Single-task owner of the call event pipeline.
///
/// Events submitted before [`run`](Self::run) starts are buffered in the
/// queue and processed in order once it does. The monitor stops when every
/// [`CallMonitorHandle`] has been dropped; in-flight lookups then complete
/// into the void.
#[derive(Debug)]
pub struct CallMonitor<C> {
    coordinator: CallCoordinator<C>,
    directory: Arc<dyn StudentDirectory>,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    sweep_interval: Duration,
}

impl<C: Clock + 'static> CallMonitor<C> {
    /// Create a monitor and its handle.
    #[must_use]
    pub fn new(
        config: &Config,
        clock: C,
        presenter: Box<dyn NotificationPresenter>,
        directory: Arc<dyn StudentDirectory>,
    ) -> (Self, CallMonitorHandle) {
        let (coordinator, display) = CallCoordinator::from_config(config, clock, presenter);
        let (commands_tx, commands) = mpsc::channel(config.service.queue_capacity);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let monitor = Self {
            coordinator,
            directory,
            commands,
            internal_tx,
            internal_rx,
            sweep_interval: config.sweep_interval(),
        };
        let handle = CallMonitorHandle {
            commands: commands_tx,
            display,
        };
        (monitor, handle)
    }

    /// Process commands until every handle is dropped.
    pub async fn run(mut self) {
        info!("call monitor started");
        let mut sweep = interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                }
                _ = sweep.tick() => {
                    self.coordinator.sweep();
                }
            }
        }

        self.coordinator.shutdown();
        info!("call monitor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Event(event) => self.handle_event(&event),
            Command::DismissModal => self.coordinator.dismiss_modal(),
            Command::Status(reply) => {
                let debouncer = self.coordinator.debouncer();
                let _ = reply.send(MonitorStatus {
                    tracked_numbers: debouncer.len(),
                    lookups_in_flight: debouncer.lookups_in_flight(),
                });
            }
        }
    }

    fn handle_event(&mut self, event: &CallEvent) {
        trace!(?event, "call event received");
        let Some(call) = self.coordinator.begin(event) else {
            return;
        };

        let guard = SettleGuard::new(self.internal_tx.clone(), call.clone());
        if !call.needs_lookup() {
            guard.settle(Ok(StudentMatch::none()));
            return;
        }

        let directory = Arc::clone(&self.directory);
        tokio::spawn(async move {
            let outcome = directory.lookup(&call.key, call.state).await;
            guard.settle(outcome);
        });
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Settled { call, outcome } => {
                let deferred = self.coordinator.settle(&call, outcome);
                self.schedule(deferred);
            }
            Internal::Due(deferred) => {
                if self.coordinator.fire(&deferred) {
                    debug!(phone_number = %deferred.key, action = %deferred.action, "deferred action ran");
                }
            }
        }
    }

    fn schedule(&mut self, deferred: Vec<Deferred>) {
        for item in deferred {
            let delay = elapsed_between(self.coordinator.debouncer().clock().now(), item.due);
            let key = item.key.clone();
            let tx = self.internal_tx.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Internal::Due(item));
            });
            self.coordinator.attach_timer(&key, task.abort_handle());
        }
    }
}
