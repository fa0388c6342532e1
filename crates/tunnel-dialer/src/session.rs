//! Tunnel session lifecycle
//!
//! A session owns one forwarding task. It moves through
//! `SettingUp -> Ready | Stopped | Failed` exactly once and ends in
//! `TornDown` after [`TunnelSession::teardown`].

use crate::error::{BoxError, ForwardError};
use crate::forwarder::{ForwardContext, LocalBinding, PortForwarder};
use crate::signal::{outcome_slot, ForwardedPort, OutcomeSender, ReadySignal, SessionOutcome};
use crate::sink::LogSinks;
use crate::workload::WorkloadIdentity;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Opens the forwarding side of a tunnel to a workload's container
///
/// Implementations build the authenticated control-plane transport and
/// perform the protocol upgrade; the returned forwarder is started by the
/// session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_session(
        &self,
        workload: &WorkloadIdentity,
        binding: &LocalBinding,
        logs: &LogSinks,
    ) -> Result<Box<dyn PortForwarder>, BoxError>;
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    SettingUp,
    Ready,
    Stopped,
    Failed,
    TornDown,
}

/// One tunnel and its background forwarding task
pub struct TunnelSession {
    forwarder: Option<Box<dyn PortForwarder>>,
    sender: Option<OutcomeSender>,
    outcome: Option<oneshot::Receiver<SessionOutcome>>,
    task: Option<JoinHandle<()>>,
    stop: CancellationToken,
    logs: LogSinks,
    state: SessionState,
    ports: Vec<ForwardedPort>,
    teardown_timeout: Duration,
}

impl TunnelSession {
    /// Wrap an opened forwarder; nothing runs until [`start`](Self::start)
    pub fn new(
        forwarder: Box<dyn PortForwarder>,
        logs: LogSinks,
        teardown_timeout: Duration,
    ) -> Self {
        let (sender, outcome) = outcome_slot();
        Self {
            forwarder: Some(forwarder),
            sender: Some(sender),
            outcome: Some(outcome),
            task: None,
            stop: CancellationToken::new(),
            logs,
            state: SessionState::SettingUp,
            ports: Vec::new(),
            teardown_timeout,
        }
    }

    /// Spawn the forwarding task. Later calls do nothing.
    pub fn start(&mut self) {
        let (Some(forwarder), Some(sender)) = (self.forwarder.take(), self.sender.take()) else {
            return;
        };

        let ctx = ForwardContext {
            ready: ReadySignal::new(sender.clone()),
            stop: self.stop.clone(),
            out: self.logs.out(),
            err: self.logs.err(),
        };
        let logs = self.logs.clone();

        self.task = Some(tokio::spawn(async move {
            match forwarder.forward(ctx).await {
                Ok(()) => {
                    if sender.fire(SessionOutcome::Stopped).is_ok() {
                        debug!("Port forwarding stopped before becoming ready");
                    }
                }
                Err(e) => {
                    if let Err(SessionOutcome::Failed(e)) = sender.fire(SessionOutcome::Failed(e)) {
                        logs.log_error(&format!("port forwarding failed: {}", e));
                    }
                }
            }
        }));
    }

    /// Wait for the first of ready, stopped or failed
    ///
    /// Cancel safe: dropping the future leaves the session in `SettingUp`.
    /// Once an outcome has been taken, further calls report `Stopped`.
    pub async fn await_outcome(&mut self) -> SessionOutcome {
        if self.forwarder.is_some() {
            return SessionOutcome::Failed(ForwardError::Transport(
                "session was not started".to_string(),
            ));
        }
        let Some(rx) = self.outcome.as_mut() else {
            return SessionOutcome::Stopped;
        };

        let outcome = match rx.await {
            Ok(outcome) => outcome,
            // Every sender is gone without firing: the task panicked
            Err(_) => SessionOutcome::Failed(ForwardError::Transport(
                "forwarding task exited without reporting an outcome".to_string(),
            )),
        };
        self.outcome = None;

        self.state = match &outcome {
            SessionOutcome::Ready { ports } => {
                self.ports = ports.clone();
                SessionState::Ready
            }
            SessionOutcome::Stopped => SessionState::Stopped,
            SessionOutcome::Failed(_) => SessionState::Failed,
        };
        outcome
    }

    /// Ports bound by the forwarder, available once the session is ready
    pub fn ports(&self) -> Option<&[ForwardedPort]> {
        match self.state {
            SessionState::Ready => Some(&self.ports),
            _ => None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_torn_down(&self) -> bool {
        self.state == SessionState::TornDown
    }

    /// Stop forwarding and wait for the task to exit
    ///
    /// Idempotent and safe before `start`. The join is bounded by the
    /// configured teardown timeout; a task that outlives it is aborted.
    pub async fn teardown(&mut self) {
        if self.state == SessionState::TornDown {
            return;
        }
        self.state = SessionState::TornDown;
        self.stop.cancel();
        self.forwarder = None;
        self.sender = None;

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.teardown_timeout, &mut task).await {
                Ok(Ok(())) => debug!("Forwarding task exited"),
                Ok(Err(e)) if e.is_panic() => error!("Forwarding task panicked: {}", e),
                Ok(Err(_)) => debug!("Forwarding task was cancelled"),
                Err(_) => {
                    warn!(
                        "Forwarding task did not exit within {:?}, aborting",
                        self.teardown_timeout
                    );
                    task.abort();
                }
            }
        }

        self.outcome = None;
        self.ports.clear();
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        if self.state != SessionState::TornDown {
            debug!("Tunnel session dropped without teardown, stopping forwarding");
            self.stop.cancel();
        }
    }
}

impl std::fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("state", &self.state)
            .field("ports", &self.ports)
            .field("started", &self.task.is_some())
            .finish()
    }
}
