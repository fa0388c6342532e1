//! Per-dial cancellation and deadline

use crate::error::DialError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller context for a single dial
///
/// Governs the locator lookup, the readiness wait, the wait for the tunnel
/// outcome and the final loopback dial. It never stops a tunnel that has
/// already been handed out inside a connection.
#[derive(Debug, Clone, Default)]
pub struct DialContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl DialContext {
    /// A context that is never cancelled and has no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// A context cancelled together with `token`
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// Set a deadline `timeout` from now, keeping any earlier deadline
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set an absolute deadline, keeping any earlier deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the error the context is finished with, if any
    pub fn err(&self) -> Option<DialError> {
        if self.cancel.is_cancelled() {
            return Some(DialError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DialError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drive `fut` until it completes or the context finishes
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, DialError>
    where
        F: Future,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DialError::Cancelled),
            _ = deadline => Err(DialError::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}
