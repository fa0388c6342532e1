//! One-shot session outcome
//!
//! Ready, stopped and failed share a single-assignment slot. Whichever fires
//! first is the outcome the dialer observes; every later fire is rejected.

use crate::error::ForwardError;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// A local port bound by the forwarder and the remote port it maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardedPort {
    pub local: u16,
    pub remote: u16,
}

/// How the setup of a tunnel session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// Local listeners are bound and accepting
    Ready { ports: Vec<ForwardedPort> },
    /// Forwarding ended before it became ready
    Stopped,
    /// Forwarding failed before it became ready
    Failed(ForwardError),
}

#[derive(Clone)]
pub(crate) struct OutcomeSender {
    slot: Arc<Mutex<Option<oneshot::Sender<SessionOutcome>>>>,
}

impl OutcomeSender {
    /// Deliver `outcome` if nothing has been delivered yet
    ///
    /// Gives the outcome back when the slot was already used or the
    /// receiving side is gone.
    pub(crate) fn fire(&self, outcome: SessionOutcome) -> Result<(), SessionOutcome> {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(outcome),
            None => Err(outcome),
        }
    }

    pub(crate) fn has_fired(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.is_none(),
            Err(_) => true,
        }
    }
}

pub(crate) fn outcome_slot() -> (OutcomeSender, oneshot::Receiver<SessionOutcome>) {
    let (tx, rx) = oneshot::channel();
    let sender = OutcomeSender {
        slot: Arc::new(Mutex::new(Some(tx))),
    };
    (sender, rx)
}

/// Handed to a forwarder so it can report that its local ports are bound
///
/// Consumed on use, so a forwarder can only report readiness once.
pub struct ReadySignal {
    sender: OutcomeSender,
}

impl ReadySignal {
    pub(crate) fn new(sender: OutcomeSender) -> Self {
        Self { sender }
    }

    /// Report the bound ports. Returns false if the session already has an outcome.
    pub fn ready(self, ports: Vec<ForwardedPort>) -> bool {
        self.sender.fire(SessionOutcome::Ready { ports }).is_ok()
    }
}

impl std::fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySignal")
            .field("fired", &self.sender.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_fire_wins() {
        let (sender, rx) = outcome_slot();
        let ready = ReadySignal::new(sender.clone());

        assert!(sender.fire(SessionOutcome::Stopped).is_ok());
        assert!(!ready.ready(vec![ForwardedPort {
            local: 1234,
            remote: 80
        }]));
        assert!(sender
            .fire(SessionOutcome::Failed(ForwardError::Transport("late".into())))
            .is_err());

        assert!(matches!(rx.await, Ok(SessionOutcome::Stopped)));
    }

    #[tokio::test]
    async fn test_ready_carries_ports() {
        let (sender, rx) = outcome_slot();
        let ready = ReadySignal::new(sender.clone());
        assert!(!sender.has_fired());

        let port = ForwardedPort {
            local: 54321,
            remote: 9090,
        };
        assert!(ready.ready(vec![port]));
        assert!(sender.has_fired());

        match rx.await.unwrap() {
            SessionOutcome::Ready { ports } => assert_eq!(ports, vec![port]),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_fire_after_receiver_dropped() {
        let (sender, rx) = outcome_slot();
        drop(rx);
        assert!(sender.fire(SessionOutcome::Stopped).is_err());
    }
}
