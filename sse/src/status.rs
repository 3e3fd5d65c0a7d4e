//! Push-based connection health projection.
//!
//! The connection task reports its internal [`ConnectionState`] through a
//! [`StatusReporter`]; passive observers hold a [`StatusPublisher`] and only ever
//! see the projected [`ConnectionStatus`]. A report is published only when the
//! projection changes, so a retry going from disconnected to connecting is not a
//! new value.

use std::sync::atomic::{AtomicBool, Ordering};

use events::{ConnectionState, ConnectionStatus, ResourceId};
use log::*;
use tokio::sync::{broadcast, watch};

/// Number of transitions buffered for observers that fall behind.
const TRANSITION_BUFFER: usize = 64;

type Snapshot = (ConnectionState, ConnectionStatus);

/// Write side of a connection's status, owned by the connection manager.
pub(crate) struct StatusReporter {
    resource_id: ResourceId,
    max_attempts: u32,
    current: watch::Sender<Snapshot>,
    transitions: broadcast::Sender<ConnectionStatus>,
    closed: AtomicBool,
}

impl StatusReporter {
    pub(crate) fn new(resource_id: ResourceId, max_attempts: u32) -> Self {
        let initial = ConnectionState::Connecting;
        let (current, _) = watch::channel((
            initial,
            ConnectionStatus::new(initial, 0, max_attempts),
        ));
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);

        Self {
            resource_id,
            max_attempts,
            current,
            transitions,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn publisher(&self) -> StatusPublisher {
        StatusPublisher {
            resource_id: self.resource_id.clone(),
            current: self.current.subscribe(),
            transitions: self.transitions.clone(),
        }
    }

    /// Record a new internal state. Ignored once the connection has been closed.
    pub(crate) fn report(&self, state: ConnectionState, reconnect_attempts: u32) {
        self.publish(state, reconnect_attempts, false);
    }

    /// Publish the terminal closed state; later reports are discarded.
    pub(crate) fn close(&self) {
        self.publish(ConnectionState::Closed, 0, true);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.current.borrow().0
    }

    pub(crate) fn snapshot(&self) -> ConnectionStatus {
        self.current.borrow().1
    }

    // The closed flag is read and set under the watch lock, so a report racing a
    // close either lands before `Closed` or not at all.
    fn publish(&self, state: ConnectionState, reconnect_attempts: u32, closing: bool) {
        let next = ConnectionStatus::new(state, reconnect_attempts, self.max_attempts);

        self.current.send_if_modified(|(current_state, status)| {
            let was_closed = if closing {
                self.closed.swap(true, Ordering::SeqCst)
            } else {
                self.closed.load(Ordering::SeqCst)
            };
            if was_closed {
                return false;
            }

            *current_state = state;
            if *status == next {
                return false;
            }
            *status = next;
            trace!("Status of {} is now {}", self.resource_id, next);
            // No receivers is not an error; nobody is watching transitions
            let _ = self.transitions.send(next);
            true
        });
    }
}

/// Read-only view of one connection's health.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    resource_id: ResourceId,
    current: watch::Receiver<Snapshot>,
    transitions: broadcast::Sender<ConnectionStatus>,
}

impl StatusPublisher {
    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    /// The latest known status.
    pub fn snapshot(&self) -> ConnectionStatus {
        self.current.borrow().1
    }

    /// Wait for the status to change and return the new value.
    ///
    /// Returns `None` once the connection has been dropped by its manager and every
    /// change has been observed.
    pub async fn changed(&mut self) -> Option<ConnectionStatus> {
        self.current.changed().await.ok()?;
        Some(self.current.borrow_and_update().1)
    }

    /// Every status published from now on, in order.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.transitions.subscribe()
    }
}
