//! Status Channel
//!
//! Broadcast stream of [`SessionStatus`] updates. Publishing never waits on
//! subscribers; a subscriber sees only what is published after it
//! subscribed. A subscriber that falls more than `capacity` events behind
//! skips the oldest ones and keeps going.

use crate::domain::models::SessionStatus;
use tokio::sync::broadcast;
use tracing::{trace, warn};

pub const DEFAULT_CAPACITY: usize = 64;

pub struct StatusChannel<P> {
    sender: broadcast::Sender<SessionStatus<P>>,
}

impl<P> Clone for StatusChannel<P> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<P: Clone + Send + std::fmt::Debug + 'static> StatusChannel<P> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to every current subscriber, returning how many received it
    pub fn publish(&self, status: SessionStatus<P>) -> usize {
        trace!("Publishing status: {:?}", status);
        // No subscribers is fine: the UI may not be attached yet
        self.sender.send(status).unwrap_or(0)
    }

    pub fn subscribe(&self) -> StatusStream<P> {
        StatusStream {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<P: Clone + Send + std::fmt::Debug + 'static> Default for StatusChannel<P> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One subscriber's view of a [`StatusChannel`]. Dropping it unsubscribes.
pub struct StatusStream<P> {
    receiver: broadcast::Receiver<SessionStatus<P>>,
}

impl<P: Clone> StatusStream<P> {
    /// Next status, or `None` once every publisher is gone
    pub async fn recv(&mut self) -> Option<SessionStatus<P>> {
        loop {
            match self.receiver.recv().await {
                Ok(status) => return Some(status),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Status subscriber lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published status without waiting
    pub fn try_recv(&mut self) -> Option<SessionStatus<P>> {
        loop {
            match self.receiver.try_recv() {
                Ok(status) => return Some(status),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Status subscriber lagged, skipped {} updates", skipped);
                }
                Err(_) => return None,
            }
        }
    }
}
