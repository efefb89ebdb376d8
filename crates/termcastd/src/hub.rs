//! Fan-out hub: one-to-many distribution of a session's output stream.
//!
//! Built on a tokio broadcast channel: every subscriber gets an independent,
//! bounded buffer, and a subscriber that stops draining loses its *own* oldest
//! chunks (lag) without ever blocking the PTY reader or other subscribers.
//! Subscribers that lagged can issue a `history` request to recover.

use tokio::sync::broadcast;
use tracing::debug;

/// One event on a session's output stream.
#[derive(Debug, Clone)]
pub enum OutputEvent {
    /// Raw bytes read from the PTY.
    Data(Vec<u8>),

    /// The session reached a terminal state; no more output will follow.
    Closed,
}

/// Per-session broadcast hub.
pub struct FanoutHub {
    sender: broadcast::Sender<OutputEvent>,
}

impl FanoutHub {
    /// Creates a hub whose subscribers each buffer up to `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Registers a new subscriber.
    ///
    /// The subscription only observes chunks broadcast after this call, which
    /// is what makes the snapshot-then-subscribe handoff gap-free when both
    /// happen in the same manager actor turn.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            skipped: 0,
        }
    }

    /// Delivers a chunk to every current subscriber. Never blocks.
    pub fn broadcast(&self, chunk: Vec<u8>) {
        // Send fails only when there are no subscribers; that's fine.
        let _ = self.sender.send(OutputEvent::Data(chunk));
    }

    /// Pushes the terminal notification to all subscribers.
    pub fn close(&self) {
        let _ = self.sender.send(OutputEvent::Closed);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A live view onto one session's output stream.
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<OutputEvent>,
    skipped: u64,
}

impl Subscription {
    /// Waits for the next output chunk.
    ///
    /// Returns `None` once the session has terminated (or the hub is gone).
    /// Chunks dropped due to lag are skipped silently, per the best-effort
    /// delivery contract; `skipped()` reports how many.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.receiver.recv().await {
                Ok(OutputEvent::Data(chunk)) => return Some(chunk),
                Ok(OutputEvent::Closed) => return None,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.skipped += n;
                    debug!(skipped = n, "Subscriber lagged, dropped oldest chunks");
                }
            }
        }
    }

    /// Total chunks this subscriber has lost to lag.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn subscriber_receives_in_order() {
        let hub = FanoutHub::new(16);
        let mut sub = hub.subscribe();

        hub.broadcast(b"one".to_vec());
        hub.broadcast(b"two".to_vec());

        assert_eq!(sub.next().await, Some(b"one".to_vec()));
        assert_eq!(sub.next().await, Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn late_joiner_sees_only_later_chunks() {
        let hub = FanoutHub::new(16);

        hub.broadcast(b"early".to_vec());
        let mut late = hub.subscribe();
        hub.broadcast(b"late".to_vec());
        hub.close();

        assert_eq!(late.next().await, Some(b"late".to_vec()));
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let hub = FanoutHub::new(4);
        let mut sub = hub.subscribe();
        hub.close();
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn dropping_hub_ends_the_stream() {
        let hub = FanoutHub::new(4);
        let mut sub = hub.subscribe();
        drop(hub);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_and_does_not_block_others() {
        let hub = FanoutHub::new(4);
        let mut slow = hub.subscribe();

        // Ten chunks into a four-chunk buffer: the oldest six are dropped
        // for the non-draining subscriber.
        for i in 0..10u8 {
            hub.broadcast(vec![i]);
        }

        // The slow subscriber resumes at the oldest retained chunk.
        let first = slow.next().await.expect("retained chunk");
        assert_eq!(first, vec![6]);
        assert_eq!(slow.skipped(), 6);

        // A subscriber that joins after the burst is unaffected, and the
        // recovered slow subscriber keeps going without further loss.
        let mut fresh = hub.subscribe();
        hub.broadcast(b"live".to_vec());
        assert_eq!(fresh.next().await, Some(b"live".to_vec()));
        assert_eq!(slow.next().await, Some(vec![7]));
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_fine() {
        let hub = FanoutHub::new(4);
        hub.broadcast(b"nobody home".to_vec());
        assert_eq!(hub.subscriber_count(), 0);

        // And a later subscriber still works.
        let mut sub = hub.subscribe();
        hub.broadcast(b"hello".to_vec());
        let chunk = timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("no hang");
        assert_eq!(chunk, Some(b"hello".to_vec()));
    }
}
