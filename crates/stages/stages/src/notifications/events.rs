use crate::notifications::{StateChangeBatch, StateChangeConsumer};
use parking_lot::Mutex;
use stageloop_primitives::{SealedBlock, SealedHeader};
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

const DEFAULT_QUEUE_SIZE: usize = 128;

/// A subscription to new canonical headers.
pub type HeaderSubscription = Subscription<Arc<Vec<SealedHeader>>>;
/// A subscription to locally assembled blocks.
pub type PendingBlockSubscription = Subscription<Arc<SealedBlock>>;
/// A subscription to committed state changes.
pub type StateChangeSubscription = Subscription<Arc<StateChangeBatch>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopicKind {
    Headers,
    PendingBlocks,
    StateChanges,
}

#[derive(Debug)]
struct Topic<T> {
    subscribers: HashMap<u64, mpsc::Sender<T>>,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self { subscribers: HashMap::new() }
    }
}

impl<T: Clone> Topic<T> {
    fn publish(&mut self, kind: TopicKind, event: T) {
        self.subscribers.retain(|id, sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(target: "sync::notifications", topic = ?kind, subscriber = id, "Subscriber queue is full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(target: "sync::notifications", topic = ?kind, subscriber = id, "Subscriber is gone");
                false
            }
        });
    }
}

#[derive(Debug, Default)]
struct Subscribers {
    next_id: u64,
    headers: Topic<Arc<Vec<SealedHeader>>>,
    pending_blocks: Topic<Arc<SealedBlock>>,
    state_changes: Topic<Arc<StateChangeBatch>>,
}

impl Subscribers {
    fn remove(&mut self, kind: TopicKind, id: u64) {
        match kind {
            TopicKind::Headers => {
                self.headers.subscribers.remove(&id);
            }
            TopicKind::PendingBlocks => {
                self.pending_blocks.subscribers.remove(&id);
            }
            TopicKind::StateChanges => {
                self.state_changes.subscribers.remove(&id);
            }
        }
    }
}

/// Publish/subscribe hub for chain events.
///
/// Every subscriber owns a bounded queue. Publishing never blocks: a full queue loses the event,
/// a dropped subscription is removed.
#[derive(Debug, Clone)]
pub struct Events {
    subscribers: Arc<Mutex<Subscribers>>,
    queue_size: usize,
}

impl Default for Events {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}

impl Events {
    /// Creates a hub buffering up to `queue_size` events per subscriber.
    pub fn new(queue_size: usize) -> Self {
        Self { subscribers: Default::default(), queue_size: queue_size.max(1) }
    }

    fn subscribe<T>(
        &self,
        kind: TopicKind,
        topic: impl FnOnce(&mut Subscribers) -> &mut Topic<T>,
    ) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel(self.queue_size);
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        topic(&mut *subscribers).subscribers.insert(id, sender);
        Subscription { id, kind, receiver, subscribers: Arc::downgrade(&self.subscribers) }
    }

    /// Subscribe to batches of new canonical headers.
    pub fn subscribe_headers(&self) -> HeaderSubscription {
        self.subscribe(TopicKind::Headers, |subscribers| &mut subscribers.headers)
    }

    /// Subscribe to locally assembled blocks.
    pub fn subscribe_pending_blocks(&self) -> PendingBlockSubscription {
        self.subscribe(TopicKind::PendingBlocks, |subscribers| &mut subscribers.pending_blocks)
    }

    /// Subscribe to committed state changes.
    pub fn subscribe_state_changes(&self) -> StateChangeSubscription {
        self.subscribe(TopicKind::StateChanges, |subscribers| &mut subscribers.state_changes)
    }

    /// Announce new canonical headers, ascending.
    pub fn publish_headers(&self, headers: Vec<SealedHeader>) {
        self.subscribers.lock().headers.publish(TopicKind::Headers, Arc::new(headers));
    }

    /// Announce a locally assembled block.
    pub fn publish_pending_block(&self, block: SealedBlock) {
        self.subscribers.lock().pending_blocks.publish(TopicKind::PendingBlocks, Arc::new(block));
    }

    /// Number of live header subscriptions.
    pub fn header_subscribers(&self) -> usize {
        self.subscribers.lock().headers.subscribers.len()
    }
}

impl StateChangeConsumer for Events {
    fn send_state_changes(&self, batch: Arc<StateChangeBatch>) {
        self.subscribers.lock().state_changes.publish(TopicKind::StateChanges, batch);
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    id: u64,
    kind: TopicKind,
    receiver: mpsc::Receiver<T>,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl<T> Subscription<T> {
    /// Waits for the next event. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().remove(self.kind, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use stageloop_primitives::Header;

    fn header(number: u64) -> SealedHeader {
        Header { number, ..Default::default() }.seal_slow()
    }

    #[tokio::test]
    async fn subscribers_receive_published_headers() {
        let events = Events::default();
        let mut first = events.subscribe_headers();
        let mut second = events.subscribe_headers();

        events.publish_headers(vec![header(1), header(2)]);

        assert_eq!(first.recv().await.unwrap().len(), 2);
        assert_eq!(second.recv().await.unwrap()[1].number, 2);
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let events = Events::default();
        let subscription = events.subscribe_headers();
        let _other = events.subscribe_pending_blocks();
        assert_eq!(events.header_subscribers(), 1);

        drop(subscription);
        assert_eq!(events.header_subscribers(), 0);
        events.publish_headers(vec![header(1)]);
    }

    #[test]
    fn full_queue_drops_events() {
        let events = Events::new(1);
        let mut subscription = events.subscribe_headers();

        events.publish_headers(vec![header(1)]);
        events.publish_headers(vec![header(2)]);

        assert_eq!(subscription.try_recv().unwrap()[0].number, 1);
        assert_matches!(subscription.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(events.header_subscribers(), 1);
    }

    #[test]
    fn subscription_outlives_hub() {
        let events = Events::default();
        let mut subscription = events.subscribe_state_changes();
        drop(events);
        assert_matches!(subscription.try_recv(), Err(TryRecvError::Disconnected));
    }
}
