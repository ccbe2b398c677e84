use chat_api::{ConversationSummary, ServerEvent};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Everything a screen reacts to, published by the socket and polling tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Connected,
    Disconnected { reason: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// All reconnect attempts failed; the only socket failure shown to the user.
    ReconnectExhausted,
    Server(ServerEvent),
    ConversationsRefreshed(Vec<ConversationSummary>),
    /// The backend rejected the token; the session has been cleared.
    SessionExpired,
}

struct Subscribers<T> {
    next_id: u64,
    senders: HashMap<u64, UnboundedSender<T>>,
}

/// Small typed broadcast bus. Cloning shares the same subscriber set.
pub struct EventBus<T> {
    inner: Arc<Mutex<Subscribers<T>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                senders: HashMap::new(),
            })),
        }
    }

    /// Subscribe to all future events. Dropping the returned subscription
    /// detaches it.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = unbounded_channel();
        let mut guard = self.inner.lock();
        let id = guard.next_id;
        guard.next_id += 1;
        guard.senders.insert(id, tx);
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every live subscriber.
    pub fn publish(&self, event: T) {
        let mut guard = self.inner.lock();
        guard.senders.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of [`EventBus::subscribe`].
pub struct Subscription<T> {
    id: u64,
    rx: UnboundedReceiver<T>,
    bus: Weak<Mutex<Subscribers<T>>>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Detach from the bus. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().senders.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(ChatEvent::Connected);
        assert_eq!(a.recv().await, Some(ChatEvent::Connected));
        assert_eq!(b.recv().await, Some(ChatEvent::Connected));
    }

    #[test]
    fn unsubscribe_detaches() {
        let bus: EventBus<u32> = EventBus::new();
        let a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        a.unsubscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(7);
        assert_eq!(b.try_recv(), Some(7));
        drop(b);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscription_outlives_bus() {
        let bus: EventBus<u32> = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(1);
        drop(bus);
        assert_eq!(sub.try_recv(), Some(1));
        drop(sub);
    }
}
