use chat_api::ConversationSummary;
use std::{
    future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, trace, warn};

use crate::{
    api::ChatBackend,
    error::{ClientError, Result},
    events::{ChatEvent, EventBus},
    socket::ConnectionState,
};

/// Refetches conversation summaries while the socket is down. Reconnect
/// attempts (`Connecting`) keep an already running loop going.
pub struct PollingFallback {
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PollingFallback {
    pub fn spawn(
        backend: Arc<dyn ChatBackend>,
        token: String,
        state: watch::Receiver<ConnectionState>,
        period: Duration,
        bus: EventBus<ChatEvent>,
    ) -> Self {
        let active = Arc::new(AtomicBool::new(false));
        let poller = Poller {
            backend,
            token,
            state,
            period,
            bus,
            active: active.clone(),
        };
        let task = tokio::spawn(poller.run());
        Self {
            active,
            task: Some(task),
        }
    }

    /// Whether the refetch loop is currently running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.active.store(false, Ordering::SeqCst);
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

type Fetch = JoinHandle<Result<Vec<ConversationSummary>>>;

async fn join_fetch(fetch: &mut Option<Fetch>) -> std::result::Result<Result<Vec<ConversationSummary>>, JoinError> {
    match fetch {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

struct Poller {
    backend: Arc<dyn ChatBackend>,
    token: String,
    state: watch::Receiver<ConnectionState>,
    period: Duration,
    bus: EventBus<ChatEvent>,
    active: Arc<AtomicBool>,
}

impl Poller {
    async fn run(mut self) {
        loop {
            while !self.state.borrow_and_update().is_down() {
                if self.state.changed().await.is_err() {
                    return;
                }
            }
            self.active.store(true, Ordering::SeqCst);
            debug!("socket down, polling conversations every {:?}", self.period);
            let keep_going = self.poll_while_disconnected().await;
            self.active.store(false, Ordering::SeqCst);
            if !keep_going {
                return;
            }
            debug!("socket back, polling stopped");
        }
    }

    /// Returns false when polling must end for good.
    async fn poll_while_disconnected(&mut self) -> bool {
        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<Fetch> = None;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if in_flight.is_some() {
                        trace!("previous refresh still running, skipping tick");
                        continue;
                    }
                    let backend = self.backend.clone();
                    let token = self.token.clone();
                    in_flight = Some(tokio::spawn(async move {
                        backend.list_conversations(&token).await
                    }));
                }
                joined = join_fetch(&mut in_flight) => {
                    in_flight = None;
                    match joined {
                        Ok(Ok(list)) => self.bus.publish(ChatEvent::ConversationsRefreshed(list)),
                        Ok(Err(ClientError::Unauthorized)) => {
                            self.bus.publish(ChatEvent::SessionExpired);
                            return false;
                        }
                        Ok(Err(e)) => warn!("conversation refresh failed: {e}"),
                        Err(e) => warn!("conversation refresh task failed: {e}"),
                    }
                }
                changed = self.state.changed() => {
                    let state = *self.state.borrow_and_update();
                    if changed.is_err() || matches!(state, ConnectionState::Connected | ConnectionState::Closed) {
                        if let Some(handle) = in_flight.take() {
                            handle.abort();
                        }
                        return changed.is_ok();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chat_api::{Peer, SendMessageRequest, ServerMessage};
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        delay_ms: u64,
        unauthorized: bool,
    }

    #[async_trait]
    impl ChatBackend for CountingBackend {
        async fn list_conversations(&self, _token: &str) -> Result<Vec<ConversationSummary>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(self.delay_ms)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.unauthorized {
                return Err(ClientError::Unauthorized);
            }
            Ok(vec![ConversationSummary {
                id: "c1".into(),
                peer: Peer {
                    id: "u2".into(),
                    name: "Hùng".into(),
                    avatar_url: None,
                },
                last_message: None,
                unread_count: 1,
            }])
        }

        async fn list_messages(&self, _: &str, _: &str) -> Result<Vec<ServerMessage>> {
            Ok(vec![])
        }

        async fn send_message(
            &self,
            _: &str,
            _: &str,
            _: &SendMessageRequest,
        ) -> Result<ServerMessage> {
            Err(ClientError::Status { status: 500 })
        }

        async fn mark_read(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn polls_only_while_disconnected() {
        let backend = Arc::new(CountingBackend::default());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let polling = PollingFallback::spawn(
            backend.clone(),
            "tok".into(),
            state_rx,
            Duration::from_millis(20),
            bus,
        );

        sleep(Duration::from_millis(80)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(!polling.is_active());

        state_tx.send_replace(ConnectionState::Disconnected);
        let ev = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(ev, ChatEvent::ConversationsRefreshed(ref l) if l.len() == 1));
        assert!(polling.is_active());
        sleep(Duration::from_millis(100)).await;
        assert!(backend.calls.load(Ordering::SeqCst) >= 2);

        state_tx.send_replace(ConnectionState::Connected);
        sleep(Duration::from_millis(30)).await;
        assert!(!polling.is_active());
        let settled = backend.calls.load(Ordering::SeqCst);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), settled);

        // exhausted reconnects still count as disconnected
        state_tx.send_replace(ConnectionState::Exhausted);
        sleep(Duration::from_millis(60)).await;
        assert!(polling.is_active());
        assert!(backend.calls.load(Ordering::SeqCst) > settled);
        polling.stop();
    }

    #[tokio::test]
    async fn single_flight_refresh() {
        let backend = Arc::new(CountingBackend {
            delay_ms: 100,
            ..Default::default()
        });
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let polling = PollingFallback::spawn(
            backend.clone(),
            "tok".into(),
            state_rx,
            Duration::from_millis(10),
            EventBus::new(),
        );
        sleep(Duration::from_millis(350)).await;
        assert_eq!(backend.max_running.load(Ordering::SeqCst), 1);
        assert!(backend.calls.load(Ordering::SeqCst) <= 4);
        polling.stop();
    }

    #[tokio::test]
    async fn unauthorized_stops_polling() {
        let backend = Arc::new(CountingBackend {
            unauthorized: true,
            ..Default::default()
        });
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let polling = PollingFallback::spawn(
            backend.clone(),
            "tok".into(),
            state_rx,
            Duration::from_millis(10),
            bus,
        );
        let ev = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev, ChatEvent::SessionExpired);
        sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(!polling.is_active());
    }
}
