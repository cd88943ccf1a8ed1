//! Live-update throttle.
//!
//! Updates queued by the change orchestrator are buffered and flushed after
//! the stream goes quiet for `debounce`, or `max_wait` after the first
//! buffered update, whichever comes first. One flush sends one message to
//! every connected client.
//!
//! The throttle is an actor: a single task owns the buffer and the client
//! set, and [`HmrThrottle`] handles talk to it over a channel. Delivery is
//! best-effort. A client whose queue is full misses the message; a client
//! whose receiver is gone is dropped from the set.

pub mod message;

pub use message::{
    is_stylesheet, ErrorPayload, HmrMessage, HmrUpdate, StyleUpdateEntry, UpdateKind,
    STYLESHEET_EXTENSIONS,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

/// Capacity of each client's outbound queue.
pub const CLIENT_QUEUE: usize = 64;

/// Identifies a registered client.
pub type ClientId = u64;

/// Flush timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Quiet period that ends a burst.
    pub debounce: Duration,
    /// Upper bound on how long the first buffered update may wait.
    pub max_wait: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(30),
            max_wait: Duration::from_millis(200),
        }
    }
}

enum Command {
    Queue(HmrUpdate),
    Register {
        id: ClientId,
        sender: mpsc::Sender<String>,
    },
    Unregister(ClientId),
    Broadcast(HmrMessage),
    ClientCount(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the throttle task. Cheap to clone.
#[derive(Clone)]
pub struct HmrThrottle {
    tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for HmrThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmrThrottle")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl HmrThrottle {
    /// Start the throttle task on the current runtime.
    #[must_use]
    pub fn spawn(config: ThrottleConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, config));
        (
            Self {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            task,
        )
    }

    /// Buffer an update for the next flush.
    pub fn queue_update(&self, path: impl Into<String>, kind: UpdateKind) {
        self.send(Command::Queue(HmrUpdate {
            path: path.into(),
            kind,
        }));
    }

    /// Send a message to every client immediately, bypassing the buffer.
    pub fn broadcast(&self, message: HmrMessage) {
        self.send(Command::Broadcast(message));
    }

    /// Add a client. It is sent a `connected` message first.
    pub fn register_client(&self, sender: mpsc::Sender<String>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Register { id, sender });
        id
    }

    pub fn unregister_client(&self, id: ClientId) {
        self.send(Command::Unregister(id));
    }

    /// Number of clients currently registered.
    pub async fn client_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ClientCount(tx));
        rx.await.unwrap_or(0)
    }

    /// Drop every client and stop the task. Pending updates are discarded.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx));
        let _ = rx.await;
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            trace!("hmr throttle stopped; dropping command");
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

fn deliver(clients: &mut HashMap<ClientId, mpsc::Sender<String>>, message: &HmrMessage) {
    let json = message.to_json();
    clients.retain(|id, sender| match sender.try_send(json.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(client = id, "hmr client queue full; message dropped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(client = id, "hmr client gone");
            false
        }
    });
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>, config: ThrottleConfig) {
    let mut clients: HashMap<ClientId, mpsc::Sender<String>> = HashMap::new();
    let mut pending: Vec<HmrUpdate> = Vec::new();
    let mut first_at: Option<Instant> = None;
    let mut last_at = Instant::now();

    loop {
        let deadline =
            first_at.map(|first| (last_at + config.debounce).min(first + config.max_wait));

        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Queue(update)) => {
                    let now = Instant::now();
                    first_at.get_or_insert(now);
                    last_at = now;
                    pending.push(update);
                }
                Some(Command::Register { id, sender }) => {
                    let _ = sender.try_send(HmrMessage::Connected.to_json());
                    clients.insert(id, sender);
                    debug!(client = id, clients = clients.len(), "hmr client connected");
                }
                Some(Command::Unregister(id)) => {
                    clients.remove(&id);
                }
                Some(Command::Broadcast(message)) => deliver(&mut clients, &message),
                Some(Command::ClientCount(reply)) => {
                    let _ = reply.send(clients.len());
                }
                Some(Command::Shutdown(done)) => {
                    clients.clear();
                    let _ = done.send(());
                    break;
                }
                None => break,
            },
            () = sleep_until(deadline.unwrap_or(last_at)), if deadline.is_some() => {
                let batch = std::mem::take(&mut pending);
                first_at = None;
                if let Some(message) = HmrMessage::from_batch(&batch, now_millis()) {
                    debug!(updates = batch.len(), clients = clients.len(), "flushing hmr batch");
                    deliver(&mut clients, &message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn client(throttle: &HmrThrottle) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        throttle.register_client(tx);
        rx
    }

    async fn next(rx: &mut mpsc::Receiver<String>) -> HmrMessage {
        let text = rx.recv().await.expect("channel open");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_gets_connected_first() {
        let (throttle, _task) = HmrThrottle::spawn(ThrottleConfig::default());
        let mut rx = client(&throttle);
        assert_eq!(next(&mut rx).await, HmrMessage::Connected);
        assert_eq!(throttle.client_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_flushes_once() {
        let (throttle, _task) = HmrThrottle::spawn(ThrottleConfig::default());
        let mut rx = client(&throttle);
        for _ in 0..5 {
            throttle.queue_update("/src/a.css", UpdateKind::StyleUpdate);
        }
        sleep(Duration::from_millis(100)).await;

        assert_eq!(next(&mut rx).await, HmrMessage::Connected);
        let HmrMessage::StyleUpdate { path, updates } = next(&mut rx).await else {
            panic!("expected style update");
        };
        assert_eq!(path, "/src/a.css");
        assert_eq!(updates.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_in_batch_collapses() {
        let (throttle, _task) = HmrThrottle::spawn(ThrottleConfig::default());
        let mut rx = client(&throttle);
        throttle.queue_update("/src/a.css", UpdateKind::StyleUpdate);
        throttle.queue_update("/src/App.tsx", UpdateKind::FullReload);
        throttle.queue_update("/src/b.css", UpdateKind::StyleUpdate);
        sleep(Duration::from_millis(100)).await;

        assert_eq!(next(&mut rx).await, HmrMessage::Connected);
        assert_eq!(
            next(&mut rx).await,
            HmrMessage::FullReload {
                path: Some("/src/App.tsx".to_string())
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_bounds_latency() {
        let (throttle, _task) = HmrThrottle::spawn(ThrottleConfig::default());
        let mut rx = client(&throttle);
        assert_eq!(next(&mut rx).await, HmrMessage::Connected);

        // A steady stream faster than the debounce never goes quiet.
        for i in 0..15 {
            throttle.queue_update(format!("/src/{i}.css"), UpdateKind::StyleUpdate);
            sleep(Duration::from_millis(20)).await;
        }
        let HmrMessage::StyleUpdate { updates: first, .. } = next(&mut rx).await else {
            panic!("expected style update");
        };
        assert_eq!(first[0].path, "/src/0.css");
        assert!(first.len() < 15);

        sleep(Duration::from_millis(100)).await;
        let HmrMessage::StyleUpdate { updates: rest, .. } = next(&mut rx).await else {
            panic!("expected style update");
        };
        assert_eq!(first.len() + rest.len(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_client_is_pruned() {
        let (throttle, _task) = HmrThrottle::spawn(ThrottleConfig::default());
        let rx = client(&throttle);
        let mut live = client(&throttle);
        drop(rx);

        throttle.broadcast(HmrMessage::Restarting);
        assert_eq!(next(&mut live).await, HmrMessage::Connected);
        assert_eq!(next(&mut live).await, HmrMessage::Restarting);
        assert_eq!(throttle.client_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_clients() {
        let (throttle, task) = HmrThrottle::spawn(ThrottleConfig::default());
        let mut rx = client(&throttle);
        throttle.shutdown().await;
        task.await.unwrap();

        assert_eq!(next(&mut rx).await, HmrMessage::Connected);
        assert!(rx.recv().await.is_none());

        // Calls after shutdown are no-ops.
        throttle.queue_update("/a.css", UpdateKind::StyleUpdate);
        assert_eq!(throttle.client_count().await, 0);
    }
}
