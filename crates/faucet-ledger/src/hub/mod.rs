//! Fan-out of ledger events to live client connections.
//!
//! Broadcasts are queued to a single worker task, so the caller never waits
//! on a client and sweeps run one at a time in submission order. A sweep holds
//! the write lock on the connection set for its whole duration; connections
//! whose write fails (or exceeds the write timeout) are removed before the
//! lock is released.

use {
    async_trait::async_trait,
    futures::future::join_all,
    std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::{
        sync::{mpsc, oneshot, RwLock},
        task::JoinHandle,
    },
    tracing::{debug, warn},
};

/// Writer half of a client connection
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn write(&self, payload: &str) -> anyhow::Result<()>;
}

/// Handle returned by [`Hub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Slot {
    id: ConnectionId,
    conn: Arc<dyn Connection>,
}

enum Command {
    Broadcast(Arc<str>),
    Flush(oneshot::Sender<()>),
}

pub struct Hub {
    slots: Arc<RwLock<Vec<Slot>>>,
    next_id: AtomicU64,
    sender: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
}

impl Hub {
    /// Start the hub and its delivery worker. Must be called inside a tokio runtime.
    pub fn new(write_timeout: Duration) -> Self {
        let slots = Arc::new(RwLock::new(Vec::new()));
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Self::run(slots.clone(), receiver, write_timeout));

        Self {
            slots,
            next_id: AtomicU64::new(1),
            sender,
            worker,
        }
    }

    pub async fn subscribe(&self, conn: Arc<dyn Connection>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.write().await.push(Slot { id, conn });
        debug!("Hub subscribed connection {:?}", id);
        id
    }

    /// Remove a connection; returns whether it was still held
    pub async fn unsubscribe(&self, id: ConnectionId) -> bool {
        let mut slots = self.slots.write().await;
        match slots.iter().position(|slot| slot.id == id) {
            Some(index) => {
                slots.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub async fn active_count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Queue `payload` for delivery to every connection held when its sweep starts
    pub fn broadcast(&self, payload: impl Into<Arc<str>>) {
        if self.sender.send(Command::Broadcast(payload.into())).is_err() {
            warn!("Hub worker has stopped; dropping broadcast");
        }
    }

    /// Wait until every broadcast queued before this call has been swept
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    async fn run(
        slots: Arc<RwLock<Vec<Slot>>>,
        mut receiver: mpsc::UnboundedReceiver<Command>,
        write_timeout: Duration,
    ) {
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Broadcast(payload) => {
                    let mut held = slots.write().await;
                    let evicted = Self::sweep(&mut held, &payload, write_timeout).await;
                    if evicted > 0 {
                        debug!("Hub evicted {} connections, {} remain", evicted, held.len());
                    }
                }
                Command::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    async fn sweep(slots: &mut Vec<Slot>, payload: &str, write_timeout: Duration) -> usize {
        let writes = slots.iter().map(|slot| {
            let conn = slot.conn.clone();
            async move {
                match tokio::time::timeout(write_timeout, conn.write(payload)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        debug!("Hub write to {:?} failed: {}", slot.id, e);
                        false
                    }
                    Err(_) => {
                        debug!("Hub write to {:?} timed out", slot.id);
                        false
                    }
                }
            }
        });
        let results = join_all(writes).await;

        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, ok)| !**ok)
            .map(|(index, _)| index)
            .collect();

        // descending, so each swap_remove only moves an already-checked slot
        for index in failed.iter().rev() {
            slots.swap_remove(*index);
        }
        failed.len()
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::Mutex,
    };

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Recorder {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn received(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connection for Recorder {
        async fn write(&self, payload: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("connection reset");
            }
            self.received.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    struct Stalled;

    #[async_trait]
    impl Connection for Stalled {
        async fn write(&self, _payload: &str) -> anyhow::Result<()> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_and_evicts_failures() {
        let hub = Hub::new(Duration::from_secs(1));
        let healthy: Vec<Arc<Recorder>> = (0..5).map(|_| Arc::new(Recorder::default())).collect();
        for conn in &healthy {
            hub.subscribe(conn.clone()).await;
        }
        for _ in 0..3 {
            hub.subscribe(Arc::new(Recorder::failing())).await;
        }
        assert_eq!(hub.active_count().await, 8);

        hub.broadcast("one");
        hub.broadcast("two");
        hub.flush().await;

        assert_eq!(hub.active_count().await, 5);
        for conn in &healthy {
            assert_eq!(conn.received(), vec!["one".to_string(), "two".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_slow_connection_is_evicted_after_timeout() {
        let hub = Hub::new(Duration::from_millis(50));
        let healthy = Arc::new(Recorder::default());
        hub.subscribe(healthy.clone()).await;
        hub.subscribe(Arc::new(Stalled)).await;

        hub.broadcast("tick");
        hub.flush().await;

        assert_eq!(hub.active_count().await, 1);
        assert_eq!(healthy.received(), vec!["tick".to_string()]);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let hub = Hub::new(Duration::from_secs(1));
        let id = hub.subscribe(Arc::new(Recorder::default())).await;
        assert!(hub.unsubscribe(id).await);
        assert!(!hub.unsubscribe(id).await);
        assert_eq!(hub.active_count().await, 0);

        // broadcasting to nobody is fine
        hub.broadcast("nobody");
        hub.flush().await;
    }
}
