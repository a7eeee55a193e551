//! Event feed client.
//!
//! Tallies item-processed events from the telemetry endpoint. The feed is
//! best-effort: any read or framing error ends it quietly, and callers judge
//! the counters they were left with.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use serde::Serialize;
use sortlink_protocol::ItemProcessed;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Running item counters shared between the feed task and its readers.
#[derive(Debug, Default)]
pub struct FeedCounters {
    items_seen: AtomicU64,
    items_finalized: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedSnapshot {
    pub items_seen: u64,
    pub items_finalized: u64,
}

impl FeedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one processed item.
    ///
    /// `items_seen` is bumped before `items_finalized`, and `snapshot` loads in
    /// the opposite order, so no snapshot ever shows more finalized items than
    /// seen ones.
    pub fn record(&self, item: ItemProcessed) {
        self.items_seen.fetch_add(1, Ordering::SeqCst);
        if item.finalized {
            self.items_finalized.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let items_finalized = self.items_finalized.load(Ordering::SeqCst);
        let items_seen = self.items_seen.load(Ordering::SeqCst);
        FeedSnapshot {
            items_seen,
            items_finalized,
        }
    }

    pub fn items_seen(&self) -> u64 {
        self.items_seen.load(Ordering::SeqCst)
    }

    pub fn items_finalized(&self) -> u64 {
        self.items_finalized.load(Ordering::SeqCst)
    }
}

/// Why a feed loop stopped. None of these is an error for counter readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStop {
    /// Shutdown was requested.
    Cancelled,
    /// The appliance closed the feed.
    Closed,
    /// A read or framing error ended the feed.
    Failed(String),
}

/// Client for the appliance event-feed endpoint.
pub struct EventFeed {
    conn: Connection,
    counters: Arc<FeedCounters>,
}

impl EventFeed {
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let conn = Connection::connect(&config).await?;
        tracing::info!("Event feed connected to {}", conn.addr());
        Ok(Self {
            conn,
            counters: Arc::new(FeedCounters::new()),
        })
    }

    /// Shared counters; readable while the feed runs.
    pub fn counters(&self) -> Arc<FeedCounters> {
        self.counters.clone()
    }

    /// Reads frames until `shutdown` fires or the feed ends. The socket is
    /// closed on return.
    ///
    /// Only a sent (or lagged) signal cancels. If every sender is dropped
    /// without sending, the feed keeps reading until the appliance closes it.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> FeedStop {
        let addr = self.conn.addr().to_string();
        let mut listening = true;
        let stop = loop {
            tokio::select! {
                biased;
                signal = shutdown.recv(), if listening => match signal {
                    Err(RecvError::Closed) => listening = false,
                    Ok(()) | Err(RecvError::Lagged(_)) => break FeedStop::Cancelled,
                },
                result = self.conn.try_next_frame() => match result {
                    Ok(Some(frame)) => {
                        if let Some(item) = ItemProcessed::from_frame(&frame) {
                            self.counters.record(item);
                            tracing::trace!("item processed (finalized={})", item.finalized);
                        }
                    }
                    Ok(None) => break FeedStop::Closed,
                    Err(e) => {
                        tracing::warn!("Event feed from {} ended: {}", addr, e);
                        break FeedStop::Failed(e.to_string());
                    }
                },
            }
        };

        let counts = self.counters.snapshot();
        tracing::info!(
            "Event feed stopped ({:?}): seen={} finalized={}",
            stop,
            counts.items_seen,
            counts.items_finalized
        );
        stop
    }

    /// Runs the feed on a background task.
    pub fn spawn(self) -> FeedHandle {
        let (shutdown, rx) = broadcast::channel(1);
        let counters = self.counters.clone();
        let task = tokio::spawn(self.run(rx));
        FeedHandle {
            shutdown,
            counters,
            task: Some(task),
            stopped: None,
        }
    }
}

/// Owner of a running event feed. Dropping the handle cancels the feed.
pub struct FeedHandle {
    shutdown: broadcast::Sender<()>,
    counters: Arc<FeedCounters>,
    task: Option<JoinHandle<FeedStop>>,
    stopped: Option<FeedStop>,
}

impl FeedHandle {
    pub fn counters(&self) -> Arc<FeedCounters> {
        self.counters.clone()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.counters.snapshot()
    }

    /// Requests shutdown without waiting.
    pub fn cancel(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Cancels the feed and waits for the loop to exit.
    pub async fn stop(mut self) -> FeedStop {
        self.cancel();
        self.join().await
    }

    /// Waits for the feed to end on its own. Cancel-safe; once the feed has
    /// ended, every call returns the same stop reason.
    pub async fn join(&mut self) -> FeedStop {
        if let Some(task) = self.task.as_mut() {
            let stop = task
                .await
                .unwrap_or_else(|e| FeedStop::Failed(e.to_string()));
            self.task = None;
            self.stopped = Some(stop);
        }
        self.stopped.clone().unwrap_or(FeedStop::Cancelled)
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
