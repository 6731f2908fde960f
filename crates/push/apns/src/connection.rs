//! A single multiplexed HTTP/2 connection.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use h2::client::SendRequest;
use push_core::{PoolKey, PushError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::BoxedIo;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Live HTTP/2 session to the provider with a bounded set of stream slots.
pub struct Connection {
    id: u64,
    key: PoolKey,
    sender: SendRequest<Bytes>,
    streams: Arc<Semaphore>,
    alive: Arc<AtomicBool>,
    opened_at: Instant,
    last_used: Mutex<Instant>,
}

impl Connection {
    /// Run the HTTP/2 handshake over `io` and spawn the connection driver.
    ///
    /// The driver marks the connection dead when the session ends for any reason.
    pub async fn open(
        key: PoolKey,
        io: BoxedIo,
        max_concurrent_streams: usize,
    ) -> Result<Self, PushError> {
        let (sender, driver) = h2::client::Builder::new()
            .initial_window_size(1 << 20)
            .handshake::<_, Bytes>(io)
            .await
            .map_err(|e| PushError::Transport(format!("HTTP/2 handshake failed: {e}")))?;

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let alive = Arc::new(AtomicBool::new(true));

        let driver_alive = alive.clone();
        let driver_key = key.to_string();
        tokio::spawn(async move {
            match driver.await {
                Ok(()) => tracing::debug!(connection = id, key = %driver_key, "connection closed"),
                Err(e) if e.is_go_away() => {
                    tracing::info!(connection = id, key = %driver_key, reason = ?e.reason(), "provider sent GOAWAY")
                }
                Err(e) => tracing::warn!(connection = id, key = %driver_key, error = %e, "connection failed"),
            }
            driver_alive.store(false, Ordering::Release);
        });

        tracing::info!(connection = id, key = %key, "opened provider connection");

        let now = Instant::now();
        Ok(Self {
            id,
            key,
            sender,
            streams: Arc::new(Semaphore::new(max_concurrent_streams.max(1))),
            alive,
            opened_at: now,
            last_used: Mutex::new(now),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Handle for opening streams on this connection.
    pub fn sender(&self) -> SendRequest<Bytes> {
        self.sender.clone()
    }

    /// Whether the session can still carry requests.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Stop handing out this connection.
    pub fn mark_dead(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::debug!(connection = self.id, key = %self.key, "connection marked dead");
        }
    }

    /// Record activity for idle tracking.
    pub fn touch(&self) {
        *self
            .last_used
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last request started.
    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .elapsed()
    }

    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Stream slots not currently held.
    pub fn available_streams(&self) -> usize {
        self.streams.available_permits()
    }

    /// Wait for a free stream slot. Waiters are served in arrival order.
    pub async fn acquire_stream(&self) -> Result<OwnedSemaphorePermit, PushError> {
        self.streams
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PushError::Transport("connection closed".to_string()))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("alive", &self.is_alive())
            .finish()
    }
}
