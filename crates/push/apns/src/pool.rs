//! Connection pool keyed by credential and endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use push_core::{PoolKey, PushError, Target};

use crate::{Connection, Connector};

/// Limits for pooled connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Ceiling on concurrent streams per connection. The peer's advertised limit still applies.
    pub max_concurrent_streams: usize,
    /// Connections unused for this long are replaced on next use.
    pub idle_timeout: Duration,
    /// Bound on TCP connect, TLS, and HTTP/2 handshake together.
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 1000,
            idle_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<Arc<Connection>>>>;

/// At most one live connection per [`PoolKey`].
///
/// Concurrent callers for a key without a connection wait on the same slot,
/// so only one of them dials.
pub struct ConnectionPool<C> {
    connector: C,
    settings: PoolSettings,
    slots: Mutex<HashMap<PoolKey, Slot>>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Create an empty pool.
    pub fn new(connector: C, settings: PoolSettings) -> Self {
        Self {
            connector,
            settings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn slot(&self, key: &PoolKey) -> Slot {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Live connection for the target, opening one if needed.
    pub async fn acquire(&self, target: &Target) -> Result<Arc<Connection>, PushError> {
        let key = target.pool_key();
        let slot = self.slot(&key);
        let mut current = slot.lock().await;

        if let Some(conn) = current.as_ref() {
            if conn.is_alive() && conn.idle_for() < self.settings.idle_timeout {
                conn.touch();
                return Ok(conn.clone());
            }
            tracing::debug!(connection = conn.id(), key = %key, "replacing stale connection");
            conn.mark_dead();
            *current = None;
        }

        let conn = tokio::time::timeout(self.settings.connect_timeout, async {
            let io = self
                .connector
                .connect(target.endpoint, &target.credential)
                .await?;
            Connection::open(key.clone(), io, self.settings.max_concurrent_streams).await
        })
        .await
        .map_err(|_| PushError::Transport(format!("connecting to {} timed out", target.endpoint)))??;

        let conn = Arc::new(conn);
        *current = Some(conn.clone());
        Ok(conn)
    }

    /// Drop a connection after a transport failure. A newer connection in the same slot is left alone.
    pub async fn invalidate(&self, conn: &Connection) {
        conn.mark_dead();
        let slot = self.slot(conn.key());
        let mut current = slot.lock().await;
        if current.as_ref().is_some_and(|c| c.id() == conn.id()) {
            *current = None;
        }
    }

    /// Drop every connection idle past the timeout.
    pub async fn evict_idle(&self) -> usize {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut evicted = 0;
        for slot in slots {
            let mut current = slot.lock().await;
            let stale = current
                .as_ref()
                .is_some_and(|c| !c.is_alive() || c.idle_for() >= self.settings.idle_timeout);
            if stale {
                if let Some(conn) = current.take() {
                    conn.mark_dead();
                }
                evicted += 1;
            }
        }
        evicted
    }

    /// Number of keys holding a live connection.
    pub async fn live_connections(&self) -> usize {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut live = 0;
        for slot in slots {
            if slot.lock().await.as_ref().is_some_and(|c| c.is_alive()) {
                live += 1;
            }
        }
        live
    }
}
