//! The per-endpoint connection pool.
//!
//! A LIFO cache of `(Connection, expiresAt)` pairs. `acquire` pops from the
//! back and discards anything already expired; `release` pushes a
//! still-live connection back onto the same end so the most recently used,
//! longest-lived connection is the next one reused.
//!
//! A single endpoint is conceptually single-task-owned, but many concurrent
//! requests on a multi-threaded `tokio` runtime can still touch the same
//! endpoint's pool at once, so access is serialized with a
//! `tokio::sync::Mutex`.

use std::time::Instant;

use tokio::sync::Mutex;

use crate::connector::Connection;

struct ReusableConnection {
    conn: Connection,
    expires_at: Instant,
}

/// LIFO cache of pooled connections for one endpoint.
pub struct ConnectionPool {
    entries: Mutex<Vec<ReusableConnection>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Pops the most recently released connection, skipping (and
    /// discarding) any that have expired. Returns the connection together
    /// with its original (immutable) expiry time, so a connection's total
    /// lifetime is bounded from its creation, not extended on each reuse.
    /// Returns `None` if the pool holds nothing usable.
    pub async fn acquire(&self) -> Option<(Connection, Instant)> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        while let Some(rc) = entries.pop() {
            if rc.expires_at > now {
                return Some((rc.conn, rc.expires_at));
            }
        }
        None
    }

    /// Returns a connection to the pool if its lifetime has not expired;
    /// otherwise the connection is dropped.
    pub async fn release(&self, conn: Connection, expires_at: Instant) {
        if expires_at > Instant::now() {
            self.entries.lock().await.push(ReusableConnection { conn, expires_at });
        }
    }

    /// Current number of pooled (not necessarily live) connections.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}
