//! Bounded connection pool
//!
//! [`Pool`] hands out exclusive [`PooledConnection`] guards. At most `size`
//! connections exist at once; a caller waits up to `wait_timeout` for one to
//! be released before getting [`QueueError::PoolExhausted`]. Idle connections
//! are probed on checkout and replaced when the probe fails.
//!
//! ```rust
//! use aint_queue::connection::{Connector, Pool, PoolConfig};
//! use aint_queue::Result;
//! use async_trait::async_trait;
//!
//! struct Counter;
//!
//! #[async_trait]
//! impl Connector for Counter {
//!     type Connection = u32;
//!
//!     async fn connect(&self) -> Result<u32> {
//!         Ok(0)
//!     }
//!
//!     async fn check(&self, _conn: &mut u32) -> bool {
//!         true
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let pool = Pool::new(Counter, PoolConfig::new().with_size(2));
//! let mut conn = pool.get().await.unwrap();
//! *conn += 1;
//! drop(conn);
//! assert_eq!(pool.idle_count(), 1);
//! # });
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{QueueError, Result};

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use self::redis::RedisConnector;

/// Opens and probes store connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection>;

    /// Liveness probe run before an idle connection is handed out.
    async fn check(&self, conn: &mut Self::Connection) -> bool;

    async fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// Pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of live connections
    pub size: usize,
    /// How long `get` waits for a free slot
    pub wait_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 50,
            wait_timeout: Duration::from_secs(3),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }
}

struct PoolInner<C: Connector> {
    connector: C,
    idle: Mutex<VecDeque<C::Connection>>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
}

impl<C: Connector> PoolInner<C> {
    fn take_idle(&self) -> Option<C::Connection> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop_front())
    }

    fn put_idle(&self, conn: C::Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push_back(conn);
        }
    }
}

/// Bounded pool of connections produced by a [`Connector`].
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> Pool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let size = config.size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                connector,
                idle: Mutex::new(VecDeque::with_capacity(size)),
                permits: Arc::new(Semaphore::new(size)),
                config,
            }),
        }
    }

    /// Check out a connection, waiting up to the configured timeout.
    pub async fn get(&self) -> Result<PooledConnection<C>> {
        let wait = self.inner.config.wait_timeout;
        let permit = timeout(wait, Arc::clone(&self.inner.permits).acquire_owned())
            .await
            .map_err(|_| QueueError::PoolExhausted {
                waited_ms: wait.as_millis() as u64,
            })?
            .map_err(|_| QueueError::connector("connection pool is closed"))?;

        while let Some(mut conn) = self.inner.take_idle() {
            if self.inner.connector.check(&mut conn).await {
                return Ok(self.guard(conn, permit));
            }
            debug!("Discarding dead pooled connection");
            self.inner.connector.close(conn).await;
        }

        let conn = self.inner.connector.connect().await?;
        Ok(self.guard(conn, permit))
    }

    /// Return a connection to the idle set. Same as dropping the guard.
    pub fn release(&self, conn: PooledConnection<C>) {
        drop(conn);
    }

    /// Close every idle connection.
    pub async fn flush(&self) {
        let drained: Vec<C::Connection> = match self.inner.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => {
                warn!("Connection pool lock poisoned, nothing flushed");
                return;
            }
        };
        for conn in drained {
            self.inner.connector.close(conn).await;
        }
    }

    pub fn size(&self) -> usize {
        self.inner.config.size
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Slots that can be checked out right now without waiting.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    fn guard(&self, conn: C::Connection, permit: OwnedSemaphorePermit) -> PooledConnection<C> {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }
}

/// Exclusive checkout. Goes back to the idle set when dropped.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    /// Drop the connection instead of returning it, e.g. after an I/O error.
    pub fn discard(mut self) {
        self.conn.take();
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_idle(conn);
        }
    }
}
