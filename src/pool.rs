//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to reduce handshake latency and
//! allocation churn.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable idle
//!    connections; dial lazily on a miss.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle
//!    connections.
//! 3. **Never Wait On Capacity**: Acquire may block on the network dial,
//!    never on the pool; release closes instead of queueing when full.
//! 4. **Fail Fast**: Tainted connections are closed on release, never
//!    recycled.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::client::{Config, Connection};
use crate::error::Error;
use crate::error::Result;
use crate::proto::Arg;
use crate::reply::{Outcome, Reply};

struct PoolState {
    idle: VecDeque<Connection>,
    closed: bool,
}

struct PoolInner {
    config: Config,
    capacity: usize,
    state: Mutex<PoolState>,
}

/// Connection pool handle. Clones share the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a pool. The idle-queue capacity defaults to twice the
    /// available parallelism, minimum 1.
    pub fn new(config: Config) -> Pool {
        let capacity = config.capacity.unwrap_or_else(default_capacity).max(1);
        Pool {
            inner: Arc::new(PoolInner {
                config,
                capacity,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    closed: false,
                }),
            }),
        }
    }

    /// Creates a pool for an address with default settings.
    pub fn connect(addr: impl Into<String>) -> Pool {
        Pool::new(Config {
            addr: addr.into(),
            ..Config::default()
        })
    }

    /// Takes an idle connection, or dials a new one synchronously. Never
    /// waits for pool capacity.
    pub fn acquire(&self) -> Result<PooledConn> {
        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConn {
                pool: Arc::clone(&self.inner),
                conn: Some(conn),
            });
        }
        let conn = Connection::dial(&self.inner.config)?;
        Ok(PooledConn {
            pool: Arc::clone(&self.inner),
            conn: Some(conn),
        })
    }

    fn pop_idle(&self) -> Option<Connection> {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.idle.pop_front()
    }

    /// Acquires a connection, executes one command, and releases it.
    pub fn execute(&self, args: &[Arg]) -> Result<Reply> {
        let mut conn = self.acquire()?;
        conn.execute(args)
    }

    /// Acquires a connection, executes a batch, and releases it. An
    /// acquire failure yields no outcomes and the dial error.
    pub fn execute_batch(&self, commands: &[Vec<Arg>]) -> (Vec<Outcome>, Option<Error>) {
        match self.acquire() {
            Ok(mut conn) => conn.execute_batch(commands),
            Err(err) => (Vec::new(), Some(err)),
        }
    }

    /// Number of connections currently idle in the pool.
    pub fn idle_connections(&self) -> usize {
        let state = self.inner.state.lock().expect("pool mutex poisoned");
        state.idle.len()
    }

    /// Drains and closes all idle connections. Does not wait for
    /// checked-out connections; those are closed by their own release once
    /// the pool is marked closed.
    pub fn close(&self) {
        let drained: Vec<Connection> = {
            let mut state = self.inner.state.lock().expect("pool mutex poisoned");
            state.closed = true;
            state.idle.drain(..).collect()
        };
        debug!(count = drained.len(), "draining idle connections");
        for conn in drained {
            let _ = conn.close();
        }
    }
}

fn default_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

/// RAII checkout handle: dropping it releases the connection back to the
/// pool, or closes it when it is tainted, the queue is full, or the pool
/// has been closed.
pub struct PooledConn {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
}

impl PooledConn {
    /// Returns the connection to the pool. Equivalent to dropping the
    /// handle; provided for call sites where the release is the point.
    pub fn release(self) {}
}

impl Deref for PooledConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection exists")
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection exists")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if conn.is_tainted() {
            debug!("closing tainted connection");
            let _ = conn.close();
            return;
        }

        let mut state = self.pool.state.lock().expect("pool mutex poisoned");
        if state.closed || state.idle.len() >= self.pool.capacity {
            drop(state);
            debug!("idle queue unavailable, closing connection");
            let _ = conn.close();
        } else {
            state.idle.push_back(conn);
        }
    }
}
