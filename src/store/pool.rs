//! Lazily-opened, bounded SQLite connection pool
//!
//! No connection is opened until the first checkout. Checkouts beyond
//! `max_connections` fail fast with `Transient` instead of blocking, so a
//! wedged database degrades to "keep serving the current model".

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::registry::ModelError;

/// Runs once on every freshly opened connection (schema, pragmas).
pub type ConnectionInit = fn(&Connection) -> rusqlite::Result<()>;

pub struct SqlitePool {
    path: String,
    max_connections: usize,
    busy_timeout: Duration,
    init: ConnectionInit,
    idle: Mutex<Vec<Connection>>,
    open: AtomicUsize,
    closed: AtomicBool,
}

impl SqlitePool {
    pub fn new(
        path: &str,
        max_connections: usize,
        busy_timeout: Duration,
        init: ConnectionInit,
    ) -> Self {
        Self {
            path: path.to_string(),
            max_connections: max_connections.max(1),
            busy_timeout,
            init,
            idle: Mutex::new(Vec::new()),
            open: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Connections currently open (idle or checked out).
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn get(&self) -> Result<PooledConnection<'_>, ModelError> {
        {
            let mut idle = self.idle.lock();
            if self.is_closed() {
                return Err(ModelError::Transient(format!("pool for {} is closed", self.path)));
            }
            if let Some(conn) = idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }
        }

        let max = self.max_connections;
        if self
            .open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_err()
        {
            return Err(ModelError::Transient(format!(
                "connection pool exhausted ({} open)",
                max
            )));
        }

        match self.connect() {
            Ok(conn) => {
                debug!(
                    path = %self.path,
                    open = self.open_connections(),
                    "sqlite connection opened"
                );
                Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                })
            }
            Err(err) => {
                self.open.fetch_sub(1, Ordering::SeqCst);
                Err(ModelError::Transient(format!(
                    "failed to open {}: {}",
                    self.path, err
                )))
            }
        }
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // one thread per connection at a time

        let conn = Connection::open_with_flags(&self.path, flags)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        (self.init)(&conn)?;
        Ok(conn)
    }

    /// `closed` is only flipped under the `idle` lock, so a connection is
    /// either parked before `close` drains or dropped here.
    fn release(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if self.is_closed() {
            drop(idle);
            drop(conn);
            self.open.fetch_sub(1, Ordering::SeqCst);
        } else {
            idle.push(conn);
        }
    }

    /// Drop idle connections and refuse new checkouts. Checked-out
    /// connections are closed when their guards drop.
    pub fn close(&self) {
        let drained: Vec<Connection> = {
            let mut idle = self.idle.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            idle.drain(..).collect()
        };
        let count = drained.len();
        drop(drained);
        self.open.fetch_sub(count, Ordering::SeqCst);
        info!(path = %self.path, closed = count, "sqlite pool closed");
    }
}

/// Connection checked out of a [`SqlitePool`]; returned on drop.
pub struct PooledConnection<'a> {
    pool: &'a SqlitePool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
