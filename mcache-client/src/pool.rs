//! # Connection Pool
//!
//! Bounded TCP connection reuse for the blocking client. A `Lease` checks a
//! connection out of the pool and checks it back in on drop; a connection
//! that fails mid-command is retired on the spot, because its reply stream
//! is in an unknown state.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::client::{ClientError, ClientResult};
use crate::wire::{encode_command, read_reply, Reply};

/// Pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:7000".
    pub addr: String,
    /// Idle connections kept for reuse.
    pub max_idle: usize,
    /// Total connections, idle plus leased.
    pub max_total: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

/// Live-connection bookkeeping.
///
/// `open` counts idle and leased connections together; the gap between
/// `open` and `idle.len()` is whatever is currently checked out. Idle
/// connections stack LIFO so the warmest one is reused first.
#[derive(Default)]
struct PoolCore {
    idle: Vec<Connection>,
    open: usize,
}

struct Shared {
    config: PoolConfig,
    addr: SocketAddr,
    core: Mutex<PoolCore>,
}

/// Shared pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl ConnectionPool {
    /// Validates the address up front. No connection is dialed yet; the
    /// first lease pays for the handshake.
    pub fn open(config: PoolConfig) -> ClientResult<Self> {
        let addr = config
            .addr
            .parse()
            .map_err(|_| ClientError::InvalidAddress)?;
        Ok(ConnectionPool {
            shared: Arc::new(Shared {
                config,
                addr,
                core: Mutex::new(PoolCore::default()),
            }),
        })
    }

    /// Checks a connection out, dialing a fresh one only while under the
    /// total cap.
    pub fn lease(&self) -> ClientResult<Lease> {
        {
            let mut core = self.core();
            if let Some(conn) = core.idle.pop() {
                return Ok(Lease::checked_out(Arc::clone(&self.shared), conn));
            }
            if core.open >= self.shared.config.max_total {
                return Err(ClientError::PoolExhausted);
            }
            // Claim the slot before dialing so concurrent leases cannot
            // overshoot the cap while the handshake is in flight.
            core.open += 1;
        }

        match Connection::open(self.shared.addr, &self.shared.config) {
            Ok(conn) => Ok(Lease::checked_out(Arc::clone(&self.shared), conn)),
            Err(err) => {
                self.core().open -= 1;
                Err(err)
            }
        }
    }

    fn core(&self) -> MutexGuard<'_, PoolCore> {
        self.shared.core.lock().expect("pool mutex poisoned")
    }
}

/// A checked-out connection, returned to the pool on drop.
pub struct Lease {
    shared: Arc<Shared>,
    conn: Option<Connection>,
}

impl Lease {
    fn checked_out(shared: Arc<Shared>, conn: Connection) -> Self {
        Lease {
            shared,
            conn: Some(conn),
        }
    }

    /// Runs one command over the leased connection.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<Reply> {
        let conn = self.conn.as_mut().expect("lease holds a connection");
        match conn.exec(args) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                self.retire();
                Err(err)
            }
        }
    }

    /// Drops the connection and gives its slot back immediately.
    fn retire(&mut self) {
        if self.conn.take().is_some() {
            let mut core = self.shared.core.lock().expect("pool mutex poisoned");
            core.open -= 1;
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        let mut core = self.shared.core.lock().expect("pool mutex poisoned");
        if core.idle.len() < self.shared.config.max_idle {
            core.idle.push(conn);
        } else {
            core.open -= 1;
        }
    }
}

/// One dialed connection. Replies are read through a buffered reader;
/// requests are rebuilt into a reused outbound buffer.
struct Connection {
    reader: BufReader<TcpStream>,
    outbound: Vec<u8>,
}

impl Connection {
    fn open(addr: SocketAddr, config: &PoolConfig) -> ClientResult<Self> {
        let stream = match config.connect_timeout {
            Some(bound) => TcpStream::connect_timeout(&addr, bound)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        // One small frame per command; batching would only add latency.
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            outbound: Vec::with_capacity(256),
        })
    }

    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<Reply> {
        self.outbound.clear();
        encode_command(args, &mut self.outbound);
        self.reader.get_mut().write_all(&self.outbound)?;
        read_reply(&mut self.reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pool_for(addr: String, max_total: usize) -> ConnectionPool {
        ConnectionPool::open(PoolConfig {
            addr,
            max_idle: max_total,
            max_total,
            read_timeout: Some(Duration::from_millis(200)),
            write_timeout: Some(Duration::from_millis(200)),
            connect_timeout: Some(Duration::from_millis(200)),
        })
        .expect("pool")
    }

    #[test]
    fn bad_address_fails_at_open() {
        let result = ConnectionPool::open(PoolConfig {
            addr: "not-an-address".to_string(),
            max_idle: 1,
            max_total: 1,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        });
        assert!(matches!(result, Err(ClientError::InvalidAddress)));
    }

    #[test]
    fn cap_is_enforced_and_slots_come_back() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let pool = pool_for(addr, 1);

        let held = pool.lease().expect("first lease");
        assert!(matches!(pool.lease(), Err(ClientError::PoolExhausted)));

        drop(held);
        assert!(pool.lease().is_ok());
    }

    #[test]
    fn failed_dial_releases_its_slot() {
        // Port with nothing listening: connect is refused.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let pool = pool_for(addr, 1);

        assert!(pool.lease().is_err());
        // The slot must be free again, not leaked to exhaustion.
        assert!(matches!(pool.lease(), Err(ClientError::Io(_))));
    }
}
