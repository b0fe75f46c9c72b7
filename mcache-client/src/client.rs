//! # Blocking Client API
//!
//! A facade over the pool and wire codec: each call takes a connection,
//! runs one command, and returns the connection on drop.

use std::fmt;
use std::time::Duration;

use mcache_common::DataType;

use crate::pool::{ConnectionPool, PoolConfig};
use crate::wire::Reply;

pub type ClientResult<T> = Result<T, ClientError>;

/// Failures surfaced by the client.
#[derive(Debug)]
pub enum ClientError {
    Io(std::io::Error),
    /// RESP2 framing violation.
    Protocol,
    /// Server-side failure other than a timeout.
    Server(String),
    /// The server reported a per-operation deadline hit. Distinct from a
    /// missing key; retrying is reasonable.
    Timeout,
    /// Reply type did not match the command.
    UnexpectedReply,
    PoolExhausted,
    InvalidAddress,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "io error: {err}"),
            ClientError::Protocol => write!(f, "protocol error"),
            ClientError::Server(message) => write!(f, "server error: {message}"),
            ClientError::Timeout => write!(f, "server timeout"),
            ClientError::UnexpectedReply => write!(f, "unexpected reply"),
            ClientError::PoolExhausted => write!(f, "connection pool exhausted"),
            ClientError::InvalidAddress => write!(f, "invalid address"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err)
    }
}

/// TTL reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key missing or expired.
    Missing,
    /// Key present without expiry.
    NoExpiry,
    ExpiresIn(Duration),
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: String,
    pub max_idle: usize,
    pub max_total: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:7000".to_string(),
            max_idle: 8,
            max_total: 16,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

/// Pooled blocking client for one node.
pub struct CacheClient {
    pool: ConnectionPool,
}

impl CacheClient {
    pub fn connect(addr: impl Into<String>) -> ClientResult<CacheClient> {
        CacheClient::with_config(ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        })
    }

    pub fn with_config(config: ClientConfig) -> ClientResult<CacheClient> {
        let pool = ConnectionPool::open(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
        })?;
        Ok(CacheClient { pool })
    }

    /// Fetches a value; `None` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.exec(&[b"GET", key])? {
            Reply::Bulk(data) => Ok(data),
            Reply::Error(message) => Err(Reply::into_client_error(message)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Stores a value without expiry.
    pub fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        self.expect_ok(&[b"SET", key, value])
    }

    /// Stores a value with a TTL in seconds.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> ClientResult<()> {
        let seconds = ttl.as_secs().to_string();
        self.expect_ok(&[b"SET", key, value, b"EX", seconds.as_bytes()])
    }

    /// Stores a value with an explicit data-type tag.
    pub fn set_typed(
        &self,
        key: &[u8],
        value: &[u8],
        data_type: DataType,
    ) -> ClientResult<()> {
        let tag = data_type.to_string();
        self.expect_ok(&[b"SET", key, value, b"TYPE", tag.as_bytes()])
    }

    /// Deletes a key; true when a live entry was removed.
    pub fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        self.expect_integer(&[b"DEL", key]).map(|count| count > 0)
    }

    /// True when a live entry exists.
    pub fn exists(&self, key: &[u8]) -> ClientResult<bool> {
        self.expect_integer(&[b"EXISTS", key]).map(|flag| flag == 1)
    }

    /// Sets a TTL on an existing key; true when it was applied.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> ClientResult<bool> {
        let seconds = ttl.as_secs().to_string();
        self.expect_integer(&[b"EXPIRE", key, seconds.as_bytes()])
            .map(|flag| flag == 1)
    }

    /// Remaining TTL for a key.
    pub fn ttl(&self, key: &[u8]) -> ClientResult<KeyTtl> {
        match self.expect_integer(&[b"TTL", key])? {
            -2 => Ok(KeyTtl::Missing),
            -1 => Ok(KeyTtl::NoExpiry),
            seconds if seconds >= 0 => Ok(KeyTtl::ExpiresIn(Duration::from_secs(seconds as u64))),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Clears the whole logical cache.
    pub fn flush(&self) -> ClientResult<()> {
        self.expect_ok(&[b"FLUSH"])
    }

    /// Pings the node; returns the echoed payload.
    pub fn ping(&self, payload: Option<&[u8]>) -> ClientResult<Vec<u8>> {
        let reply = match payload {
            Some(data) => self.exec(&[b"PING", data])?,
            None => self.exec(&[b"PING"])?,
        };
        match reply {
            Reply::Simple(text) => Ok(text.into_bytes()),
            Reply::Bulk(Some(data)) => Ok(data),
            Reply::Error(message) => Err(Reply::into_client_error(message)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Server INFO text.
    pub fn info(&self) -> ClientResult<Vec<u8>> {
        self.expect_bulk(&[b"INFO"])
    }

    /// Node statistics as a JSON document.
    pub fn stats(&self) -> ClientResult<Vec<u8>> {
        self.expect_bulk(&[b"STATS"])
    }

    /// Cluster statistics as a JSON document.
    pub fn cluster_stats(&self) -> ClientResult<Vec<u8>> {
        self.expect_bulk(&[b"CLUSTER_STATS"])
    }

    /// Cluster member list as a JSON document.
    pub fn cluster_nodes(&self) -> ClientResult<Vec<u8>> {
        self.expect_bulk(&[b"CLUSTER_NODES"])
    }

    fn exec(&self, args: &[&[u8]]) -> ClientResult<Reply> {
        let mut lease = self.pool.lease()?;
        lease.exec(args)
    }

    fn expect_ok(&self, args: &[&[u8]]) -> ClientResult<()> {
        match self.exec(args)? {
            Reply::Simple(_) => Ok(()),
            Reply::Error(message) => Err(Reply::into_client_error(message)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    fn expect_integer(&self, args: &[&[u8]]) -> ClientResult<i64> {
        match self.exec(args)? {
            Reply::Integer(value) => Ok(value),
            Reply::Error(message) => Err(Reply::into_client_error(message)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    fn expect_bulk(&self, args: &[&[u8]]) -> ClientResult<Vec<u8>> {
        match self.exec(args)? {
            Reply::Bulk(Some(data)) => Ok(data),
            Reply::Error(message) => Err(Reply::into_client_error(message)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }
}
