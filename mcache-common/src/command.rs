//! # Command Model
//!
//! The boundary between the wire protocol and the cluster: the server parses
//! frames into `Command` values, the manager answers with `Response` values,
//! and no error type crosses this edge.

use std::fmt;

use bytes::Bytes;

use crate::error::CacheError;
use crate::types::DataType;

/// A client command routed through the distributed cache manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: Bytes, ttl_seconds: i64, data_type: DataType },
    Del { key: String },
    Exists { key: String },
    Expire { key: String, ttl_seconds: i64 },
    Ttl { key: String },
    Flush,
    Ping { payload: Option<Bytes> },
    Info,
    Stats,
    ClusterInfo,
    ClusterNodes,
    ClusterStats,
}

impl Command {
    /// Command name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::Del { .. } => "DEL",
            Command::Exists { .. } => "EXISTS",
            Command::Expire { .. } => "EXPIRE",
            Command::Ttl { .. } => "TTL",
            Command::Flush => "FLUSH",
            Command::Ping { .. } => "PING",
            Command::Info => "INFO",
            Command::Stats => "STATS",
            Command::ClusterInfo => "CLUSTER_INFO",
            Command::ClusterNodes => "CLUSTER_NODES",
            Command::ClusterStats => "CLUSTER_STATS",
        }
    }

    /// Checks required fields before dispatch.
    ///
    /// Keyed commands need a non-empty key; EXPIRE needs a non-negative TTL.
    /// Violations map to `CacheError::InvalidCommand` and are never retried.
    pub fn validate(&self) -> Result<(), CacheError> {
        match self {
            Command::Get { key }
            | Command::Del { key }
            | Command::Exists { key }
            | Command::Ttl { key } => require_key(key, self.name()),
            Command::Set { key, .. } => require_key(key, self.name()),
            Command::Expire { key, ttl_seconds } => {
                require_key(key, self.name())?;
                if *ttl_seconds < 0 {
                    return Err(CacheError::InvalidCommand(
                        "EXPIRE requires a non-negative ttl".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn require_key(key: &str, command: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidCommand(format!(
            "{command} requires a key"
        )));
    }
    Ok(())
}

/// Payload carried by a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Success with nothing to return (SET, FLUSH, EXPIRE hit).
    None,
    /// Raw value bytes (GET).
    Bytes(Bytes),
    /// Numeric result (TTL, DEL count, EXISTS).
    Integer(i64),
    /// Rendered text (INFO, STATS, CLUSTER_*).
    Text(String),
}

/// Outcome of a command, as seen by the wire layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok(Payload),
    NotFound,
    InvalidCommand(String),
    Error(String),
    Timeout,
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(Payload::None)
    }

    pub fn bytes(data: Bytes) -> Self {
        Response::Ok(Payload::Bytes(data))
    }

    pub fn integer(value: i64) -> Self {
        Response::Ok(Payload::Integer(value))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Response::Ok(Payload::Text(text.into()))
    }

    /// Returns true when the command succeeded (NotFound counts: it is a
    /// normal GET outcome, not a failure).
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Ok(_) | Response::NotFound)
    }
}

impl From<CacheError> for Response {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidCommand(message) => Response::InvalidCommand(message),
            CacheError::Timeout => Response::Timeout,
            CacheError::ShuttingDown => Response::Timeout,
            other => Response::Error(other.to_string()),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok(Payload::None) => write!(f, "OK"),
            Response::Ok(Payload::Bytes(data)) => {
                write!(f, "OK({} bytes)", data.len())
            }
            Response::Ok(Payload::Integer(value)) => write!(f, "OK({value})"),
            Response::Ok(Payload::Text(text)) => write!(f, "OK({text})"),
            Response::NotFound => write!(f, "NOT_FOUND"),
            Response::InvalidCommand(message) => write!(f, "INVALID_COMMAND({message})"),
            Response::Error(message) => write!(f, "ERROR({message})"),
            Response::Timeout => write!(f, "TIMEOUT"),
        }
    }
}
