//! # TCP Server
//!
//! Accept RESP2 connections, parse commands, and dispatch them to the
//! distributed cache manager with minimal overhead.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use mcache_cluster::{CacheManager, LockManager};
use mcache_common::{Command, DataType, Payload, Response};

use crate::protocol::{RespError, RespParser};

/// Everything a connection needs to serve commands.
#[derive(Clone)]
pub struct ServerContext {
    pub manager: Arc<CacheManager>,
    pub locks: LockManager,
}

/// Handles a single TCP client connection until EOF or a framing error.
pub async fn handle_connection(
    stream: TcpStream,
    context: ServerContext,
) -> std::io::Result<()> {
    let mut stream = stream;
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => {
                    let response = dispatch(&args, &context).await;
                    stream.write_all(&encode_response(&response)).await?;
                }
                Ok(None) => break,
                Err(RespError::Protocol) => {
                    stream.write_all(&encode_error("protocol error")).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

/// Parses the argument vector and routes the command.
///
/// FLUSH is serialized cluster-wide under an exclusive lock so concurrent
/// flushes cannot interleave with each other.
pub async fn dispatch(args: &[Vec<u8>], context: &ServerContext) -> Response {
    let command = match parse_command(args) {
        Ok(command) => command,
        Err(message) => return Response::InvalidCommand(message),
    };
    debug!(command = command.name(), "dispatching");

    if matches!(command, Command::Flush) {
        let manager = Arc::clone(&context.manager);
        let outcome = context
            .locks
            .with_exclusive_lock("cluster:flush", || async move {
                Ok(manager.execute(Command::Flush).await)
            })
            .await;
        return match outcome {
            Ok(response) => response,
            Err(err) => err.into(),
        };
    }

    context.manager.execute(command).await
}

/// Translates wire words into a typed command.
fn parse_command(args: &[Vec<u8>]) -> Result<Command, String> {
    if args.is_empty() {
        return Err("empty command".to_string());
    }
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

    match name.as_str() {
        "GET" => {
            let key = single_key(args, "GET")?;
            Ok(Command::Get { key })
        }
        "SET" => parse_set(args),
        "DEL" => {
            let key = single_key(args, "DEL")?;
            Ok(Command::Del { key })
        }
        "EXISTS" => {
            let key = single_key(args, "EXISTS")?;
            Ok(Command::Exists { key })
        }
        "EXPIRE" => {
            if args.len() != 3 {
                return Err("wrong number of arguments for EXPIRE".to_string());
            }
            Ok(Command::Expire {
                key: utf8_arg(&args[1])?,
                ttl_seconds: int_arg(&args[2])?,
            })
        }
        "TTL" => {
            let key = single_key(args, "TTL")?;
            Ok(Command::Ttl { key })
        }
        "FLUSH" => Ok(Command::Flush),
        "PING" => match args.len() {
            1 => Ok(Command::Ping { payload: None }),
            2 => Ok(Command::Ping {
                payload: Some(Bytes::from(args[1].clone())),
            }),
            _ => Err("wrong number of arguments for PING".to_string()),
        },
        "INFO" => Ok(Command::Info),
        "STATS" => Ok(Command::Stats),
        "CLUSTER_INFO" => Ok(Command::ClusterInfo),
        "CLUSTER_NODES" => Ok(Command::ClusterNodes),
        "CLUSTER_STATS" => Ok(Command::ClusterStats),
        "CLUSTER" => {
            if args.len() != 2 {
                return Err("CLUSTER requires a subcommand".to_string());
            }
            match String::from_utf8_lossy(&args[1]).to_ascii_uppercase().as_str() {
                "INFO" => Ok(Command::ClusterInfo),
                "NODES" => Ok(Command::ClusterNodes),
                "STATS" => Ok(Command::ClusterStats),
                other => Err(format!("unknown CLUSTER subcommand: {other}")),
            }
        }
        other => Err(format!("unknown command: {other}")),
    }
}

/// SET key value [EX seconds] [TYPE tag]
fn parse_set(args: &[Vec<u8>]) -> Result<Command, String> {
    if args.len() < 3 {
        return Err("wrong number of arguments for SET".to_string());
    }
    let key = utf8_arg(&args[1])?;
    let value = Bytes::from(args[2].clone());
    let mut ttl_seconds = -1i64;
    let mut data_type = DataType::String;

    let mut idx = 3;
    while idx < args.len() {
        let option = String::from_utf8_lossy(&args[idx]).to_ascii_uppercase();
        match option.as_str() {
            "EX" => {
                let raw = args.get(idx + 1).ok_or("EX requires seconds")?;
                ttl_seconds = int_arg(raw)?;
                if ttl_seconds < 0 {
                    return Err("EX requires non-negative seconds".to_string());
                }
                idx += 2;
            }
            "TYPE" => {
                let raw = args.get(idx + 1).ok_or("TYPE requires a tag")?;
                let tag = utf8_arg(raw)?;
                data_type =
                    DataType::parse(&tag).ok_or_else(|| format!("unknown data type: {tag}"))?;
                idx += 2;
            }
            other => return Err(format!("unsupported SET option: {other}")),
        }
    }

    Ok(Command::Set {
        key,
        value,
        ttl_seconds,
        data_type,
    })
}

fn single_key(args: &[Vec<u8>], command: &str) -> Result<String, String> {
    if args.len() != 2 {
        return Err(format!("wrong number of arguments for {command}"));
    }
    utf8_arg(&args[1])
}

fn utf8_arg(raw: &[u8]) -> Result<String, String> {
    String::from_utf8(raw.to_vec()).map_err(|_| "argument is not valid utf-8".to_string())
}

fn int_arg(raw: &[u8]) -> Result<i64, String> {
    let text = String::from_utf8_lossy(raw);
    text.parse::<i64>()
        .map_err(|_| format!("invalid integer: {text}"))
}

/// Renders a response as RESP2 bytes.
pub fn encode_response(response: &Response) -> Vec<u8> {
    match response {
        Response::Ok(Payload::None) => encode_simple("OK"),
        Response::Ok(Payload::Bytes(data)) => encode_bulk(data),
        Response::Ok(Payload::Integer(value)) => encode_integer(*value),
        Response::Ok(Payload::Text(text)) => encode_bulk(text.as_bytes()),
        Response::NotFound => b"$-1\r\n".to_vec(),
        Response::InvalidCommand(message) => encode_error(message),
        Response::Error(message) => encode_error(message),
        // A distinct error class so clients can tell timeouts from misses.
        Response::Timeout => b"-TIMEOUT operation timed out\r\n".to_vec(),
    }
}

fn encode_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn encode_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 7);
    buf.extend_from_slice(b"-ERR ");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn encode_integer(value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b":");
    buf.extend_from_slice(value.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn encode_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 16);
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}
