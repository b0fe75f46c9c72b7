//! Client behavior against a scripted node: each test spawns a listener
//! that decodes incoming command frames, asserts on them in order, and
//! answers with raw RESP frames.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use mcache_client::{CacheClient, ClientConfig, ClientError, KeyTtl};

/// Accepts one connection and hands each decoded command to the handler.
fn scripted_node(steps: usize, handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream)) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut inbound = Vec::new();
        for step in 0..steps {
            let args = recv_command(&mut stream, &mut inbound).expect("command");
            handler(step, args, &mut stream);
        }
    });

    addr
}

/// Pulls bytes until the buffer holds one complete command frame.
fn recv_command(
    stream: &mut TcpStream,
    inbound: &mut Vec<u8>,
) -> std::io::Result<Vec<Vec<u8>>> {
    loop {
        if let Some((args, used)) = decode_frame(inbound)? {
            inbound.drain(..used);
            return Ok(args);
        }
        let mut chunk = [0u8; 512];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "eof mid-command",
            ));
        }
        inbound.extend_from_slice(&chunk[..read]);
    }
}

/// Decodes one array-of-bulks frame; `None` while the buffer is incomplete.
fn decode_frame(buf: &[u8]) -> std::io::Result<Option<(Vec<Vec<u8>>, usize)>> {
    let mut pos = 0;
    let count = match header_number(buf, &mut pos, b'*')? {
        Some(count) => count,
        None => return Ok(None),
    };

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len = match header_number(buf, &mut pos, b'$')? {
            Some(len) => len,
            None => return Ok(None),
        };
        if buf.len() < pos + len + 2 {
            return Ok(None);
        }
        args.push(buf[pos..pos + len].to_vec());
        pos += len + 2;
    }
    Ok(Some((args, pos)))
}

/// Reads a `<marker><digits>\r\n` header at `pos`; `None` while incomplete.
fn header_number(buf: &[u8], pos: &mut usize, marker: u8) -> std::io::Result<Option<usize>> {
    let window = &buf[*pos..];
    let end = match window.iter().position(|&b| b == b'\n') {
        Some(end) => end,
        None => return Ok(None),
    };
    let bad = || std::io::Error::new(std::io::ErrorKind::InvalidData, "bad header");
    if end < 2 || window[0] != marker || window[end - 1] != b'\r' {
        return Err(bad());
    }
    let digits = std::str::from_utf8(&window[1..end - 1]).map_err(|_| bad())?;
    let value = digits.parse().map_err(|_| bad())?;
    *pos += end + 1;
    Ok(Some(value))
}

fn reply(stream: &mut TcpStream, frame: &[u8]) {
    stream.write_all(frame).expect("reply");
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut frame = format!("${}\r\n", data.len()).into_bytes();
    frame.extend_from_slice(data);
    frame.extend_from_slice(b"\r\n");
    frame
}

fn client_with_addr(addr: String) -> CacheClient {
    CacheClient::with_config(ClientConfig {
        addr,
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
    })
    .expect("client")
}

#[test]
fn set_get_roundtrip() {
    let addr = scripted_node(2, |step, args, stream| {
        if step == 0 {
            assert_eq!(
                args,
                vec![b"SET".to_vec(), b"key".to_vec(), b"value".to_vec()]
            );
            reply(stream, b"+OK\r\n");
        } else {
            assert_eq!(args, vec![b"GET".to_vec(), b"key".to_vec()]);
            reply(stream, &bulk(b"value"));
        }
    });

    let client = client_with_addr(addr);
    client.set(b"key", b"value").expect("set");
    assert_eq!(client.get(b"key").expect("get"), Some(b"value".to_vec()));
}

#[test]
fn missing_key_is_none() {
    let addr = scripted_node(1, |_, args, stream| {
        assert_eq!(args[0], b"GET");
        reply(stream, b"$-1\r\n");
    });

    let client = client_with_addr(addr);
    assert_eq!(client.get(b"ghost").expect("get"), None);
}

#[test]
fn exists_and_delete() {
    let addr = scripted_node(2, |step, args, stream| {
        if step == 0 {
            assert_eq!(args[0], b"EXISTS");
            reply(stream, b":1\r\n");
        } else {
            assert_eq!(args[0], b"DEL");
            reply(stream, b":1\r\n");
        }
    });

    let client = client_with_addr(addr);
    assert!(client.exists(b"key").expect("exists"));
    assert!(client.delete(b"key").expect("delete"));
}

#[test]
fn ttl_states_decode() {
    let addr = scripted_node(3, |step, args, stream| {
        assert_eq!(args[0], b"TTL");
        match step {
            0 => reply(stream, b":-2\r\n"),
            1 => reply(stream, b":-1\r\n"),
            _ => reply(stream, b":7\r\n"),
        }
    });

    let client = client_with_addr(addr);
    assert_eq!(client.ttl(b"k").expect("ttl"), KeyTtl::Missing);
    assert_eq!(client.ttl(b"k").expect("ttl"), KeyTtl::NoExpiry);
    assert_eq!(
        client.ttl(b"k").expect("ttl"),
        KeyTtl::ExpiresIn(Duration::from_secs(7))
    );
}

#[test]
fn set_with_ttl_sends_ex_option() {
    let addr = scripted_node(1, |_, args, stream| {
        assert_eq!(args[0], b"SET");
        assert_eq!(args[3], b"EX");
        assert_eq!(args[4], b"30");
        reply(stream, b"+OK\r\n");
    });

    let client = client_with_addr(addr);
    client
        .set_with_ttl(b"k", b"v", Duration::from_secs(30))
        .expect("set with ttl");
}

#[test]
fn timeout_error_is_distinct_from_server_error() {
    let addr = scripted_node(2, |step, _, stream| {
        if step == 0 {
            reply(stream, b"-TIMEOUT operation timed out\r\n");
        } else {
            reply(stream, b"-ERR boom\r\n");
        }
    });

    let client = client_with_addr(addr);
    assert!(matches!(client.get(b"k"), Err(ClientError::Timeout)));
    assert!(matches!(client.get(b"k"), Err(ClientError::Server(_))));
}

#[test]
fn flush_and_stats() {
    let addr = scripted_node(2, |step, args, stream| {
        if step == 0 {
            assert_eq!(args[0], b"FLUSH");
            reply(stream, b"+OK\r\n");
        } else {
            assert_eq!(args[0], b"STATS");
            reply(
                stream,
                &bulk(br#"{"hits":0,"misses":0,"evictions":0,"size":0}"#),
            );
        }
    });

    let client = client_with_addr(addr);
    client.flush().expect("flush");
    let stats = client.stats().expect("stats");
    assert!(stats.starts_with(b"{"));
}
