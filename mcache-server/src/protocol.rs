//! # RESP2 Request Parsing
//!
//! Incremental parser for client frames: an array of bulk strings per
//! command. Incomplete input consumes nothing and asks for more bytes;
//! malformed framing fails the connection immediately.

use bytes::{Buf, BytesMut};

/// Framing violation; the connection is dropped after reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    Protocol,
}

/// Incremental RESP2 command parser.
///
/// `parse` returns `Ok(Some(args))` for one complete command, `Ok(None)`
/// when the buffer holds only a partial frame, and `Err` on bad framing.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let mut pos = 0;

        let header = match read_line(buf, &mut pos)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if header.first() != Some(&b'*') {
            return Err(RespError::Protocol);
        }
        let count = parse_len(&header[1..])?;

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let bulk_header = match read_line(buf, &mut pos)? {
                Some(line) => line,
                None => return Ok(None),
            };
            if bulk_header.first() != Some(&b'$') {
                return Err(RespError::Protocol);
            }
            let len = parse_len(&bulk_header[1..])?;

            if buf.len() < pos + len + 2 {
                return Ok(None);
            }
            let data = buf[pos..pos + len].to_vec();
            if &buf[pos + len..pos + len + 2] != b"\r\n" {
                return Err(RespError::Protocol);
            }
            pos += len + 2;
            args.push(data);
        }

        buf.advance(pos);
        Ok(Some(args))
    }
}

/// Reads one CRLF-terminated line starting at `*pos`, returning its payload
/// and advancing the cursor. `None` when the line is not complete yet.
fn read_line(buf: &BytesMut, pos: &mut usize) -> Result<Option<Vec<u8>>, RespError> {
    let window = &buf[*pos..];
    let newline = match window.iter().position(|&b| b == b'\n') {
        Some(idx) => idx,
        None => return Ok(None),
    };
    if newline == 0 || window[newline - 1] != b'\r' {
        return Err(RespError::Protocol);
    }
    let line = window[..newline - 1].to_vec();
    *pos += newline + 1;
    Ok(Some(line))
}

fn parse_len(data: &[u8]) -> Result<usize, RespError> {
    if data.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}
