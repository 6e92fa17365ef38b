//! # SSDB Wire Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server responses for the
//! length-prefixed SSDB text protocol, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Responses are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Closed Argument Union**: Every encodable value is one `Arg` variant.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.
//!
//! Framing is symmetric for commands and responses: zero or more blocks,
//! each `<decimal-length>\n<raw-bytes>\n`, terminated by one empty line.

use std::io::{self, BufRead};

use serde::Serialize;

use crate::error::{Error, Result};

/// One command argument.
///
/// `Repeated` is the deliberate exception to one-value-one-block: each
/// element is framed as its own block. `Opaque` falls back to JSON and is
/// the only variant whose encoding can fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Bytes(Vec<u8>),
    Repeated(Vec<String>),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Null,
    Opaque(serde_json::Value),
}

impl Arg {
    /// Wraps any serializable value as an opaque JSON-encoded argument.
    pub fn opaque<T: Serialize>(value: &T) -> Result<Arg> {
        let json = serde_json::to_value(value)
            .map_err(|err| Error::Argument(format!("unencodable argument: {err}")))?;
        Ok(Arg::Opaque(json))
    }

    /// True when the argument renders as an empty block.
    pub(crate) fn is_empty_value(&self) -> bool {
        match self {
            Arg::Str(s) => s.is_empty(),
            Arg::Bytes(b) => b.is_empty(),
            Arg::Repeated(items) => items.is_empty(),
            Arg::Null => true,
            _ => false,
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Arg {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Arg {
        Arg::Str(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Arg {
        Arg::Str(value.clone())
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Arg {
        Arg::Bytes(value)
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Arg {
        Arg::Bytes(value.to_vec())
    }
}

impl From<Vec<String>> for Arg {
    fn from(value: Vec<String>) -> Arg {
        Arg::Repeated(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Arg {
        Arg::Bool(value)
    }
}

impl From<f32> for Arg {
    fn from(value: f32) -> Arg {
        Arg::Float(value as f64)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Arg {
        Arg::Float(value)
    }
}

macro_rules! arg_from_int {
    ($variant:ident as $wide:ty: $($ty:ty),*) => {
        $(impl From<$ty> for Arg {
            fn from(value: $ty) -> Arg {
                Arg::$variant(value as $wide)
            }
        })*
    };
}

arg_from_int!(Int as i64: i8, i16, i32, i64, isize);
arg_from_int!(Uint as u64: u8, u16, u32, u64, usize);

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Arg {
        match value {
            Some(inner) => inner.into(),
            None => Arg::Null,
        }
    }
}

/// Encodes a full command into the provided buffer, including the trailing
/// empty line. Nothing is written to the transport by this function, so an
/// argument error leaves the wire untouched.
pub(crate) fn encode_command(args: &[Arg], out: &mut Vec<u8>) -> Result<()> {
    for arg in args {
        match arg {
            Arg::Str(s) => write_block(out, s.as_bytes()),
            Arg::Bytes(b) => write_block(out, b),
            Arg::Repeated(items) => {
                for item in items {
                    write_block(out, item.as_bytes());
                }
            }
            Arg::Int(v) => write_block(out, v.to_string().as_bytes()),
            Arg::Uint(v) => write_block(out, v.to_string().as_bytes()),
            Arg::Float(v) => write_block(out, format!("{v:.6}").as_bytes()),
            Arg::Bool(v) => write_block(out, if *v { b"1" } else { b"0" }),
            Arg::Null => write_block(out, b""),
            Arg::Opaque(v) => {
                let json = serde_json::to_string(v)
                    .map_err(|err| Error::Argument(format!("unencodable argument: {err}")))?;
                write_block(out, json.as_bytes());
            }
        }
    }
    out.push(b'\n');
    Ok(())
}

fn write_block(out: &mut Vec<u8>, data: &[u8]) {
    push_usize(out, data.len());
    out.push(b'\n');
    out.extend_from_slice(data);
    out.push(b'\n');
}

/// Reads one full response from the buffered reader: the ordered block
/// sequence up to the terminating empty line. Status interpretation is the
/// caller's business.
pub(crate) fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> Result<Vec<String>> {
    let mut blocks = Vec::new();
    loop {
        read_line(reader, line_buf)?;
        if line_buf.is_empty() {
            if blocks.is_empty() {
                // Blank before any block is a skippable continuation.
                continue;
            }
            return Ok(blocks);
        }

        let size = parse_len(line_buf)?;
        let mut data = vec![0u8; size + 1];
        reader.read_exact(&mut data)?;
        if data[size] != b'\n' {
            return Err(Error::Protocol("missing block terminator".to_string()));
        }
        data.truncate(size);
        blocks.push(String::from_utf8_lossy(&data).into_owned());
    }
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 || buf.last() != Some(&b'\n') {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-response",
        )));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(())
}

fn parse_len(line: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::Protocol("block length is not ASCII".to_string()))?;
    match text.parse::<i64>() {
        Ok(v) if v >= 0 => Ok(v as usize),
        Ok(v) => Err(Error::Protocol(format!("negative block length {v}"))),
        Err(_) => Err(Error::Protocol(format!("bad block length {text:?}"))),
    }
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
