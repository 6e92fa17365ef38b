//! # Connection and Commands
//!
//! Purpose: Execute SSDB command/response exchanges over one TCP
//! connection, with strict request/response alternation.
//!
//! ## Design Principles
//! 1. **One Exchange In Flight**: `&mut self` on every exchange enforces
//!    exclusive use of a connection.
//! 2. **Sticky Taint**: Any transport or framing fault permanently
//!    disqualifies the connection from pool reuse.
//! 3. **Buffer Reuse**: Encode and line buffers live on the connection to
//!    avoid per-call allocations.
//! 4. **Fail Fast**: Protocol violations surface immediately as errors.

use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::proto::{encode_command, read_reply, Arg};
use crate::reply::{
    Outcome, Reply, STATUS_CLIENT_ERROR, STATUS_ERROR, STATUS_FAIL, STATUS_NOT_FOUND, STATUS_OK,
};
use crate::scan::{scan_struct, Args, Record};

/// Connection and pool configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server address, e.g. "127.0.0.1:8888".
    pub addr: String,
    /// Maximum idle connections kept by the pool. Defaults to twice the
    /// available parallelism, minimum 1.
    pub capacity: Option<usize>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            addr: "127.0.0.1:8888".to_string(),
            capacity: None,
            connect_timeout: Some(Duration::from_secs(30)),
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Single TCP connection to an SSDB server.
///
/// A connection that has seen a transport or framing error is tainted:
/// releasing it closes the socket instead of recycling it.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    tainted: bool,
}

impl Connection {
    /// Dials a standalone (unpooled) connection with default settings.
    pub fn connect(addr: impl Into<String>) -> Result<Self> {
        Connection::dial(&Config {
            addr: addr.into(),
            ..Config::default()
        })
    }

    pub(crate) fn dial(config: &Config) -> Result<Self> {
        let addr = resolve(&config.addr)?;
        debug!(%addr, "dialing ssdb");
        let stream = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            tainted: false,
        })
    }

    /// True once a transport or framing error has been recorded.
    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    /// Applies a deadline to both sides of subsequent exchanges. A timeout
    /// leaves the stream state unknown, so it taints the connection when it
    /// fires.
    pub fn set_deadline(&self, timeout: Option<Duration>) -> Result<()> {
        let stream = self.reader.get_ref();
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Encodes and writes one command as a single buffered write.
    pub fn send(&mut self, args: &[Arg]) -> Result<()> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf)?;

        let stream = self.reader.get_mut();
        if let Err(err) = stream.write_all(&self.write_buf) {
            self.tainted = true;
            return Err(err.into());
        }
        if let Err(err) = self.reader.get_mut().flush() {
            self.tainted = true;
            return Err(err.into());
        }
        Ok(())
    }

    /// Reads one raw response, status token included.
    pub fn recv(&mut self) -> Result<Vec<String>> {
        match read_reply(&mut self.reader, &mut self.line_buf) {
            Ok(blocks) => Ok(blocks),
            Err(err) => {
                if err.is_fatal() {
                    self.tainted = true;
                }
                Err(err)
            }
        }
    }

    /// Executes one command and interprets the status token.
    ///
    /// `"ok"` strips the token and returns the payload; the other known
    /// tokens become [`Error::Command`] and leave the connection reusable;
    /// an unknown token is a protocol error and taints the connection.
    pub fn execute(&mut self, args: &[Arg]) -> Result<Reply> {
        self.send(args)?;
        let mut blocks = self.recv()?;
        if blocks.is_empty() {
            self.tainted = true;
            return Err(Error::Protocol("empty response".to_string()));
        }
        let status = blocks.remove(0);
        match status.as_str() {
            STATUS_OK => Ok(Reply(blocks)),
            STATUS_NOT_FOUND | STATUS_ERROR | STATUS_FAIL | STATUS_CLIENT_ERROR => {
                Err(Error::Command(status))
            }
            _ => {
                self.tainted = true;
                Err(Error::Protocol(format!("unrecognized status {status:?}")))
            }
        }
    }

    /// Executes a command, mapping any failure to an empty reply.
    pub fn execute_lenient(&mut self, args: &[Arg]) -> Reply {
        self.execute(args).unwrap_or_default()
    }

    /// Executes each sub-command serially over this connection.
    ///
    /// All per-command outcomes are returned even when some fail; the
    /// second element aggregates the failure count when non-zero.
    pub fn execute_batch(&mut self, commands: &[Vec<Arg>]) -> (Vec<Outcome>, Option<Error>) {
        let mut outcomes = Vec::with_capacity(commands.len());
        let mut failed = 0;
        for args in commands {
            let outcome = self.execute(args);
            if outcome.is_err() {
                failed += 1;
            }
            outcomes.push(outcome);
        }
        let err = (failed > 0).then(|| Error::BatchPartial {
            failed,
            total: commands.len(),
        });
        (outcomes, err)
    }

    /// Fetches a value. Returns `Ok(None)` when the key is missing.
    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        match self.execute(&[Arg::from("get"), Arg::from(key)]) {
            Ok(mut reply) => {
                if reply.0.is_empty() {
                    return Err(Error::Protocol("get reply carries no value".to_string()));
                }
                Ok(Some(reply.0.swap_remove(0)))
            }
            Err(Error::Command(status)) if status == STATUS_NOT_FOUND => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Stores a value under a key.
    pub fn set(&mut self, key: &str, value: impl Into<Arg>) -> Result<()> {
        self.execute(&[Arg::from("set"), Arg::from(key), value.into()])?;
        Ok(())
    }

    /// Deletes a key. Returns false when the key did not exist.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        match self.execute(&[Arg::from("del"), Arg::from(key)]) {
            Ok(_) => Ok(true),
            Err(Error::Command(status)) if status == STATUS_NOT_FOUND => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Atomically increments a counter key and returns the new value.
    pub fn incr(&mut self, key: &str) -> Result<i64> {
        let reply = self.execute(&[Arg::from("incr"), Arg::from(key)])?;
        Ok(reply.int())
    }

    /// Writes a record's fields into a hash. A non-empty `keys` slice
    /// restricts the write to those wire names.
    pub fn multi_hset<T: Record>(&mut self, name: &str, record: &T, keys: &[&str]) -> Result<()> {
        let args = Args::new()
            .add("multi_hset")
            .add(name)
            .add_flat_struct(record, keys)?;
        self.execute(&args)?;
        Ok(())
    }

    /// Reads hash fields into a record: `hgetall` when `keys` is empty,
    /// `multi_hget` for a subset.
    pub fn multi_hget<T: Record>(&mut self, name: &str, dest: &mut T, keys: &[&str]) -> Result<()> {
        let reply = if keys.is_empty() {
            self.execute(&[Arg::from("hgetall"), Arg::from(name)])?
        } else {
            let mut args = vec![Arg::from("multi_hget"), Arg::from(name)];
            args.extend(keys.iter().map(|key| Arg::from(*key)));
            self.execute(&args)?
        };
        scan_struct(&reply, dest)
    }

    /// Shuts the transport down. Errors are returned but never retried.
    pub fn close(self) -> Result<()> {
        self.reader.get_ref().shutdown(Shutdown::Both)?;
        Ok(())
    }
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Argument(format!("address {addr:?} did not resolve")))
}
