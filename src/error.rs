//! # Client Errors
//!
//! Purpose: One error type for the whole client, split along the fault
//! lines that matter for connection reuse.
//!
//! ## Design Principles
//! 1. **Fatality Is Explicit**: `is_fatal` decides whether a connection
//!    may go back to the pool.
//! 2. **Fail Fast**: Argument errors surface before any bytes are written.
//! 3. **No Swallowing**: Protocol and argument errors always propagate.

use std::io;

use thiserror::Error;

/// Result type for the client.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed call on the client side: odd-length scan input,
    /// unencodable argument value, unknown field tag modifier.
    #[error("bad argument: {0}")]
    Argument(String),

    /// Wire framing is desynchronized or the status token is unknown.
    /// Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Dial, write, read or timeout failure. Fatal to the connection.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Well-formed response whose status token signals a non-success
    /// outcome. The connection stays usable.
    #[error("command failed with status {0:?}")]
    Command(String),

    /// One or more sub-commands in a batch failed; inspect the individual
    /// outcomes to find which.
    #[error("batch: {failed} of {total} commands failed")]
    BatchPartial { failed: usize, total: usize },
}

impl Error {
    /// True when the connection that produced this error must be discarded
    /// instead of being returned to the pool.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Protocol(_))
    }
}
