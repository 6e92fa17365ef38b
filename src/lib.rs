//! # SSDB Sync Client
//!
//! Purpose: Provide a lightweight, synchronous SSDB client with connection
//! pooling and typed struct mapping for hash-style commands.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Sticky Errors**: A connection that saw a transport or framing fault
//!    is closed on release, never recycled.
//! 3. **Minimal Allocation**: Reuse buffers for wire framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse the length-prefixed frames
//!    explicitly for correctness.
//!
//! ```no_run
//! use ssdb_client::{Arg, Pool};
//!
//! let pool = Pool::connect("127.0.0.1:8888");
//! let mut conn = pool.acquire()?;
//! conn.set("greeting", "hello")?;
//! let value = conn.get("greeting")?;
//! assert_eq!(value.as_deref(), Some("hello"));
//! let reply = conn.execute(&[Arg::from("hsize"), Arg::from("h")])?;
//! println!("{}", reply.int());
//! # Ok::<(), ssdb_client::Error>(())
//! ```

mod client;
mod error;
mod pool;
mod proto;
mod reply;
mod scan;

pub use client::{Config, Connection};
pub use error::{Error, Result};
pub use pool::{Pool, PooledConn};
pub use proto::Arg;
pub use reply::{
    make_key, Entry, Outcome, Reply, STATUS_CLIENT_ERROR, STATUS_ERROR, STATUS_FAIL,
    STATUS_NOT_FOUND, STATUS_OK,
};
pub use scan::{scan_struct, Args, FieldDef, FieldKind, Record, WireField};
